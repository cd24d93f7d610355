use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use freightdesk_db::{migrations, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: HealthCheck,
    pub schema: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let schema = if database.is_ready() {
        schema_check(&state.db_pool).await
    } else {
        HealthCheck::degraded("skipped: database unreachable")
    };
    let ready = database.is_ready() && schema.is_ready();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        schema,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck::ready("database query succeeded"),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn schema_check(pool: &DbPool) -> HealthCheck {
    let expected = migrations::expected_count();
    match migrations::applied_count(pool).await {
        Ok(applied) if usize::try_from(applied).is_ok_and(|applied| applied >= expected) => {
            HealthCheck::ready(format!("{applied} migrations applied"))
        }
        Ok(applied) => {
            HealthCheck::degraded(format!("{applied} of {expected} migrations applied"))
        }
        Err(error) => HealthCheck::degraded(format!("migration table unavailable: {error}")),
    }
}
