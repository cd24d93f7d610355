use chrono::Utc;
use serde::Serialize;
use sqlx::Executor;
use uuid::Uuid;

use crate::connection::DbPool;
use crate::repositories::{format_timestamp, RepositoryError};

/// Catalog rows shipped in the demo dataset.
const SEED_SERVICES: &[SeedService] = &[
    SeedService { id: 1, name: "Фура 20 т", base_price: "1000", base_days: 3 },
    SeedService { id: 2, name: "Газель", base_price: "500", base_days: 1 },
    SeedService { id: 3, name: "Рефрижератор", base_price: "2500", base_days: 4 },
    SeedService { id: 4, name: "Контейнер 40 фут", base_price: "4000", base_days: 7 },
];

pub const SEED_MODERATOR_LOGIN: &str = "moderator";

/// Demo catalog plus one moderator account.
///
/// Loading is idempotent: services use fixed ids and the moderator is keyed
/// by login, so a second load leaves existing rows untouched.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(
        pool: &DbPool,
        moderator_password_hash: &str,
    ) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        let moderator = sqlx::query(
            "INSERT OR IGNORE INTO app_user
                 (uuid, login, email, name, phone, role, password_hash, created_at)
             VALUES (?, ?, '', 'Moderator', '', 'manager', ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(SEED_MODERATOR_LOGIN)
        .bind(moderator_password_hash)
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SeedResult {
            services: SEED_SERVICES.iter().map(|service| service.name).collect(),
            moderator_login: SEED_MODERATOR_LOGIN,
            moderator_created: moderator.rows_affected() == 1,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for service in SEED_SERVICES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM transport_service
                     WHERE id = ?1 AND name = ?2 AND base_price = ?3 AND base_days = ?4
                       AND deleted_at IS NULL)",
            )
            .bind(service.id)
            .bind(service.name)
            .bind(service.base_price)
            .bind(service.base_days)
            .fetch_one(pool)
            .await?;
            checks.push((service.name, present == 1));
        }

        let moderator: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM app_user WHERE login = ?1 AND role IN ('manager', 'admin'))",
        )
        .bind(SEED_MODERATOR_LOGIN)
        .fetch_one(pool)
        .await?;
        checks.push(("moderator-account", moderator == 1));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedService {
    id: i64,
    name: &'static str,
    base_price: &'static str,
    base_days: i64,
}

#[derive(Debug, Serialize)]
pub struct SeedResult {
    pub services: Vec<&'static str>,
    pub moderator_login: &'static str,
    pub moderator_created: bool,
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{SqlUserRepository, UserRepository};
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!DemoSeedDataset::SQL.is_empty());
        for service in SEED_SERVICES {
            assert!(DemoSeedDataset::SQL.contains(service.name), "{} missing", service.name);
        }
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let empty = DemoSeedDataset::verify(&pool).await.expect("verify empty database");
        assert!(!empty.all_present);

        let first = DemoSeedDataset::load(&pool, "hash-1").await.expect("load seed");
        let first_verification = DemoSeedDataset::verify(&pool).await.expect("verify seed");
        assert!(first_verification.all_present);
        assert!(first.moderator_created);
        assert_eq!(first.services.len(), 4);

        let second = DemoSeedDataset::load(&pool, "hash-2").await.expect("reload seed");
        let second_verification = DemoSeedDataset::verify(&pool).await.expect("re-verify seed");
        assert!(!second.moderator_created);
        assert_eq!(first_verification.checks, second_verification.checks);

        let moderator = SqlUserRepository::new(pool.clone())
            .find_by_login(SEED_MODERATOR_LOGIN)
            .await
            .expect("find moderator")
            .expect("moderator exists");
        assert_eq!(moderator.password_hash, "hash-1");
        assert!(moderator.role.is_moderator());
    }
}
