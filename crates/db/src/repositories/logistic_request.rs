use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, Transaction};
use std::str::FromStr;
use tracing::warn;

use freightdesk_core::domain::logistic_request::{
    CargoSpec, DraftEdit, LineItemInput, LineItemUpdate, LogisticRequest, LogisticRequestId,
    RequestFilter, RequestLineItem, RequestStatus, Resolution, Route, Submission,
};
use freightdesk_core::domain::transport_service::TransportServiceId;
use freightdesk_core::domain::user::UserId;
use freightdesk_core::quoting::aggregate::RequestTotals;
use freightdesk_core::quoting::calculator::{DeliveryCalculator, DeliveryQuote};

use super::transport_service::service_from_row;
use super::{
    decode_error, format_timestamp, parse_optional_timestamp, parse_timestamp,
    LogisticRequestRepository, RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, status, from_city, to_city, length, width, height, weight, \
     total_cost, total_days, creator_id, moderator_id, created_at, formed_at, completed_at";

pub struct SqlLogisticRequestRepository {
    pool: DbPool,
    calculator: DeliveryCalculator,
}

impl SqlLogisticRequestRepository {
    pub fn new(pool: DbPool, calculator: DeliveryCalculator) -> Self {
        Self { pool, calculator }
    }

    /// Write transactions take the database write lock up front. A deferred
    /// transaction that has already read cannot wait for the lock in WAL mode
    /// and fails with SQLITE_BUSY instead.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, RepositoryError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Re-prices the line items after a draft edit so the stored totals keep
    /// matching them. Lines that cannot be quoted yet, such as those of a cart
    /// without a route, contribute nothing.
    async fn refresh_totals(
        &self,
        conn: &mut SqliteConnection,
        request_id: LogisticRequestId,
        route: &Route,
        cargo: &CargoSpec,
    ) -> Result<(), RepositoryError> {
        let (priced, _) = self.quote_line_items(conn, request_id, route, cargo).await?;
        let totals = RequestTotals::for_cargo(
            *cargo,
            priced.iter().map(|(quantity, quote)| (*quantity, quote)),
        )?;

        sqlx::query("UPDATE logistic_request SET total_cost = ?, total_days = ? WHERE id = ?")
            .bind(totals.total_cost.to_string())
            .bind(i64::from(totals.total_days))
            .bind(request_id.0)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Quotes every line item of `request_id` for the given route and cargo.
    /// Items whose quote is invalid are returned separately.
    async fn quote_line_items(
        &self,
        conn: &mut SqliteConnection,
        request_id: LogisticRequestId,
        route: &Route,
        cargo: &CargoSpec,
    ) -> Result<(Vec<(u32, DeliveryQuote)>, Vec<String>), RepositoryError> {
        let rows = sqlx::query(
            "SELECT ts.id, ts.name, ts.description, ts.base_price, ts.base_days, ts.volume_rate,
                    ts.weight_rate, ts.distance_rate, ts.image_url, ts.created_at, ts.deleted_at,
                    lrs.quantity
             FROM logistic_request_service lrs
             JOIN transport_service ts ON ts.id = lrs.service_id
             WHERE lrs.request_id = ?
             ORDER BY lrs.sort_order ASC, lrs.service_id ASC",
        )
        .bind(request_id.0)
        .fetch_all(&mut *conn)
        .await?;

        let mut priced = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        for row in &rows {
            let service = service_from_row(row)?;
            let quantity = decode_quantity(row)?;
            let quote = self.calculator.calculate(Some(&service), route, cargo);
            if quote.is_valid {
                priced.push((quantity, quote));
            } else {
                rejected.push(format!(
                    "{}: {}",
                    service.name,
                    quote.error_message.unwrap_or_default()
                ));
            }
        }
        Ok((priced, rejected))
    }
}

/// Columns needed to check preconditions before a state-changing write.
struct RequestState {
    status: RequestStatus,
    creator_id: UserId,
    route: Route,
    cargo: CargoSpec,
}

impl RequestState {
    fn require_owner(&self, creator_id: UserId) -> Result<(), RepositoryError> {
        if self.creator_id != creator_id {
            return Err(RepositoryError::Forbidden(
                "only the creator can change this request".to_string(),
            ));
        }
        Ok(())
    }

    fn require_draft(&self) -> Result<(), RepositoryError> {
        if self.status != RequestStatus::Draft {
            return Err(RepositoryError::Precondition(format!(
                "request is {}, only drafts can be changed",
                self.status
            )));
        }
        Ok(())
    }
}

fn decode_status(value: &str) -> Result<RequestStatus, RepositoryError> {
    RequestStatus::from_str(value).map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn decode_quantity(row: &SqliteRow) -> Result<u32, RepositoryError> {
    let quantity: i64 = row.try_get("quantity").map_err(decode_error)?;
    u32::try_from(quantity)
        .map_err(|_| RepositoryError::Decode(format!("invalid quantity {quantity}")))
}

fn route_and_cargo_from_row(row: &SqliteRow) -> Result<(Route, CargoSpec), RepositoryError> {
    let route = Route {
        from_city: row.try_get("from_city").map_err(decode_error)?,
        to_city: row.try_get("to_city").map_err(decode_error)?,
    };
    let cargo = CargoSpec {
        length: row.try_get("length").map_err(decode_error)?,
        width: row.try_get("width").map_err(decode_error)?,
        height: row.try_get("height").map_err(decode_error)?,
        weight: row.try_get("weight").map_err(decode_error)?,
    };
    Ok((route, cargo))
}

fn request_from_row(row: &SqliteRow) -> Result<LogisticRequest, RepositoryError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let total_cost: String = row.try_get("total_cost").map_err(decode_error)?;
    let total_days: i64 = row.try_get("total_days").map_err(decode_error)?;
    let moderator_id: Option<i64> = row.try_get("moderator_id").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let (route, cargo) = route_and_cargo_from_row(row)?;

    Ok(LogisticRequest {
        id: LogisticRequestId(row.try_get("id").map_err(decode_error)?),
        status: decode_status(&status)?,
        route,
        cargo,
        total_cost: Decimal::from_str(&total_cost)
            .map_err(|error| RepositoryError::Decode(format!("invalid total_cost: {error}")))?,
        total_days: u32::try_from(total_days)
            .map_err(|_| RepositoryError::Decode(format!("invalid total_days {total_days}")))?,
        creator_id: UserId(row.try_get("creator_id").map_err(decode_error)?),
        moderator_id: moderator_id.map(UserId),
        created_at: parse_timestamp(&created_at)?,
        formed_at: parse_optional_timestamp(row.try_get("formed_at").map_err(decode_error)?)?,
        completed_at: parse_optional_timestamp(
            row.try_get("completed_at").map_err(decode_error)?,
        )?,
        items: Vec::new(),
    })
}

async fn fetch_state(
    conn: &mut SqliteConnection,
    request_id: LogisticRequestId,
) -> Result<RequestState, RepositoryError> {
    let row = sqlx::query(
        "SELECT status, creator_id, from_city, to_city, length, width, height, weight
         FROM logistic_request
         WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(request_id.0)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| RepositoryError::not_found("logistic request", request_id))?;

    let status: String = row.try_get("status").map_err(decode_error)?;
    let (route, cargo) = route_and_cargo_from_row(&row)?;
    Ok(RequestState {
        status: decode_status(&status)?,
        creator_id: UserId(row.try_get("creator_id").map_err(decode_error)?),
        route,
        cargo,
    })
}

async fn fetch_items(
    conn: &mut SqliteConnection,
    request_id: LogisticRequestId,
) -> Result<Vec<RequestLineItem>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT lrs.service_id, ts.name AS service_name, lrs.quantity, lrs.sort_order, lrs.comment
         FROM logistic_request_service lrs
         JOIN transport_service ts ON ts.id = lrs.service_id
         WHERE lrs.request_id = ?
         ORDER BY lrs.sort_order ASC, lrs.service_id ASC",
    )
    .bind(request_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(RequestLineItem {
                service_id: TransportServiceId(row.try_get("service_id").map_err(decode_error)?),
                service_name: row.try_get("service_name").map_err(decode_error)?,
                quantity: decode_quantity(row)?,
                sort_order: row.try_get("sort_order").map_err(decode_error)?,
                comment: row.try_get("comment").map_err(decode_error)?,
            })
        })
        .collect()
}

async fn require_live_service(
    conn: &mut SqliteConnection,
    service_id: TransportServiceId,
) -> Result<(), RepositoryError> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT id FROM transport_service WHERE id = ? AND deleted_at IS NULL")
            .bind(service_id.0)
            .fetch_optional(&mut *conn)
            .await?;
    exists.map(|_| ()).ok_or_else(|| RepositoryError::not_found("transport service", service_id.0))
}

/// Adds one unit of `service_id` to the request, appending a new line at the
/// end of the sort order when the service is not on the request yet.
async fn increment_line_item(
    conn: &mut SqliteConnection,
    request_id: LogisticRequestId,
    service_id: TransportServiceId,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO logistic_request_service (request_id, service_id, quantity, sort_order)
         VALUES (?, ?, 1, (SELECT COALESCE(MAX(sort_order), 0) + 1
                           FROM logistic_request_service WHERE request_id = ?))
         ON CONFLICT(request_id, service_id) DO UPDATE SET quantity = quantity + 1",
    )
    .bind(request_id.0)
    .bind(service_id.0)
    .bind(request_id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_totals(
    conn: &mut SqliteConnection,
    request_id: LogisticRequestId,
    totals: &RequestTotals,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE logistic_request
         SET length = ?, width = ?, height = ?, weight = ?, total_cost = ?, total_days = ?
         WHERE id = ?",
    )
    .bind(totals.cargo.length)
    .bind(totals.cargo.width)
    .bind(totals.cargo.height)
    .bind(totals.cargo.weight)
    .bind(totals.total_cost.to_string())
    .bind(i64::from(totals.total_days))
    .bind(request_id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn same_city(left: &str, right: &str) -> bool {
    left.trim().to_lowercase() == right.trim().to_lowercase()
}

#[async_trait::async_trait]
impl LogisticRequestRepository for SqlLogisticRequestRepository {
    async fn create_request(
        &self,
        items: &[LineItemInput],
        creator_id: UserId,
    ) -> Result<LogisticRequestId, RepositoryError> {
        let Some(first) = items.first() else {
            return Err(RepositoryError::Validation("no items provided".to_string()));
        };

        // The request row keeps a single route; differing item routes are
        // still quoted individually.
        let mixed_routes = items.iter().any(|item| {
            !same_city(&item.from_city, &first.from_city) || !same_city(&item.to_city, &first.to_city)
        });
        if mixed_routes {
            warn!(
                event_name = "db.logistic_request.mixed_routes",
                creator_id = creator_id.0,
                item_count = items.len(),
                "line items use different routes; request keeps the first item's route"
            );
        }

        let mut tx = self.begin_write().await?;

        let inserted = sqlx::query(
            "INSERT INTO logistic_request (status, is_cart, from_city, to_city, creator_id, created_at)
             VALUES ('draft', 0, ?, ?, ?, ?)",
        )
        .bind(first.from_city.trim())
        .bind(first.to_city.trim())
        .bind(creator_id.0)
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?;
        let request_id = LogisticRequestId(inserted.last_insert_rowid());

        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query(
                "SELECT id, name, description, base_price, base_days, volume_rate, weight_rate,
                        distance_rate, image_url, created_at, deleted_at
                 FROM transport_service
                 WHERE id = ? AND deleted_at IS NULL",
            )
            .bind(item.service_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepositoryError::not_found("transport service", item.service_id.0))?;
            let service = service_from_row(&row)?;

            let cargo = item.cargo();
            let quote = self.calculator.calculate(Some(&service), &item.route(), &cargo);
            if !quote.is_valid {
                return Err(RepositoryError::Validation(
                    quote.error_message.unwrap_or_else(|| "invalid line item".to_string()),
                ));
            }

            increment_line_item(&mut tx, request_id, service.id).await?;
            priced.push((cargo, quote));
        }

        let totals =
            RequestTotals::from_quotes(priced.iter().map(|(cargo, quote)| (cargo, quote)))?;
        write_totals(&mut tx, request_id, &totals).await?;

        tx.commit().await?;
        Ok(request_id)
    }

    async fn ensure_draft(&self, creator_id: UserId) -> Result<LogisticRequestId, RepositoryError> {
        let mut tx = self.begin_write().await?;

        sqlx::query(
            "INSERT OR IGNORE INTO logistic_request (status, is_cart, creator_id, created_at)
             VALUES ('draft', 1, ?, ?)",
        )
        .bind(creator_id.0)
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM logistic_request
             WHERE creator_id = ? AND is_cart = 1 AND status = 'draft' AND deleted_at IS NULL",
        )
        .bind(creator_id.0)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LogisticRequestId(id))
    }

    async fn find_draft(
        &self,
        creator_id: UserId,
    ) -> Result<Option<LogisticRequestId>, RepositoryError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM logistic_request
             WHERE creator_id = ? AND is_cart = 1 AND status = 'draft' AND deleted_at IS NULL",
        )
        .bind(creator_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(LogisticRequestId))
    }

    async fn add_service_to_draft(
        &self,
        request_id: LogisticRequestId,
        service_id: TransportServiceId,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.begin_write().await?;

        let state = fetch_state(&mut tx, request_id).await?;
        state.require_draft()?;
        require_live_service(&mut tx, service_id).await?;
        increment_line_item(&mut tx, request_id, service_id).await?;
        self.refresh_totals(&mut tx, request_id, &state.route, &state.cargo).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_service_from_draft(
        &self,
        request_id: LogisticRequestId,
        service_id: TransportServiceId,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.begin_write().await?;

        let state = fetch_state(&mut tx, request_id).await?;
        state.require_draft()?;

        let decremented = sqlx::query(
            "UPDATE logistic_request_service SET quantity = quantity - 1
             WHERE request_id = ? AND service_id = ? AND quantity > 1",
        )
        .bind(request_id.0)
        .bind(service_id.0)
        .execute(&mut *tx)
        .await?;

        if decremented.rows_affected() == 0 {
            let deleted = sqlx::query(
                "DELETE FROM logistic_request_service WHERE request_id = ? AND service_id = ?",
            )
            .bind(request_id.0)
            .bind(service_id.0)
            .execute(&mut *tx)
            .await?;
            if deleted.rows_affected() == 0 {
                return Err(RepositoryError::not_found(
                    "line item",
                    format!("{request_id}/{}", service_id.0),
                ));
            }
        }
        self.refresh_totals(&mut tx, request_id, &state.route, &state.cargo).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_line_item(
        &self,
        request_id: LogisticRequestId,
        service_id: TransportServiceId,
        update: &LineItemUpdate,
    ) -> Result<(), RepositoryError> {
        update.validate()?;
        let mut tx = self.begin_write().await?;

        let state = fetch_state(&mut tx, request_id).await?;
        state.require_draft()?;

        let updated = sqlx::query(
            "UPDATE logistic_request_service SET quantity = ?, sort_order = ?, comment = ?
             WHERE request_id = ? AND service_id = ?",
        )
        .bind(i64::from(update.quantity))
        .bind(update.sort_order)
        .bind(update.comment.trim())
        .bind(request_id.0)
        .bind(service_id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::not_found(
                "line item",
                format!("{request_id}/{}", service_id.0),
            ));
        }
        self.refresh_totals(&mut tx, request_id, &state.route, &state.cargo).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn clear_draft(&self, creator_id: UserId) -> Result<(), RepositoryError> {
        let Some(draft_id) = self.find_draft(creator_id).await? else {
            return Ok(());
        };
        let mut tx = self.begin_write().await?;
        let state = fetch_state(&mut tx, draft_id).await?;

        sqlx::query("DELETE FROM logistic_request_service WHERE request_id = ?")
            .bind(draft_id.0)
            .execute(&mut *tx)
            .await?;
        self.refresh_totals(&mut tx, draft_id, &state.route, &state.cargo).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn draft_quantity_sum(
        &self,
        request_id: LogisticRequestId,
    ) -> Result<u32, RepositoryError> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0) FROM logistic_request_service WHERE request_id = ?",
        )
        .bind(request_id.0)
        .fetch_one(&self.pool)
        .await?;
        u32::try_from(sum).map_err(|_| RepositoryError::Decode(format!("invalid quantity sum {sum}")))
    }

    async fn form_request(
        &self,
        request_id: LogisticRequestId,
        creator_id: UserId,
        submission: &Submission,
    ) -> Result<LogisticRequest, RepositoryError> {
        submission.validate()?;
        let mut tx = self.begin_write().await?;

        let state = fetch_state(&mut tx, request_id).await?;
        state.require_owner(creator_id)?;
        state.status.transition_to(RequestStatus::Formed)?;

        let (priced, rejected) =
            self.quote_line_items(&mut tx, request_id, &submission.route, &submission.cargo).await?;
        if let Some(reason) = rejected.into_iter().next() {
            return Err(RepositoryError::Validation(reason));
        }
        if priced.is_empty() {
            return Err(RepositoryError::Validation(
                "request must contain at least one transport service".to_string(),
            ));
        }
        let totals = RequestTotals::for_cargo(
            submission.cargo,
            priced.iter().map(|(quantity, quote)| (*quantity, quote)),
        )?;

        let updated = sqlx::query(
            "UPDATE logistic_request
             SET status = 'formed', from_city = ?, to_city = ?, length = ?, width = ?, height = ?,
                 weight = ?, total_cost = ?, total_days = ?, formed_at = ?
             WHERE id = ? AND status = 'draft' AND deleted_at IS NULL",
        )
        .bind(submission.route.from_city.trim())
        .bind(submission.route.to_city.trim())
        .bind(totals.cargo.length)
        .bind(totals.cargo.width)
        .bind(totals.cargo.height)
        .bind(totals.cargo.weight)
        .bind(totals.total_cost.to_string())
        .bind(i64::from(totals.total_days))
        .bind(format_timestamp(Utc::now()))
        .bind(request_id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Precondition(
                "request is no longer a draft".to_string(),
            ));
        }

        tx.commit().await?;
        self.find_by_id(request_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("logistic request", request_id))
    }

    async fn complete_request(
        &self,
        request_id: LogisticRequestId,
        moderator_id: UserId,
        resolution: Resolution,
    ) -> Result<LogisticRequest, RepositoryError> {
        let mut tx = self.begin_write().await?;

        let state = fetch_state(&mut tx, request_id).await?;
        let next = state.status.transition_to(RequestStatus::from(resolution))?;

        let mut query_builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("UPDATE logistic_request SET status = ");
        query_builder.push_bind(next.as_str());
        query_builder.push(", moderator_id = ");
        query_builder.push_bind(moderator_id.0);
        query_builder.push(", completed_at = ");
        query_builder.push_bind(format_timestamp(Utc::now()));

        if resolution == Resolution::Completed {
            let (priced, rejected) =
                self.quote_line_items(&mut tx, request_id, &state.route, &state.cargo).await?;
            if !rejected.is_empty() {
                warn!(
                    event_name = "db.logistic_request.recompute_skipped",
                    request_id = request_id.0,
                    skipped = rejected.len(),
                    "line items no longer quote cleanly and were left out of totals"
                );
            }
            let totals = RequestTotals::for_cargo(
                state.cargo,
                priced.iter().map(|(quantity, quote)| (*quantity, quote)),
            )?;
            query_builder.push(", total_cost = ");
            query_builder.push_bind(totals.total_cost.to_string());
            query_builder.push(", total_days = ");
            query_builder.push_bind(i64::from(totals.total_days));
        }

        query_builder.push(" WHERE id = ");
        query_builder.push_bind(request_id.0);
        query_builder.push(" AND status = 'formed' AND deleted_at IS NULL");

        let updated = query_builder.build().execute(&mut *tx).await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Precondition("request is no longer formed".to_string()));
        }

        tx.commit().await?;
        self.find_by_id(request_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("logistic request", request_id))
    }

    async fn update_draft(
        &self,
        request_id: LogisticRequestId,
        creator_id: UserId,
        edit: &DraftEdit,
    ) -> Result<LogisticRequest, RepositoryError> {
        let mut tx = self.begin_write().await?;

        let state = fetch_state(&mut tx, request_id).await?;
        state.require_owner(creator_id)?;
        state.require_draft()?;

        let (mut route, mut cargo) = (state.route, state.cargo);
        edit.apply(&mut route, &mut cargo);
        let dimensions = [cargo.length, cargo.width, cargo.height, cargo.weight];
        if dimensions.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err(RepositoryError::Validation(
                "weight, length, width, height must not be negative".to_string(),
            ));
        }

        let updated = sqlx::query(
            "UPDATE logistic_request
             SET from_city = ?, to_city = ?, length = ?, width = ?, height = ?, weight = ?
             WHERE id = ? AND status = 'draft' AND deleted_at IS NULL",
        )
        .bind(&route.from_city)
        .bind(&route.to_city)
        .bind(cargo.length)
        .bind(cargo.width)
        .bind(cargo.height)
        .bind(cargo.weight)
        .bind(request_id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Precondition(
                "request is no longer a draft".to_string(),
            ));
        }
        self.refresh_totals(&mut tx, request_id, &route, &cargo).await?;

        tx.commit().await?;
        self.find_by_id(request_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("logistic request", request_id))
    }

    async fn delete_request(
        &self,
        request_id: LogisticRequestId,
        creator_id: UserId,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.begin_write().await?;

        let state = fetch_state(&mut tx, request_id).await?;
        state.require_owner(creator_id)?;
        state.require_draft()?;

        let deleted = sqlx::query(
            "UPDATE logistic_request SET deleted_at = ?
             WHERE id = ? AND status = 'draft' AND deleted_at IS NULL",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(request_id.0)
        .execute(&mut *tx)
        .await?;
        if deleted.rows_affected() == 0 {
            return Err(RepositoryError::Precondition(
                "request is no longer a draft".to_string(),
            ));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: LogisticRequestId,
    ) -> Result<Option<LogisticRequest>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM logistic_request WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut request = request_from_row(&row)?;
        request.items = fetch_items(&mut conn, id).await?;
        Ok(Some(request))
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<LogisticRequest>, RepositoryError> {
        let mut query_builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM logistic_request
             WHERE status != 'draft' AND deleted_at IS NULL"
        ));
        if let Some(status) = filter.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status.as_str());
        }
        if let Some(from) = filter.formed_from {
            query_builder.push(" AND formed_at >= ");
            query_builder.push_bind(format_timestamp(from));
        }
        if let Some(to) = filter.formed_to {
            query_builder.push(" AND formed_at <= ");
            query_builder.push_bind(format_timestamp(to));
        }
        if let Some(creator_id) = filter.creator_id {
            query_builder.push(" AND creator_id = ");
            query_builder.push_bind(creator_id.0);
        }
        query_builder.push(" ORDER BY formed_at DESC, id DESC");

        let mut conn = self.pool.acquire().await?;
        let rows = query_builder.build().fetch_all(&mut *conn).await?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut request = request_from_row(row)?;
            request.items = fetch_items(&mut conn, request.id).await?;
            requests.push(request);
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use sqlx::Row;

    use freightdesk_core::auth::Role;
    use freightdesk_core::domain::logistic_request::{
        CargoSpec, DraftEdit, LineItemInput, LineItemUpdate, RequestFilter, RequestStatus,
        Resolution, Route, Submission,
    };
    use freightdesk_core::domain::transport_service::{
        RateCard, TransportServiceDraft, TransportServiceId,
    };
    use freightdesk_core::domain::user::{NewUser, UserId};
    use freightdesk_core::quoting::calculator::DeliveryCalculator;

    use super::SqlLogisticRequestRepository;
    use crate::repositories::{
        LogisticRequestRepository, RepositoryError, SqlTransportServiceRepository,
        SqlUserRepository, TransportServiceRepository, UserRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    struct Fixture {
        pool: DbPool,
        repo: SqlLogisticRequestRepository,
        buyer: UserId,
        other_buyer: UserId,
        manager: UserId,
        truck: TransportServiceId,
        van: TransportServiceId,
    }

    async fn setup() -> Fixture {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        setup_on(pool).await
    }

    async fn setup_on(pool: DbPool) -> Fixture {
        migrations::run_pending(&pool).await.expect("migrations");

        let users = SqlUserRepository::new(pool.clone());
        let mut ids = Vec::new();
        for (login, role) in [("buyer", Role::Buyer), ("other", Role::Buyer), ("boss", Role::Manager)]
        {
            let user = users
                .create(NewUser {
                    login: login.to_string(),
                    email: String::new(),
                    name: login.to_string(),
                    phone: String::new(),
                    role,
                    password_hash: "hash".to_string(),
                })
                .await
                .expect("create user");
            ids.push(user.id);
        }

        let services = SqlTransportServiceRepository::new(pool.clone());
        let truck = services
            .create(&TransportServiceDraft {
                name: "Фура".to_string(),
                description: String::new(),
                base_price: Decimal::new(1000, 0),
                base_days: 3,
                rates: RateCard::default(),
                image_url: None,
            })
            .await
            .expect("create truck");
        let van = services
            .create(&TransportServiceDraft {
                name: "Газель".to_string(),
                description: String::new(),
                base_price: Decimal::new(500, 0),
                base_days: 1,
                rates: RateCard::default(),
                image_url: None,
            })
            .await
            .expect("create van");

        Fixture {
            repo: SqlLogisticRequestRepository::new(pool.clone(), DeliveryCalculator::default()),
            pool,
            buyer: ids[0],
            other_buyer: ids[1],
            manager: ids[2],
            truck: truck.id,
            van: van.id,
        }
    }

    fn item(service_id: TransportServiceId, weight: f64) -> LineItemInput {
        LineItemInput {
            service_id,
            from_city: "Москва".to_string(),
            to_city: "Санкт-Петербург".to_string(),
            length: 1.0,
            width: 1.0,
            height: 1.0,
            weight,
        }
    }

    fn submission() -> Submission {
        Submission {
            route: Route::new("Москва", "Санкт-Петербург"),
            cargo: CargoSpec { length: 1.0, width: 1.0, height: 1.0, weight: 100.0 },
        }
    }

    async fn request_count(pool: &DbPool) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM logistic_request")
            .fetch_one(pool)
            .await
            .expect("count")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn create_request_folds_item_quotes_into_totals() {
        let fx = setup().await;

        let id = fx
            .repo
            .create_request(&[item(fx.truck, 100.0), item(fx.van, 1500.0)], fx.buyer)
            .await
            .expect("create");
        let request = fx.repo.find_by_id(id).await.expect("find").expect("exists");

        // truck: 1000 + 50 + 200 + 1270 = 2520, 3 + 0 + 1 days
        // van:   500 + 50 + 3000 + 1270 = 4820, 1 + 1 + 1 days
        assert_eq!(request.total_cost, Decimal::new(734000, 2));
        assert_eq!(request.total_days, 4);
        assert_eq!(request.cargo.weight, 1600.0);
        assert_eq!(request.cargo.length, 2.0);
        assert_eq!(request.status, RequestStatus::Draft);
        assert_eq!(request.items.len(), 2);
        assert_eq!(request.route, Route::new("Москва", "Санкт-Петербург"));
    }

    #[tokio::test]
    async fn create_request_without_items_writes_nothing() {
        let fx = setup().await;

        let error = fx.repo.create_request(&[], fx.buyer).await.expect_err("no items");
        assert!(matches!(error, RepositoryError::Validation(ref message) if message == "no items provided"));
        assert_eq!(request_count(&fx.pool).await, 0);
    }

    #[tokio::test]
    async fn one_invalid_item_rolls_back_the_whole_request() {
        let fx = setup().await;

        let error = fx
            .repo
            .create_request(&[item(fx.truck, 10.0), item(fx.van, 0.0), item(fx.truck, 5.0)], fx.buyer)
            .await
            .expect_err("invalid weight");
        assert!(matches!(error, RepositoryError::Validation(_)));

        let missing = fx
            .repo
            .create_request(&[item(fx.truck, 10.0), item(TransportServiceId(404), 1.0)], fx.buyer)
            .await
            .expect_err("unknown service");
        assert!(matches!(missing, RepositoryError::NotFound { .. }));

        assert_eq!(request_count(&fx.pool).await, 0);
    }

    #[tokio::test]
    async fn totals_past_the_decimal_range_are_rejected() {
        let fx = setup().await;

        let error = fx
            .repo
            .create_request(&[item(fx.truck, 3.0e28), item(fx.truck, 3.0e28)], fx.buyer)
            .await
            .expect_err("sum overflows");
        assert!(matches!(error, RepositoryError::Validation(_)));
        assert_eq!(request_count(&fx.pool).await, 0);
    }

    #[tokio::test]
    async fn line_item_edits_reprice_a_created_request() {
        let fx = setup().await;
        let id = fx
            .repo
            .create_request(&[item(fx.truck, 100.0), item(fx.van, 1500.0)], fx.buyer)
            .await
            .expect("create");

        // the stored cargo is 2x2x2 m, 1600 kg
        // truck: 1000 + 400 + 3200 + 1270 = 5870, 3 + 1 + 1 days
        // van:   500 + 400 + 3200 + 1270 = 5370, 1 + 1 + 1 days
        fx.repo.remove_service_from_draft(id, fx.van).await.expect("remove van");
        let request = fx.repo.find_by_id(id).await.expect("find").expect("exists");
        assert_eq!(request.total_cost, Decimal::new(587000, 2));
        assert_eq!(request.total_days, 5);

        fx.repo.add_service_to_draft(id, fx.van).await.expect("add van back");
        fx.repo
            .update_line_item(
                id,
                fx.truck,
                &LineItemUpdate { quantity: 2, sort_order: 1, comment: String::new() },
            )
            .await
            .expect("update");
        let request = fx.repo.find_by_id(id).await.expect("find").expect("exists");
        assert_eq!(request.total_cost, Decimal::new(1711000, 2));
        assert_eq!(request.total_days, 5);

        fx.repo.remove_service_from_draft(id, fx.van).await.expect("remove van");
        fx.repo.remove_service_from_draft(id, fx.truck).await.expect("decrement truck");
        fx.repo.remove_service_from_draft(id, fx.truck).await.expect("remove truck");
        let request = fx.repo.find_by_id(id).await.expect("find").expect("exists");
        assert_eq!(request.total_cost, Decimal::ZERO);
        assert_eq!(request.total_days, 0);
    }

    #[tokio::test]
    async fn cart_totals_follow_route_edits_and_clearing() {
        let fx = setup().await;
        let draft = fx.repo.ensure_draft(fx.buyer).await.expect("draft");
        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add");

        let unrouted = fx.repo.find_by_id(draft).await.expect("find").expect("exists");
        assert_eq!(unrouted.total_cost, Decimal::ZERO);

        let edit = DraftEdit {
            from_city: Some("Москва".to_string()),
            to_city: Some("Санкт-Петербург".to_string()),
            length: Some(1.0),
            width: Some(1.0),
            height: Some(1.0),
            weight: Some(100.0),
        };
        let routed = fx.repo.update_draft(draft, fx.buyer, &edit).await.expect("edit");
        assert_eq!(routed.total_cost, Decimal::new(252000, 2));
        assert_eq!(routed.total_days, 4);

        fx.repo.clear_draft(fx.buyer).await.expect("clear");
        let cleared = fx.repo.find_by_id(draft).await.expect("find").expect("exists");
        assert_eq!(cleared.total_cost, Decimal::ZERO);
        assert_eq!(cleared.total_days, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_to_one_draft_all_land() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("drafts.db").display());
        let pool = connect_with_settings(&url, 8, 30).await.expect("connect");
        let fx = setup_on(pool).await;
        let repo = Arc::new(fx.repo);
        let draft = repo.ensure_draft(fx.buyer).await.expect("draft");

        let adds: Vec<_> = (0..16)
            .map(|_| {
                let repo = Arc::clone(&repo);
                let truck = fx.truck;
                tokio::spawn(async move { repo.add_service_to_draft(draft, truck).await })
            })
            .collect();
        for add in adds {
            add.await.expect("join").expect("add under contention");
        }

        assert_eq!(repo.draft_quantity_sum(draft).await.expect("sum"), 16);
        fx.pool.close().await;
    }

    #[tokio::test]
    async fn repeated_service_in_one_call_increments_quantity() {
        let fx = setup().await;

        let id = fx
            .repo
            .create_request(&[item(fx.truck, 10.0), item(fx.truck, 20.0)], fx.buyer)
            .await
            .expect("create");
        let request = fx.repo.find_by_id(id).await.expect("find").expect("exists");

        assert_eq!(request.items.len(), 1);
        assert_eq!(request.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn ensure_draft_is_idempotent_per_creator() {
        let fx = setup().await;

        let first = fx.repo.ensure_draft(fx.buyer).await.expect("draft");
        let second = fx.repo.ensure_draft(fx.buyer).await.expect("draft");
        let other = fx.repo.ensure_draft(fx.other_buyer).await.expect("draft");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(fx.repo.find_draft(fx.buyer).await.expect("find"), Some(first));
    }

    #[tokio::test]
    async fn adding_same_service_twice_yields_one_row_with_quantity_two() {
        let fx = setup().await;
        let draft = fx.repo.ensure_draft(fx.buyer).await.expect("draft");

        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add");
        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add again");
        fx.repo.add_service_to_draft(draft, fx.van).await.expect("add van");

        let request = fx.repo.find_by_id(draft).await.expect("find").expect("exists");
        assert_eq!(request.items.len(), 2);
        assert_eq!(request.items[0].service_id, fx.truck);
        assert_eq!(request.items[0].quantity, 2);
        assert_eq!(fx.repo.draft_quantity_sum(draft).await.expect("sum"), 3);
    }

    #[tokio::test]
    async fn remove_decrements_then_deletes() {
        let fx = setup().await;
        let draft = fx.repo.ensure_draft(fx.buyer).await.expect("draft");
        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add");
        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add");

        fx.repo.remove_service_from_draft(draft, fx.truck).await.expect("decrement");
        assert_eq!(fx.repo.draft_quantity_sum(draft).await.expect("sum"), 1);

        fx.repo.remove_service_from_draft(draft, fx.truck).await.expect("delete");
        assert_eq!(fx.repo.draft_quantity_sum(draft).await.expect("sum"), 0);

        let error =
            fx.repo.remove_service_from_draft(draft, fx.truck).await.expect_err("nothing left");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn line_item_update_and_clear() {
        let fx = setup().await;
        let draft = fx.repo.ensure_draft(fx.buyer).await.expect("draft");
        fx.repo.add_service_to_draft(draft, fx.van).await.expect("add");

        fx.repo
            .update_line_item(
                draft,
                fx.van,
                &LineItemUpdate { quantity: 5, sort_order: 9, comment: "fragile".to_string() },
            )
            .await
            .expect("update");
        let request = fx.repo.find_by_id(draft).await.expect("find").expect("exists");
        assert_eq!(request.items[0].quantity, 5);
        assert_eq!(request.items[0].comment, "fragile");

        let zero = LineItemUpdate { quantity: 0, sort_order: 0, comment: String::new() };
        assert!(matches!(
            fx.repo.update_line_item(draft, fx.van, &zero).await,
            Err(RepositoryError::Validation(_))
        ));

        fx.repo.clear_draft(fx.buyer).await.expect("clear");
        assert_eq!(fx.repo.draft_quantity_sum(draft).await.expect("sum"), 0);
        fx.repo.clear_draft(fx.other_buyer).await.expect("clearing a missing draft is a no-op");
    }

    #[tokio::test]
    async fn form_recomputes_totals_weighted_by_quantity() {
        let fx = setup().await;
        let draft = fx.repo.ensure_draft(fx.buyer).await.expect("draft");
        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add");
        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add");

        let formed = fx.repo.form_request(draft, fx.buyer, &submission()).await.expect("form");

        assert_eq!(formed.status, RequestStatus::Formed);
        assert_eq!(formed.total_cost, Decimal::new(504000, 2));
        assert_eq!(formed.total_days, 4);
        assert!(formed.formed_at.is_some());

        // the cart slot is free again
        let next = fx.repo.ensure_draft(fx.buyer).await.expect("new draft");
        assert_ne!(next, draft);
    }

    #[tokio::test]
    async fn form_enforces_owner_items_and_inputs() {
        let fx = setup().await;
        let draft = fx.repo.ensure_draft(fx.buyer).await.expect("draft");

        let empty = fx.repo.form_request(draft, fx.buyer, &submission()).await;
        assert!(matches!(empty, Err(RepositoryError::Validation(_))));

        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add");

        let stranger = fx.repo.form_request(draft, fx.other_buyer, &submission()).await;
        assert!(matches!(stranger, Err(RepositoryError::Forbidden(_))));

        let mut bad = submission();
        bad.route.to_city = String::new();
        let blank = fx.repo.form_request(draft, fx.buyer, &bad).await;
        assert!(matches!(blank, Err(RepositoryError::Validation(_))));
    }

    #[tokio::test]
    async fn completion_is_final() {
        let fx = setup().await;
        let draft = fx.repo.ensure_draft(fx.buyer).await.expect("draft");
        fx.repo.add_service_to_draft(draft, fx.truck).await.expect("add");

        let early = fx.repo.complete_request(draft, fx.manager, Resolution::Completed).await;
        assert!(matches!(early, Err(RepositoryError::Precondition(_))));

        fx.repo.form_request(draft, fx.buyer, &submission()).await.expect("form");
        let completed = fx
            .repo
            .complete_request(draft, fx.manager, Resolution::Completed)
            .await
            .expect("complete");
        assert_eq!(completed.status, RequestStatus::Completed);
        assert_eq!(completed.moderator_id, Some(fx.manager));
        assert_eq!(completed.total_cost, Decimal::new(252000, 2));
        assert!(completed.completed_at.is_some());

        let again = fx.repo.complete_request(draft, fx.manager, Resolution::Rejected).await;
        assert!(matches!(again, Err(RepositoryError::Precondition(_))));
        let reform = fx.repo.form_request(draft, fx.buyer, &submission()).await;
        assert!(matches!(reform, Err(RepositoryError::Precondition(_))));
    }

    #[tokio::test]
    async fn update_and_delete_only_touch_own_drafts() {
        let fx = setup().await;
        let draft = fx.repo.ensure_draft(fx.buyer).await.expect("draft");

        let edited = fx
            .repo
            .update_draft(
                draft,
                fx.buyer,
                &DraftEdit { from_city: Some("Казань".to_string()), ..DraftEdit::default() },
            )
            .await
            .expect("edit");
        assert_eq!(edited.route.from_city, "Казань");

        let stranger = fx.repo.delete_request(draft, fx.other_buyer).await;
        assert!(matches!(stranger, Err(RepositoryError::Forbidden(_))));

        fx.repo.delete_request(draft, fx.buyer).await.expect("delete");
        assert!(fx.repo.find_by_id(draft).await.expect("find").is_none());
        assert!(fx.repo.find_draft(fx.buyer).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn listing_hides_drafts_and_scopes_buyers() {
        let fx = setup().await;

        for creator in [fx.buyer, fx.other_buyer] {
            let draft = fx.repo.ensure_draft(creator).await.expect("draft");
            fx.repo.add_service_to_draft(draft, fx.van).await.expect("add");
            fx.repo.form_request(draft, creator, &submission()).await.expect("form");
        }
        fx.repo.ensure_draft(fx.buyer).await.expect("open draft");

        let all = fx.repo.list(&RequestFilter::default()).await.expect("list");
        assert_eq!(all.len(), 2);

        let mine = fx
            .repo
            .list(&RequestFilter { creator_id: Some(fx.buyer), ..RequestFilter::default() })
            .await
            .expect("list");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].creator_id, fx.buyer);

        let completed = fx
            .repo
            .list(&RequestFilter {
                status: Some(RequestStatus::Completed),
                ..RequestFilter::default()
            })
            .await
            .expect("list");
        assert!(completed.is_empty());

        let future = fx
            .repo
            .list(&RequestFilter {
                formed_from: Some(Utc::now() + Duration::days(1)),
                ..RequestFilter::default()
            })
            .await
            .expect("list");
        assert!(future.is_empty());
    }
}
