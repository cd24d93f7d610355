use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use freightdesk_core::domain::transport_service::{
    RateCard, ServiceFilter, TransportService, TransportServiceDraft, TransportServiceId,
};

use super::{
    decode_error, format_timestamp, parse_optional_timestamp, parse_timestamp, RepositoryError,
    TransportServiceRepository,
};
use crate::DbPool;

const SERVICE_COLUMNS: &str = "id, name, description, base_price, base_days, volume_rate, \
     weight_rate, distance_rate, image_url, created_at, deleted_at";

pub struct SqlTransportServiceRepository {
    pool: DbPool,
}

impl SqlTransportServiceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid {column} `{value}`: {error}")))
}

pub(crate) fn service_from_row(row: &SqliteRow) -> Result<TransportService, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let base_price: String = row.try_get("base_price").map_err(decode_error)?;
    let base_days: i64 = row.try_get("base_days").map_err(decode_error)?;
    let volume_rate: String = row.try_get("volume_rate").map_err(decode_error)?;
    let weight_rate: String = row.try_get("weight_rate").map_err(decode_error)?;
    let distance_rate: String = row.try_get("distance_rate").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let deleted_at: Option<String> = row.try_get("deleted_at").map_err(decode_error)?;

    Ok(TransportService {
        id: TransportServiceId(id),
        name: row.try_get("name").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        base_price: parse_decimal("base_price", &base_price)?,
        base_days: u32::try_from(base_days)
            .map_err(|_| RepositoryError::Decode(format!("invalid base_days {base_days}")))?,
        rates: RateCard {
            volume_rate: parse_decimal("volume_rate", &volume_rate)?,
            weight_rate: parse_decimal("weight_rate", &weight_rate)?,
            distance_rate: parse_decimal("distance_rate", &distance_rate)?,
        },
        image_url: row.try_get("image_url").map_err(decode_error)?,
        created_at: parse_timestamp(&created_at)?,
        deleted_at: parse_optional_timestamp(deleted_at)?,
    })
}

/// Case-insensitive match on name or description. Done in Rust because
/// SQLite's LOWER only folds ASCII and catalog names are mostly Cyrillic.
fn matches_search(service: &TransportService, needle: &str) -> bool {
    service.name.to_lowercase().contains(needle)
        || service.description.to_lowercase().contains(needle)
}

fn matches_price(service: &TransportService, filter: &ServiceFilter) -> bool {
    filter.min_price.map_or(true, |min| service.base_price >= min)
        && filter.max_price.map_or(true, |max| service.base_price <= max)
}

#[async_trait::async_trait]
impl TransportServiceRepository for SqlTransportServiceRepository {
    async fn find_by_id(
        &self,
        id: TransportServiceId,
    ) -> Result<Option<TransportService>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SERVICE_COLUMNS} FROM transport_service WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(service_from_row).transpose()
    }

    async fn search(
        &self,
        filter: &ServiceFilter,
    ) -> Result<Vec<TransportService>, RepositoryError> {
        let mut query_builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {SERVICE_COLUMNS} FROM transport_service WHERE deleted_at IS NULL"
        ));
        if let Some(from) = filter.created_from {
            query_builder.push(" AND created_at >= ");
            query_builder.push_bind(format_timestamp(from));
        }
        if let Some(to) = filter.created_to {
            query_builder.push(" AND created_at <= ");
            query_builder.push_bind(format_timestamp(to));
        }
        query_builder.push(" ORDER BY id ASC");

        let rows = query_builder.build().fetch_all(&self.pool).await?;
        let needle = filter
            .search
            .as_deref()
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());

        let mut services = Vec::with_capacity(rows.len());
        for row in &rows {
            let service = service_from_row(row)?;
            let text_match = needle.as_deref().map_or(true, |needle| matches_search(&service, needle));
            if text_match && matches_price(&service, filter) {
                services.push(service);
            }
        }
        Ok(services)
    }

    async fn create(
        &self,
        draft: &TransportServiceDraft,
    ) -> Result<TransportService, RepositoryError> {
        draft.validate()?;

        let result = sqlx::query(
            "INSERT INTO transport_service
                 (name, description, base_price, base_days, volume_rate, weight_rate,
                  distance_rate, image_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(draft.name.trim())
        .bind(&draft.description)
        .bind(draft.base_price.to_string())
        .bind(i64::from(draft.base_days))
        .bind(draft.rates.volume_rate.to_string())
        .bind(draft.rates.weight_rate.to_string())
        .bind(draft.rates.distance_rate.to_string())
        .bind(&draft.image_url)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        let id = TransportServiceId(result.last_insert_rowid());
        self.find_by_id(id).await?.ok_or_else(|| RepositoryError::not_found("transport service", id.0))
    }

    async fn update(
        &self,
        id: TransportServiceId,
        draft: &TransportServiceDraft,
    ) -> Result<TransportService, RepositoryError> {
        draft.validate()?;

        let result = sqlx::query(
            "UPDATE transport_service
             SET name = ?, description = ?, base_price = ?, base_days = ?, volume_rate = ?,
                 weight_rate = ?, distance_rate = ?, image_url = ?
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(draft.name.trim())
        .bind(&draft.description)
        .bind(draft.base_price.to_string())
        .bind(i64::from(draft.base_days))
        .bind(draft.rates.volume_rate.to_string())
        .bind(draft.rates.weight_rate.to_string())
        .bind(draft.rates.distance_rate.to_string())
        .bind(&draft.image_url)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("transport service", id.0));
        }
        self.find_by_id(id).await?.ok_or_else(|| RepositoryError::not_found("transport service", id.0))
    }

    async fn soft_delete(&self, id: TransportServiceId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE transport_service SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("transport service", id.0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use freightdesk_core::domain::transport_service::{
        RateCard, ServiceFilter, TransportServiceDraft, TransportServiceId,
    };

    use super::SqlTransportServiceRepository;
    use crate::repositories::{RepositoryError, TransportServiceRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlTransportServiceRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlTransportServiceRepository::new(pool)
    }

    fn draft(name: &str, description: &str, base_price: i64) -> TransportServiceDraft {
        TransportServiceDraft {
            name: name.to_string(),
            description: description.to_string(),
            base_price: Decimal::new(base_price, 0),
            base_days: 2,
            rates: RateCard::default(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn create_and_find_round_trips_money_exactly() {
        let repo = setup().await;
        let mut input = draft("Фура", "тент 20 т", 0);
        input.base_price = Decimal::new(123456, 2);

        let created = repo.create(&input).await.expect("create");
        let found = repo.find_by_id(created.id).await.expect("find").expect("exists");

        assert_eq!(found.base_price, Decimal::new(123456, 2));
        assert_eq!(found.rates, RateCard::default());
        assert_eq!(found.name, "Фура");
    }

    #[tokio::test]
    async fn search_matches_cyrillic_case_insensitively_and_filters_price() {
        let repo = setup().await;
        repo.create(&draft("Фура", "Тентованный полуприцеп", 1000)).await.expect("create");
        repo.create(&draft("Газель", "малотоннажный фургон", 400)).await.expect("create");
        repo.create(&draft("Рефрижератор", "фура с холодильником", 2500)).await.expect("create");

        let by_text = repo
            .search(&ServiceFilter { search: Some("ФУРА".to_string()), ..ServiceFilter::default() })
            .await
            .expect("search");
        assert_eq!(by_text.len(), 2);

        let by_price = repo
            .search(&ServiceFilter {
                min_price: Some(Decimal::new(500, 0)),
                max_price: Some(Decimal::new(2000, 0)),
                ..ServiceFilter::default()
            })
            .await
            .expect("search");
        assert_eq!(by_price.len(), 1);
        assert_eq!(by_price[0].name, "Фура");
    }

    #[tokio::test]
    async fn soft_deleted_services_disappear() {
        let repo = setup().await;
        let created = repo.create(&draft("Фура", "", 1000)).await.expect("create");

        repo.soft_delete(created.id).await.expect("delete");

        assert!(repo.find_by_id(created.id).await.expect("find").is_none());
        assert!(repo.search(&ServiceFilter::default()).await.expect("search").is_empty());
        assert!(matches!(
            repo.soft_delete(created.id).await,
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_rejects_invalid_draft_and_unknown_id() {
        let repo = setup().await;
        let created = repo.create(&draft("Фура", "", 1000)).await.expect("create");

        let updated =
            repo.update(created.id, &draft("Фура 2", "новая", 1500)).await.expect("update");
        assert_eq!(updated.base_price, Decimal::new(1500, 0));

        assert!(matches!(
            repo.update(created.id, &draft(" ", "", 1)).await,
            Err(RepositoryError::Validation(_))
        ));
        assert!(matches!(
            repo.update(TransportServiceId(999), &draft("x", "", 1)).await,
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
