use axum::async_trait;
use serde::Serialize;
use sqlx::types::Decimal;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::catalog::repo::{Branch, Master, Service};

use super::error::Error;

/// A booking as the scheduler hands it to the store. `ends_at` and
/// `price_at_booking` are already resolved; the store never recomputes them.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub starts_at: OffsetDateTime,
    pub ends_at: OffsetDateTime,
    pub price_at_booking: Decimal,
    pub service_id: i64,
    pub master_id: i64,
    pub branch_id: Option<i64>,
}

/// Read-expanded appointment: the booking plus its resolved service, master
/// and branch, so callers need no follow-up lookups.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    pub id: i64,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ends_at: OffsetDateTime,
    pub price_at_booking: Decimal,
    pub service: Service,
    pub master: Master,
    pub branch: Option<Branch>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentFilter {
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub master_id: Option<i64>,
}

/// Half-open interval overlap: `[a_start, a_end)` intersects `[b_start, b_end)`.
/// An interval ending exactly when the other starts does not overlap.
pub fn overlaps(
    a_start: OffsetDateTime,
    a_end: OffsetDateTime,
    b_start: OffsetDateTime,
    b_end: OffsetDateTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Conflict detector: does any appointment of `master_id` overlap
    /// `[starts_at, ends_at)`? Read-only.
    async fn has_conflict(
        &self,
        master_id: i64,
        starts_at: OffsetDateTime,
        ends_at: OffsetDateTime,
    ) -> Result<bool, Error>;

    /// Conflict check and insert as one atomic step. Returns the expanded
    /// view on success and `Error::Conflict` when the master is already
    /// booked over the interval.
    async fn insert_if_free(&self, new: NewAppointment) -> Result<AppointmentView, Error>;

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<AppointmentView>, Error>;

    /// Hard delete. Deleting an id that does not exist is `Error::NotFound`.
    async fn delete(&self, id: i64) -> Result<(), Error>;
}

/// Read access to the catalog as the scheduler consumes it.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn get_service(&self, id: i64) -> Result<Option<Service>, Error>;
    async fn get_master(&self, id: i64) -> Result<Option<Master>, Error>;
    async fn get_branch(&self, id: i64) -> Result<Option<Branch>, Error>;
}

// ---- Postgres implementations ----

const CONFLICT_SQL: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM appointments
         WHERE master_id = $1
           AND starts_at < $3
           AND ends_at > $2
    )
"#;

const EXPANDED_SELECT: &str = r#"
    SELECT a.id, a.customer_name, a.customer_phone, a.starts_at, a.ends_at,
           a.price_at_booking, a.branch_id,
           s.id AS service_id, s.name AS service_name,
           s.duration_minutes AS service_duration_minutes,
           s.price AS service_price, s.category_id AS service_category_id,
           m.id AS master_id, m.name AS master_name, m.active AS master_active,
           m.role AS master_role, m.avatar_key AS master_avatar_key,
           b.name AS branch_name, b.address AS branch_address
      FROM appointments a
      JOIN services s ON s.id = a.service_id
      JOIN masters m ON m.id = a.master_id
      LEFT JOIN branches b ON b.id = a.branch_id
"#;

#[derive(Debug, FromRow)]
struct ExpandedRow {
    id: i64,
    customer_name: String,
    customer_phone: Option<String>,
    starts_at: OffsetDateTime,
    ends_at: OffsetDateTime,
    price_at_booking: Decimal,
    branch_id: Option<i64>,
    service_id: i64,
    service_name: String,
    service_duration_minutes: i32,
    service_price: Decimal,
    service_category_id: Option<i64>,
    master_id: i64,
    master_name: String,
    master_active: bool,
    master_role: String,
    master_avatar_key: Option<String>,
    branch_name: Option<String>,
    branch_address: Option<String>,
}

impl From<ExpandedRow> for AppointmentView {
    fn from(r: ExpandedRow) -> Self {
        Self {
            id: r.id,
            customer_name: r.customer_name,
            customer_phone: r.customer_phone,
            starts_at: r.starts_at,
            ends_at: r.ends_at,
            price_at_booking: r.price_at_booking,
            service: Service {
                id: r.service_id,
                name: r.service_name,
                duration_minutes: r.service_duration_minutes,
                price: r.service_price,
                category_id: r.service_category_id,
            },
            master: Master {
                id: r.master_id,
                name: r.master_name,
                active: r.master_active,
                role: r.master_role,
                avatar_key: r.master_avatar_key,
            },
            branch: r.branch_id.zip(r.branch_name).map(|(id, name)| Branch {
                id,
                name,
                address: r.branch_address,
            }),
        }
    }
}

pub struct PgAppointmentStore {
    db: PgPool,
}

impl PgAppointmentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// The schema carries a GiST exclusion constraint over
/// `(master_id, tstzrange(starts_at, ends_at))` as a backstop for the
/// advisory-lock path. A violation of exactly that constraint is a booking
/// conflict; any other database failure stays a storage error.
fn translate_insert_err(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23P01")
            && db.constraint() == Some("appointments_no_overlap")
        {
            return Error::conflict("master already booked");
        }
    }
    Error::Storage(e)
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn has_conflict(
        &self,
        master_id: i64,
        starts_at: OffsetDateTime,
        ends_at: OffsetDateTime,
    ) -> Result<bool, Error> {
        let busy: bool = sqlx::query_scalar(CONFLICT_SQL)
            .bind(master_id)
            .bind(starts_at)
            .bind(ends_at)
            .fetch_one(&self.db)
            .await?;
        Ok(busy)
    }

    async fn insert_if_free(&self, new: NewAppointment) -> Result<AppointmentView, Error> {
        let mut tx = self.db.begin().await?;

        // Serializes bookings per master: the conflict check and the insert
        // below happen under the same transaction-scoped lock.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(new.master_id)
            .execute(&mut *tx)
            .await?;

        let busy: bool = sqlx::query_scalar(CONFLICT_SQL)
            .bind(new.master_id)
            .bind(new.starts_at)
            .bind(new.ends_at)
            .fetch_one(&mut *tx)
            .await?;
        if busy {
            return Err(Error::conflict("master already booked"));
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO appointments
                (customer_name, customer_phone, starts_at, ends_at,
                 price_at_booking, service_id, master_id, branch_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&new.customer_name)
        .bind(&new.customer_phone)
        .bind(new.starts_at)
        .bind(new.ends_at)
        .bind(new.price_at_booking)
        .bind(new.service_id)
        .bind(new.master_id)
        .bind(new.branch_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(translate_insert_err)?;

        let row = sqlx::query_as::<_, ExpandedRow>(&format!("{EXPANDED_SELECT} WHERE a.id = $1"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<AppointmentView>, Error> {
        let sql = format!(
            r#"{EXPANDED_SELECT}
             WHERE ($1::bigint IS NULL OR a.master_id = $1)
               AND ($2::timestamptz IS NULL OR a.starts_at >= $2)
               AND ($3::timestamptz IS NULL OR a.starts_at <= $3)
             ORDER BY a.starts_at ASC
            "#
        );
        let rows = sqlx::query_as::<_, ExpandedRow>(&sql)
            .bind(filter.master_id)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete(&self, id: i64) -> Result<(), Error> {
        let res = sqlx::query(r#"DELETE FROM appointments WHERE id = $1"#)
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::not_found("appointment not found"));
        }
        Ok(())
    }
}

pub struct PgCatalog {
    db: PgPool,
}

impl PgCatalog {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogReader for PgCatalog {
    async fn get_service(&self, id: i64) -> Result<Option<Service>, Error> {
        let row = sqlx::query_as::<_, Service>(
            r#"SELECT id, name, duration_minutes, price, category_id FROM services WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn get_master(&self, id: i64) -> Result<Option<Master>, Error> {
        let row = sqlx::query_as::<_, Master>(
            r#"SELECT id, name, active, role, avatar_key FROM masters WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn get_branch(&self, id: i64) -> Result<Option<Branch>, Error> {
        let row = sqlx::query_as::<_, Branch>(
            r#"SELECT id, name, address FROM branches WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::overlaps;
    use time::macros::datetime;

    #[test]
    fn back_to_back_does_not_overlap() {
        let a = datetime!(2024-01-01 10:00 UTC);
        let b = datetime!(2024-01-01 10:30 UTC);
        let c = datetime!(2024-01-01 11:00 UTC);
        assert!(!overlaps(a, b, b, c));
        assert!(!overlaps(b, c, a, b));
    }

    #[test]
    fn partial_overlap_detected() {
        let existing_start = datetime!(2024-01-01 10:00 UTC);
        let existing_end = datetime!(2024-01-01 10:30 UTC);
        assert!(overlaps(
            datetime!(2024-01-01 10:15 UTC),
            datetime!(2024-01-01 10:45 UTC),
            existing_start,
            existing_end
        ));
    }

    #[test]
    fn containment_counts_both_ways() {
        let outer = (datetime!(2024-01-01 09:00 UTC), datetime!(2024-01-01 12:00 UTC));
        let inner = (datetime!(2024-01-01 10:00 UTC), datetime!(2024-01-01 10:30 UTC));
        assert!(overlaps(outer.0, outer.1, inner.0, inner.1));
        assert!(overlaps(inner.0, inner.1, outer.0, outer.1));
    }

    #[test]
    fn zero_duration_never_conflicts_at_boundaries() {
        let start = datetime!(2024-01-01 10:00 UTC);
        let end = datetime!(2024-01-01 10:30 UTC);
        // degenerate interval touching either boundary of an existing booking
        assert!(!overlaps(start, start, start, end));
        assert!(!overlaps(end, end, start, end));
    }
}
