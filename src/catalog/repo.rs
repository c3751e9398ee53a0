use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::types::Decimal;
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub duration_minutes: i32,
    pub price: Decimal,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Master {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub role: String,
    pub avatar_key: Option<String>,
}

/// Service together with its expanded category, as the list endpoint returns it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceWithCategory {
    #[serde(flatten)]
    pub service: Service,
    pub category: Option<Category>,
}

/// Outcome of deleting an entity that bookings may still reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Missing,
    Referenced,
}

fn is_fk_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}

#[derive(Debug, FromRow)]
struct ServiceCategoryRow {
    id: i64,
    name: String,
    duration_minutes: i32,
    price: Decimal,
    category_id: Option<i64>,
    category_name: Option<String>,
}

impl Branch {
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Branch>> {
        let rows = sqlx::query_as::<_, Branch>(
            r#"SELECT id, name, address FROM branches ORDER BY id ASC"#,
        )
        .fetch_all(db)
        .await
        .context("list branches")?;
        Ok(rows)
    }

    pub async fn create(db: &PgPool, name: &str, address: Option<&str>) -> anyhow::Result<Branch> {
        let row = sqlx::query_as::<_, Branch>(
            r#"
            INSERT INTO branches (name, address)
            VALUES ($1, $2)
            RETURNING id, name, address
            "#,
        )
        .bind(name)
        .bind(address)
        .fetch_one(db)
        .await
        .context("create branch")?;
        Ok(row)
    }

    pub async fn update(
        db: &PgPool,
        id: i64,
        name: Option<&str>,
        address: Option<&str>,
    ) -> anyhow::Result<Option<Branch>> {
        let row = sqlx::query_as::<_, Branch>(
            r#"
            UPDATE branches
               SET name = COALESCE($2, name),
                   address = COALESCE($3, address)
             WHERE id = $1
            RETURNING id, name, address
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(address)
        .fetch_optional(db)
        .await
        .context("update branch")?;
        Ok(row)
    }

    /// Delete a branch. Appointments referencing it keep existing with a
    /// cleared branch reference (cascade-null), done in one transaction.
    pub async fn delete_detaching(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let mut tx = db.begin().await.context("begin tx")?;
        sqlx::query(r#"UPDATE appointments SET branch_id = NULL WHERE branch_id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("detach appointments from branch")?;
        let res = sqlx::query(r#"DELETE FROM branches WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete branch")?;
        tx.commit().await.context("commit tx")?;
        Ok(res.rows_affected() > 0)
    }
}

impl Category {
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Category>> {
        let rows =
            sqlx::query_as::<_, Category>(r#"SELECT id, name FROM categories ORDER BY id ASC"#)
                .fetch_all(db)
                .await
                .context("list categories")?;
        Ok(rows)
    }

    pub async fn create(db: &PgPool, name: &str) -> anyhow::Result<Category> {
        let row = sqlx::query_as::<_, Category>(
            r#"INSERT INTO categories (name) VALUES ($1) RETURNING id, name"#,
        )
        .bind(name)
        .fetch_one(db)
        .await
        .context("create category")?;
        Ok(row)
    }

    /// Delete a category, first detaching every service that references it.
    /// The services survive with `category_id = NULL`.
    pub async fn delete_detaching(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let mut tx = db.begin().await.context("begin tx")?;
        sqlx::query(r#"UPDATE services SET category_id = NULL WHERE category_id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("detach services from category")?;
        let res = sqlx::query(r#"DELETE FROM categories WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete category")?;
        tx.commit().await.context("commit tx")?;
        Ok(res.rows_affected() > 0)
    }
}

impl Service {
    pub async fn list_with_category(db: &PgPool) -> anyhow::Result<Vec<ServiceWithCategory>> {
        let rows = sqlx::query_as::<_, ServiceCategoryRow>(
            r#"
            SELECT s.id, s.name, s.duration_minutes, s.price, s.category_id,
                   c.name AS category_name
              FROM services s
              LEFT JOIN categories c ON c.id = s.category_id
             ORDER BY s.id ASC
            "#,
        )
        .fetch_all(db)
        .await
        .context("list services")?;

        Ok(rows
            .into_iter()
            .map(|r| ServiceWithCategory {
                category: r
                    .category_id
                    .zip(r.category_name.clone())
                    .map(|(id, name)| Category { id, name }),
                service: Service {
                    id: r.id,
                    name: r.name,
                    duration_minutes: r.duration_minutes,
                    price: r.price,
                    category_id: r.category_id,
                },
            })
            .collect())
    }

    pub async fn create(
        db: &PgPool,
        name: &str,
        duration_minutes: i32,
        price: Decimal,
        category_id: Option<i64>,
    ) -> anyhow::Result<Service> {
        let row = sqlx::query_as::<_, Service>(
            r#"
            INSERT INTO services (name, duration_minutes, price, category_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, duration_minutes, price, category_id
            "#,
        )
        .bind(name)
        .bind(duration_minutes)
        .bind(price)
        .bind(category_id)
        .fetch_one(db)
        .await
        .context("create service")?;
        Ok(row)
    }

    /// Delete only while no appointment references the service; the check
    /// and the delete run in one transaction, and an FK violation from a
    /// booking that slips in between still reports `Referenced` rather than
    /// surfacing as an infrastructure error.
    pub async fn delete_guarded(db: &PgPool, id: i64) -> anyhow::Result<DeleteOutcome> {
        let mut tx = db.begin().await.context("begin tx")?;
        let referenced: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM appointments WHERE service_id = $1"#)
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .context("count appointments for service")?;
        if referenced > 0 {
            return Ok(DeleteOutcome::Referenced);
        }
        let res = match sqlx::query(r#"DELETE FROM services WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await
        {
            Ok(res) => res,
            Err(e) if is_fk_violation(&e) => return Ok(DeleteOutcome::Referenced),
            Err(e) => return Err(e).context("delete service"),
        };
        tx.commit().await.context("commit tx")?;
        Ok(if res.rows_affected() > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::Missing
        })
    }
}

impl Master {
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Master>> {
        let rows = sqlx::query_as::<_, Master>(
            r#"SELECT id, name, active, role, avatar_key FROM masters ORDER BY id ASC"#,
        )
        .fetch_all(db)
        .await
        .context("list masters")?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, id: i64) -> anyhow::Result<Option<Master>> {
        let row = sqlx::query_as::<_, Master>(
            r#"SELECT id, name, active, role, avatar_key FROM masters WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find master")?;
        Ok(row)
    }

    pub async fn create(
        db: &PgPool,
        name: &str,
        active: bool,
        role: &str,
    ) -> anyhow::Result<Master> {
        let row = sqlx::query_as::<_, Master>(
            r#"
            INSERT INTO masters (name, active, role)
            VALUES ($1, $2, $3)
            RETURNING id, name, active, role, avatar_key
            "#,
        )
        .bind(name)
        .bind(active)
        .bind(role)
        .fetch_one(db)
        .await
        .context("create master")?;
        Ok(row)
    }

    pub async fn update(
        db: &PgPool,
        id: i64,
        name: Option<&str>,
        active: Option<bool>,
        role: Option<&str>,
    ) -> anyhow::Result<Option<Master>> {
        let row = sqlx::query_as::<_, Master>(
            r#"
            UPDATE masters
               SET name = COALESCE($2, name),
                   active = COALESCE($3, active),
                   role = COALESCE($4, role)
             WHERE id = $1
            RETURNING id, name, active, role, avatar_key
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(active)
        .bind(role)
        .fetch_optional(db)
        .await
        .context("update master")?;
        Ok(row)
    }

    pub async fn set_avatar(db: &PgPool, id: i64, key: &str) -> anyhow::Result<Option<Master>> {
        let row = sqlx::query_as::<_, Master>(
            r#"
            UPDATE masters SET avatar_key = $2 WHERE id = $1
            RETURNING id, name, active, role, avatar_key
            "#,
        )
        .bind(id)
        .bind(key)
        .fetch_optional(db)
        .await
        .context("set master avatar")?;
        Ok(row)
    }

    /// Same guard as `Service::delete_guarded`, for masters.
    pub async fn delete_guarded(db: &PgPool, id: i64) -> anyhow::Result<DeleteOutcome> {
        let mut tx = db.begin().await.context("begin tx")?;
        let referenced: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM appointments WHERE master_id = $1"#)
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .context("count appointments for master")?;
        if referenced > 0 {
            return Ok(DeleteOutcome::Referenced);
        }
        let res = match sqlx::query(r#"DELETE FROM masters WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await
        {
            Ok(res) => res,
            Err(e) if is_fk_violation(&e) => return Ok(DeleteOutcome::Referenced),
            Err(e) => return Err(e).context("delete master"),
        };
        tx.commit().await.context("commit tx")?;
        Ok(if res.rows_affected() > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::Missing
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against a real database and skip silently when DATABASE_URL
    // is not set.
    async fn test_db() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .ok()?;
        sqlx::migrate!("./migrations").run(&db).await.ok()?;
        Some(db)
    }

    #[tokio::test]
    async fn deleting_category_detaches_services_in_database() {
        let Some(db) = test_db().await else { return };

        let category = Category::create(&db, "Coloring").await.unwrap();
        let mut service_ids = Vec::new();
        for n in 1..=3 {
            let s = Service::create(
                &db,
                &format!("Coloring option {}", n),
                45,
                Decimal::new(2500, 0),
                Some(category.id),
            )
            .await
            .unwrap();
            service_ids.push(s.id);
        }

        assert!(Category::delete_detaching(&db, category.id).await.unwrap());

        for id in service_ids {
            let category_id: Option<i64> =
                sqlx::query_scalar(r#"SELECT category_id FROM services WHERE id = $1"#)
                    .bind(id)
                    .fetch_one(&db)
                    .await
                    .unwrap();
            assert_eq!(category_id, None, "service must survive with cleared category");
            Service::delete_guarded(&db, id).await.unwrap();
        }

        // already gone
        assert!(!Category::delete_detaching(&db, category.id).await.unwrap());
    }

    #[tokio::test]
    async fn guarded_delete_blocks_referenced_service_and_master() {
        let Some(db) = test_db().await else { return };

        let master = Master::create(&db, "Temp master", true, "MASTER").await.unwrap();
        let service = Service::create(&db, "Temp cut", 30, Decimal::new(1000, 0), None)
            .await
            .unwrap();
        let appointment_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO appointments
                (customer_name, starts_at, ends_at, price_at_booking, service_id, master_id)
            VALUES ('Anna', now(), now() + interval '30 minutes', $1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(Decimal::new(1000, 0))
        .bind(service.id)
        .bind(master.id)
        .fetch_one(&db)
        .await
        .unwrap();

        assert_eq!(
            Master::delete_guarded(&db, master.id).await.unwrap(),
            DeleteOutcome::Referenced
        );
        assert_eq!(
            Service::delete_guarded(&db, service.id).await.unwrap(),
            DeleteOutcome::Referenced
        );

        sqlx::query(r#"DELETE FROM appointments WHERE id = $1"#)
            .bind(appointment_id)
            .execute(&db)
            .await
            .unwrap();

        assert_eq!(
            Service::delete_guarded(&db, service.id).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            Master::delete_guarded(&db, master.id).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            Master::delete_guarded(&db, master.id).await.unwrap(),
            DeleteOutcome::Missing
        );
    }
}
