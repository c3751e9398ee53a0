use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WorkPhoto {
    pub id: i64,
    pub s3_key: String,
    pub caption: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl WorkPhoto {
    /// Newest first, as the portfolio page shows them.
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<WorkPhoto>> {
        let rows = sqlx::query_as::<_, WorkPhoto>(
            r#"SELECT id, s3_key, caption, created_at FROM work_photos ORDER BY id DESC"#,
        )
        .fetch_all(db)
        .await
        .context("list work photos")?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, id: i64) -> anyhow::Result<Option<WorkPhoto>> {
        let row = sqlx::query_as::<_, WorkPhoto>(
            r#"SELECT id, s3_key, caption, created_at FROM work_photos WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find work photo")?;
        Ok(row)
    }

    pub async fn create(db: &PgPool, s3_key: &str, caption: Option<&str>) -> anyhow::Result<WorkPhoto> {
        let row = sqlx::query_as::<_, WorkPhoto>(
            r#"
            INSERT INTO work_photos (s3_key, caption)
            VALUES ($1, $2)
            RETURNING id, s3_key, caption, created_at
            "#,
        )
        .bind(s3_key)
        .bind(caption)
        .fetch_one(db)
        .await
        .context("create work photo")?;
        Ok(row)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query(r#"DELETE FROM work_photos WHERE id = $1"#)
            .bind(id)
            .execute(db)
            .await
            .context("delete work photo")?;
        Ok(res.rows_affected() > 0)
    }
}
