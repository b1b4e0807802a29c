//! Postgres-backed retention store

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

use super::{DeletionPredicate, RetentionStore};

/// Reads column types from `information_schema` and deletes with plain SQL
#[derive(Debug, Clone)]
pub struct PgRetentionStore {
    pool: PgPool,
}

impl PgRetentionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetentionStore for PgRetentionStore {
    async fn column_types(&self, table: &str, columns: &[&str]) -> Result<HashMap<String, String>, sqlx::Error> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();

        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name::text = $1
              AND column_name::text = ANY($2)
            "#,
        )
        .bind(table)
        .bind(&columns)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn delete_rows(&self, table: &str, predicate: &DeletionPredicate) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(&predicate.to_sql(table))
            .bind(predicate.threshold())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
