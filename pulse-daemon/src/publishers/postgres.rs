//! Postgres publisher
//!
//! Each metric is stored in a table named after it, created on registration
//! with the metric's key columns as primary key. Publishing upserts every row
//! in one transaction and then trims the table according to the metric's
//! retention.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::data::validate_identifier;
use pulse_core::{Column, ColumnKind, DataSet, Value};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use super::{PublishError, Publisher};
use crate::metrics::Metric;
use crate::retention::{PgRetentionStore, RetentionStrategySelector};

pub struct PostgresPublisher {
    pool: PgPool,
    retention: RetentionStrategySelector<PgRetentionStore>,
    /// Upsert statement per registered metric
    statements: Mutex<HashMap<String, String>>,
}

impl PostgresPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self {
            retention: RetentionStrategySelector::new(PgRetentionStore::new(pool.clone())),
            pool,
            statements: Mutex::new(HashMap::new()),
        }
    }
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text => "TEXT",
        ColumnKind::Integer => "BIGINT",
        ColumnKind::Float => "DOUBLE PRECISION",
        ColumnKind::Timestamp => "TIMESTAMPTZ",
        ColumnKind::Bool => "BOOLEAN",
    }
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("\"{}\"", n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE` and upsert statements for a metric
///
/// Fails if the table or a column name is not a valid identifier.
pub fn table_statements(table: &str, columns: &[Column]) -> Result<(String, String), PublishError> {
    validate_identifier(table)?;
    for column in columns {
        validate_identifier(&column.name)?;
    }

    let keys: Vec<&str> = columns.iter().filter(|c| c.is_key).map(|c| c.name.as_str()).collect();
    let values: Vec<&str> = columns.iter().filter(|c| !c.is_key).map(|c| c.name.as_str()).collect();
    let all: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    let mut definitions: Vec<String> = columns
        .iter()
        .map(|c| format!("\"{}\" {}", c.name, sql_type(c.kind)))
        .collect();
    if !keys.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", quoted(&keys)));
    }
    let create = format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        table,
        definitions.join(", ")
    );

    let placeholders: Vec<String> = (1..=all.len()).map(|i| format!("${}", i)).collect();
    let mut upsert = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        table,
        quoted(&all),
        placeholders.join(", ")
    );
    if !keys.is_empty() {
        let conflict = if values.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let updates: Vec<String> = values
                .iter()
                .map(|c| format!("\"{c}\" = EXCLUDED.\"{c}\""))
                .collect();
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        upsert.push_str(&format!(" ON CONFLICT ({}) {}", quoted(&keys), conflict));
    }

    Ok((create, upsert))
}

/// Binds one cell; `Null` is bound with the SQL type of its column
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
    kind: ColumnKind,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Text(s) => query.bind(s.as_str()),
        Value::Integer(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Timestamp(t) => query.bind(*t),
        Value::Bool(b) => query.bind(*b),
        Value::Null => match kind {
            ColumnKind::Text => query.bind(None::<String>),
            ColumnKind::Integer => query.bind(None::<i64>),
            ColumnKind::Float => query.bind(None::<f64>),
            ColumnKind::Timestamp => query.bind(None::<DateTime<Utc>>),
            ColumnKind::Bool => query.bind(None::<bool>),
        },
    }
}

#[async_trait]
impl Publisher for PostgresPublisher {
    fn name(&self) -> &str {
        "Postgres"
    }

    async fn register_metric(&self, metric: &dyn Metric) -> Result<(), PublishError> {
        let name = metric.name();
        if self
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
        {
            return Err(PublishError::AlreadyRegistered(name.to_string()));
        }

        let (create, upsert) = table_statements(name, metric.columns())?;
        debug!("Preparing table {}: {}", name, create);
        sqlx::query(&create).execute(&self.pool).await?;

        let mut statements = self.statements.lock().unwrap_or_else(|e| e.into_inner());
        if statements.contains_key(name) {
            return Err(PublishError::AlreadyRegistered(name.to_string()));
        }
        statements.insert(name.to_string(), upsert);
        Ok(())
    }

    async fn publish(&self, metric: &dyn Metric, data: &DataSet) -> Result<(), PublishError> {
        let name = metric.name();
        let upsert = self
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| PublishError::NotRegistered(name.to_string()))?;

        let mut tx = self.pool.begin().await?;
        for row in data.rows() {
            let mut query = sqlx::query(&upsert);
            for (value, column) in row.iter().zip(data.columns()) {
                query = bind_value(query, value, column.kind);
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!("Published {} rows of metric {}", data.len(), name);

        if let Some(retention) = metric.retention() {
            let deleted = self.retention.run(name, retention).await?;
            info!("Deleted {} stale rows of metric {}", deleted, name);
        }

        Ok(())
    }
}
