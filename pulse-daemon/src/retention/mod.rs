//! Garbage collection of persisted metric tables
//!
//! Every persisted metric gets one table named after it. Metrics that declare
//! a [`Retention`] are trimmed after each publish by one of two strategies:
//!
//! - time window: drop rows whose `timestamp` lies more than the window
//!   before the newest `timestamp` in the table
//! - build window: per (`org`, `pipeline`), drop rows whose `build` is more
//!   than the window behind the newest build of that pipeline
//!
//! Before deleting anything the selector reads the live column types of the
//! table. A missing or mistyped column aborts the run without deletions, and
//! the live type of the `timestamp` column decides how ages are computed.

mod store;

pub use store::PgRetentionStore;

use async_trait::async_trait;
use pulse_core::DataError;
use pulse_core::data::validate_identifier;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::metrics::{Retention, RetentionKind};

const TEXT_TYPES: &[&str] = &["text", "character varying", "character"];
const INTEGER_TYPES: &[&str] = &["integer", "bigint", "smallint"];
const NATIVE_TIMESTAMP_TYPES: &[&str] = &["timestamp with time zone", "timestamp without time zone"];
/// Native timestamps, or integer seconds since the epoch
const TIMESTAMP_TYPES: &[&str] = &[
    "timestamp with time zone",
    "timestamp without time zone",
    "bigint",
    "integer",
];

/// Errors raised by a retention run
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error(
        "Table '{table}' cannot be garbage collected since it does not have the required structure: Missing column '{column}'"
    )]
    MissingColumn { table: String, column: String },

    #[error(
        "Table '{table}' cannot be garbage collected since it does not have the required structure: Column '{column}' has type '{actual}', but should have '{expected}'"
    )]
    WrongColumnType {
        table: String,
        column: String,
        actual: String,
        expected: String,
    },

    #[error(transparent)]
    InvalidIdentifier(#[from] DataError),

    #[error("Failed to garbage collect table '{table}': {source}")]
    Store {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

/// A column a strategy relies on, with the live types it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRequirement {
    pub name: &'static str,
    pub accepted_types: &'static [&'static str],
}

impl ColumnRequirement {
    fn expected(&self) -> String {
        self.accepted_types.join("' or '")
    }
}

/// How the time window's `timestamp` column stores time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampEncoding {
    Native,
    EpochSeconds,
}

/// Rows a retention run deletes, resolved against the live schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionPredicate {
    /// Rows more than `max_age_seconds` older than the newest row
    OlderThan {
        column: &'static str,
        encoding: TimestampEncoding,
        max_age_seconds: i64,
    },
    /// Rows more than `max_builds_behind` builds behind the newest build of their group
    BuildsBehind {
        group_by: [&'static str; 2],
        column: &'static str,
        max_builds_behind: i64,
    },
}

impl DeletionPredicate {
    /// Value bound to `$1` in [`to_sql`](Self::to_sql)
    pub fn threshold(&self) -> i64 {
        match self {
            DeletionPredicate::OlderThan { max_age_seconds, .. } => *max_age_seconds,
            DeletionPredicate::BuildsBehind { max_builds_behind, .. } => *max_builds_behind,
        }
    }

    /// Postgres `DELETE` statement for `table`, which must be a valid identifier
    pub fn to_sql(&self, table: &str) -> String {
        match self {
            DeletionPredicate::OlderThan {
                column,
                encoding,
                max_age_seconds: _,
            } => {
                let age = match encoding {
                    TimestampEncoding::Native => {
                        format!("EXTRACT(EPOCH FROM (m.latest - \"{table}\".\"{column}\"))")
                    }
                    TimestampEncoding::EpochSeconds => format!("m.latest - \"{table}\".\"{column}\""),
                };
                format!(
                    "DELETE FROM \"{table}\" USING (SELECT MAX(\"{column}\") AS latest FROM \"{table}\") m WHERE {age} > $1"
                )
            }
            DeletionPredicate::BuildsBehind {
                group_by: [first, second],
                column,
                max_builds_behind: _,
            } => format!(
                "DELETE FROM \"{table}\" USING (SELECT \"{first}\", \"{second}\", MAX(\"{column}\") AS latest FROM \"{table}\" GROUP BY \"{first}\", \"{second}\") m \
                 WHERE \"{table}\".\"{first}\" = m.\"{first}\" AND \"{table}\".\"{second}\" = m.\"{second}\" AND m.latest - \"{table}\".\"{column}\" > $1"
            ),
        }
    }
}

/// Retention policy of one metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionStrategy {
    TimeWindow { delta_seconds: i64 },
    BuildWindow { delta_builds: i64 },
}

impl From<Retention> for RetentionStrategy {
    fn from(retention: Retention) -> Self {
        match retention.kind {
            RetentionKind::TimeWindow => RetentionStrategy::TimeWindow {
                delta_seconds: retention.relevant_delta,
            },
            RetentionKind::BuildWindow => RetentionStrategy::BuildWindow {
                delta_builds: retention.relevant_delta,
            },
        }
    }
}

impl RetentionStrategy {
    pub fn requirements(&self) -> Vec<ColumnRequirement> {
        match self {
            RetentionStrategy::TimeWindow { .. } => vec![ColumnRequirement {
                name: "timestamp",
                accepted_types: TIMESTAMP_TYPES,
            }],
            RetentionStrategy::BuildWindow { .. } => vec![
                ColumnRequirement {
                    name: "org",
                    accepted_types: TEXT_TYPES,
                },
                ColumnRequirement {
                    name: "pipeline",
                    accepted_types: TEXT_TYPES,
                },
                ColumnRequirement {
                    name: "build",
                    accepted_types: INTEGER_TYPES,
                },
            ],
        }
    }

    /// Checks the live column types and builds the predicate they call for
    pub fn resolve(
        &self,
        table: &str,
        live_types: &HashMap<String, String>,
    ) -> Result<DeletionPredicate, RetentionError> {
        for requirement in self.requirements() {
            let actual = live_types
                .get(requirement.name)
                .ok_or_else(|| RetentionError::MissingColumn {
                    table: table.to_string(),
                    column: requirement.name.to_string(),
                })?;
            if !requirement.accepted_types.contains(&actual.as_str()) {
                return Err(RetentionError::WrongColumnType {
                    table: table.to_string(),
                    column: requirement.name.to_string(),
                    actual: actual.clone(),
                    expected: requirement.expected(),
                });
            }
        }

        Ok(match *self {
            RetentionStrategy::TimeWindow { delta_seconds } => {
                let live = live_types.get("timestamp").map(String::as_str).unwrap_or_default();
                let encoding = if NATIVE_TIMESTAMP_TYPES.contains(&live) {
                    TimestampEncoding::Native
                } else {
                    TimestampEncoding::EpochSeconds
                };
                DeletionPredicate::OlderThan {
                    column: "timestamp",
                    encoding,
                    max_age_seconds: delta_seconds,
                }
            }
            RetentionStrategy::BuildWindow { delta_builds } => DeletionPredicate::BuildsBehind {
                group_by: ["org", "pipeline"],
                column: "build",
                max_builds_behind: delta_builds,
            },
        })
    }
}

/// Schema lookups and deletions against the relational store
#[async_trait]
pub trait RetentionStore: Send + Sync {
    /// Live data types of those `columns` that exist in `table`
    async fn column_types(&self, table: &str, columns: &[&str]) -> Result<HashMap<String, String>, sqlx::Error>;

    /// Deletes the rows matching `predicate`, returning how many were removed
    async fn delete_rows(&self, table: &str, predicate: &DeletionPredicate) -> Result<u64, sqlx::Error>;
}

/// Picks and runs the retention strategy of a metric
pub struct RetentionStrategySelector<S> {
    store: S,
}

impl<S: RetentionStore> RetentionStrategySelector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Trims the table of `metric`, returning the number of deleted rows
    pub async fn run(&self, metric: &str, retention: Retention) -> Result<u64, RetentionError> {
        let table = validate_identifier(metric)?;
        let strategy = RetentionStrategy::from(retention);

        let names: Vec<&str> = strategy.requirements().iter().map(|r| r.name).collect();
        let live_types = self
            .store
            .column_types(table, &names)
            .await
            .map_err(|source| RetentionError::Store {
                table: table.to_string(),
                source,
            })?;

        let predicate = strategy.resolve(table, &live_types)?;
        debug!("Running {:?} on table {}", predicate, table);

        let deleted = self
            .store
            .delete_rows(table, &predicate)
            .await
            .map_err(|source| RetentionError::Store {
                table: table.to_string(),
                source,
            })?;

        info!("Garbage collection deleted {} rows from {}", deleted, table);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum Cell {
        Int(i64),
        Text(String),
    }

    impl Cell {
        fn int(&self) -> i64 {
            match self {
                Cell::Int(i) => *i,
                Cell::Text(_) => panic!("not an integer: {:?}", self),
            }
        }
    }

    type Row = HashMap<&'static str, Cell>;

    /// Single-table store evaluating predicates in memory
    ///
    /// Native timestamps are held as epoch seconds too.
    struct FakeStore {
        table: &'static str,
        schema: HashMap<String, String>,
        rows: Mutex<Vec<Row>>,
        deletes: Mutex<usize>,
    }

    impl FakeStore {
        fn new(table: &'static str, schema: &[(&str, &str)], rows: Vec<Row>) -> Self {
            Self {
                table,
                schema: schema
                    .iter()
                    .map(|(n, t)| (n.to_string(), t.to_string()))
                    .collect(),
                rows: Mutex::new(rows),
                deletes: Mutex::new(0),
            }
        }

        fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RetentionStore for FakeStore {
        async fn column_types(&self, table: &str, columns: &[&str]) -> Result<HashMap<String, String>, sqlx::Error> {
            if table != self.table {
                return Ok(HashMap::new());
            }
            Ok(self
                .schema
                .iter()
                .filter(|(name, _)| columns.contains(&name.as_str()))
                .map(|(n, t)| (n.clone(), t.clone()))
                .collect())
        }

        async fn delete_rows(&self, _table: &str, predicate: &DeletionPredicate) -> Result<u64, sqlx::Error> {
            *self.deletes.lock().unwrap() += 1;
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();

            match predicate {
                DeletionPredicate::OlderThan {
                    column,
                    max_age_seconds,
                    ..
                } => {
                    let latest = rows.iter().map(|r| r[column].int()).max().unwrap_or_default();
                    rows.retain(|r| latest - r[column].int() <= *max_age_seconds);
                }
                DeletionPredicate::BuildsBehind {
                    group_by: [first, second],
                    column,
                    max_builds_behind,
                } => {
                    let mut latest: HashMap<(Cell, Cell), i64> = HashMap::new();
                    for r in rows.iter() {
                        let entry = latest
                            .entry((r[first].clone(), r[second].clone()))
                            .or_insert(i64::MIN);
                        *entry = (*entry).max(r[column].int());
                    }
                    rows.retain(|r| {
                        latest[&(r[first].clone(), r[second].clone())] - r[column].int() <= *max_builds_behind
                    });
                }
            }

            Ok((before - rows.len()) as u64)
        }
    }

    fn timed_row(timestamp: i64) -> Row {
        HashMap::from([("timestamp", Cell::Int(timestamp)), ("org", Cell::Text("o".into()))])
    }

    fn build_row(pipeline: &str, build: i64) -> Row {
        HashMap::from([
            ("org", Cell::Text("o".into())),
            ("pipeline", Cell::Text(pipeline.into())),
            ("build", Cell::Int(build)),
        ])
    }

    const DAY: i64 = 24 * 60 * 60;

    #[tokio::test]
    async fn test_time_window_deletes_old_rows() {
        let store = FakeStore::new(
            "worker_availability",
            &[("timestamp", "timestamp with time zone"), ("org", "text")],
            vec![timed_row(0), timed_row(DAY), timed_row(2 * DAY), timed_row(2 * DAY + 1)],
        );
        let selector = RetentionStrategySelector::new(store);

        let deleted = selector
            .run(
                "worker_availability",
                Retention::time_window(Duration::from_secs(DAY as u64)),
            )
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(selector.store.row_count(), 2);
    }

    #[tokio::test]
    async fn test_build_window_is_per_pipeline() {
        let mut rows: Vec<Row> = (1..=5).map(|b| build_row("bazel", b)).collect();
        rows.extend((1..=2).map(|b| build_row("rules_go", b)));
        let store = FakeStore::new(
            "critical_path",
            &[
                ("org", "character varying"),
                ("pipeline", "character varying"),
                ("build", "integer"),
            ],
            rows,
        );
        let selector = RetentionStrategySelector::new(store);

        let deleted = selector
            .run("critical_path", Retention::builds(2))
            .await
            .unwrap();

        // bazel keeps 3..=5, rules_go keeps both
        assert_eq!(deleted, 2);
        assert_eq!(selector.store.row_count(), 5);
    }

    #[tokio::test]
    async fn test_missing_column_deletes_nothing() {
        let store = FakeStore::new(
            "platform_load",
            &[("ts", "timestamp with time zone"), ("org", "text")],
            vec![timed_row(0), timed_row(10 * DAY)],
        );
        let selector = RetentionStrategySelector::new(store);
        let before = selector.store.row_count();

        let err = selector
            .run("platform_load", Retention::time_window(Duration::from_secs(60)))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Table 'platform_load' cannot be garbage collected since it does not have the required structure: Missing column 'timestamp'"
        );
        assert_eq!(selector.store.row_count(), before);
        assert_eq!(*selector.store.deletes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_column_type_deletes_nothing() {
        let store = FakeStore::new(
            "critical_path",
            &[("org", "text"), ("pipeline", "text"), ("build", "text")],
            vec![build_row("bazel", 1), build_row("bazel", 500)],
        );
        let selector = RetentionStrategySelector::new(store);

        let err = selector
            .run("critical_path", Retention::builds(100))
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            RetentionError::WrongColumnType { column, actual, .. } if column == "build" && actual == "text"
        ));
        assert_eq!(selector.store.row_count(), 2);
        assert_eq!(*selector.store.deletes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_table_name() {
        let store = FakeStore::new("x", &[], Vec::new());
        let selector = RetentionStrategySelector::new(store);

        let err = selector
            .run("drop table; --", Retention::builds(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RetentionError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_encoding_follows_live_type() {
        let strategy = RetentionStrategy::TimeWindow { delta_seconds: 60 };
        let live = |t: &str| HashMap::from([("timestamp".to_string(), t.to_string())]);

        let native = strategy.resolve("t", &live("timestamp without time zone")).unwrap();
        assert!(matches!(
            native,
            DeletionPredicate::OlderThan {
                encoding: TimestampEncoding::Native,
                ..
            }
        ));

        let epoch = strategy.resolve("t", &live("bigint")).unwrap();
        assert!(matches!(
            epoch,
            DeletionPredicate::OlderThan {
                encoding: TimestampEncoding::EpochSeconds,
                ..
            }
        ));

        assert!(strategy.resolve("t", &live("text")).is_err());
    }

    #[test]
    fn test_time_window_sql() {
        let predicate = DeletionPredicate::OlderThan {
            column: "timestamp",
            encoding: TimestampEncoding::Native,
            max_age_seconds: 86_400,
        };
        assert_eq!(
            predicate.to_sql("worker_availability"),
            "DELETE FROM \"worker_availability\" USING (SELECT MAX(\"timestamp\") AS latest FROM \"worker_availability\") m \
             WHERE EXTRACT(EPOCH FROM (m.latest - \"worker_availability\".\"timestamp\")) > $1"
        );
        assert_eq!(predicate.threshold(), 86_400);
    }

    #[test]
    fn test_build_window_sql() {
        let predicate = DeletionPredicate::BuildsBehind {
            group_by: ["org", "pipeline"],
            column: "build",
            max_builds_behind: 100,
        };
        assert_eq!(
            predicate.to_sql("critical_path"),
            "DELETE FROM \"critical_path\" USING (SELECT \"org\", \"pipeline\", MAX(\"build\") AS latest FROM \"critical_path\" GROUP BY \"org\", \"pipeline\") m \
             WHERE \"critical_path\".\"org\" = m.\"org\" AND \"critical_path\".\"pipeline\" = m.\"pipeline\" AND m.latest - \"critical_path\".\"build\" > $1"
        );
    }
}
