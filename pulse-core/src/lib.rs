//! Pulse Core
//!
//! Core types and algorithms for the Pulse CI metrics pipeline.
//!
//! This crate contains:
//! - Domain types: builds, jobs, agents and pipeline identities
//! - Tabular data: columns, values and data sets produced by metrics
//! - Clock: injectable time source
//! - Timing: sweep-line analysis of overlapping job intervals

pub mod clock;
pub mod data;
pub mod domain;
pub mod error;
pub mod timing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use data::{Column, ColumnKind, DataSet, TimeSeriesPoint, Value};
pub use error::DataError;
