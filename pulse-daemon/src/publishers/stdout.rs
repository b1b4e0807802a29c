//! Publisher printing data sets

use async_trait::async_trait;
use pulse_core::DataSet;
use std::io::Write;
use std::sync::Mutex;

use super::{PublishError, Publisher};
use crate::metrics::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `;` separated rows
    Csv,
    /// Tab separated table with a header
    PlainText,
}

impl OutputFormat {
    pub fn render(&self, metric_name: &str, data: &DataSet) -> String {
        match self {
            OutputFormat::Csv => data.to_csv_lines().join("\n"),
            OutputFormat::PlainText => format!("Metric {}:\n{}", metric_name, data),
        }
    }
}

/// Writes every data set to a shared writer, stdout by default
pub struct StdoutPublisher {
    format: OutputFormat,
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutPublisher {
    pub fn new(format: OutputFormat) -> Self {
        Self::with_writer(format, Box::new(std::io::stdout()))
    }

    pub fn with_writer(format: OutputFormat, out: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl Publisher for StdoutPublisher {
    fn name(&self) -> &str {
        "Stdout"
    }

    async fn register_metric(&self, _metric: &dyn Metric) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish(&self, metric: &dyn Metric, data: &DataSet) -> Result<(), PublishError> {
        let text = self.format.render(metric.name(), data);
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{}", text)?;
        out.flush()?;
        Ok(())
    }
}
