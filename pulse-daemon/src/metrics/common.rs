//! Helpers shared by the collectors

use chrono::{DateTime, Utc};
use pulse_core::Value;
use pulse_core::domain::Job;
use pulse_core::timing::{ClockSkew, MISSING_TIMESTAMP, difference_seconds};

use super::CollectError;

/// Platform a job ran on, from its name or else its agent queue
pub fn platform_for_job(job: &Job) -> Option<String> {
    job.name
        .as_deref()
        .and_then(platform_from_job_name)
        .map(str::to_string)
        .or_else(|| platform_from_agent_query_rules(&job.agent_query_rules))
}

pub fn platform_from_job_name(name: &str) -> Option<&'static str> {
    if name.contains("ubuntu") {
        Some("linux")
    } else if name.contains("windows") {
        Some("windows")
    } else if name.contains("darwin") {
        Some("macos")
    } else if name.contains("gcloud") {
        Some("rbe")
    } else {
        None
    }
}

/// Platform named by the first `queue=<name>` rule; the default queue runs linux
pub fn platform_from_agent_query_rules(rules: &[String]) -> Option<String> {
    rules.iter().find_map(|rule| match rule.split_once('=') {
        Some(("queue", "default")) => Some("linux".to_string()),
        Some(("queue", queue)) if !queue.contains('=') => Some(queue.to_string()),
        _ => None,
    })
}

/// Platform of an agent: its hostname without the trailing `-<suffix>`
pub fn platform_for_host(hostname: &str) -> Result<&str, CollectError> {
    hostname
        .rfind('-')
        .map(|pos| &hostname[..pos])
        .ok_or_else(|| {
            CollectError::InvalidData(format!(
                "Unknown host name '{}' cannot be resolved to a platform",
                hostname
            ))
        })
}

/// Duration in seconds, `Null` when an endpoint is missing
///
/// Sub-second skew counts as zero; larger skew is an error for the caller to report.
pub fn duration(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Value, ClockSkew> {
    let seconds = difference_seconds(start, end)?;
    Ok(if seconds == MISSING_TIMESTAMP { Value::Null } else { Value::Float(seconds) })
}

/// Shard number of a job named like `... (shard 3)`, 0 for unsharded jobs
pub fn shard_from_job_name(name: &str) -> i64 {
    name.strip_suffix(')')
        .and_then(|rest| rest.rsplit_once("(shard "))
        .and_then(|(_, shard)| shard.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::at;

    fn job(name: Option<&str>, rules: &[&str]) -> Job {
        Job {
            name: name.map(str::to_string),
            agent_query_rules: rules.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_platform_from_job_name() {
        assert_eq!(platform_from_job_name(":ubuntu: 18.04 (OpenJDK 11)"), Some("linux"));
        assert_eq!(platform_from_job_name(":windows: Windows"), Some("windows"));
        assert_eq!(platform_from_job_name(":darwin: macOS"), Some("macos"));
        assert_eq!(platform_from_job_name(":gcloud: RBE"), Some("rbe"));
        assert_eq!(platform_from_job_name("Buildifier"), None);
    }

    #[test]
    fn test_platform_from_queue_rules() {
        let rules = |r: &[&str]| r.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(platform_from_agent_query_rules(&rules(&["queue=default"])), Some("linux".to_string()));
        assert_eq!(
            platform_from_agent_query_rules(&rules(&["os=any", "queue=macos_arm64"])),
            Some("macos_arm64".to_string())
        );
        assert_eq!(platform_from_agent_query_rules(&rules(&["os=linux"])), None);
        assert_eq!(platform_from_agent_query_rules(&[]), None);
    }

    #[test]
    fn test_job_name_wins_over_queue() {
        assert_eq!(
            platform_for_job(&job(Some(":gcloud: RBE"), &["queue=default"])).as_deref(),
            Some("rbe")
        );
        assert_eq!(
            platform_for_job(&job(Some("Buildifier"), &["queue=windows"])).as_deref(),
            Some("windows")
        );
        assert_eq!(platform_for_job(&job(None, &[])), None);
    }

    #[test]
    fn test_platform_for_host() {
        assert_eq!(platform_for_host("bk-docker-7hx2").unwrap(), "bk-docker");
        assert_eq!(platform_for_host("bk-imacpro-12").unwrap(), "bk-imacpro");
        let err = platform_for_host("localhost").unwrap_err();
        assert!(err.to_string().contains("'localhost'"));
    }

    #[test]
    fn test_duration() {
        assert_eq!(duration(Some(at(0)), Some(at(90))).unwrap(), Value::Float(90.0));
        assert_eq!(duration(None, Some(at(0))).unwrap(), Value::Null);
        assert!(duration(Some(at(10)), Some(at(0))).is_err());
    }

    #[test]
    fn test_duration_rounds_sub_second_skew_to_zero() {
        let end = at(0);
        let start = end + chrono::TimeDelta::milliseconds(400);
        assert_eq!(duration(Some(start), Some(end)).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_shard_from_job_name() {
        assert_eq!(shard_from_job_name(":darwin: Test (shard 3)"), 3);
        assert_eq!(shard_from_job_name(":darwin: Test (shard 12)"), 12);
        assert_eq!(shard_from_job_name(":darwin: Test"), 0);
        assert_eq!(shard_from_job_name(":darwin: Test (shard x)"), 0);
    }
}
