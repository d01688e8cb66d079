//! Re-check policy: a pure function deciding whether a workload is due for
//! another pass of the engine, gated by a configurable `HEIMDALL_RECHECK_MINS`
//! window and by whether the workload's image set has changed since the
//! last pass.

use crate::models::workload::{DEFAULT_RECHECK_MINUTES, TIME_FORMAT, annotations};
use chrono::Utc;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{annotation} is not a valid RFC822Z timestamp: {value:?}")]
    BadTimestamp { annotation: &'static str, value: String },
    #[error("HEIMDALL_RECHECK_MINS={0:?} is not a valid integer")]
    BadRecheckMinutes(String),
}

/// Outcome of a policy evaluation. `parse_error`, when present, never makes
/// `should_check` itself fail the caller — it only tells the controller to
/// clear the stale annotation so the next event starts clean.
pub struct Decision {
    pub should_check: bool,
    pub parse_error: Option<ParseError>,
}

/// Minutes between checks, read from `HEIMDALL_RECHECK_MINS`. An unparseable
/// value yields the default alongside a `ParseError` the caller may log.
pub fn recheck_minutes_from_env() -> (u64, Option<ParseError>) {
    match std::env::var("HEIMDALL_RECHECK_MINS") {
        Ok(raw) => match raw.parse() {
            Ok(minutes) => (minutes, None),
            Err(_) => (DEFAULT_RECHECK_MINUTES, Some(ParseError::BadRecheckMinutes(raw))),
        },
        Err(_) => (DEFAULT_RECHECK_MINUTES, None),
    }
}

/// Decide whether the engine should run now for a workload carrying
/// `meta_annotations`, given the content digests it's currently observed
/// running (`current_digests`).
pub fn should_check(meta_annotations: &BTreeMap<String, String>, current_digests: &[String]) -> Decision {
    let (recheck_minutes, env_parse_error) = recheck_minutes_from_env();

    let checked_digests: Vec<&str> = meta_annotations
        .get(annotations::IMAGES_CHECKED)
        .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    if current_digests.iter().any(|d| !checked_digests.contains(&d.as_str())) {
        return Decision { should_check: true, parse_error: env_parse_error };
    }

    let last_checked = match meta_annotations.get(annotations::LAST_CHECKED) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Decision { should_check: true, parse_error: env_parse_error },
    };

    let parsed = match chrono::DateTime::parse_from_str(last_checked, TIME_FORMAT) {
        Ok(t) => t,
        Err(_) => {
            return Decision {
                should_check: false,
                parse_error: Some(ParseError::BadTimestamp {
                    annotation: annotations::LAST_CHECKED,
                    value: last_checked.clone(),
                }),
            };
        }
    };

    let due_at = parsed + chrono::Duration::minutes(recheck_minutes as i64);
    Decision {
        should_check: Utc::now() >= due_at,
        parse_error: env_parse_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn meta(last_checked: &str, images_checked: &str) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert(annotations::LAST_CHECKED.to_string(), last_checked.to_string());
        m.insert(annotations::IMAGES_CHECKED.to_string(), images_checked.to_string());
        m
    }

    #[test]
    fn first_check_when_no_annotations_present() {
        let decision = should_check(&BTreeMap::new(), &["sha256:a".to_string()]);
        assert!(decision.should_check);
        assert!(decision.parse_error.is_none());
    }

    #[test]
    fn image_identity_change_forces_a_check() {
        let m = meta(&Utc::now().format(TIME_FORMAT).to_string(), "A,B");
        let decision = should_check(&m, &["A".to_string(), "C".to_string()]);
        assert!(decision.should_check);
    }

    #[test]
    fn unchanged_images_within_window_skips_check() {
        let m = meta(&Utc::now().format(TIME_FORMAT).to_string(), "A,B");
        let decision = should_check(&m, &["A".to_string(), "B".to_string()]);
        assert!(!decision.should_check);
    }

    #[test]
    fn stale_lastcheck_triggers_a_check() {
        let stale = Utc::now() - chrono::Duration::minutes(31);
        let m = meta(&stale.format(TIME_FORMAT).to_string(), "A,B");
        let decision = should_check(&m, &["A".to_string(), "B".to_string()]);
        assert!(decision.should_check);
    }

    #[test]
    fn malformed_lastcheck_yields_parse_error_and_no_check() {
        let m = meta("not-a-timestamp", "A,B");
        let decision = should_check(&m, &["A".to_string(), "B".to_string()]);
        assert!(!decision.should_check);
        assert!(matches!(decision.parse_error, Some(ParseError::BadTimestamp { .. })));
    }

    #[test]
    fn monotonic_in_time() {
        let stale = Utc::now() - chrono::Duration::minutes(45);
        let m = meta(&stale.format(TIME_FORMAT).to_string(), "A");
        let first = should_check(&m, &["A".to_string()]);
        assert!(first.should_check);
        // an even staler timestamp must still trigger a check
        let staler = Utc::now() - chrono::Duration::minutes(90);
        let m2 = meta(&staler.format(TIME_FORMAT).to_string(), "A");
        let second = should_check(&m2, &["A".to_string()]);
        assert!(second.should_check);
    }
}
