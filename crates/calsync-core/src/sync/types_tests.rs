//! Tests for sync types module.

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use chrono::{Duration, TimeZone, Utc};

    fn action() -> Action {
        Action {
            id: "1735725600000-abc".to_string(),
            seq: 1,
            action_type: ActionType::Update,
            entity_type: EntityType::Event,
            entity_id: "e1".to_string(),
            source: ActionSource::Local,
            data: serde_json::json!({"title": "Test"}),
            previous_data: None,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
            synchronized: false,
            failed: false,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            in_flight: false,
        }
    }

    #[test]
    fn test_enum_string_roundtrip() {
        for t in [ActionType::Create, ActionType::Update, ActionType::Delete] {
            assert_eq!(ActionType::parse(t.as_str()), Some(t));
        }
        for e in [EntityType::Event, EntityType::Tag] {
            assert_eq!(EntityType::parse(e.as_str()), Some(e));
        }
        for s in [ActionSource::Local, ActionSource::Remote] {
            assert_eq!(ActionSource::parse(s.as_str()), Some(s));
        }
        assert_eq!(ActionType::parse("upsert"), None);
    }

    #[test]
    fn test_outcome() {
        let mut a = action();
        assert_eq!(a.outcome(), ActionOutcome::Pending);
        a.failed = true;
        assert_eq!(a.outcome(), ActionOutcome::Failed);
        a.synchronized = true;
        assert_eq!(a.outcome(), ActionOutcome::Synchronized);
        assert!(a.is_retired());
    }

    #[test]
    fn test_backoff_gate() {
        let mut a = action();
        let now = a.timestamp;
        assert!(a.is_due(now));

        a.next_attempt_at = Some(now + Duration::seconds(30));
        assert!(!a.is_due(now));
        assert!(a.is_due(now + Duration::seconds(30)));

        a.next_attempt_at = None;
        a.in_flight = true;
        assert!(!a.is_due(now));
    }

    #[test]
    fn test_coalescing_eligibility() {
        let mut a = action();
        assert!(a.accepts_coalescing());

        a.in_flight = true;
        assert!(!a.accepts_coalescing());
        a.in_flight = false;

        a.source = ActionSource::Remote;
        assert!(!a.accepts_coalescing());
        a.source = ActionSource::Local;

        a.action_type = ActionType::Delete;
        assert!(!a.accepts_coalescing());
    }

    #[test]
    fn test_sync_options_default_pulls() {
        let opts = SyncOptions::default();
        assert!(opts.pull);
        assert!(!opts.force_retry);
    }

    #[test]
    fn test_sync_result_serialization() {
        let result = SyncResult {
            applied: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["applied"], 1);
        assert_eq!(json["failed"], 0);
        assert_eq!(json["already_running"], false);
    }
}
