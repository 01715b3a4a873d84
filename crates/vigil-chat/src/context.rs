//! Follow-up resolution and conversation topics.
//!
//! Fills in what a follow-up leaves implicit ("what about memory" after a
//! question about checkout-service) from the session's carried entities.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{
    Intent, IntentCategory, Session, ENTITY_METRIC, ENTITY_SERVICE, ENTITY_TIME_RANGE,
};

/// Phrases that ask about everything, which cancel any carried service.
static WIDE_SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:all|every|each)\s+(?:services?|apps?|applications?)\b|\beverything\b|\boverall\b")
        .unwrap()
});

/// Resolve `intent` against the session's carried context.
///
/// Pure: returns a new intent and leaves both inputs untouched. Entities are
/// carried only into follow-ups (see [`Intent::is_follow_up`]).
pub fn resolve(intent: &Intent, session: &Session) -> Intent {
    let follow_up = intent.is_follow_up();
    let mut resolved = intent.clone();

    if resolved.category == IntentCategory::Unknown && follow_up {
        if let Some(category) = session.last_category {
            resolved.category = category;
        }
    }

    // Only a follow-up leans on earlier turns; a standalone question keeps
    // exactly the scope it states.
    if !follow_up || resolved.category == IntentCategory::Unknown {
        return resolved;
    }

    let carry = |resolved: &mut Intent, key: &str| {
        if resolved.entities.contains_key(key) {
            return;
        }
        if let Some(value) = session.last_entities.get(key) {
            resolved.entities.insert(key.to_string(), value.clone());
        }
    };

    if !WIDE_SCOPE_RE.is_match(&resolved.raw_text) {
        carry(&mut resolved, ENTITY_SERVICE);
    }
    if resolved.category == IntentCategory::MetricQuery {
        carry(&mut resolved, ENTITY_METRIC);
    }
    carry(&mut resolved, ENTITY_TIME_RANGE);

    resolved
}

// =============================================================================
// Topics
// =============================================================================

static TOPICS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("CPU Performance", r"(?i)\b(?:cpu|processor)\b"),
        ("Memory Usage", r"(?i)\b(?:memory|ram|mem)\b"),
        ("Disk I/O", r"(?i)\b(?:disk|storage|filesystem|i/o)(?:\b|$)"),
        ("Network", r"(?i)\b(?:network|bandwidth|traffic)\b"),
        ("Alerts", r"(?i)\b(?:alerts?|alarms?|incidents?|firing)\b"),
        ("System Health", r"(?i)\b(?:health|healthy|status)\b"),
        ("Services", r"(?i)\b(?:services?|applications?|apps?)\b"),
    ]
    .into_iter()
    .map(|(topic, pattern)| (topic, Regex::new(pattern).unwrap()))
    .collect()
});

/// Topics mentioned across `utterances`, in a fixed display order.
pub fn extract_topics<'a>(utterances: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let utterances: Vec<&str> = utterances.into_iter().collect();
    TOPICS
        .iter()
        .filter(|(_, re)| utterances.iter().any(|u| re.is_match(u)))
        .map(|(topic, _)| topic.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::IntentClassifier;
    use crate::types::{Turn, TurnMetadata};
    use chrono::Utc;

    fn session_after(classifier: &IntentClassifier, text: &str) -> Session {
        let intent = classifier.classify(text);
        let mut session = Session::new("s");
        session.record_turn(
            Turn {
                utterance: text.into(),
                metadata: TurnMetadata::new(intent.category),
                intent,
                response: String::new(),
                timestamp: Utc::now(),
                processing_time_ms: 0,
            },
            10,
        );
        session
    }

    // ---- Entity carry ----

    #[test]
    fn test_follow_up_inherits_service() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "show CPU for checkout-service");
        let resolved = resolve(&c.classify("what about memory"), &session);
        assert_eq!(resolved.category, IntentCategory::MetricQuery);
        assert_eq!(resolved.entity("service"), Some("checkout-service"));
        assert_eq!(resolved.entity("metric"), Some("memory"));
    }

    #[test]
    fn test_explicit_entities_win() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "cpu for checkout-service in the last 2 hours");
        let resolved = resolve(&c.classify("cpu for payments-service over 15m"), &session);
        assert_eq!(resolved.entity("service"), Some("payments-service"));
        assert_eq!(resolved.entity("time_range"), Some("15m"));
    }

    #[test]
    fn test_time_range_carried() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "cpu for checkout-service in the last 2 hours");
        let resolved = resolve(&c.classify("what about alerts?"), &session);
        assert_eq!(resolved.category, IntentCategory::AlertQuery);
        assert_eq!(resolved.entity("time_range"), Some("2h"));
    }

    #[test]
    fn test_metric_not_carried_into_alerts() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "show CPU for checkout-service");
        let resolved = resolve(&c.classify("and any alerts?"), &session);
        assert_eq!(resolved.entity("metric"), None);
        assert_eq!(resolved.entity("service"), Some("checkout-service"));
    }

    #[test]
    fn test_standalone_questions_keep_their_own_scope() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "show CPU for checkout-service in the last 2 hours");
        for text in ["what alerts are firing?", "show memory usage", "is the system healthy?"] {
            let intent = c.classify(text);
            assert!(!intent.is_follow_up(), "{} read as a follow-up", text);
            let resolved = resolve(&intent, &session);
            assert_eq!(resolved, intent, "{} picked up carried context", text);
            assert_eq!(resolved.entity("service"), None);
            assert_eq!(resolved.entity("time_range"), None);
        }
    }

    #[test]
    fn test_wide_scope_drops_carried_service() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "show CPU for checkout-service");
        let resolved = resolve(&c.classify("what about cpu for all services"), &session);
        assert_eq!(resolved.entity("service"), None);
    }

    #[test]
    fn test_service_listing_not_narrowed_unless_follow_up() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "show CPU for checkout-service");
        let resolved = resolve(&c.classify("list services"), &session);
        assert_eq!(resolved.entity("service"), None);
    }

    // ---- Category carry ----

    #[test]
    fn test_unknown_follow_up_inherits_category() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "show alerts for checkout-service");
        let resolved = resolve(&c.classify("and payments-service?"), &session);
        assert_eq!(resolved.category, IntentCategory::AlertQuery);
        assert_eq!(resolved.entity("service"), Some("payments-service"));
    }

    #[test]
    fn test_unknown_without_follow_up_stays_unknown() {
        let c = IntentClassifier::default();
        let session = session_after(&c, "show alerts");
        let resolved = resolve(&c.classify("tell me a joke"), &session);
        assert_eq!(resolved.category, IntentCategory::Unknown);
        assert!(resolved.entities.is_empty());
    }

    #[test]
    fn test_fresh_session_changes_nothing() {
        let c = IntentClassifier::default();
        let intent = c.classify("show CPU for checkout-service");
        assert_eq!(resolve(&intent, &Session::new("s")), intent);
    }

    // ---- Topics ----

    #[test]
    fn test_topics_in_fixed_order() {
        let topics = extract_topics(["any alerts?", "cpu for checkout", "how much RAM"]);
        assert_eq!(topics, vec!["CPU Performance", "Memory Usage", "Alerts"]);
    }

    #[test]
    fn test_topics_empty() {
        assert!(extract_topics(["hello there"]).is_empty());
        assert!(extract_topics(Vec::<&str>::new()).is_empty());
    }
}
