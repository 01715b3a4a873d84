//! Rule-based intent classifier.
//!
//! Classifies a monitoring question into an [`Intent`] and pulls out the
//! service, metric, time window and aggregation it mentions. Rules are
//! grouped in priority tiers: alert phrases beat health and service-listing
//! phrases, which beat metric vocabulary and generic "show me" phrases.
//! Within the winning tier the longest matched phrase decides.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use vigil_core::config::parse_duration;

use crate::types::{
    Intent, IntentCategory, ENTITY_AGGREGATION, ENTITY_METRIC, ENTITY_SERVICE, ENTITY_TIME_RANGE,
};

// =============================================================================
// Compiled rule set (compiled once, reused across calls)
// =============================================================================

struct Rule {
    tier: u8,
    category: IntentCategory,
    re: Regex,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let mk = |tier: u8, category: IntentCategory, pats: &[&str]| -> Vec<Rule> {
        pats.iter()
            .map(|p| Rule {
                tier,
                category,
                re: Regex::new(p).expect("Invalid intent regex"),
            })
            .collect()
    };

    let mut rules = Vec::new();
    // Tier 0: alerts
    rules.extend(mk(
        0,
        IntentCategory::AlertQuery,
        &[
            r"(?i)\balerts?\b",
            r"(?i)\balarms?\b",
            r"(?i)\bfiring\b",
            r"(?i)\bincidents?\b",
            r"(?i)\bpag(?:ed|ing)\b",
            r"(?i)\bwhat'?s\s+(?:broken|on\s+fire)\b",
        ],
    ));
    // Tier 1: health and service listings
    rules.extend(mk(
        1,
        IntentCategory::Health,
        &[
            r"(?i)\bhealth(?:y)?\b",
            r"(?i)\bstatus\b",
            r"(?i)\boverall\b",
            r"(?i)\bup\s+and\s+running\b",
            r"(?i)\bsystem\s+(?:check|overview)\b",
            r"(?i)\bis\s+(?:everything|anything|the\s+system)\s+(?:ok|okay|fine|up|down|running)\b",
            r"(?i)\bhow\s+(?:is|are)\s+(?:things|everything|the\s+system|my\s+systems?)\b",
        ],
    ));
    rules.extend(mk(
        1,
        IntentCategory::ServiceQuery,
        &[
            r"(?i)\blist\s+(?:all\s+)?(?:the\s+|my\s+)?(?:services|apps|applications)\b",
            r"(?i)\b(?:what|which)\s+(?:services|apps|applications)\b",
            r"(?i)\bshow\s+(?:me\s+)?(?:all\s+)?(?:the\s+|my\s+)?(?:services|applications)\b",
            r"(?i)\b(?:services|applications)\s+(?:are\s+)?(?:running|available|monitored|deployed)\b",
            r"(?i)\bavailable\s+services\b",
            r"(?i)\bservice\s+(?:list|inventory)\b",
        ],
    ));
    // Tier 2: metric vocabulary and generic questions
    rules.extend(mk(
        2,
        IntentCategory::MetricQuery,
        &[
            r"(?i)\bcpu\b",
            r"(?i)\bprocessor\b",
            r"(?i)\bmemory\b",
            r"(?i)\bram\b",
            r"(?i)\bdisk\b",
            r"(?i)\bstorage\b",
            r"(?i)\bnetwork\b",
            r"(?i)\bbandwidth\b",
            r"(?i)\btraffic\b",
            r"(?i)\blatency\b",
            r"(?i)\bresponse\s+times?\b",
            r"(?i)\bthroughput\b",
            r"(?i)\brequests\s+per\s+second\b",
            r"(?i)\b(?:rps|qps)\b",
            r"(?i)\berror\s+rate\b",
            r"(?i)\berrors?\b",
            r"(?i)\bfailures?\b",
            r"(?i)\bmetrics?\b",
            r"(?i)\busage\b",
            r"(?i)\butili[sz]ation\b",
            r"(?i)\bshow\s+me\b",
            r"(?i)\bwhat\s+is\b",
            r"(?i)\bhow\s+much\b",
            r"(?i)\b(?:graph|chart|plot)\b",
        ],
    ));
    rules
});

// =============================================================================
// Entity vocabularies
// =============================================================================

/// Metric phrases and their canonical name. Longer phrases come first so the
/// alternation prefers them.
static METRIC_VOCABULARY: &[(&str, &str)] = &[
    ("requests per second", "throughput"),
    ("response time", "latency"),
    ("error rate", "errors"),
    ("throughput", "throughput"),
    ("processor", "cpu"),
    ("bandwidth", "network"),
    ("filesystem", "disk"),
    ("exceptions", "errors"),
    ("failures", "errors"),
    ("latency", "latency"),
    ("network", "network"),
    ("storage", "disk"),
    ("traffic", "network"),
    ("failure", "errors"),
    ("memory", "memory"),
    ("errors", "errors"),
    ("error", "errors"),
    ("delay", "latency"),
    ("disk", "disk"),
    ("i/o", "disk"),
    ("cpu", "cpu"),
    ("ram", "memory"),
    ("mem", "memory"),
    ("rps", "throughput"),
    ("qps", "throughput"),
];

static METRIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alts: Vec<String> = METRIC_VOCABULARY
        .iter()
        .map(|(phrase, _)| regex::escape(phrase).replace(' ', r"\s+"))
        .collect();
    Regex::new(&format!(r"(?i)\b(?:{})(?:\b|$)", alts.join("|"))).unwrap()
});

struct TimePatterns {
    numeric: Regex,
    named: Regex,
    today: Regex,
    this_week: Regex,
}

static TIME_PATTERNS: LazyLock<TimePatterns> = LazyLock::new(|| TimePatterns {
    numeric: Regex::new(
        r"(?i)\b(\d+)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?|days?|weeks?|[smhdw])\b",
    )
    .unwrap(),
    named: Regex::new(r"(?i)\b(?:last|past|previous)\s+(minute|hour|day|week)\b").unwrap(),
    today: Regex::new(r"(?i)\btoday\b").unwrap(),
    this_week: Regex::new(r"(?i)\bthis\s+week\b").unwrap(),
});

struct AggregationPatterns {
    avg: Regex,
    sum: Regex,
    max: Regex,
    min: Regex,
}

static AGGREGATION_PATTERNS: LazyLock<AggregationPatterns> =
    LazyLock::new(|| AggregationPatterns {
        avg: Regex::new(r"(?i)\b(?:avg|mean|average)\b").unwrap(),
        sum: Regex::new(r"(?i)\b(?:sum|total)\b").unwrap(),
        max: Regex::new(r"(?i)\b(?:max|maximum|peak|highest)\b").unwrap(),
        min: Regex::new(r"(?i)\b(?:min|minimum|lowest)\b").unwrap(),
    });

static SERVICE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b([a-z0-9][a-z0-9_.]*(?:-[a-z0-9_.]+)*-(?:service|svc|api|app|db|worker|gateway))\b",
    )
    .unwrap()
});

static SERVICE_PREPOSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:for|on|of|in)\s+(?:the\s+)?([a-z0-9][a-z0-9_.\-]*)").unwrap()
});

static SERVICE_QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["`]([A-Za-z0-9_.\-]+)["`]"#).unwrap());

// =============================================================================
// IntentClassifier
// =============================================================================

/// Pattern-driven classifier. Total: unrecognized text becomes `Unknown`.
pub struct IntentClassifier {
    known_services: Vec<String>,
    known_re: Option<Regex>,
}

impl IntentClassifier {
    /// Create a classifier that also recognises the given service names.
    pub fn new(known_services: &[String]) -> Self {
        let mut known: Vec<String> = known_services
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        // Longest first so "checkout-api" beats "checkout".
        known.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        known.dedup();
        let known_re = if known.is_empty() {
            None
        } else {
            let alts: Vec<String> = known.iter().map(|s| regex::escape(s)).collect();
            Regex::new(&format!(r"(?i)(?:^|[^\w-])({})(?:$|[^\w-])", alts.join("|"))).ok()
        };
        Self {
            known_services: known,
            known_re,
        }
    }

    /// Classify `text` and extract its entities. Entities are kept even for
    /// `Unknown` so a bare follow-up ("and payments-service?") can be resolved.
    pub fn classify(&self, text: &str) -> Intent {
        let category = self.classify_category(text);
        Intent::new(category, self.extract_entities(text), text)
    }

    // -----------------------------------------------------------------
    // Category
    // -----------------------------------------------------------------

    /// Lowest matching tier wins; inside it, the longest match.
    pub fn classify_category(&self, text: &str) -> IntentCategory {
        let mut best: Option<(u8, usize, IntentCategory)> = None;
        for rule in RULES.iter() {
            if let Some((tier, _, _)) = best {
                if rule.tier > tier {
                    break;
                }
            }
            let Some(len) = rule.re.find_iter(text).map(|m| m.len()).max() else {
                continue;
            };
            best = match best {
                Some((tier, best_len, _)) if tier == rule.tier && best_len >= len => best,
                _ => Some((rule.tier, len, rule.category)),
            };
        }
        best.map_or(IntentCategory::Unknown, |(_, _, category)| category)
    }

    // -----------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------

    pub fn extract_entities(&self, text: &str) -> BTreeMap<String, String> {
        let mut entities = BTreeMap::new();
        if let Some(service) = self.extract_service(text) {
            entities.insert(ENTITY_SERVICE.to_string(), service);
        }
        if let Some(metric) = extract_metric(text) {
            entities.insert(ENTITY_METRIC.to_string(), metric.to_string());
        }
        if let Some(range) = extract_time_range(text) {
            entities.insert(ENTITY_TIME_RANGE.to_string(), range);
        }
        if let Some(aggregation) = extract_aggregation(text) {
            entities.insert(ENTITY_AGGREGATION.to_string(), aggregation.to_string());
        }
        entities
    }

    /// Known vocabulary first, then naming conventions, then prepositional
    /// phrases, then quoted names.
    pub fn extract_service(&self, text: &str) -> Option<String> {
        if let Some(re) = &self.known_re {
            if let Some(caps) = re.captures(text) {
                let matched = &caps[1];
                return self
                    .known_services
                    .iter()
                    .find(|s| s.eq_ignore_ascii_case(matched))
                    .cloned();
            }
        }

        if let Some(caps) = SERVICE_SUFFIX_RE.captures(text) {
            return Some(caps[1].to_lowercase());
        }

        for caps in SERVICE_PREPOSITION_RE.captures_iter(text) {
            let candidate = caps[1].trim_end_matches(['.', '-']);
            let looks_named =
                candidate.contains('-') || candidate.chars().any(|c| c.is_ascii_digit());
            if looks_named && parse_duration(candidate).is_none() {
                return Some(candidate.to_lowercase());
            }
        }

        SERVICE_QUOTED_RE
            .captures(text)
            .map(|caps| caps[1].to_string())
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Canonical metric name for the first vocabulary phrase in `text`.
pub fn extract_metric(text: &str) -> Option<&'static str> {
    let found = METRIC_RE.find(text)?;
    let normalized = found
        .as_str()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    METRIC_VOCABULARY
        .iter()
        .find(|(phrase, _)| *phrase == normalized)
        .map(|(_, canonical)| *canonical)
}

/// Time window normalized to `<n><unit>` (`15m`, `2h`, `7d`).
pub fn extract_time_range(text: &str) -> Option<String> {
    let tp = &*TIME_PATTERNS;

    if let Some(caps) = tp.numeric.captures(text) {
        let n: u64 = caps[1].parse().ok()?;
        if n > 0 {
            let unit = match caps[2].to_lowercase().chars().next() {
                Some('s') => "s",
                Some('m') => "m",
                Some('h') => "h",
                Some('d') => "d",
                Some('w') => return Some(format!("{}d", n.saturating_mul(7))),
                _ => return None,
            };
            return Some(format!("{}{}", n, unit));
        }
    }

    if let Some(caps) = tp.named.captures(text) {
        let normalized = match caps[1].to_lowercase().as_str() {
            "minute" => "1m",
            "hour" => "1h",
            "day" => "1d",
            _ => "7d",
        };
        return Some(normalized.to_string());
    }

    if tp.today.is_match(text) {
        return Some("1d".to_string());
    }
    if tp.this_week.is_match(text) {
        return Some("7d".to_string());
    }
    None
}

pub fn extract_aggregation(text: &str) -> Option<&'static str> {
    let ap = &*AGGREGATION_PATTERNS;
    if ap.max.is_match(text) {
        Some("max")
    } else if ap.min.is_match(text) {
        Some("min")
    } else if ap.sum.is_match(text) {
        Some("sum")
    } else if ap.avg.is_match(text) {
        Some("avg")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(&["payments".to_string(), "Checkout".to_string()])
    }

    // ---- Categories ----

    #[test]
    fn test_unknown_preserves_raw_text() {
        let intent = classifier().classify("tell me a joke");
        assert_eq!(intent.category, IntentCategory::Unknown);
        assert_eq!(intent.raw_text, "tell me a joke");
        assert!(intent.entities.is_empty());
    }

    #[test]
    fn test_empty_text_is_unknown() {
        assert_eq!(classifier().classify("").category, IntentCategory::Unknown);
    }

    #[test]
    fn test_alert_beats_generic_show_me() {
        let c = classifier();
        assert_eq!(
            c.classify("show me the alerts").category,
            IntentCategory::AlertQuery
        );
        assert_eq!(
            c.classify("any cpu alerts firing?").category,
            IntentCategory::AlertQuery
        );
    }

    #[test]
    fn test_health_phrases() {
        let c = classifier();
        assert_eq!(c.classify("Is the system healthy?").category, IntentCategory::Health);
        assert_eq!(c.classify("what's the status of checkout-service").category, IntentCategory::Health);
        assert_eq!(c.classify("is everything ok").category, IntentCategory::Health);
    }

    #[test]
    fn test_service_listing() {
        let c = classifier();
        assert_eq!(c.classify("list all services").category, IntentCategory::ServiceQuery);
        assert_eq!(c.classify("which services are running?").category, IntentCategory::ServiceQuery);
    }

    #[test]
    fn test_metric_queries() {
        let c = classifier();
        assert_eq!(c.classify("show CPU for checkout-service").category, IntentCategory::MetricQuery);
        assert_eq!(c.classify("what about memory").category, IntentCategory::MetricQuery);
        assert_eq!(
            c.classify("show cpu for all services").category,
            IntentCategory::MetricQuery
        );
    }

    #[test]
    fn test_longest_match_wins_within_tier() {
        // "list all services" (service listing) is longer than "status".
        assert_eq!(
            classifier().classify("list all services status").category,
            IntentCategory::ServiceQuery
        );
        assert_eq!(
            classifier().classify("health").category,
            IntentCategory::Health
        );
    }

    // ---- Services ----

    #[test]
    fn test_service_suffix_convention() {
        let intent = classifier().classify("show CPU for checkout-service");
        assert_eq!(intent.entity("service"), Some("checkout-service"));
        assert_eq!(intent.entity("metric"), Some("cpu"));
    }

    #[test]
    fn test_known_service_vocabulary_case_insensitive() {
        let intent = classifier().classify("memory usage on PAYMENTS");
        assert_eq!(intent.entity("service"), Some("payments"));
        let intent = classifier().classify("alerts for checkout");
        assert_eq!(intent.entity("service"), Some("Checkout"));
    }

    #[test]
    fn test_known_service_not_matched_inside_hyphenated_name() {
        let intent = classifier().classify("cpu for payments-gateway");
        assert_eq!(intent.entity("service"), Some("payments-gateway"));
    }

    #[test]
    fn test_service_after_preposition() {
        let intent = classifier().classify("latency on node-7");
        assert_eq!(intent.entity("service"), Some("node-7"));
    }

    #[test]
    fn test_duration_after_preposition_is_not_a_service() {
        let intent = classifier().classify("cpu for 15m");
        assert_eq!(intent.entity("service"), None);
        assert_eq!(intent.entity("time_range"), Some("15m"));
    }

    #[test]
    fn test_quoted_service() {
        let intent = classifier().classify(r#"errors for "inventory""#);
        assert_eq!(intent.entity("service"), Some("inventory"));
    }

    // ---- Metrics ----

    #[test]
    fn test_metric_synonyms() {
        assert_eq!(extract_metric("how much RAM is used"), Some("memory"));
        assert_eq!(extract_metric("requests per second"), Some("throughput"));
        assert_eq!(extract_metric("show rps"), Some("throughput"));
        assert_eq!(extract_metric("p99 response  time"), Some("latency"));
        assert_eq!(extract_metric("error rate today"), Some("errors"));
        assert_eq!(extract_metric("disk I/O"), Some("disk"));
        assert_eq!(extract_metric("nothing here"), None);
    }

    #[test]
    fn test_metric_not_matched_inside_words() {
        assert_eq!(extract_metric("parameters"), None);
        assert_eq!(extract_metric("framework"), None);
    }

    // ---- Time ranges ----

    #[test]
    fn test_time_range_numeric() {
        assert_eq!(extract_time_range("last 15m"), Some("15m".to_string()));
        assert_eq!(extract_time_range("past 2 hours"), Some("2h".to_string()));
        assert_eq!(extract_time_range("over 3 days"), Some("3d".to_string()));
        assert_eq!(extract_time_range("for 2 weeks"), Some("14d".to_string()));
        assert_eq!(extract_time_range("30 seconds"), Some("30s".to_string()));
    }

    #[test]
    fn test_time_range_named() {
        assert_eq!(extract_time_range("in the last hour"), Some("1h".to_string()));
        assert_eq!(extract_time_range("last minute"), Some("1m".to_string()));
        assert_eq!(extract_time_range("past week"), Some("7d".to_string()));
        assert_eq!(extract_time_range("errors today"), Some("1d".to_string()));
        assert_eq!(extract_time_range("this week"), Some("7d".to_string()));
        assert_eq!(extract_time_range("right now"), None);
    }

    #[test]
    fn test_time_range_ignores_status_codes() {
        assert_eq!(extract_time_range("count of 500 errors"), None);
    }

    // ---- Aggregation ----

    #[test]
    fn test_aggregation() {
        assert_eq!(extract_aggregation("peak cpu"), Some("max"));
        assert_eq!(extract_aggregation("lowest memory"), Some("min"));
        assert_eq!(extract_aggregation("total requests"), Some("sum"));
        assert_eq!(extract_aggregation("average latency"), Some("avg"));
        assert_eq!(extract_aggregation("cpu"), None);
    }

    #[test]
    fn test_full_extraction() {
        let intent = classifier().classify("max latency for checkout-service over the last 30 minutes");
        assert_eq!(intent.category, IntentCategory::MetricQuery);
        assert_eq!(intent.entity("service"), Some("checkout-service"));
        assert_eq!(intent.entity("metric"), Some("latency"));
        assert_eq!(intent.entity("time_range"), Some("30m"));
        assert_eq!(intent.entity("aggregation"), Some("max"));
    }
}
