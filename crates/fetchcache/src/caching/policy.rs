use std::time::Duration;

use serde::{Deserialize, Serialize};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(3600 * 24);

/// Maps endpoints containing `pattern` to a time-to-live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TtlRule {
    /// A substring of the endpoint identifier.
    pub pattern: String,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl TtlRule {
    pub fn new(pattern: impl Into<String>, ttl: Duration) -> Self {
        Self {
            pattern: pattern.into(),
            ttl,
        }
    }

    fn matches(&self, endpoint: &str) -> bool {
        endpoint.contains(self.pattern.as_str())
    }
}

/// Chooses the time-to-live of a cached response based on its endpoint.
///
/// Rules are checked in order and the first matching rule wins. Endpoints that match no rule get
/// the [`default`](Self::default) time-to-live.
///
/// The default rules give frequently changing data (markets, commodity prices) a short
/// time-to-live, and near-static metadata (systems, stations, names) a long one:
///
/// | endpoint contains | ttl |
/// |---|---|
/// | `market`, `commodit`, `price` | 5m |
/// | `search` | 1h |
/// | `system`, `station`, `name` | 24h |
/// | anything else | 1h |
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TtlPolicy {
    /// The time-to-live for endpoints not matching any rule.
    #[serde(with = "humantime_serde")]
    pub default: Duration,
    /// The rules in priority order.
    pub rules: Vec<TtlRule>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            default: HOUR,
            rules: vec![
                TtlRule::new("market", 5 * MINUTE),
                TtlRule::new("commodit", 5 * MINUTE),
                TtlRule::new("price", 5 * MINUTE),
                TtlRule::new("search", HOUR),
                TtlRule::new("system", DAY),
                TtlRule::new("station", DAY),
                TtlRule::new("name", DAY),
            ],
        }
    }
}

impl TtlPolicy {
    /// A policy applying the same time-to-live to every endpoint.
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            default: ttl,
            rules: Vec::new(),
        }
    }

    pub fn ttl_for(&self, endpoint: &str) -> Duration {
        self.rules
            .iter()
            .find(|rule| rule.matches(endpoint))
            .map_or(self.default, |rule| rule.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routing() {
        let policy = TtlPolicy::default();

        assert_eq!(policy.ttl_for("market/exports"), 5 * MINUTE);
        assert_eq!(policy.ttl_for("commodities/gold"), 5 * MINUTE);
        assert_eq!(policy.ttl_for("system/name/Sol"), DAY);
        assert_eq!(policy.ttl_for("station/Jameson Memorial"), DAY);
        assert_eq!(policy.ttl_for("freesound_search"), HOUR);
        assert_eq!(policy.ttl_for("spotify/playlist"), HOUR);
    }

    #[test]
    fn test_first_match_wins() {
        let policy = TtlPolicy::default();

        // both `system` and `market` match, but `market` comes first
        assert_eq!(policy.ttl_for("system/Sol/market"), 5 * MINUTE);
        // both `search` and `name` match
        assert_eq!(policy.ttl_for("search/by_name"), HOUR);

        let policy = TtlPolicy {
            default: Duration::from_secs(1),
            rules: vec![TtlRule::new("a", HOUR), TtlRule::new("ab", DAY)],
        };
        assert_eq!(policy.ttl_for("ab"), HOUR);
        assert_eq!(policy.ttl_for("b"), Duration::from_secs(1));
    }

    #[test]
    fn test_uniform() {
        let policy = TtlPolicy::uniform(MINUTE);
        assert_eq!(policy.ttl_for("market/exports"), MINUTE);
        assert_eq!(policy.ttl_for(""), MINUTE);
    }

    #[test]
    fn test_deserialize() {
        let yaml = r#"
            default: 10m
            rules:
              - pattern: track
                ttl: 30s
        "#;
        let policy: TtlPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.ttl_for("track/search"), Duration::from_secs(30));
        assert_eq!(policy.ttl_for("market/exports"), 10 * MINUTE);

        // omitting the rules keeps the default table
        let policy: TtlPolicy = serde_yaml::from_str("default: 2h").unwrap();
        assert_eq!(policy.ttl_for("market/exports"), 5 * MINUTE);
        assert_eq!(policy.ttl_for("spotify/playlist"), 2 * HOUR);
    }
}
