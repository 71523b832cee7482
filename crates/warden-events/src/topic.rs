//! Topic specifications for subscriptions.

use serde::{Deserialize, Serialize};

/// What a subscription listens to.
///
/// A pattern of the form `"prefix.*"` matches any topic that starts with
/// `prefix.`. Matching is plain string comparison per declared spec; no
/// regex is involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicSpec {
    /// A single exact topic
    Exact(String),
    /// Any of a set of exact topics
    Set(Vec<String>),
    /// All topics starting with the stored prefix (including the dot)
    Prefix(String),
}

impl TopicSpec {
    /// Parse a single topic string, recognizing the trailing `.*` wildcard.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('.') => Self::Prefix(prefix.to_string()),
            _ => Self::Exact(spec.to_string()),
        }
    }

    /// Whether `topic` matches this spec.
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(exact) => topic == exact,
            Self::Set(topics) => topics.iter().any(|t| t == topic),
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }
}

impl From<&str> for TopicSpec {
    fn from(spec: &str) -> Self {
        Self::parse(spec)
    }
}

impl From<String> for TopicSpec {
    fn from(spec: String) -> Self {
        Self::parse(&spec)
    }
}

impl From<Vec<String>> for TopicSpec {
    fn from(topics: Vec<String>) -> Self {
        Self::Set(topics)
    }
}

impl From<&[&str]> for TopicSpec {
    fn from(topics: &[&str]) -> Self {
        Self::Set(topics.iter().map(|t| (*t).to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_only_itself() {
        let spec = TopicSpec::parse("user.login");
        assert!(spec.matches("user.login"));
        assert!(!spec.matches("user.logout"));
        assert!(!spec.matches("user.login.extra"));
    }

    #[test]
    fn wildcard_matches_prefix() {
        let spec = TopicSpec::parse("user.*");
        assert_eq!(spec, TopicSpec::Prefix("user.".to_string()));
        assert!(spec.matches("user.login"));
        assert!(spec.matches("user.password_changed"));
        assert!(!spec.matches("session.created"));
        // The prefix must match up to and including the dot
        assert!(!spec.matches("userx.login"));
    }

    #[test]
    fn bare_star_is_not_a_wildcard() {
        // Only "prefix.*" is a pattern; a lone "*" is an exact topic
        let spec = TopicSpec::parse("*");
        assert_eq!(spec, TopicSpec::Exact("*".to_string()));
    }

    #[test]
    fn set_matches_members() {
        let spec = TopicSpec::from(["user.login", "session.created"].as_slice());
        assert!(spec.matches("user.login"));
        assert!(spec.matches("session.created"));
        assert!(!spec.matches("user.deleted"));
    }
}
