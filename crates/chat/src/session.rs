//! Session keys and idempotency keys.

use std::{fmt, str::FromStr};

use crate::error::Error;

const NAMESPACE: &str = "agent";
const MAIN_INSTANCE: &str = "main";

/// Routing key of a conversation: `agent:<name>:<instance>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    agent: String,
    instance: String,
}

impl SessionKey {
    pub fn new(agent: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            instance: instance.into(),
        }
    }

    /// The long-lived default conversation of `agent`.
    pub fn main(agent: impl Into<String>) -> Self {
        Self::new(agent, MAIN_INSTANCE)
    }

    /// A new conversation. Keys are not unique across reconnects, so every
    /// new conversation needs its own instance token.
    pub fn fresh(agent: impl Into<String>) -> Self {
        Self::new(agent, format!("chat-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn is_main(&self) -> bool {
        self.instance == MAIN_INSTANCE
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NAMESPACE}:{}:{}", self.agent, self.instance)
    }
}

impl FromStr for SessionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidSessionKey(s.to_string());
        let rest = s
            .strip_prefix(NAMESPACE)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(invalid)?;
        let (agent, instance) = rest.split_once(':').ok_or_else(invalid)?;
        if agent.is_empty() || instance.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(agent, instance))
    }
}

/// Deduplication token for `chat.send`. Reuse it to retry the same message;
/// mint a new one for every new message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for IdempotencyKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn formats_and_parses() {
        let key = SessionKey::main("main");
        assert_eq!(key.to_string(), "agent:main:main");
        assert!(key.is_main());
        assert_eq!("agent:main:main".parse::<SessionKey>().unwrap(), key);
    }

    #[test]
    fn instance_may_contain_colons() {
        let key: SessionKey = "agent:ops:thread:42".parse().unwrap();
        assert_eq!(key.agent(), "ops");
        assert_eq!(key.instance(), "thread:42");
    }

    #[test]
    fn fresh_keys_differ() {
        let a = SessionKey::fresh("main");
        let b = SessionKey::fresh("main");
        assert_ne!(a, b);
        assert!(a.instance().starts_with("chat-"));
        assert!(!a.is_main());
    }

    #[rstest]
    #[case("main")]
    #[case("agent:")]
    #[case("agent:main")]
    #[case("agent::main")]
    #[case("agent:main:")]
    #[case("user:main:main")]
    fn rejects_malformed_keys(#[case] raw: &str) {
        assert!(matches!(raw.parse::<SessionKey>(), Err(Error::InvalidSessionKey(_))));
    }

    #[test]
    fn idempotency_keys_are_unique() {
        assert_ne!(IdempotencyKey::new(), IdempotencyKey::new());
        assert_eq!(IdempotencyKey::from("k-1").as_str(), "k-1");
    }
}
