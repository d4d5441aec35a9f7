//! Permission rules, first-match-wins with default deny.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

/// One rule over a (subject pattern, action pattern) pair. Patterns are
/// globs where `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    #[serde(default = "wildcard")]
    pub subject: String,
    pub action: String,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn wildcard() -> String {
    "*".to_string()
}

impl PermissionRule {
    pub fn allow(subject: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            effect: Effect::Allow,
            reason: None,
        }
    }

    pub fn deny(
        subject: impl Into<String>,
        action: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            effect: Effect::Deny,
            reason: Some(reason.into()),
        }
    }

    pub fn matches(&self, subject: &str, action: &str) -> bool {
        glob_match(&self.subject, subject) && glob_match(&self.action, action)
    }
}

/// Ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub rules: Vec<PermissionRule>,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

impl PermissionPolicy {
    pub fn new(rules: Vec<PermissionRule>) -> Self {
        Self { rules }
    }

    /// Everything denied.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Every subject may call tools and agents.
    pub fn default_rules() -> Vec<PermissionRule> {
        vec![
            PermissionRule::allow("*", "tool:*"),
            PermissionRule::allow("*", "agent:*"),
        ]
    }

    /// `Err(reason)` when the first matching rule denies or nothing matches.
    pub fn evaluate(&self, subject: &str, action: &str) -> Result<(), String> {
        for rule in &self.rules {
            if rule.matches(subject, action) {
                return match rule.effect {
                    Effect::Allow => Ok(()),
                    Effect::Deny => Err(rule
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("denied by rule {}/{}", rule.subject, rule.action))),
                };
            }
        }
        Err(format!(
            "no permission rule matched subject={subject} action={action}"
        ))
    }
}

/// Glob match where `*` matches any (possibly empty) run of characters.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }
    let (first, rest) = (parts[0], &parts[1..]);
    let Some(mut remaining) = value.strip_prefix(first) else {
        return false;
    };
    let last = rest[rest.len() - 1];
    for part in &rest[..rest.len() - 1] {
        match remaining.find(part) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_basics() {
        assert!(glob_match("*", ""));
        assert!(glob_match("tool:*", "tool:calculator"));
        assert!(!glob_match("tool:*", "agent:calculator"));
        assert!(glob_match("*:calc*", "tool:calculator"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("a*b*c", "a-x-c"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn default_deny_when_no_rules() {
        let policy = PermissionPolicy::empty();
        let err = policy.evaluate("alice", "tool:calculator").unwrap_err();
        assert!(err.contains("no permission rule matched"));
    }

    #[test]
    fn first_match_wins() {
        let policy = PermissionPolicy::new(vec![
            PermissionRule::deny("mallory", "tool:*", "blocked user"),
            PermissionRule::allow("*", "tool:*"),
        ]);
        assert_eq!(
            policy.evaluate("mallory", "tool:calculator").unwrap_err(),
            "blocked user"
        );
        assert!(policy.evaluate("alice", "tool:calculator").is_ok());
    }

    #[test]
    fn default_policy_allows_tools_and_agents_only() {
        let policy = PermissionPolicy::default();
        assert!(policy.evaluate("u", "tool:json_parser").is_ok());
        assert!(policy.evaluate("u", "agent:calculator").is_ok());
        assert!(policy.evaluate("u", "registry:publish").is_err());
    }

    #[test]
    fn rule_deserializes_with_default_subject() {
        let rule: PermissionRule =
            toml::from_str("action = \"tool:datetime\"\neffect = \"deny\"").unwrap();
        assert_eq!(rule.subject, "*");
        assert_eq!(rule.effect, Effect::Deny);
    }
}
