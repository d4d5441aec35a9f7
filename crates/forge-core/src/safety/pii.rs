//! PII detection and redaction over JSON payloads.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ForgeError;

/// A named detection pattern and what replaces a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiPattern {
    pub pattern_name: String,
    pub regex_pattern: String,
    pub replacement: String,
}

impl PiiPattern {
    fn new(name: &str, regex: &str) -> Self {
        Self {
            pattern_name: name.to_string(),
            regex_pattern: regex.to_string(),
            replacement: format!("[REDACTED:{name}]"),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("email", r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}"),
            Self::new("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
            Self::new("credit_card", r"\b(?:\d{4}[ \-]?){3}\d{4}\b"),
            Self::new(
                "phone",
                r"(?:\+?1[ .\-]?)?\(?\b\d{3}\)?[ .\-]\d{3}[ .\-]\d{4}\b",
            ),
            Self {
                pattern_name: "bearer_token".to_string(),
                regex_pattern: r"(?i)bearer\s+[a-zA-Z0-9\-._~+/]+=*".to_string(),
                replacement: "Bearer [REDACTED]".to_string(),
            },
            Self::new(
                "api_key",
                r#"(?i)\b(?:api[_\-]?key|secret|access[_\-]?token)\s*[:=]\s*["']?[A-Za-z0-9\-_]{8,}"#,
            ),
        ]
    }
}

/// What a scan found and the payload with every match replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct PiiFindings {
    pub patterns: Vec<String>,
    pub redacted: Value,
}

#[derive(Debug)]
pub struct PiiScanner {
    rules: Vec<(PiiPattern, Regex)>,
}

impl PiiScanner {
    pub fn new(patterns: Vec<PiiPattern>) -> Result<Self, ForgeError> {
        let rules = patterns
            .into_iter()
            .map(|p| {
                let re = Regex::new(&p.regex_pattern).map_err(|e| {
                    ForgeError::Config(format!("PII pattern '{}': {e}", p.pattern_name))
                })?;
                Ok((p, re))
            })
            .collect::<Result<Vec<_>, ForgeError>>()?;
        Ok(Self { rules })
    }

    /// `None` when nothing matched.
    pub fn scan(&self, payload: &Value) -> Option<PiiFindings> {
        let mut hits = Vec::new();
        let redacted = self.redact_value(payload, &mut hits);
        if hits.is_empty() {
            return None;
        }
        hits.sort_by_key(|hit| self.rules.iter().position(|(p, _)| &p.pattern_name == hit));
        Some(PiiFindings {
            patterns: hits,
            redacted,
        })
    }

    pub fn redact_text(&self, text: &str, hits: &mut Vec<String>) -> String {
        let mut out = text.to_string();
        for (pattern, re) in &self.rules {
            if re.is_match(&out) {
                out = re
                    .replace_all(&out, pattern.replacement.as_str())
                    .into_owned();
                if !hits.contains(&pattern.pattern_name) {
                    hits.push(pattern.pattern_name.clone());
                }
            }
        }
        out
    }

    fn redact_value(&self, value: &Value, hits: &mut Vec<String>) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact_text(s, hits)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.redact_value(v, hits)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact_value(v, hits)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scanner() -> PiiScanner {
        PiiScanner::new(PiiPattern::defaults()).unwrap()
    }

    #[test]
    fn clean_payload_has_no_findings() {
        let s = scanner();
        assert!(s.scan(&json!({"expression": "42 * 15 / 100"})).is_none());
        assert!(s.scan(&json!(12345)).is_none());
    }

    #[test]
    fn redacts_nested_strings() {
        let s = scanner();
        let findings = s
            .scan(&json!({
                "note": "mail bob@example.com",
                "items": [{"ssn": "123-45-6789"}],
                "n": 7
            }))
            .unwrap();
        assert_eq!(findings.patterns, vec!["email", "ssn"]);
        assert_eq!(findings.redacted["note"], "mail [REDACTED:email]");
        assert_eq!(findings.redacted["items"][0]["ssn"], "[REDACTED:ssn]");
        assert_eq!(findings.redacted["n"], 7);
    }

    #[test]
    fn detects_secrets_and_cards() {
        let s = scanner();
        let mut hits = Vec::new();
        let out = s.redact_text(
            "Authorization: Bearer abc.def-123 card 4111 1111 1111 1111 api_key=sk_live_12345678",
            &mut hits,
        );
        assert!(hits.contains(&"bearer_token".to_string()));
        assert!(hits.contains(&"credit_card".to_string()));
        assert!(hits.contains(&"api_key".to_string()));
        assert!(!out.contains("4111"));
        assert!(!out.contains("sk_live"));
    }

    #[test]
    fn phone_numbers_are_detected() {
        let s = scanner();
        let mut hits = Vec::new();
        s.redact_text("call (555) 123-4567 today", &mut hits);
        assert_eq!(hits, vec!["phone"]);
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = PiiScanner::new(vec![PiiPattern::new("bad", "(")]).unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }
}
