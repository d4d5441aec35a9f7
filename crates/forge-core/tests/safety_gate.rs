//! Gate behavior: fixed-window rate limits, permissions and PII handling.

use chrono::{Duration, TimeZone, Utc};
use forge_core::safety::{agent_action, tool_action, Decision, Denial, PermissionRule};
use forge_core::{ErrorKind, SafetyConfig, SafetyGate};
use serde_json::json;

fn gate(limit: u32, window_secs: u64) -> SafetyGate {
    SafetyGate::new(&SafetyConfig {
        subject_rate_limit: limit,
        rate_window_secs: window_secs,
        ..SafetyConfig::default()
    })
    .unwrap()
}

#[test]
fn test_n_plus_one_request_in_window_is_rate_limited() {
    let gate = gate(5, 60);
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let payload = json!({"task": "add numbers"});

    for i in 0..5 {
        let at = start + Duration::seconds(i * 10);
        assert!(
            gate.authorize_at("alice", &agent_action("calculator"), &payload, &[], at)
                .is_allowed(),
            "request {i} should pass"
        );
    }

    let sixth = gate.authorize_at(
        "alice",
        &agent_action("calculator"),
        &payload,
        &[],
        start + Duration::seconds(59),
    );
    match sixth {
        Decision::Deny(denial) => {
            assert_eq!(denial.kind(), ErrorKind::RateLimitExceeded);
            assert!(matches!(denial, Denial::RateLimited { ceiling: 5, .. }));
        }
        other => panic!("expected a rate-limit denial, got {other:?}"),
    }

    // Other subjects have their own window.
    let later = start + Duration::seconds(59);
    assert!(gate
        .authorize_at("bob", &agent_action("calculator"), &payload, &[], later)
        .is_allowed());

    // The window rolls over once it has fully elapsed.
    let rolled = start + Duration::seconds(60);
    assert!(gate
        .authorize_at("alice", &agent_action("calculator"), &payload, &[], rolled)
        .is_allowed());
}

#[test]
fn test_denied_request_does_not_consume_quota() {
    let gate = SafetyGate::new(&SafetyConfig {
        subject_rate_limit: 1,
        permissions: vec![
            PermissionRule::deny("*", "tool:datetime", "no clocks"),
            PermissionRule::allow("*", "*"),
        ],
        ..SafetyConfig::default()
    })
    .unwrap();
    let denied = gate.authorize("carol", &tool_action("datetime"), &json!({}));
    assert!(matches!(denied, Decision::Deny(Denial::Permission { .. })));
    assert!(gate
        .authorize("carol", &tool_action("calculator"), &json!({}))
        .is_allowed());
}

#[test]
fn test_pii_is_redacted_or_denied_by_action() {
    let gate = SafetyGate::new(&SafetyConfig {
        strict_actions: vec!["tool:*".to_string()],
        ..SafetyConfig::default()
    })
    .unwrap();
    let payload = json!({"task": "email jane@example.com the total"});

    match gate.authorize("dave", &agent_action("summarizer"), &payload) {
        Decision::AllowRedacted(redacted) => {
            let text = redacted["task"].as_str().unwrap();
            assert!(!text.contains("jane@example.com"));
            assert!(text.contains("[REDACTED:email]"));
        }
        other => panic!("expected redaction, got {other:?}"),
    }

    match gate.authorize("dave", &tool_action("text_summarizer"), &payload) {
        Decision::Deny(denial) => assert_eq!(denial.kind(), ErrorKind::PiiViolation),
        other => panic!("expected a PII denial, got {other:?}"),
    }
}
