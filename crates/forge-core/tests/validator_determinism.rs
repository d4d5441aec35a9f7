//! The validator is a pure function of the candidate.

use std::sync::Arc;

use forge_core::domain::ValidationRule;
use forge_core::{AgentCandidate, CodeValidator, ToolManifest, ValidatorConfig, Verdict};
use serde_json::json;

fn candidate(source: &str, tools: &[&str]) -> AgentCandidate {
    serde_json::from_value(json!({
        "name": "gen-sample",
        "capabilities": ["sample"],
        "tools": tools,
        "input_schema": {"required_fields": ["task"], "field_types": {"task": "string"}},
        "output_schema": {"required_fields": ["result"], "field_types": {"result": "number"}},
        "source": source,
    }))
    .unwrap()
}

const HEADER: &str = r#"
fn name() { return "gen-sample"; }
fn capabilities() { return ["sample"]; }
fn input_schema() { return {required_fields: ["task"], field_types: {task: "string"}}; }
fn output_schema() { return {required_fields: ["result"], field_types: {result: "number"}}; }
"#;

fn validator() -> CodeValidator {
    CodeValidator::new(ValidatorConfig::default(), Arc::new(ToolManifest::builtin()))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_validation_yields_identical_reports() {
    let failing = format!(
        "{HEADER}\nfn execute(input) {{\n    let page = http_get(\"https://example.com\");\n    let f = open(\"/etc/passwd\");\n    return {{result: tool(\"weather\", {{}})}};\n}}\n"
    );
    let passing = format!(
        "{HEADER}\nfn execute(input) {{\n    let out = tool(\"calculator\", {{expression: \"1 + 2\"}});\n    return {{result: out.result}};\n}}\n"
    );

    let v = validator();
    for (source, tools) in [(failing, vec![]), (passing, vec!["calculator"])] {
        let c = candidate(&source, &tools);
        let first = v.validate(&c).await;
        for _ in 0..5 {
            let again = v.validate(&c).await;
            assert!(first.same_outcome(&again), "{:?} vs {:?}", first, again);
            assert_eq!(first.source_digest, again.source_digest);
        }
        // A fresh validator instance agrees too.
        assert!(first.same_outcome(&validator().validate(&c).await));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_report_lists_every_static_violation_in_order() {
    let source = format!(
        "{HEADER}\nfn execute(input) {{\n    let page = http_get(\"https://example.com\");\n    let f = open(\"/etc/passwd\");\n    return {{result: 1}};\n}}\n"
    );
    let report = validator().validate(&candidate(&source, &[])).await;
    assert_eq!(report.verdict, Verdict::Fail);
    let rules: Vec<ValidationRule> = report.violations.iter().map(|v| v.rule).collect();
    assert!(rules.contains(&ValidationRule::DisallowedNetwork));
    assert!(rules.contains(&ValidationRule::DisallowedFilesystem));
    let network = rules.iter().position(|r| *r == ValidationRule::DisallowedNetwork);
    let filesystem = rules.iter().position(|r| *r == ValidationRule::DisallowedFilesystem);
    assert!(network < filesystem, "violations follow source order");

    let static_only = validator().validate_static(&candidate(&source, &[]));
    assert!(report.same_outcome(&static_only));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runaway_loop_is_stopped_by_fuel() {
    let source = format!(
        "{HEADER}\nfn execute(input) {{\n    let i = 0;\n    while true {{ i = i + 1; }}\n    return {{result: i}};\n}}\n"
    );
    let v = validator();
    let c = candidate(&source, &[]);
    let first = v.validate(&c).await;
    assert_eq!(first.verdict, Verdict::Fail);
    assert!(first
        .violations
        .iter()
        .any(|v| matches!(v.rule, ValidationRule::ResourceLimit | ValidationRule::SandboxTimeout)));
    assert!(first.same_outcome(&v.validate(&c).await));
}
