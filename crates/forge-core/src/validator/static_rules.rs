//! Static checks over a parsed agent script.
//!
//! Rules run in a fixed sequence and each walks the program in source
//! order, so the same program always yields the same violation list.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::{ValidationRule, Violation};
use crate::script::ast::{walk_stmts, Expr, FnDef, Program, Stmt};
use crate::script::builtins;

/// Operations every agent script must define, with their parameter count.
pub const REQUIRED_OPERATIONS: &[(&str, usize)] = &[
    ("name", 0),
    ("capabilities", 0),
    ("input_schema", 0),
    ("output_schema", 0),
    ("execute", 1),
];

const FILESYSTEM: &[&str] = &[
    "open", "read_file", "write_file", "remove_file", "delete_file", "fs", "file", "files",
    "mkdir", "rmdir", "listdir", "readdir", "os", "path_exists", "chmod",
];
const NETWORK: &[&str] = &[
    "http", "https", "http_get", "http_post", "fetch", "socket", "connect", "net", "urlopen",
    "requests", "download", "upload", "curl", "wget", "dns", "websocket",
];
const PROCESS: &[&str] = &[
    "exec", "spawn", "system", "process", "subprocess", "shell", "popen", "fork", "kill",
    "command", "env", "getenv", "setenv", "exit",
];
const REFLECTION: &[&str] = &[
    "eval", "import", "require", "load", "reflect", "globals", "locals", "getattr", "setattr",
    "compile", "__import__", "builtins", "self",
];

const FORBIDDEN_PREFIXES: &[(&str, ValidationRule)] = &[
    ("fs_", ValidationRule::DisallowedFilesystem),
    ("file_", ValidationRule::DisallowedFilesystem),
    ("http_", ValidationRule::DisallowedNetwork),
    ("net_", ValidationRule::DisallowedNetwork),
    ("socket_", ValidationRule::DisallowedNetwork),
    ("os_", ValidationRule::DisallowedProcess),
    ("sys_", ValidationRule::DisallowedProcess),
    ("proc_", ValidationRule::DisallowedProcess),
];

/// Forbidden-capability category of an identifier, if any.
pub fn forbidden_category(name: &str) -> Option<ValidationRule> {
    let lowered = name.to_ascii_lowercase();
    let name = lowered.as_str();
    if FILESYSTEM.contains(&name) {
        return Some(ValidationRule::DisallowedFilesystem);
    }
    if NETWORK.contains(&name) {
        return Some(ValidationRule::DisallowedNetwork);
    }
    if PROCESS.contains(&name) {
        return Some(ValidationRule::DisallowedProcess);
    }
    if REFLECTION.contains(&name) {
        return Some(ValidationRule::DisallowedReflection);
    }
    FORBIDDEN_PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, rule)| *rule)
}

fn category_label(rule: ValidationRule) -> &'static str {
    match rule {
        ValidationRule::DisallowedFilesystem => "filesystem",
        ValidationRule::DisallowedNetwork => "network",
        ValidationRule::DisallowedProcess => "process",
        _ => "reflection",
    }
}

/// Run every static rule. `declared_tools` is the candidate's tool surface,
/// `manifest_tools` the tools that actually exist.
pub fn check(
    program: &Program,
    declared_tools: &BTreeSet<String>,
    manifest_tools: &BTreeSet<String>,
) -> Vec<Violation> {
    let mut out = Vec::new();
    check_definitions(program, &mut out);
    check_required_operations(program, &mut out);
    for tool in declared_tools.difference(manifest_tools) {
        out.push(Violation::new(
            ValidationRule::UnknownTool,
            format!("declared tool '{tool}' is not in the tool manifest"),
        ));
    }
    for f in &program.functions {
        check_body(program, f, declared_tools, &mut out);
    }
    check_recursion(program, &mut out);
    out
}

fn check_definitions(program: &Program, out: &mut Vec<Violation>) {
    let mut seen = HashSet::new();
    for f in &program.functions {
        if !seen.insert(f.name.as_str()) {
            out.push(Violation::new(
                ValidationRule::DuplicateFunction,
                format!("function '{}' defined more than once (line {})", f.name, f.line),
            ));
        } else if builtins::arity(&f.name).is_some() {
            out.push(Violation::new(
                ValidationRule::DuplicateFunction,
                format!("function '{}' shadows a builtin (line {})", f.name, f.line),
            ));
        }
        if let Some(rule) = forbidden_category(&f.name) {
            out.push(Violation::new(
                rule,
                format!(
                    "function '{}' names a {} capability (line {})",
                    f.name,
                    category_label(rule),
                    f.line
                ),
            ));
        }
    }
}

fn check_required_operations(program: &Program, out: &mut Vec<Violation>) {
    for (name, params) in REQUIRED_OPERATIONS {
        match program.function(name) {
            None => out.push(Violation::new(
                ValidationRule::MissingOperation,
                format!("required operation '{name}' is not defined"),
            )),
            Some(f) if f.params.len() != *params => out.push(Violation::new(
                ValidationRule::SignatureMismatch,
                format!(
                    "'{name}' takes {} parameter(s), expected {params}",
                    f.params.len()
                ),
            )),
            Some(_) => {}
        }
    }
}

/// Names bound inside `f`: parameters, `let` and `for` variables.
fn locals(f: &FnDef) -> HashSet<&str> {
    fn collect<'a>(stmts: &'a [Stmt], acc: &mut HashSet<&'a str>) {
        for stmt in stmts {
            match stmt {
                Stmt::Let { name, .. } => {
                    acc.insert(name);
                }
                Stmt::For { var, body, .. } => {
                    acc.insert(var);
                    collect(body, acc);
                }
                Stmt::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    collect(then_branch, acc);
                    if let Some(other) = else_branch {
                        collect(other, acc);
                    }
                }
                Stmt::While { body, .. } => collect(body, acc),
                Stmt::Assign { .. } | Stmt::Return(_) | Stmt::Expr(_) => {}
            }
        }
    }
    let mut acc: HashSet<&str> = f.params.iter().map(String::as_str).collect();
    collect(&f.body, &mut acc);
    acc
}

fn check_body(
    program: &Program,
    f: &FnDef,
    declared_tools: &BTreeSet<String>,
    out: &mut Vec<Violation>,
) {
    let bound = locals(f);
    walk_stmts(&f.body, &mut |expr| match expr {
        Expr::Ident { name, line } if !bound.contains(name.as_str()) => {
            if let Some(rule) = forbidden_category(name) {
                out.push(Violation::new(
                    rule,
                    format!(
                        "reference to '{name}' ({} access) in '{}' at line {line}",
                        category_label(rule),
                        f.name
                    ),
                ));
            }
        }
        Expr::Call { name, args, line } => {
            check_call(program, f, name, args, *line, declared_tools, out)
        }
        _ => {}
    });
}

fn check_call(
    program: &Program,
    caller: &FnDef,
    name: &str,
    args: &[Expr],
    line: usize,
    declared_tools: &BTreeSet<String>,
    out: &mut Vec<Violation>,
) {
    if let Some(target) = program.function(name) {
        if target.params.len() != args.len() {
            out.push(Violation::new(
                ValidationRule::ArityMismatch,
                format!(
                    "'{name}' called with {} argument(s), takes {} (line {line})",
                    args.len(),
                    target.params.len()
                ),
            ));
        }
        return;
    }
    if let Some(rule) = forbidden_category(name) {
        out.push(Violation::new(
            rule,
            format!(
                "call to '{name}' ({} access) in '{}' at line {line}",
                category_label(rule),
                caller.name
            ),
        ));
        return;
    }
    let Some((lo, hi)) = builtins::arity(name) else {
        out.push(Violation::new(
            ValidationRule::UnknownFunction,
            format!("call to unknown function '{name}' at line {line}"),
        ));
        return;
    };
    if args.len() < lo || args.len() > hi {
        let expected = if lo == hi {
            lo.to_string()
        } else {
            format!("{lo}..={hi}")
        };
        out.push(Violation::new(
            ValidationRule::ArityMismatch,
            format!(
                "builtin '{name}' called with {} argument(s), takes {expected} (line {line})",
                args.len()
            ),
        ));
        return;
    }
    if name == "tool" {
        match args.first() {
            Some(Expr::Str(tool)) if !declared_tools.contains(tool) => out.push(Violation::new(
                ValidationRule::UndeclaredTool,
                format!("tool '{tool}' is called at line {line} but not declared"),
            )),
            Some(Expr::Str(_)) => {}
            _ => out.push(Violation::new(
                ValidationRule::DynamicToolName,
                format!("tool name at line {line} must be a string literal"),
            )),
        }
    }
}

/// Any cycle in the user call graph, reported once per participating
/// function in definition order.
fn check_recursion(program: &Program, out: &mut Vec<Violation>) {
    let mut graph: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for f in &program.functions {
        let callees = graph.entry(f.name.as_str()).or_default();
        walk_stmts(&f.body, &mut |expr| {
            if let Expr::Call { name, .. } = expr {
                if program.function(name).is_some() {
                    callees.insert(name.as_str());
                }
            }
        });
    }

    let mut reported = HashSet::new();
    for f in &program.functions {
        if !reported.insert(f.name.as_str()) {
            continue;
        }
        if let Some(path) = cycle_through(&graph, f.name.as_str()) {
            out.push(Violation::new(
                ValidationRule::Recursion,
                format!("function '{}' is recursive ({})", f.name, path.join(" -> ")),
            ));
        }
    }
}

/// Shortest call path from `start` back to itself, if one exists.
fn cycle_through<'a>(
    graph: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    start: &'a str,
) -> Option<Vec<&'a str>> {
    let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
    let mut queue = std::collections::VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for &next in graph.get(node).into_iter().flatten() {
            if next == start {
                let mut path = vec![start];
                let mut cur = node;
                while cur != start {
                    path.push(cur);
                    cur = parent[cur];
                }
                path.push(start);
                let n = path.len();
                path[1..n - 1].reverse();
                return Some(path);
            }
            if !parent.contains_key(next) && next != start {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_program;

    const SKELETON: &str = r#"
fn name() { return "gen-x"; }
fn capabilities() { return ["x"]; }
fn input_schema() { return {}; }
fn output_schema() { return {}; }
"#;

    fn rules(body: &str, declared: &[&str]) -> Vec<ValidationRule> {
        let src = format!("{SKELETON}\n{body}");
        let program = parse_program(&src).unwrap();
        let declared: BTreeSet<String> = declared.iter().map(|s| s.to_string()).collect();
        let manifest: BTreeSet<String> = ["calculator", "datetime"].iter().map(|s| s.to_string()).collect();
        check(&program, &declared, &manifest)
            .into_iter()
            .map(|v| v.rule)
            .collect()
    }

    #[test]
    fn clean_agent_has_no_violations() {
        let r = rules(
            r#"fn execute(input) {
                let out = tool("calculator", {expression: input.expr});
                return {result: out.result};
            }"#,
            &["calculator"],
        );
        assert!(r.is_empty(), "{r:?}");
    }

    #[test]
    fn forbidden_references_are_categorised() {
        let r = rules(
            r#"fn execute(input) {
                let body = http_get(input.url);
                let f = open("/etc/passwd");
                return exec(body);
            }"#,
            &[],
        );
        assert_eq!(
            r,
            vec![
                ValidationRule::DisallowedNetwork,
                ValidationRule::DisallowedFilesystem,
                ValidationRule::DisallowedProcess,
            ]
        );
    }

    #[test]
    fn local_named_like_forbidden_word_is_fine() {
        let r = rules(
            r#"fn execute(input) { let file = input.name; return {file: file}; }"#,
            &[],
        );
        assert!(r.is_empty(), "{r:?}");
    }

    #[test]
    fn tool_calls_must_be_literal_and_declared() {
        let r = rules(
            r#"fn execute(input) {
                let a = tool("datetime", {operation: "now"});
                let b = tool(input.which, {});
                return a;
            }"#,
            &["calculator", "web_search"],
        );
        assert_eq!(
            r,
            vec![
                ValidationRule::UnknownTool,
                ValidationRule::UndeclaredTool,
                ValidationRule::DynamicToolName,
            ]
        );
    }

    #[test]
    fn missing_and_mismatched_operations() {
        let program = parse_program("fn name(x) { return x; }").unwrap();
        let v = check(&program, &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(v[0].rule, ValidationRule::SignatureMismatch);
        assert_eq!(
            v.iter().filter(|v| v.rule == ValidationRule::MissingOperation).count(),
            4
        );
    }

    #[test]
    fn recursion_detected_through_helpers() {
        let r = rules(
            r#"fn execute(input) { return ping(input); }
               fn ping(x) { return pong(x); }
               fn pong(x) { return ping(x); }"#,
            &[],
        );
        assert_eq!(r, vec![ValidationRule::Recursion, ValidationRule::Recursion]);
    }

    #[test]
    fn cycle_path_is_reported() {
        let program = parse_program(&format!(
            "{SKELETON}\nfn execute(input) {{ return execute(input); }}"
        ))
        .unwrap();
        let v = check(&program, &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(v.len(), 1);
        assert!(v[0].detail.contains("execute -> execute"), "{}", v[0].detail);
    }

    #[test]
    fn unknown_functions_arity_and_duplicates() {
        let r = rules(
            r#"fn execute(input) { return helper(frobnicate(input), 1); }
               fn helper(x) { return round(x, 1, 2); }
               fn helper(y) { return y; }
               fn len(x) { return 0; }"#,
            &[],
        );
        assert_eq!(
            r,
            vec![
                ValidationRule::DuplicateFunction,
                ValidationRule::DuplicateFunction,
                ValidationRule::ArityMismatch,
                ValidationRule::UnknownFunction,
                ValidationRule::ArityMismatch,
            ]
        );
    }

    #[test]
    fn forbidden_detection_helper() {
        assert_eq!(forbidden_category("Socket"), Some(ValidationRule::DisallowedNetwork));
        assert_eq!(forbidden_category("sys_info"), Some(ValidationRule::DisallowedProcess));
        assert_eq!(forbidden_category("total"), None);
    }
}
