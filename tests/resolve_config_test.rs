//! Integration tests for loading and resolving configuration directories

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use queryrunner::{
    ConfigResolver, DiagnosticCode, Diagnostics, Document, EvalScope, Functions, Outcome,
    PreparedQuery, QueryBase, QueryResult, QueryRunner, RegistryError, RunContext,
    RunnerDefinition, RunnerRegistry, RunnerRegistryBuilder, Variables,
};
use tempfile::TempDir;

const RUNNERS: &str = r#"
query_runner "static" "fixture" {
  columns = ["id", "name"]
}

query_runner "exec" "local" {
  timeout = "1m"
}
"#;

const QUERIES: &str = r#"
query "people" {
  runner      = query_runner.static.fixture
  description = "everyone we know"
  rows        = [["1", "alice"], ["2", "bob"]]
}

query "uptime" {
  runner  = query_runner.exec.local
  command = ["uptime"]
}
"#;

fn write_config(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

#[test]
fn test_resolve_config_directory() {
    let dir = write_config(&[
        ("10-runners.hcl", RUNNERS),
        ("20-queries.hcl", QUERIES),
        ("README.txt", "not configuration"),
    ]);
    let document = Document::load(dir.path()).unwrap();

    let registry = RunnerRegistry::with_builtin();
    let scope = Arc::new(EvalScope::with_stdlib());
    let resolution = ConfigResolver::new(&registry, &scope).resolve(&document);

    assert!(resolution.diagnostics.is_empty(), "{}", resolution.diagnostics);
    assert_eq!(resolution.runners.len(), 2);
    let queries: Vec<_> = resolution
        .queries
        .iter()
        .map(|q| (q.name().to_owned(), q.runner_type().to_owned()))
        .collect();
    assert_eq!(
        queries,
        vec![
            ("people".to_owned(), "static".to_owned()),
            ("uptime".to_owned(), "exec".to_owned()),
        ]
    );
}

#[test]
fn test_duplicates_across_files_cite_first_file() {
    let dir = write_config(&[("a.hcl", RUNNERS), ("b.hcl", RUNNERS)]);
    let document = Document::load(dir.path()).unwrap();

    let registry = RunnerRegistry::with_builtin();
    let scope = Arc::new(EvalScope::with_stdlib());
    let resolution = ConfigResolver::new(&registry, &scope).resolve(&document);

    assert_eq!(
        resolution.diagnostics.codes(),
        vec![DiagnosticCode::DuplicateRunner, DiagnosticCode::DuplicateRunner]
    );
    let rendered = resolution.diagnostics.render(document.sources());
    assert!(rendered.contains("Error: Duplicate query_runner \"static\" configuration"));
    assert!(rendered.contains("on b.hcl line 2:"));
    assert!(rendered.contains("already declared at a.hcl:2,"));
    assert_eq!(resolution.runners.len(), 2);
}

#[test]
fn test_unknown_runner_type_suggests_closest() {
    let document = Document::parse(
        "config.hcl",
        "query_runner \"statc\" \"fixture\" {\n  columns = []\n}\n",
    )
    .unwrap();
    let registry = RunnerRegistry::with_builtin();
    let scope = Arc::new(EvalScope::with_stdlib());
    let resolution = ConfigResolver::new(&registry, &scope).resolve(&document);

    let diag = resolution.diagnostics.iter().next().unwrap();
    assert_eq!(diag.code, Some(DiagnosticCode::UnknownRunnerType));
    assert_eq!(
        diag.detail,
        "The query runner type \"statc\" is invalid. Did you mean \"static\"?"
    );
}

#[derive(Debug)]
struct CountingRunner {
    name: String,
}

impl QueryRunner for CountingRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn runner_type(&self) -> &str {
        "counting"
    }

    fn prepare(&self, base: QueryBase) -> Outcome<Arc<dyn PreparedQuery>> {
        Outcome::ok(Arc::new(CountingQuery { base }) as Arc<dyn PreparedQuery>)
    }
}

#[derive(Debug)]
struct CountingQuery {
    base: QueryBase,
}

#[async_trait]
impl PreparedQuery for CountingQuery {
    fn base(&self) -> &QueryBase {
        &self.base
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _variables: &Variables,
        _functions: &Functions,
    ) -> queryrunner::Result<QueryResult> {
        let rows = (1..=3).map(|n| vec![n.to_string()]).collect();
        Ok(QueryResult::new(self.name(), "count", vec!["n".to_owned()], rows))
    }
}

#[test]
fn test_custom_runner_type_is_resolvable() {
    let registry = RunnerRegistryBuilder::new()
        .with_builtin()
        .with_definition(RunnerDefinition::new("counting", |name, _body, _scope| {
            Outcome::ok(Arc::new(CountingRunner {
                name: name.to_owned(),
            }) as Arc<dyn QueryRunner>)
        }))
        .build()
        .unwrap();
    assert_eq!(registry.type_names(), vec!["counting", "exec", "static"]);

    let document = Document::parse(
        "config.hcl",
        r#"
query_runner "counting" "inline" {}
query "numbers" {
  runner = query_runner.counting.inline
}
"#,
    )
    .unwrap();
    let scope = Arc::new(EvalScope::with_stdlib());
    let resolution = ConfigResolver::new(&registry, &scope).resolve(&document);
    assert!(resolution.diagnostics.is_empty(), "{}", resolution.diagnostics);
    assert_eq!(resolution.queries.get("numbers").unwrap().runner_type(), "counting");
}

#[test]
fn test_invalid_definition_is_rejected() {
    let err = RunnerRegistryBuilder::new()
        .with_definition(RunnerDefinition::new("", |_, _, _| {
            Outcome::failed(Diagnostics::new())
        }))
        .build()
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidDefinition(_)));
}

#[test]
fn test_query_referencing_unknown_runner() {
    let document = Document::parse(
        "config.hcl",
        "query \"q\" {\n  runner = query_runner.static.nope\n  rows   = []\n}\n",
    )
    .unwrap();
    let registry = RunnerRegistry::with_builtin();
    let scope = Arc::new(EvalScope::with_stdlib());
    let resolution = ConfigResolver::new(&registry, &scope).resolve(&document);

    let diag = resolution.diagnostics.iter().next().unwrap();
    assert_eq!(diag.code, Some(DiagnosticCode::RunnerNotFound));
    assert_eq!(diag.summary, "Invalid Query Runner");
    assert_eq!(diag.detail, "query_runner \"static.nope\" is not found");
    assert!(resolution.queries.is_empty());
}

#[test]
fn test_query_reports_every_independent_problem() {
    let document = Document::parse(
        "config.hcl",
        "query_runner \"static\" \"s\" {\n  columns = [\"a\"]\n}\n\nquery \"q\" {\n  runner      = query_runner.static.s\n  description = 2\n}\n",
    )
    .unwrap();
    let registry = RunnerRegistry::with_builtin();
    let scope = Arc::new(EvalScope::with_stdlib());
    let resolution = ConfigResolver::new(&registry, &scope).resolve(&document);

    assert_eq!(
        resolution.diagnostics.codes(),
        vec![DiagnosticCode::InvalidValue, DiagnosticCode::MissingAttribute]
    );
    assert!(resolution.queries.is_empty());
}
