//! Configuration resolver
//!
//! Turns a parsed document into runner instances and prepared queries,
//! collecting every diagnostic along the way.

use std::collections::HashMap;
use std::sync::Arc;

use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, SourceRange};
use crate::document::{Block, Body, Document};
use crate::query::{PreparedQueries, QueryBase, QueryRunners};
use crate::reference::{QUERY_ROOT, RUNNER_ROOT};
use crate::registry::RunnerRegistry;
use crate::scope::EvalScope;

/// Everything a document resolved to
#[derive(Debug, Default)]
pub struct Resolution {
    pub runners: QueryRunners,
    pub queries: PreparedQueries,
    /// Attributes and blocks that are neither runners nor queries
    pub remain: Body,
    pub diagnostics: Diagnostics,
}

impl Resolution {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Resolves documents against a registry and a base scope
pub struct ConfigResolver<'a> {
    registry: &'a RunnerRegistry,
    scope: &'a Arc<EvalScope>,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(registry: &'a RunnerRegistry, scope: &'a Arc<EvalScope>) -> Self {
        tracing::debug!("Creating ConfigResolver with types: {:?}", registry.type_names());
        Self { registry, scope }
    }

    pub fn resolve(&self, document: &Document) -> Resolution {
        let mut resolution = Resolution::default();
        let mut runner_blocks = Vec::new();
        let mut query_blocks = Vec::new();

        for attr in document.body().attributes() {
            resolution.remain.push_attribute(attr.clone());
        }
        for block in document.body().blocks() {
            match (block.kind(), block.labels().len()) {
                (RUNNER_ROOT, 2) => runner_blocks.push(block),
                (QUERY_ROOT, 1) => query_blocks.push(block),
                (RUNNER_ROOT, n) => resolution.diagnostics.push(label_count(block, 2, n)),
                (QUERY_ROOT, n) => resolution.diagnostics.push(label_count(block, 1, n)),
                _ => resolution.remain.push_block(block.clone()),
            }
        }

        self.resolve_runners(&runner_blocks, &mut resolution);
        self.resolve_queries(&query_blocks, &mut resolution);

        tracing::debug!(
            runners = resolution.runners.len(),
            queries = resolution.queries.len(),
            diagnostics = resolution.diagnostics.len(),
            "resolved configuration"
        );
        resolution
    }

    fn resolve_runners(&self, blocks: &[&Block], resolution: &mut Resolution) {
        let mut declared: HashMap<(&str, &str), Option<&SourceRange>> = HashMap::new();
        for block in blocks {
            let (runner_type, name) = (block.labels()[0].as_str(), block.labels()[1].as_str());
            if let Some(earlier) = declared.get(&(runner_type, name)) {
                resolution.diagnostics.push(
                    Diagnostic::error(
                        format!("Duplicate query_runner \"{runner_type}\" configuration"),
                        format!(
                            "A {runner_type} query_runner named \"{name}\" was already declared at {}. query_runner names must unique per type in a configuration",
                            describe(*earlier)
                        ),
                    )
                    .with_code(DiagnosticCode::DuplicateRunner)
                    .with_subject(block.range().cloned()),
                );
                continue;
            }
            declared.insert((runner_type, name), block.range());

            let outcome =
                self.registry
                    .build(runner_type, name, block.body(), self.scope, block.range());
            let (runner, diags) = outcome.into_parts();
            let failed = diags.has_errors();
            resolution.diagnostics.extend(diags);
            if let (Some(runner), false) = (runner, failed) {
                resolution.runners.push(runner);
            }
        }
    }

    fn resolve_queries(&self, blocks: &[&Block], resolution: &mut Resolution) {
        let mut declared: HashMap<&str, Option<&SourceRange>> = HashMap::new();
        for block in blocks {
            let name = block.labels()[0].as_str();
            if let Some(earlier) = declared.get(name) {
                resolution.diagnostics.push(
                    Diagnostic::error(
                        "Duplicate query declaration",
                        format!(
                            "A query named \"{name}\" was already declared at {}. query names must unique within a configuration",
                            describe(*earlier)
                        ),
                    )
                    .with_code(DiagnosticCode::DuplicateQuery)
                    .with_subject(block.range().cloned()),
                );
                continue;
            }
            declared.insert(name, block.range());

            let (query, diags) =
                QueryBase::decode(block, self.scope, &resolution.runners).into_parts();
            let failed = diags.has_errors();
            resolution.diagnostics.extend(diags);
            if let (Some(query), false) = (query, failed) {
                resolution.queries.push(query);
            }
        }
    }
}

fn describe(range: Option<&SourceRange>) -> String {
    range.map_or_else(|| "an unknown location".to_owned(), ToString::to_string)
}

fn label_count(block: &Block, expected: usize, found: usize) -> Diagnostic {
    Diagnostic::error(
        format!("Invalid {} block", block.kind()),
        format!(
            "A {} block must have exactly {expected} label(s), found {found}.",
            block.kind()
        ),
    )
    .with_code(DiagnosticCode::Syntax)
    .with_subject(block.range().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(src: &str) -> Resolution {
        let registry = RunnerRegistry::with_builtin();
        let scope = Arc::new(EvalScope::with_stdlib());
        let doc = Document::parse("config.hcl", src).unwrap();
        ConfigResolver::new(&registry, &scope).resolve(&doc)
    }

    #[test]
    fn test_resolve_runners_and_queries() {
        let resolution = resolve(
            r#"
query_runner "static" "default" {
  columns = ["id"]
}

query "first" {
  runner      = query_runner.static.default
  description = "the first one"
  rows        = [["1"]]
}

query "second" {
  runner = query_runner.static.default
  rows   = []
}

output "json" {}
title = "demo"
"#,
        );
        assert!(resolution.diagnostics.is_empty(), "{}", resolution.diagnostics);
        assert_eq!(resolution.runners.len(), 1);
        let names: Vec<_> = resolution.queries.iter().map(|q| q.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(resolution.queries.get("first").unwrap().description(), "the first one");
        assert_eq!(resolution.remain.blocks().len(), 1);
        assert_eq!(resolution.remain.attributes().len(), 1);
    }

    #[test]
    fn test_duplicate_runner_cites_first_declaration() {
        let resolution = resolve(
            r#"
query_runner "static" "default" {
	columns = []
}
query_runner "static" "default" {
	columns = []
}
"#,
        );
        assert_eq!(resolution.runners.len(), 1);
        assert_eq!(resolution.diagnostics.codes(), vec![DiagnosticCode::DuplicateRunner]);
        let diag = resolution.diagnostics.iter().next().unwrap();
        assert_eq!(diag.summary, "Duplicate query_runner \"static\" configuration");
        assert!(diag.detail.contains("already declared at config.hcl:2,1-32"));
        assert_eq!(diag.subject.as_ref().unwrap().to_string(), "config.hcl:5,1-32");
    }

    #[test]
    fn test_duplicate_query_is_skipped() {
        let resolution = resolve(
            r#"
query_runner "static" "default" {
  columns = []
}
query "q" {
  runner = query_runner.static.default
  rows   = []
}
query "q" {
  runner = query_runner.static.default
  rows   = []
}
"#,
        );
        assert_eq!(resolution.queries.len(), 1);
        assert_eq!(resolution.diagnostics.codes(), vec![DiagnosticCode::DuplicateQuery]);
    }

    #[test]
    fn test_collects_every_problem() {
        let resolution = resolve(
            r#"
query_runner "statik" "default" {}
query_runner "static" "default" {
  columns = []
}
query_runner "static" {}
query "missing_runner" {
  rows = []
}
query "unknown_instance" {
  runner = query_runner.static.other
}
query "ok" {
  runner = query_runner.static.default
  rows   = []
}
"#,
        );
        assert_eq!(
            resolution.diagnostics.codes(),
            vec![
                DiagnosticCode::Syntax,
                DiagnosticCode::UnknownRunnerType,
                DiagnosticCode::MissingAttribute,
                DiagnosticCode::RunnerNotFound,
            ]
        );
        assert!(resolution.has_errors());
        assert_eq!(resolution.queries.len(), 1);
        assert!(resolution.queries.get("ok").is_some());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let src = r#"
query_runner "exce" "a" {}
query "x" {
  runner = 1
}
"#;
        assert_eq!(resolve(src).diagnostics, resolve(src).diagnostics);
    }
}
