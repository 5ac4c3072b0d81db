//! The runner/query contract
//!
//! A [`QueryRunner`] is created once per `query_runner` block and prepares
//! the `query` blocks bound to it. A [`PreparedQuery`] is immutable and may
//! be run any number of times, concurrently.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hcl::Expression;
use hcl::eval::Context;
use hcl::Value;
use tracing::debug;

use crate::context::RunContext;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, SourceRange};
use crate::document::{Attribute, Block, Body};
use crate::error::{Error, Result};
use crate::reference::{QueryRef, RunnerRef, RunnerRefError};
use crate::result::QueryResult;
use crate::scope::{EvalScope, Functions, Variables};

/// A value together with every diagnostic produced while building it.
/// Warnings may accompany a value; errors usually mean there is none.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: Option<T>,
    pub diagnostics: Diagnostics,
}

impl<T> Outcome<T> {
    pub fn new(value: Option<T>, diagnostics: Diagnostics) -> Self {
        Self { value, diagnostics }
    }

    pub fn ok(value: T) -> Self {
        Self::new(Some(value), Diagnostics::new())
    }

    pub fn failed(diagnostics: impl Into<Diagnostics>) -> Self {
        Self::new(None, diagnostics.into())
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Prepend diagnostics collected before this outcome was produced
    pub fn after(mut self, earlier: Diagnostics) -> Self {
        let mut diagnostics = earlier;
        diagnostics.extend(std::mem::take(&mut self.diagnostics));
        self.diagnostics = diagnostics;
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome::new(self.value.map(f), self.diagnostics)
    }

    pub fn into_parts(self) -> (Option<T>, Diagnostics) {
        (self.value, self.diagnostics)
    }

    /// The value, unless there are errors or no value was produced
    pub fn into_result(self) -> std::result::Result<T, Diagnostics> {
        match self.value {
            Some(value) if !self.diagnostics.has_errors() => Ok(value),
            _ => Err(self.diagnostics),
        }
    }
}

impl<T> From<std::result::Result<T, Diagnostics>> for Outcome<T> {
    fn from(result: std::result::Result<T, Diagnostics>) -> Self {
        match result {
            Ok(value) => Outcome::ok(value),
            Err(diags) => Outcome::failed(diags),
        }
    }
}

/// One configured connection to a backend
pub trait QueryRunner: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn runner_type(&self) -> &str;

    /// Decode and validate the adapter-specific attributes of a query
    fn prepare(&self, base: QueryBase) -> Outcome<Arc<dyn PreparedQuery>>;
}

/// A query ready to run
#[async_trait]
pub trait PreparedQuery: Send + Sync + fmt::Debug {
    fn base(&self) -> &QueryBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn description(&self) -> &str {
        self.base().description()
    }

    fn runner_type(&self) -> &str {
        self.base().runner_type()
    }

    async fn run(
        &self,
        ctx: &RunContext,
        variables: &Variables,
        functions: &Functions,
    ) -> Result<QueryResult>;
}

/// Attributes shared by every query, plus what the adapter still has to decode
#[derive(Clone)]
pub struct QueryBase {
    name: String,
    description: String,
    runner: Arc<dyn QueryRunner>,
    remain: Body,
    scope: Arc<EvalScope>,
}

impl fmt::Debug for QueryBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBase")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("runner_type", &self.runner.runner_type())
            .field("runner", &self.runner.name())
            .finish_non_exhaustive()
    }
}

impl QueryBase {
    pub fn new(
        name: impl Into<String>,
        runner: Arc<dyn QueryRunner>,
        remain: Body,
        scope: Arc<EvalScope>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            runner,
            remain,
            scope,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Decode the common attributes of a `query` block and hand the rest to
    /// the bound runner.
    pub fn decode(
        block: &Block,
        scope: &Arc<EvalScope>,
        runners: &QueryRunners,
    ) -> Outcome<Arc<dyn PreparedQuery>> {
        let name = block.labels().first().map(String::as_str).unwrap_or_default();
        let body = block.body();

        let mut diags = Diagnostics::new();
        let runner = match body.require_attribute("runner") {
            Ok(runner_attr) => match RunnerRef::parse(runner_attr) {
                Ok(reference) => {
                    let runner = runners.get(&reference.runner_type, &reference.name);
                    if runner.is_none() {
                        diags.push(
                            Diagnostic::error(
                                "Invalid Query Runner",
                                format!("query_runner \"{}\" is not found", reference.address()),
                            )
                            .with_code(DiagnosticCode::RunnerNotFound)
                            .with_subject(reference.range.clone()),
                        );
                    }
                    runner
                }
                Err(err) => {
                    diags.push(err.to_diagnostic(runner_attr.expr_range().cloned()));
                    None
                }
            },
            Err(diag) => {
                diags.push(diag);
                None
            }
        };

        let mut description = None;
        if let Some(attr) = body.attribute("description") {
            match hcl::eval::Evaluate::evaluate(attr.expr(), scope.context()) {
                Ok(Value::String(described)) => description = Some(described),
                Ok(value) => diags.push(invalid_description(
                    if value.is_null() {
                        "description is unknown".to_owned()
                    } else {
                        "description is not string".to_owned()
                    },
                    attr,
                )),
                Err(errors) => diags.push(invalid_description(errors.to_string(), attr)),
            }
        }

        // Without a runner the remaining attributes can not be checked.
        let Some(runner) = runner else {
            return Outcome::failed(diags);
        };
        let mut base = QueryBase::new(
            name,
            runner.clone(),
            body.without(&["runner", "description"]),
            scope.clone(),
        );
        if let Some(description) = description {
            base = base.with_description(description);
        }

        debug!(
            query = name,
            runner_type = runner.runner_type(),
            runner = runner.name(),
            "preparing query"
        );
        let outcome = runner.prepare(base).after(diags);
        if outcome.has_errors() {
            return Outcome::failed(outcome.diagnostics);
        }
        outcome
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn runner(&self) -> &Arc<dyn QueryRunner> {
        &self.runner
    }

    pub fn runner_type(&self) -> &str {
        self.runner.runner_type()
    }

    /// Adapter attributes left after `runner` and `description`
    pub fn remain(&self) -> &Body {
        &self.remain
    }

    /// Header of the query block, for "missing attribute" diagnostics
    pub fn range(&self) -> Option<&SourceRange> {
        self.remain.missing_range()
    }

    pub fn scope(&self) -> &EvalScope {
        &self.scope
    }

    /// Fresh evaluation context for one run
    pub fn eval_context<'a>(
        &'a self,
        variables: &Variables,
        functions: &Functions,
    ) -> Context<'a> {
        self.scope.child(variables, functions)
    }
}

fn invalid_description(detail: String, attr: &Attribute) -> Diagnostic {
    Diagnostic::error("Invalid description", detail)
        .with_code(DiagnosticCode::InvalidValue)
        .with_subject(attr.expr_range().cloned())
}

/// Every runner built from a document
#[derive(Debug, Clone, Default)]
pub struct QueryRunners(Vec<Arc<dyn QueryRunner>>);

impl QueryRunners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, runner: Arc<dyn QueryRunner>) {
        self.0.push(runner);
    }

    pub fn get(&self, runner_type: &str, name: &str) -> Option<&Arc<dyn QueryRunner>> {
        self.0
            .iter()
            .find(|r| r.runner_type() == runner_type && r.name() == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<dyn QueryRunner>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Every query prepared from a document, in declaration order
#[derive(Debug, Clone, Default)]
pub struct PreparedQueries(Vec<Arc<dyn PreparedQuery>>);

impl PreparedQueries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, query: Arc<dyn PreparedQuery>) {
        self.0.push(query);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PreparedQuery>> {
        self.0.iter().find(|q| q.name() == name)
    }

    /// Resolve a `query.<name>` traversal
    pub fn get_by_reference(
        &self,
        expr: &Expression,
    ) -> std::result::Result<&Arc<dyn PreparedQuery>, RunnerRefError> {
        let reference = QueryRef::parse(expr)?;
        self.get(&reference.name)
            .ok_or(RunnerRefError::NotFound(reference.name))
    }

    /// Look up queries by name, failing on the first unknown one
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<dyn PreparedQuery>>> {
        names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| Error::QueryNotFound(name.as_ref().to_owned()))
            })
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<dyn PreparedQuery>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a PreparedQueries {
    type Item = &'a Arc<dyn PreparedQuery>;
    type IntoIter = std::slice::Iter<'a, Arc<dyn PreparedQuery>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
