//! `static` runner: rows declared in the configuration itself
//!
//! ```hcl
//! query_runner "static" "fixture" {
//!   columns = ["id", "name"]
//! }
//!
//! query "people" {
//!   runner = query_runner.static.fixture
//!   rows   = [["1", var.name]]
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use hcl::Value;
use serde::Deserialize;
use tracing::debug;

use crate::context::RunContext;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics};
use crate::document::{Attribute, Body};
use crate::error::Result;
use crate::query::{Outcome, PreparedQuery, QueryBase, QueryRunner};
use crate::registry::RunnerDefinition;
use crate::result::QueryResult;
use crate::scope::{EvalScope, Functions, Variables, eval_value};

pub const TYPE_NAME: &str = "static";

pub fn definition() -> RunnerDefinition {
    RunnerDefinition::new(TYPE_NAME, build)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticConfig {
    columns: Vec<String>,
}

fn build(name: &str, body: &Body, scope: &EvalScope) -> Outcome<Arc<dyn QueryRunner>> {
    match body.decode::<StaticConfig>(scope) {
        Ok(config) => Outcome::ok(Arc::new(StaticRunner {
            name: name.to_owned(),
            columns: config.columns,
        }) as Arc<dyn QueryRunner>),
        Err(diags) => Outcome::failed(diags),
    }
}

#[derive(Debug, Clone)]
pub struct StaticRunner {
    name: String,
    columns: Vec<String>,
}

impl QueryRunner for StaticRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn runner_type(&self) -> &str {
        TYPE_NAME
    }

    fn prepare(&self, base: QueryBase) -> Outcome<Arc<dyn PreparedQuery>> {
        let mut diags = base.remain().check_supported(&["rows"]);
        let rows = match base.remain().require_attribute("rows") {
            Ok(rows) => rows.clone(),
            Err(missing) => {
                diags.push(missing);
                return Outcome::failed(diags);
            }
        };
        if diags.has_errors() {
            return Outcome::failed(diags);
        }
        debug!(query = base.name(), runner = %self.name, "prepared static query");
        Outcome::new(
            Some(Arc::new(StaticQuery {
                base,
                columns: self.columns.clone(),
                rows,
            }) as Arc<dyn PreparedQuery>),
            diags,
        )
    }
}

#[derive(Debug)]
pub struct StaticQuery {
    base: QueryBase,
    columns: Vec<String>,
    rows: Attribute,
}

impl StaticQuery {
    fn decode_rows(&self, value: Value) -> std::result::Result<Vec<Vec<String>>, Diagnostics> {
        let invalid = |detail: String| {
            Diagnostics::from(
                Diagnostic::error("Invalid rows", detail)
                    .with_code(DiagnosticCode::InvalidValue)
                    .with_subject(self.rows.expr_range().cloned()),
            )
        };
        let Value::Array(rows) = value else {
            return Err(invalid("rows must be a list of lists of strings".to_owned()));
        };

        rows.into_iter()
            .enumerate()
            .map(|(i, row)| {
                let Value::Array(cells) = row else {
                    return Err(invalid(format!("row {i} is not a list")));
                };
                if cells.len() != self.columns.len() {
                    return Err(invalid(format!(
                        "row {i} has {} cell(s), expected {}",
                        cells.len(),
                        self.columns.len()
                    )));
                }
                cells
                    .into_iter()
                    .map(|cell| match cell {
                        Value::String(s) => Ok(s),
                        Value::Number(n) => Ok(n.to_string()),
                        Value::Bool(b) => Ok(b.to_string()),
                        Value::Null => Ok(String::new()),
                        _ => Err(invalid(format!("row {i} contains a nested value"))),
                    })
                    .collect::<std::result::Result<Vec<String>, Diagnostics>>()
            })
            .collect()
    }
}

#[async_trait]
impl PreparedQuery for StaticQuery {
    fn base(&self) -> &QueryBase {
        &self.base
    }

    async fn run(
        &self,
        ctx: &RunContext,
        variables: &Variables,
        functions: &Functions,
    ) -> Result<QueryResult> {
        let rows = {
            let eval_ctx = self.base.eval_context(variables, functions);
            let value = eval_value(&eval_ctx, &self.rows, "rows")?;
            self.decode_rows(value)?
        };
        debug!(
            request_id = ctx.request_id(),
            query = self.name(),
            rows = rows.len(),
            "evaluated static rows"
        );
        Ok(QueryResult::new(self.name(), "", self.columns.clone(), rows))
    }
}
