//! Typed references inside expressions
//!
//! A query names its runner with `runner = query_runner.<type>.<name>` and a
//! host may name a query with `query.<name>`. These are plain HCL traversals;
//! this module validates their shape and turns them into typed values.

use hcl::expr::{Operation, TraversalOperator};
use hcl::template::{Directive, Element};
use hcl::{Expression, Identifier, Template};

use crate::diagnostics::{Diagnostic, DiagnosticCode, SourceRange};
use crate::document::Attribute;

/// Root variable of a runner reference
pub const RUNNER_ROOT: &str = "query_runner";

/// Root variable of a query reference
pub const QUERY_ROOT: &str = "query";

const RUNNER_SYNTAX: &str = "runner = query_runner.<type>.<name>";
const QUERY_SYNTAX: &str = "query.<name>";

/// Why an expression is not a valid reference
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerRefError {
    #[error("can not set constant value. please write as {expected}")]
    Constant { expected: &'static str },

    #[error("can not set {count} references. please write as {expected}")]
    Multiple {
        count: usize,
        expected: &'static str,
    },

    #[error("traversal is relative, a reference must start from a variable. please write as {expected}")]
    Relative { expected: &'static str },

    #[error("invalid reference \"{root}.*\", depends on a \"{expected_root}\" block. please write as {expected}")]
    WrongRoot {
        root: String,
        expected_root: &'static str,
        expected: &'static str,
    },

    #[error("reference has {segments} segment(s). please write as {expected}")]
    SegmentCount {
        segments: usize,
        expected: &'static str,
    },

    #[error("segment {position} must be a plain attribute name. please write as {expected}")]
    ComputedSegment {
        position: usize,
        expected: &'static str,
    },

    #[error("{0} is not found")]
    NotFound(String),
}

impl RunnerRefError {
    /// Short summary used for diagnostics
    pub fn summary(&self) -> &'static str {
        match self {
            RunnerRefError::Constant { .. } | RunnerRefError::Multiple { .. } => {
                "Invalid Query Runner"
            }
            _ => "Invalid Relation",
        }
    }

    pub fn to_diagnostic(&self, subject: Option<SourceRange>) -> Diagnostic {
        Diagnostic::error(self.summary(), self.to_string())
            .with_code(DiagnosticCode::InvalidRunnerReference)
            .with_subject(subject)
    }
}

/// `query_runner.<type>.<name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerRef {
    pub runner_type: String,
    pub name: String,
    pub range: Option<SourceRange>,
}

impl RunnerRef {
    pub fn parse(attr: &Attribute) -> Result<Self, RunnerRefError> {
        let (root, operators) = single_traversal(attr.expr(), RUNNER_SYNTAX)?;
        if root != RUNNER_ROOT {
            return Err(RunnerRefError::WrongRoot {
                root,
                expected_root: RUNNER_ROOT,
                expected: RUNNER_SYNTAX,
            });
        }
        if operators.len() != 2 {
            return Err(RunnerRefError::SegmentCount {
                segments: operators.len() + 1,
                expected: RUNNER_SYNTAX,
            });
        }
        Ok(Self {
            runner_type: attr_segment(&operators[0], 2, RUNNER_SYNTAX)?,
            name: attr_segment(&operators[1], 3, RUNNER_SYNTAX)?,
            range: attr.expr_range().cloned(),
        })
    }

    /// `<type>.<name>` as used in "not found" messages
    pub fn address(&self) -> String {
        format!("{}.{}", self.runner_type, self.name)
    }
}

/// `query.<name>`, trailing segments are ignored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRef {
    pub name: String,
}

impl QueryRef {
    pub fn parse(expr: &Expression) -> Result<Self, RunnerRefError> {
        let (root, operators) = single_traversal(expr, QUERY_SYNTAX)?;
        if root != QUERY_ROOT {
            return Err(RunnerRefError::WrongRoot {
                root,
                expected_root: QUERY_ROOT,
                expected: QUERY_SYNTAX,
            });
        }
        let first = operators.first().ok_or(RunnerRefError::SegmentCount {
            segments: 1,
            expected: QUERY_SYNTAX,
        })?;
        Ok(Self {
            name: attr_segment(first, 2, QUERY_SYNTAX)?,
        })
    }
}

/// A variable traversal found in an expression. `root` is `None` when the
/// traversal starts from something other than a variable.
#[derive(Debug)]
struct Traversal {
    root: Option<String>,
    operators: Vec<TraversalOperator>,
}

impl Traversal {
    fn variable(root: &str, operators: &[TraversalOperator]) -> Self {
        Self {
            root: Some(root.to_owned()),
            operators: operators.to_vec(),
        }
    }

    fn is_rooted_at(&self, bound: &[&Identifier]) -> bool {
        self.root
            .as_deref()
            .is_some_and(|root| bound.iter().any(|var| var.as_str() == root))
    }
}

fn single_traversal(
    expr: &Expression,
    expected: &'static str,
) -> Result<(String, Vec<TraversalOperator>), RunnerRefError> {
    let mut found = Vec::new();
    collect_traversals(expr, &mut found);
    if found.len() > 1 {
        return Err(RunnerRefError::Multiple {
            count: found.len(),
            expected,
        });
    }
    match found.pop() {
        None => Err(RunnerRefError::Constant { expected }),
        Some(Traversal {
            root: Some(root),
            operators,
        }) => Ok((root, operators)),
        Some(_) => Err(RunnerRefError::Relative { expected }),
    }
}

fn collect_traversals(expr: &Expression, out: &mut Vec<Traversal>) {
    match expr {
        Expression::Variable(var) => out.push(Traversal::variable(var.as_str(), &[])),
        Expression::Traversal(traversal) => {
            let mut inner = Vec::new();
            collect_traversals(&traversal.expr, &mut inner);
            match &traversal.expr {
                Expression::Variable(var) => {
                    out.push(Traversal::variable(var.as_str(), &traversal.operators))
                }
                _ if inner.is_empty() => out.push(Traversal {
                    root: None,
                    operators: traversal.operators.clone(),
                }),
                _ => out.extend(inner),
            }
            for op in &traversal.operators {
                if let TraversalOperator::Index(index) = op {
                    collect_traversals(index, out);
                }
            }
        }
        Expression::Array(items) => {
            for item in items {
                collect_traversals(item, out);
            }
        }
        Expression::Object(object) => {
            for (_, value) in object.iter() {
                collect_traversals(value, out);
            }
        }
        Expression::Parenthesis(inner) => collect_traversals(inner, out),
        Expression::FuncCall(call) => {
            for arg in &call.args {
                collect_traversals(arg, out);
            }
        }
        Expression::Conditional(cond) => {
            collect_traversals(&cond.cond_expr, out);
            collect_traversals(&cond.true_expr, out);
            collect_traversals(&cond.false_expr, out);
        }
        Expression::Operation(op) => match op.as_ref() {
            Operation::Unary(unary) => collect_traversals(&unary.expr, out),
            Operation::Binary(binary) => {
                collect_traversals(&binary.lhs_expr, out);
                collect_traversals(&binary.rhs_expr, out);
            }
        },
        Expression::ForExpr(for_expr) => {
            collect_traversals(&for_expr.collection_expr, out);
            let bound: Vec<&Identifier> = for_expr
                .key_var
                .iter()
                .chain(std::iter::once(&for_expr.value_var))
                .collect();
            let mut body = Vec::new();
            if let Some(key_expr) = &for_expr.key_expr {
                collect_traversals(key_expr, &mut body);
            }
            collect_traversals(&for_expr.value_expr, &mut body);
            if let Some(cond_expr) = &for_expr.cond_expr {
                collect_traversals(cond_expr, &mut body);
            }
            out.extend(body.into_iter().filter(|t| !t.is_rooted_at(&bound)));
        }
        Expression::TemplateExpr(template_expr) => {
            // Unparseable templates are reported when the expression is evaluated.
            if let Ok(template) = Template::from_expr(template_expr) {
                collect_template_traversals(&template, out);
            }
        }
        _ => {}
    }
}

fn collect_template_traversals(template: &Template, out: &mut Vec<Traversal>) {
    for element in template.elements() {
        match element {
            Element::Literal(_) => {}
            Element::Interpolation(interpolation) => collect_traversals(&interpolation.expr, out),
            Element::Directive(Directive::If(directive)) => {
                collect_traversals(&directive.cond_expr, out);
                collect_template_traversals(&directive.true_template, out);
                if let Some(false_template) = &directive.false_template {
                    collect_template_traversals(false_template, out);
                }
            }
            Element::Directive(Directive::For(directive)) => {
                collect_traversals(&directive.collection_expr, out);
                let bound: Vec<&Identifier> = directive
                    .key_var
                    .iter()
                    .chain(std::iter::once(&directive.value_var))
                    .collect();
                let mut body = Vec::new();
                collect_template_traversals(&directive.template, &mut body);
                out.extend(body.into_iter().filter(|t| !t.is_rooted_at(&bound)));
            }
        }
    }
}

fn attr_segment(
    op: &TraversalOperator,
    position: usize,
    expected: &'static str,
) -> Result<String, RunnerRefError> {
    match op {
        TraversalOperator::GetAttr(ident) => Ok(ident.as_str().to_owned()),
        _ => Err(RunnerRefError::ComputedSegment { position, expected }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::parse_expression;

    fn runner_attr(src: &str) -> Attribute {
        Attribute::synthetic("runner", parse_expression(src, "test.hcl").unwrap())
    }

    fn parse_runner(src: &str) -> Result<RunnerRef, RunnerRefError> {
        RunnerRef::parse(&runner_attr(src))
    }

    #[test]
    fn test_valid_runner_reference() {
        let reference = parse_runner("query_runner.redshift_data.default").unwrap();
        assert_eq!(reference.runner_type, "redshift_data");
        assert_eq!(reference.name, "default");
        assert_eq!(reference.address(), "redshift_data.default");
    }

    #[test]
    fn test_invalid_runner_references() {
        assert!(matches!(
            parse_runner(r#""query_runner.static.default""#),
            Err(RunnerRefError::Constant { .. })
        ));
        assert!(matches!(
            parse_runner("[query_runner.a.b, query_runner.c.d]"),
            Err(RunnerRefError::Multiple { count: 2, .. })
        ));
        assert!(matches!(
            parse_runner("runner.static.default"),
            Err(RunnerRefError::WrongRoot { ref root, .. }) if root == "runner"
        ));
        assert!(matches!(
            parse_runner("query_runner.static"),
            Err(RunnerRefError::SegmentCount { segments: 2, .. })
        ));
        assert!(matches!(
            parse_runner("query_runner.static.default.extra"),
            Err(RunnerRefError::SegmentCount { segments: 4, .. })
        ));
        assert!(matches!(
            parse_runner(r#"query_runner.static["default"]"#),
            Err(RunnerRefError::ComputedSegment { position: 3, .. })
        ));
        assert!(matches!(
            parse_runner(r#"jsondecode("{}").static.default"#),
            Err(RunnerRefError::Relative { .. })
        ));
    }

    #[test]
    fn test_references_inside_templates() {
        let reference = parse_runner(r#""${query_runner.static.default}""#).unwrap();
        assert_eq!(reference.address(), "static.default");

        assert!(matches!(
            parse_runner(r#""${query_runner.a.b}-${query_runner.c.d}""#),
            Err(RunnerRefError::Multiple { count: 2, .. })
        ));
        assert!(matches!(
            parse_runner(r#""%{ if true }${query_runner.static.default}%{ endif }""#),
            Ok(RunnerRef { ref name, .. }) if name == "default"
        ));
        assert!(matches!(
            parse_runner(r#""%{ for r in [query_runner.static.default] }${r}%{ endfor }""#),
            Ok(RunnerRef { ref runner_type, .. }) if runner_type == "static"
        ));
    }

    #[test]
    fn test_references_inside_for_expressions() {
        let reference = parse_runner("[for r in [query_runner.static.default] : r][0]").unwrap();
        assert_eq!(reference.address(), "static.default");

        assert!(matches!(
            parse_runner("[for k, v in {} : v if k != \"\"]"),
            Err(RunnerRefError::Constant { .. })
        ));
        assert!(matches!(
            parse_runner("[for r in [query_runner.a.b] : runner.c.d]"),
            Err(RunnerRefError::Multiple { count: 2, .. })
        ));
    }

    #[test]
    fn test_error_summaries() {
        let constant = parse_runner("1").unwrap_err();
        assert_eq!(constant.summary(), "Invalid Query Runner");
        let relation = parse_runner("query_runner.static").unwrap_err();
        assert_eq!(relation.summary(), "Invalid Relation");
        let diag = relation.to_diagnostic(None);
        assert_eq!(diag.code, Some(DiagnosticCode::InvalidRunnerReference));
        assert!(diag.detail.contains("query_runner.<type>.<name>"));
    }

    #[test]
    fn test_query_reference() {
        let expr = parse_expression("query.users.columns", "test.hcl").unwrap();
        assert_eq!(QueryRef::parse(&expr).unwrap().name, "users");

        let expr = parse_expression("query", "test.hcl").unwrap();
        assert!(matches!(
            QueryRef::parse(&expr),
            Err(RunnerRefError::SegmentCount { segments: 1, .. })
        ));
        let expr = parse_expression("queries.users", "test.hcl").unwrap();
        assert!(QueryRef::parse(&expr).is_err());
    }
}
