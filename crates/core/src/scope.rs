//! Evaluation scopes for query expressions
//!
//! The base scope is built once at startup and shared read-only. Every query
//! run evaluates its deferred expressions in a child context that carries the
//! caller's variables and functions and falls back to the base for anything
//! else.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hcl::eval::{Context, Evaluate, FuncArgs, FuncDef, ParamType};
use hcl::expr::{Operation, TemplateExpr, TraversalOperator};
use hcl::template::{Directive, Element};
use hcl::{Expression, Number, Template, Value};

use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics};
use crate::document::Attribute;

/// Caller-supplied variables for one run
pub type Variables = HashMap<String, Value>;

/// Caller-supplied functions for one run
pub type Functions = HashMap<String, FuncDef>;

/// Name of the variable holding caller parameters decoded from JSON
pub const VARIABLES_ROOT: &str = "var";

/// Base variables and functions shared by every query
pub struct EvalScope {
    context: Context<'static>,
}

impl std::fmt::Debug for EvalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalScope").finish_non_exhaustive()
    }
}

impl Default for EvalScope {
    fn default() -> Self {
        Self {
            context: Context::new(),
        }
    }
}

impl EvalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base scope with the built-in function library
    pub fn with_stdlib() -> Self {
        let mut scope = Self::new();
        scope.declare_func("now", FuncDef::builder().build(now));
        scope.declare_func(
            "duration",
            FuncDef::builder().param(ParamType::String).build(duration),
        );
        scope.declare_func(
            "env",
            FuncDef::builder()
                .param(ParamType::String)
                .variadic_param(ParamType::String)
                .build(env),
        );
        scope.declare_func(
            "must_env",
            FuncDef::builder().param(ParamType::String).build(must_env),
        );
        scope.declare_func(
            "jsondecode",
            FuncDef::builder().param(ParamType::String).build(jsondecode),
        );
        scope.declare_func(
            "jsonencode",
            FuncDef::builder().param(ParamType::Any).build(jsonencode),
        );
        scope.declare_func(
            "file",
            FuncDef::builder()
                .param(ParamType::String)
                .variadic_param(ParamType::String)
                .build(file),
        );
        scope.declare_func(
            "templatefile",
            FuncDef::builder()
                .param(ParamType::String)
                .param(ParamType::Any)
                .variadic_param(ParamType::String)
                .build(templatefile),
        );
        scope
    }

    pub fn declare_var(&mut self, name: &str, value: impl Into<Value>) {
        self.context.declare_var(name, value);
    }

    pub fn declare_func(&mut self, name: &str, func: FuncDef) {
        self.context.declare_func(name, func);
    }

    /// The base context, used for eager evaluation during resolution
    pub fn context(&self) -> &Context<'static> {
        &self.context
    }

    /// A child context for exactly one run. Caller values shadow the base.
    pub fn child(&self, variables: &Variables, functions: &Functions) -> Context<'_> {
        let mut ctx = self.context.clone();
        for (name, value) in variables {
            ctx.declare_var(name.as_str(), value.clone());
        }
        for (name, func) in functions {
            ctx.declare_func(name.as_str(), func.clone());
        }
        ctx
    }
}

/// Decode a JSON payload into the `var` variable; absent payloads give null
pub fn variables_from_json(payload: Option<&str>) -> Result<Variables, serde_json::Error> {
    let value = match payload.map(str::trim) {
        Some(text) if !text.is_empty() => serde_json::from_str::<Value>(text)?,
        _ => Value::Null,
    };
    Ok(Variables::from([(VARIABLES_ROOT.to_owned(), value)]))
}

/// Number of positional arguments of a file-relative function
fn file_function_arity(name: &str) -> Option<usize> {
    match name {
        "file" => Some(1),
        "templatefile" => Some(2),
        _ => None,
    }
}

/// Append `dir` as the base directory argument of every `file` and
/// `templatefile` call in `expr`, so relative paths resolve against the
/// configuration file that contains the call.
pub fn anchor_file_functions(expr: &mut Expression, dir: &str) {
    match expr {
        Expression::FuncCall(call) => {
            for arg in &mut call.args {
                anchor_file_functions(arg, dir);
            }
            let arity = file_function_arity(call.name.name.as_str());
            if call.name.namespace.is_empty()
                && !call.expand_final
                && arity == Some(call.args.len())
            {
                call.args.push(Expression::String(dir.to_owned()));
            }
        }
        Expression::Array(items) => {
            for item in items {
                anchor_file_functions(item, dir);
            }
        }
        Expression::Object(object) => {
            for (_, value) in object.iter_mut() {
                anchor_file_functions(value, dir);
            }
        }
        Expression::Parenthesis(inner) => anchor_file_functions(inner, dir),
        Expression::Traversal(traversal) => {
            anchor_file_functions(&mut traversal.expr, dir);
            for op in &mut traversal.operators {
                if let TraversalOperator::Index(index) = op {
                    anchor_file_functions(index, dir);
                }
            }
        }
        Expression::Conditional(cond) => {
            anchor_file_functions(&mut cond.cond_expr, dir);
            anchor_file_functions(&mut cond.true_expr, dir);
            anchor_file_functions(&mut cond.false_expr, dir);
        }
        Expression::Operation(op) => match op.as_mut() {
            Operation::Unary(unary) => anchor_file_functions(&mut unary.expr, dir),
            Operation::Binary(binary) => {
                anchor_file_functions(&mut binary.lhs_expr, dir);
                anchor_file_functions(&mut binary.rhs_expr, dir);
            }
        },
        Expression::ForExpr(for_expr) => {
            anchor_file_functions(&mut for_expr.collection_expr, dir);
            if let Some(key_expr) = &mut for_expr.key_expr {
                anchor_file_functions(key_expr, dir);
            }
            anchor_file_functions(&mut for_expr.value_expr, dir);
            if let Some(cond_expr) = &mut for_expr.cond_expr {
                anchor_file_functions(cond_expr, dir);
            }
        }
        Expression::TemplateExpr(template_expr) => {
            // templates are raw text; only rewrite the ones that change
            let Ok(original) = Template::from_expr(&**template_expr) else {
                return;
            };
            let mut template = original.clone();
            anchor_template(&mut template, dir);
            if template != original {
                **template_expr = TemplateExpr::QuotedString(template.to_string());
            }
        }
        _ => {}
    }
}

fn anchor_template(template: &mut Template, dir: &str) {
    for element in template.elements_mut() {
        match element {
            Element::Literal(_) => {}
            Element::Interpolation(interpolation) => {
                anchor_file_functions(&mut interpolation.expr, dir);
            }
            Element::Directive(Directive::If(directive)) => {
                anchor_file_functions(&mut directive.cond_expr, dir);
                anchor_template(&mut directive.true_template, dir);
                if let Some(false_template) = &mut directive.false_template {
                    anchor_template(false_template, dir);
                }
            }
            Element::Directive(Directive::For(directive)) => {
                anchor_file_functions(&mut directive.collection_expr, dir);
                anchor_template(&mut directive.template, dir);
            }
        }
    }
}

/// Parse a standalone expression, e.g. an adapter's default for an absent
/// optional attribute.
pub fn parse_expression(src: &str, filename: &str) -> Result<Expression, Diagnostics> {
    let invalid = |detail: String| {
        Diagnostics::from(
            Diagnostic::error("Invalid expression", format!("{filename}: {detail}"))
                .with_code(DiagnosticCode::Syntax),
        )
    };
    let body = hcl::parse(&format!("value = {src}\n")).map_err(|err| invalid(err.to_string()))?;
    body.attributes()
        .next()
        .map(|attr| attr.expr.clone())
        .ok_or_else(|| invalid(format!("`{src}` is not an expression")))
}

fn invalid_value(attr: &Attribute, what: &str, detail: String) -> Diagnostics {
    Diagnostic::error(format!("Invalid {what}"), detail)
        .with_code(DiagnosticCode::InvalidValue)
        .with_subject(attr.expr_range().cloned())
        .into()
}

pub fn eval_value(ctx: &Context<'_>, attr: &Attribute, what: &str) -> Result<Value, Diagnostics> {
    attr.expr()
        .evaluate(ctx)
        .map_err(|errors| invalid_value(attr, what, errors.to_string()))
}

/// Evaluate to a string; null is "unknown", other types are rejected
pub fn eval_string(ctx: &Context<'_>, attr: &Attribute, what: &str) -> Result<String, Diagnostics> {
    match eval_value(ctx, attr, what)? {
        Value::String(s) => Ok(s),
        Value::Null => Err(invalid_value(attr, what, format!("{what} is unknown"))),
        _ => Err(invalid_value(attr, what, format!("{what} is not string"))),
    }
}

pub fn eval_non_empty_string(
    ctx: &Context<'_>,
    attr: &Attribute,
    what: &str,
) -> Result<String, Diagnostics> {
    let value = eval_string(ctx, attr, what)?;
    if value.is_empty() {
        return Err(invalid_value(attr, what, format!("{what} is empty")));
    }
    Ok(value)
}

pub fn eval_number(ctx: &Context<'_>, attr: &Attribute, what: &str) -> Result<f64, Diagnostics> {
    match eval_value(ctx, attr, what)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid_value(attr, what, format!("{what} is out of range"))),
        Value::Null => Err(invalid_value(attr, what, format!("{what} is unknown"))),
        _ => Err(invalid_value(attr, what, format!("{what} is not number"))),
    }
}

/// Evaluate to a list or tuple of strings, possibly empty
pub fn eval_string_list(
    ctx: &Context<'_>,
    attr: &Attribute,
    what: &str,
) -> Result<Vec<String>, Diagnostics> {
    let items = match eval_value(ctx, attr, what)? {
        Value::Array(items) => items,
        Value::Null => return Err(invalid_value(attr, what, format!("{what} is unknown"))),
        _ => {
            return Err(invalid_value(
                attr,
                what,
                format!("{what} must be a list of strings"),
            ));
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            _ => Err(invalid_value(
                attr,
                what,
                format!("{what} must be a list of strings"),
            )),
        })
        .collect()
}

pub fn eval_non_empty_string_list(
    ctx: &Context<'_>,
    attr: &Attribute,
    what: &str,
) -> Result<Vec<String>, Diagnostics> {
    let items = eval_string_list(ctx, attr, what)?;
    if items.is_empty() {
        return Err(invalid_value(attr, what, format!("{what} is empty")));
    }
    Ok(items)
}

/// Parse durations like `15m`, `1h30m`, `1.5h` or `500ms`
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("empty duration".to_owned());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut seconds = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let amount: f64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "d" => 86400.0,
            "" => return Err(format!("missing unit in duration {input:?}")),
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        seconds += amount * factor;
        rest = &rest[unit_len..];
    }
    Duration::try_from_secs_f64(seconds).map_err(|err| format!("invalid duration {input:?}: {err}"))
}

fn number(value: f64) -> Result<Value, String> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| format!("{value} is not a finite number"))
}

fn string_arg(args: &FuncArgs, index: usize) -> Result<&str, String> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("argument {} must be a string", index + 1))
}

fn now(_args: FuncArgs) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| err.to_string())?;
    number(elapsed.as_secs_f64())
}

fn duration(args: FuncArgs) -> Result<Value, String> {
    number(parse_duration(string_arg(&args, 0)?)?.as_secs_f64())
}

fn env(args: FuncArgs) -> Result<Value, String> {
    let name = string_arg(&args, 0)?;
    match std::env::var(name) {
        Ok(value) => Ok(Value::from(value)),
        Err(_) => Ok(args
            .get(1)
            .cloned()
            .unwrap_or_else(|| Value::from(String::new()))),
    }
}

fn must_env(args: FuncArgs) -> Result<Value, String> {
    let name = string_arg(&args, 0)?;
    std::env::var(name)
        .map(Value::from)
        .map_err(|_| format!("environment variable {name} is not set"))
}

fn jsondecode(args: FuncArgs) -> Result<Value, String> {
    serde_json::from_str(string_arg(&args, 0)?).map_err(|err| err.to_string())
}

fn jsonencode(args: FuncArgs) -> Result<Value, String> {
    let value = args.first().ok_or("missing argument")?;
    serde_json::to_string(value)
        .map(Value::from)
        .map_err(|err| err.to_string())
}

/// The path argument, joined to the trailing base directory when relative
fn file_path(args: &FuncArgs, arity: usize) -> Result<PathBuf, String> {
    let path = Path::new(string_arg(args, 0)?);
    match args.get(arity).and_then(Value::as_str) {
        Some(base) if path.is_relative() => Ok(Path::new(base).join(path)),
        _ => Ok(path.to_path_buf()),
    }
}

fn read_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|err| format!("failed to read {}: {err}", path.display()))
}

fn file(args: FuncArgs) -> Result<Value, String> {
    read_file(&file_path(&args, 1)?).map(Value::from)
}

fn templatefile(args: FuncArgs) -> Result<Value, String> {
    let path = file_path(&args, 2)?;
    let Some(Value::Object(vars)) = args.get(1) else {
        return Err("argument 2 must be an object of template variables".to_owned());
    };
    let template: Template = read_file(&path)?
        .parse()
        .map_err(|err| format!("invalid template {}: {err}", path.display()))?;

    let mut scope = EvalScope::with_stdlib();
    for (name, value) in vars {
        scope.declare_var(name.as_str(), value.clone());
    }
    template
        .evaluate(scope.context())
        .map(Value::from)
        .map_err(|err| format!("{}: {err}", path.display()))
}
