//! Blocks, attributes and bodies of a configuration document

use hcl::Expression;
use hcl::eval::Evaluate;
use serde::de::DeserializeOwned;

use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, SourceRange};
use crate::scope::EvalScope;

/// A `name = expression` pair
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    expr: Expression,
    range: Option<SourceRange>,
    expr_range: Option<SourceRange>,
}

impl Attribute {
    pub fn new(
        name: impl Into<String>,
        expr: Expression,
        range: Option<SourceRange>,
        expr_range: Option<SourceRange>,
    ) -> Self {
        Self {
            name: name.into(),
            expr,
            range,
            expr_range,
        }
    }

    /// An attribute that does not come from a source file, e.g. a default
    pub fn synthetic(name: impl Into<String>, expr: Expression) -> Self {
        Self::new(name, expr, None, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expr(&self) -> &Expression {
        &self.expr
    }

    pub fn range(&self) -> Option<&SourceRange> {
        self.range.as_ref()
    }

    /// Range of the value expression, falling back to the whole attribute
    pub fn expr_range(&self) -> Option<&SourceRange> {
        self.expr_range.as_ref().or(self.range.as_ref())
    }
}

/// A typed, labeled block such as `query "name" { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    kind: String,
    labels: Vec<String>,
    body: Body,
    range: Option<SourceRange>,
}

impl Block {
    pub fn new(
        kind: impl Into<String>,
        labels: Vec<String>,
        body: Body,
        range: Option<SourceRange>,
    ) -> Self {
        Self {
            kind: kind.into(),
            labels,
            body,
            range,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Range of the block header, from the type keyword to the last label
    pub fn range(&self) -> Option<&SourceRange> {
        self.range.as_ref()
    }

    /// Human readable block address, e.g. `query_runner "static" "default"`
    pub fn address(&self) -> String {
        let mut address = self.kind.clone();
        for label in &self.labels {
            address.push_str(&format!(" \"{label}\""));
        }
        address
    }
}

/// Attributes and nested blocks in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    attributes: Vec<Attribute>,
    blocks: Vec<Block>,
    missing_range: Option<SourceRange>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_range(mut self, range: Option<SourceRange>) -> Self {
        self.missing_range = range;
        self
    }

    pub fn push_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    pub fn push_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.blocks.is_empty()
    }

    /// Where to anchor diagnostics about something absent from this body
    pub fn missing_range(&self) -> Option<&SourceRange> {
        self.missing_range.as_ref()
    }

    pub fn require_attribute(&self, name: &str) -> Result<&Attribute, Diagnostic> {
        self.attribute(name).ok_or_else(|| {
            Diagnostic::error(
                "Missing required argument",
                format!("The argument \"{name}\" is required, but no definition was found."),
            )
            .with_code(DiagnosticCode::MissingAttribute)
            .with_subject(self.missing_range.clone())
        })
    }

    /// Reject attributes and blocks not in `supported`
    pub fn check_supported(&self, supported: &[&str]) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for attr in &self.attributes {
            if !supported.contains(&attr.name()) {
                diags.push(
                    Diagnostic::error(
                        "Unsupported argument",
                        format!("An argument named \"{}\" is not expected here.", attr.name()),
                    )
                    .with_code(DiagnosticCode::UnsupportedAttribute)
                    .with_subject(attr.range().cloned()),
                );
            }
        }
        for block in &self.blocks {
            diags.push(
                Diagnostic::error(
                    "Unsupported block type",
                    format!("Blocks of type \"{}\" are not expected here.", block.kind()),
                )
                .with_code(DiagnosticCode::UnsupportedAttribute)
                .with_subject(block.range().cloned()),
            );
        }
        diags
    }

    /// Copy of this body without the named attributes and block kinds
    pub fn without(&self, names: &[&str]) -> Body {
        Body {
            attributes: self
                .attributes
                .iter()
                .filter(|attr| !names.contains(&attr.name()))
                .cloned()
                .collect(),
            blocks: self
                .blocks
                .iter()
                .filter(|block| !names.contains(&block.kind()))
                .cloned()
                .collect(),
            missing_range: self.missing_range.clone(),
        }
    }

    /// Evaluate every attribute against the base scope and deserialize the
    /// resulting object into `T`.
    pub fn decode<T: DeserializeOwned>(&self, scope: &EvalScope) -> Result<T, Diagnostics> {
        let mut diags = self.check_blocks_absent();
        let mut object = serde_json::Map::new();

        for attr in &self.attributes {
            let value = match attr.expr().evaluate(scope.context()) {
                Ok(value) => value,
                Err(errors) => {
                    diags.push(
                        Diagnostic::error(
                            format!("Invalid {}", attr.name()),
                            errors.to_string(),
                        )
                        .with_code(DiagnosticCode::InvalidValue)
                        .with_subject(attr.expr_range().cloned()),
                    );
                    continue;
                }
            };
            match serde_json::to_value(&value) {
                Ok(json) => {
                    object.insert(attr.name().to_owned(), json);
                }
                Err(err) => diags.push(
                    Diagnostic::error(format!("Invalid {}", attr.name()), err.to_string())
                        .with_code(DiagnosticCode::InvalidValue)
                        .with_subject(attr.expr_range().cloned()),
                ),
            }
        }
        if diags.has_errors() {
            return Err(diags);
        }

        serde_json::from_value(serde_json::Value::Object(object)).map_err(|err| {
            Diagnostic::error("Invalid configuration", err.to_string())
                .with_code(DiagnosticCode::InvalidAttribute)
                .with_subject(self.missing_range.clone())
                .into()
        })
    }

    fn check_blocks_absent(&self) -> Diagnostics {
        self.blocks
            .iter()
            .map(|block| {
                Diagnostic::error(
                    "Unsupported block type",
                    format!("Blocks of type \"{}\" are not expected here.", block.kind()),
                )
                .with_code(DiagnosticCode::UnsupportedAttribute)
                .with_subject(block.range().cloned())
            })
            .collect()
    }
}
