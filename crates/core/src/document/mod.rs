//! Configuration document loading
//!
//! A document is parsed twice: `hcl` produces the evaluable expressions and
//! `hcl-edit` produces byte spans. Both parsers visit structures in source
//! order, so the two trees are zipped by position to attach a
//! [`SourceRange`] to every block and attribute.

mod body;

pub use body::{Attribute, Block, Body};

use std::ops::Range;
use std::path::Path;

use hcl_edit::Span;
use tracing::debug;
use walkdir::WalkDir;

use crate::diagnostics::{
    Diagnostic, DiagnosticCode, Diagnostics, SourceFile, SourceMap, SourceRange,
};
use crate::scope::anchor_file_functions;

/// File extension of configuration files inside a directory
pub const CONFIG_EXTENSION: &str = "hcl";

/// A parsed configuration: its merged top-level body plus source texts
#[derive(Debug, Clone, Default)]
pub struct Document {
    sources: SourceMap,
    body: Body,
}

impl Document {
    /// Parse a single configuration text
    pub fn parse(filename: &str, source: &str) -> Result<Self, Diagnostics> {
        Self::parse_in(filename, source, None)
    }

    /// Parse a configuration text read from `dir`. Relative paths given to
    /// `file` and `templatefile` resolve against that directory.
    pub fn parse_in(filename: &str, source: &str, dir: Option<&Path>) -> Result<Self, Diagnostics> {
        let file = SourceFile::new(filename, source);

        let parsed = hcl::parse(source).map_err(|err| {
            Diagnostics::from(
                Diagnostic::error("Invalid configuration syntax", err.to_string())
                    .with_code(DiagnosticCode::Syntax)
                    .with_subject(Some(file.range(0..0))),
            )
        })?;

        let spans = match hcl_edit::parser::parse_body(source) {
            Ok(body) => Some(body),
            Err(err) => {
                debug!("no source spans for {filename}: {err}");
                None
            }
        };

        let dir = dir.map(|dir| dir.to_string_lossy().into_owned());
        let body = convert_body(parsed, spans.as_ref(), &file, dir.as_deref(), None);
        let mut sources = SourceMap::new();
        sources.add(file);
        Ok(Self { sources, body })
    }

    /// Load a configuration file, or every `*.hcl` file directly inside a
    /// directory in file name order.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Diagnostics> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Self::load_file(path);
        }

        let mut document = Self::default();
        let mut diags = Diagnostics::new();
        let mut found = 0usize;

        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    diags.push(read_error(&path.display().to_string(), err));
                    continue;
                }
            };
            let is_config = entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == CONFIG_EXTENSION);
            if !is_config {
                continue;
            }
            found += 1;
            match Self::load_file(entry.path()) {
                Ok(loaded) => document.merge(loaded),
                Err(errors) => diags.extend(errors),
            }
        }

        if found == 0 {
            diags.push(
                Diagnostic::error(
                    "No configuration files",
                    format!(
                        "The directory {} does not contain any *.{CONFIG_EXTENSION} file.",
                        path.display()
                    ),
                )
                .with_code(DiagnosticCode::Syntax),
            );
        }
        if diags.has_errors() {
            return Err(diags);
        }
        debug!("loaded {found} configuration file(s) from {}", path.display());
        Ok(document)
    }

    fn load_file(path: &Path) -> Result<Self, Diagnostics> {
        let filename = path.display().to_string();
        let source =
            std::fs::read_to_string(path).map_err(|err| Diagnostics::from(read_error(&filename, err)))?;
        Self::parse_in(&filename, &source, path.parent())
    }

    /// Append the other document's items after this one's
    pub fn merge(&mut self, other: Document) {
        for file in other.sources.files() {
            self.sources.add(file.clone());
        }
        for attr in other.body.attributes() {
            self.body.push_attribute(attr.clone());
        }
        for block in other.body.blocks() {
            self.body.push_block(block.clone());
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }
}

fn read_error(filename: &str, err: impl std::fmt::Display) -> Diagnostic {
    Diagnostic::error(
        "Failed to read configuration",
        format!("{filename}: {err}"),
    )
    .with_code(DiagnosticCode::Syntax)
}

fn convert_body(
    body: hcl::Body,
    spans: Option<&hcl_edit::structure::Body>,
    file: &SourceFile,
    dir: Option<&str>,
    missing_range: Option<SourceRange>,
) -> Body {
    let mut out = Body::new().with_missing_range(missing_range);
    let mut span_iter = spans.map(|b| b.iter());

    for structure in body {
        let spanned = span_iter.as_mut().and_then(|iter| iter.next());
        match structure {
            hcl::Structure::Attribute(attr) => {
                let spanned = spanned.and_then(|s| match s {
                    hcl_edit::structure::Structure::Attribute(attr) => Some(attr),
                    _ => None,
                });
                let range = spanned.and_then(|a| a.span()).map(|span| file.range(span));
                let expr_range = spanned
                    .and_then(|a| a.value.span())
                    .map(|span| file.range(span));
                let mut expr = attr.expr;
                if let Some(dir) = dir {
                    anchor_file_functions(&mut expr, dir);
                }
                out.push_attribute(Attribute::new(
                    attr.key.as_str(),
                    expr,
                    range,
                    expr_range,
                ));
            }
            hcl::Structure::Block(block) => {
                let spanned = spanned.and_then(|s| match s {
                    hcl_edit::structure::Structure::Block(block) => Some(block),
                    _ => None,
                });
                let header = spanned
                    .and_then(|b| b.span())
                    .map(|span| header_range(file, span));
                let labels = block
                    .labels
                    .iter()
                    .map(|label| label.as_str().to_owned())
                    .collect();
                let body = convert_body(
                    block.body,
                    spanned.map(|b| &b.body),
                    file,
                    dir,
                    header.clone(),
                );
                out.push_block(Block::new(block.identifier.as_str(), labels, body, header));
            }
        }
    }
    out
}

/// The header of a block runs from its type keyword up to the opening brace
fn header_range(file: &SourceFile, span: Range<usize>) -> SourceRange {
    let end = file
        .text()
        .get(span.clone())
        .and_then(|text| text.find('{').map(|brace| text[..brace].trim_end().len()))
        .map(|len| span.start + len)
        .unwrap_or(span.end);
    file.range(span.start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
query_runner "static" "default" {
	columns = ["id"]
}

query "users" {
  runner = query_runner.static.default
  rows   = [["1"]]
}

locals_note = "kept"
"#;

    #[test]
    fn test_parse_structures_in_order() {
        let doc = Document::parse("config.hcl", CONFIG).unwrap();
        let body = doc.body();
        assert_eq!(body.blocks().len(), 2);
        assert_eq!(body.attributes().len(), 1);

        let runner = &body.blocks()[0];
        assert_eq!(runner.kind(), "query_runner");
        assert_eq!(runner.labels(), ["static", "default"]);
        assert_eq!(runner.address(), r#"query_runner "static" "default""#);

        let query = &body.blocks()[1];
        assert_eq!(query.labels(), ["users"]);
        assert_eq!(query.body().attributes()[0].name(), "runner");
    }

    #[test]
    fn test_header_and_expression_ranges() {
        let doc = Document::parse("config.hcl", CONFIG).unwrap();
        let runner = &doc.body().blocks()[0];
        assert_eq!(
            runner.range().unwrap().to_string(),
            "config.hcl:2,1-32"
        );

        let query = &doc.body().blocks()[1];
        let attr = query.body().attribute("runner").unwrap();
        assert_eq!(attr.range().unwrap().start.line, 7);
        assert_eq!(attr.expr_range().unwrap().to_string(), "config.hcl:7,12-39");
        // missing attributes are reported at the header
        assert_eq!(query.body().missing_range(), query.range());
    }

    #[test]
    fn test_parse_syntax_error() {
        let diags = Document::parse("broken.hcl", "query \"x\" {\n  runner = \n").unwrap_err();
        assert!(diags.has_errors());
        assert_eq!(diags.codes(), vec![DiagnosticCode::Syntax]);
    }

    #[test]
    fn test_load_directory_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("b_queries.hcl"),
            "query \"second\" {\n  runner = query_runner.static.default\n}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("a_runners.hcl"),
            "query_runner \"static\" \"default\" {\n  columns = []\n}\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a config").unwrap();

        let doc = Document::load(dir.path()).unwrap();
        let kinds: Vec<_> = doc.body().blocks().iter().map(|b| b.kind()).collect();
        assert_eq!(kinds, vec!["query_runner", "query"]);
        assert_eq!(doc.sources().files().len(), 2);
    }

    #[test]
    fn test_file_functions_resolve_next_to_the_config() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sql")).unwrap();
        fs::write(dir.path().join("sql").join("users.sql"), "SELECT * FROM users").unwrap();
        fs::write(
            dir.path().join("queries.hcl"),
            "query \"users\" {\n  sql = file(\"sql/users.sql\")\n}\n",
        )
        .unwrap();

        let doc = Document::load(dir.path()).unwrap();
        let attr = doc.body().blocks()[0].body().attribute("sql").unwrap();
        let scope = crate::scope::EvalScope::with_stdlib();
        let value = crate::scope::eval_string(scope.context(), attr, "sql").unwrap();
        assert_eq!(value, "SELECT * FROM users");

        // parsed text has no directory and keeps the call as written
        let doc = Document::parse("inline.hcl", "sql = file(\"sql/users.sql\")\n").unwrap();
        let hcl::Expression::FuncCall(call) = doc.body().attributes()[0].expr() else {
            panic!("expected a function call");
        };
        assert_eq!(call.args.len(), 1);
    }

    #[test]
    fn test_load_empty_directory() {
        let dir = TempDir::new().unwrap();
        let diags = Document::load(dir.path()).unwrap_err();
        assert!(diags.to_string().contains("No configuration files"));
    }

    #[test]
    fn test_load_missing_file() {
        let diags = Document::load("/definitely/not/here.hcl").unwrap_err();
        assert!(diags.to_string().contains("Failed to read configuration"));
    }
}
