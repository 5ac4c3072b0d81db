//! Located diagnostics
//!
//! Resolution and evaluation never stop at the first problem. Every error or
//! warning is recorded as a [`Diagnostic`] and returned in bulk so a user sees
//! every problem of a configuration in one pass.

use std::fmt::{self, Write as _};
use std::ops::Range;
use std::sync::Arc;

/// Severity of a diagnostic. Only errors block execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("Error"),
            Severity::Warning => f.write_str("Warning"),
        }
    }
}

/// Machine-readable classification of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    Syntax,
    DuplicateRunner,
    DuplicateQuery,
    UnknownRunnerType,
    InvalidRunnerReference,
    RunnerNotFound,
    MissingAttribute,
    UnsupportedAttribute,
    InvalidAttribute,
    InvalidValue,
}

/// A 1-based line/column position plus the 0-based byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

/// A span of source text inside one configuration file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRange {
    pub filename: Arc<str>,
    pub start: SourcePos,
    pub end: SourcePos,
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(
                f,
                "{}:{},{}-{}",
                self.filename, self.start.line, self.start.column, self.end.column
            )
        } else {
            write!(
                f,
                "{}:{},{}-{},{}",
                self.filename, self.start.line, self.start.column, self.end.line, self.end.column
            )
        }
    }
}

/// Source text of one configuration file with a line index
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: Arc<str>,
    text: Arc<str>,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            name: name.into(),
            text,
            line_starts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Position of a byte offset, clamped to the end of the file
    pub fn pos(&self, byte: usize) -> SourcePos {
        let byte = byte.min(self.text.len());
        let line_idx = self.line_starts.partition_point(|&start| start <= byte) - 1;
        let line_start = self.line_starts[line_idx];
        let column = self
            .text
            .get(line_start..byte)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(byte - line_start)
            + 1;
        SourcePos {
            line: line_idx + 1,
            column,
            byte,
        }
    }

    pub fn range(&self, span: Range<usize>) -> SourceRange {
        SourceRange {
            filename: self.name.clone(),
            start: self.pos(span.start),
            end: self.pos(span.end),
        }
    }

    /// Text of a 1-based line without its line terminator
    pub fn line(&self, line: usize) -> Option<&str> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(self.text.len());
        self.text
            .get(start..end)
            .map(|l| l.trim_end_matches(['\n', '\r']))
    }
}

/// All files a document was loaded from, used to render source snippets
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: SourceFile) {
        self.files.push(file);
    }

    pub fn get(&self, name: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.name() == name)
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }
}

/// A structured, located error or warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<DiagnosticCode>,
    pub summary: String,
    pub detail: String,
    pub subject: Option<SourceRange>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: None,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(summary, detail)
        }
    }

    pub fn with_code(mut self, code: DiagnosticCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_subject(mut self, subject: Option<SourceRange>) -> Self {
        self.subject = subject;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(subject) = &self.subject {
            write!(f, "{subject}: ")?;
        }
        if self.detail.is_empty() {
            f.write_str(&self.summary)
        } else {
            write!(f, "{}; {}", self.summary, self.detail)
        }
    }
}

/// Ordered list of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.0.extend(other);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn codes(&self) -> Vec<DiagnosticCode> {
        self.0.iter().filter_map(|d| d.code).collect()
    }

    /// Render every diagnostic as human-readable text with source snippets
    pub fn render(&self, sources: &SourceMap) -> String {
        let mut out = String::new();
        for (i, diag) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "{}: {}", diag.severity, diag.summary);
            if let Some(subject) = &diag.subject {
                let _ = writeln!(
                    out,
                    "\n  on {} line {}:",
                    subject.filename, subject.start.line
                );
                if let Some(line) = sources
                    .get(&subject.filename)
                    .and_then(|file| file.line(subject.start.line))
                {
                    let _ = writeln!(out, "{:>4}: {}", subject.start.line, line);
                }
            }
            if !diag.detail.is_empty() {
                let _ = writeln!(out, "\n{}", diag.detail);
            }
        }
        out
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("no diagnostics"),
            [only] => write!(f, "{only}"),
            [first, rest @ ..] => write!(f, "{first}, and {} other diagnostic(s)", rest.len()),
        }
    }
}

impl std::error::Error for Diagnostics {}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
