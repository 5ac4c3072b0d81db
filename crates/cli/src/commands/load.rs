use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use queryrunner_core::{ConfigResolver, Document, EvalScope, PreparedQueries, RunnerRegistry};
use tracing::{debug, warn};

/// Load and resolve the configuration at `path`, a file or a directory.
///
/// Warnings are printed to stderr; any error aborts before a query runs.
pub fn load_queries(path: &Path) -> Result<PreparedQueries> {
    debug!("Loading configuration from {}", path.display());

    let document = match Document::load(path) {
        Ok(document) => document,
        Err(diags) => {
            eprint!("{}", diags.render(&Default::default()));
            bail!("Failed to load configuration from {}", path.display());
        }
    };

    let registry = RunnerRegistry::with_builtin();
    let scope = Arc::new(EvalScope::with_stdlib());
    let resolution = ConfigResolver::new(&registry, &scope).resolve(&document);

    if !resolution.diagnostics.is_empty() {
        eprint!("{}", resolution.diagnostics.render(document.sources()));
    }
    if resolution.has_errors() {
        bail!(
            "Configuration in {} is invalid: {} problem(s)",
            path.display(),
            resolution.diagnostics.errors().count()
        );
    }
    for block in resolution.remain.blocks() {
        warn!("Ignoring unknown block `{}`", block.address());
    }
    for attr in resolution.remain.attributes() {
        warn!("Ignoring unknown attribute `{}`", attr.name());
    }

    debug!("Resolved {} queries", resolution.queries.len());
    Ok(resolution.queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("queries.hcl"),
            r#"
query_runner "static" "fixture" {
  columns = ["id"]
}
query "ids" {
  runner = query_runner.static.fixture
  rows   = [["1"]]
}
"#,
        )
        .unwrap();
        let queries = load_queries(dir.path()).unwrap();
        assert!(queries.get("ids").is_some());
    }

    #[test]
    fn test_invalid_configuration_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("queries.hcl"),
            "query \"ids\" {\n  rows = []\n}\n",
        )
        .unwrap();
        let err = load_queries(dir.path()).unwrap_err();
        assert!(err.to_string().contains("is invalid: 1 problem(s)"));
    }

    #[test]
    fn test_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.hcl");
        assert!(load_queries(&missing).is_err());
    }
}
