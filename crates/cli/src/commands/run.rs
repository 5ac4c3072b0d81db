use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use queryrunner_core::scope::parse_expression;
use queryrunner_core::{ErrorKind, Functions, PreparedQueries, RunContext, run_batch};
use tracing::{debug, info, warn};

use crate::cli::OutputFormat;
use crate::display::format_result;
use crate::params::Params;

pub async fn run_command(
    queries: &PreparedQueries,
    params: Params,
    format: OutputFormat,
) -> Result<()> {
    // Unknown names fail before anything runs
    let names = query_names(queries, &params.queries)?;
    let selected = queries.select(names.as_slice())?;
    let variables = Arc::new(params.variables()?);
    debug!("Running {} queries", selected.len());

    let ctx = RunContext::new().with_request_id(format!("{}", std::process::id()));
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling queries");
            canceller.cancel();
        }
    });

    let results = run_batch(&selected, &ctx, variables, Arc::new(Functions::new()))
        .await
        .map_err(|err| {
            let context = failure_context(err.kind());
            anyhow::Error::new(err).context(context)
        })?;
    info!("Finished {} queries", results.len());

    for result in &results {
        print!("{}", format_result(result, format));
    }
    Ok(())
}

/// Names as given, with `query.<name>` references resolved against the config
fn query_names(queries: &PreparedQueries, requested: &[String]) -> Result<Vec<String>> {
    requested
        .iter()
        .map(|requested| {
            if !requested.starts_with("query.") {
                return Ok(requested.clone());
            }
            let expr = parse_expression(requested, "<arguments>").map_err(|diags| anyhow!("{diags}"))?;
            let query = queries
                .get_by_reference(&expr)
                .with_context(|| format!("Invalid query reference `{requested}`"))?;
            Ok(query.name().to_owned())
        })
        .collect()
}

fn failure_context(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Cancellation => "Interrupted while running queries",
        ErrorKind::Timeout => "Timed out while running queries",
        ErrorKind::Configuration | ErrorKind::Validation | ErrorKind::Backend => {
            "Failed to run queries"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::load_queries;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PreparedQueries) {
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
        (dir, queries)
    }

    #[test]
    fn test_query_names_accept_references() {
        let (_dir, queries) = fixture();
        let names = query_names(&queries, &["ids".into(), "query.ids".into()]).unwrap();
        assert_eq!(names, vec!["ids", "ids"]);

        let err = query_names(&queries, &["query.ghost".into()]).unwrap_err();
        assert!(format!("{err:#}").contains("ghost is not found"), "{err:#}");
    }

    #[test]
    fn test_failure_context_by_kind() {
        assert_eq!(
            failure_context(ErrorKind::Cancellation),
            "Interrupted while running queries"
        );
        assert_eq!(
            failure_context(ErrorKind::Timeout),
            "Timed out while running queries"
        );
        assert_eq!(failure_context(ErrorKind::Backend), "Failed to run queries");
    }
}
