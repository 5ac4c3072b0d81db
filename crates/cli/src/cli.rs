use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use crate::commands::{list_command, load_queries, run_command};
use crate::params::Params;
use crate::utils::{default_config_dir, expand_home};

/// Run named, declarative queries described in HCL configuration
#[derive(Parser, Debug)]
#[command(name = "query-runner")]
#[command(version, about, long_about = None)]
#[command(after_help = "USAGE:\n    query-runner -l\n    query-runner [options] <query_name1> <query_name2> ...\n    cat params.json | query-runner [options]\n\nENVIRONMENT:\n    RUST_LOG=debug    Overrides --log-level")]
pub struct Cli {
    /// Config file or directory, config format is HCL [default: ~/.config/query-runner/]
    #[arg(short, long, env = "QUERY_RUNNER_CONFIG")]
    pub config: Option<String>,

    /// List the configured queries and exit
    #[arg(short, long, env = "QUERY_RUNNER_LIST")]
    pub list: bool,

    /// Output format
    #[arg(short, long, value_enum, env = "QUERY_RUNNER_OUTPUT", default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    /// Variables as a JSON object, exposed as `var`
    #[arg(short, long, env = "QUERY_RUNNER_VARIABLES")]
    pub variables: Option<String>,

    /// Log output level
    #[arg(long, env = "QUERY_RUNNER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Queries to run; read `{"queries": [...], "variables": {...}}` from stdin when empty
    pub queries: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One JSON object per row
    #[default]
    Json,
    Table,
    Markdown,
    Borderless,
    /// One block per row, like MySQL's `\G`
    Vertical,
}

impl Cli {
    /// Execute the command
    pub async fn execute(self) -> Result<()> {
        let queries = load_queries(&self.config_path()?)?;
        if self.list {
            return list_command(&queries);
        }

        let params = if self.queries.is_empty() {
            Params::from_reader(std::io::stdin().lock())?
                .or_variables(self.variables.as_deref())?
        } else {
            Params::new(self.queries).or_variables(self.variables.as_deref())?
        };
        run_command(&queries, params, self.output).await
    }

    fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(config) => Ok(expand_home(config)),
            None => default_config_dir()
                .context("Failed to locate the home directory, pass --config explicitly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "query-runner",
            "-c",
            "/etc/query-runner",
            "-o",
            "markdown",
            "-v",
            r#"{"region":"eu"}"#,
            "alb_logs",
            "errors",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/query-runner"));
        assert_eq!(cli.config_path().unwrap(), PathBuf::from("/etc/query-runner"));
        assert_eq!(cli.output, OutputFormat::Markdown);
        assert_eq!(cli.variables.as_deref(), Some(r#"{"region":"eu"}"#));
        assert_eq!(cli.queries, vec!["alb_logs", "errors"]);
        assert!(!cli.list);
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["query-runner", "-o", "yaml"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
