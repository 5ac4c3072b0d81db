//! `exec` runner: run a local program and read JSON lines from its stdout
//!
//! ```hcl
//! query_runner "exec" "local" {
//!   working_dir = "/var/log/app"
//!   env         = { TZ = "UTC" }
//!   timeout     = "5m"
//! }
//!
//! query "errors" {
//!   runner        = query_runner.exec.local
//!   command       = ["sh", "-c", "grep -h ERROR *.jsonl"]
//!   start_time    = now() - duration("1h")
//!   ignore_fields = ["@ptr"]
//! }
//! ```
//!
//! The program sees the query window as `QUERY_START_TIME` and
//! `QUERY_END_TIME` (epoch seconds) and the query name as `QUERY_NAME`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics};
use crate::document::{Attribute, Body};
use crate::error::{Error, Result};
use crate::job::{JobStatus, PollableJob, wait_for_completion};
use crate::query::{Outcome, PreparedQuery, QueryBase, QueryRunner};
use crate::registry::RunnerDefinition;
use crate::result::{QueryResult, RecordsBuilder};
use crate::scope::{
    EvalScope, Functions, Variables, eval_non_empty_string_list, eval_number, eval_string,
    eval_string_list, parse_duration, parse_expression,
};
use crate::waiter::WaiterConfig;

pub const TYPE_NAME: &str = "exec";

/// Used when the runner block does not set `timeout`
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const DEFAULT_START_TIME: &str = r#"now() - duration("15m")"#;
const DEFAULT_END_TIME: &str = "now()";

pub fn definition() -> RunnerDefinition {
    RunnerDefinition::new(TYPE_NAME, build)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecConfig {
    #[serde(default)]
    working_dir: Option<PathBuf>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    timeout: Option<String>,
}

fn build(name: &str, body: &Body, scope: &EvalScope) -> Outcome<Arc<dyn QueryRunner>> {
    let config = match body.decode::<ExecConfig>(scope) {
        Ok(config) => config,
        Err(diags) => return Outcome::failed(diags),
    };
    let timeout = match config.timeout.as_deref().map(parse_duration) {
        None => DEFAULT_TIMEOUT,
        Some(Ok(timeout)) => timeout,
        Some(Err(detail)) => {
            return Outcome::failed(
                Diagnostic::error("Invalid timeout", detail)
                    .with_code(DiagnosticCode::InvalidAttribute)
                    .with_subject(
                        body.attribute("timeout")
                            .and_then(Attribute::expr_range)
                            .cloned(),
                    ),
            );
        }
    };

    Outcome::ok(Arc::new(ExecRunner {
        name: name.to_owned(),
        working_dir: config.working_dir,
        env: config.env,
        waiter: WaiterConfig {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            timeout,
            jitter: Duration::from_millis(50),
        },
    }) as Arc<dyn QueryRunner>)
}

#[derive(Debug, Clone)]
pub struct ExecRunner {
    name: String,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    waiter: WaiterConfig,
}

impl QueryRunner for ExecRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn runner_type(&self) -> &str {
        TYPE_NAME
    }

    fn prepare(&self, base: QueryBase) -> Outcome<Arc<dyn PreparedQuery>> {
        let remain = base.remain();
        let mut diags = remain.check_supported(&[
            "command",
            "stdin",
            "start_time",
            "end_time",
            "ignore_fields",
        ]);

        let command = match remain.require_attribute("command") {
            Ok(attr) => Some(attr.clone()),
            Err(missing) => {
                diags.push(missing);
                None
            }
        };
        let start_time = time_attribute(remain, "start_time", DEFAULT_START_TIME, &mut diags);
        let end_time = time_attribute(remain, "end_time", DEFAULT_END_TIME, &mut diags);

        let ignore_fields = match remain.attribute("ignore_fields") {
            Some(attr) => eval_string_list(base.scope().context(), attr, "ignore_fields")
                .unwrap_or_else(|errors| {
                    diags.extend(errors);
                    Vec::new()
                }),
            None => Vec::new(),
        };

        let (Some(command), Some(start_time), Some(end_time)) = (command, start_time, end_time)
        else {
            return Outcome::failed(diags);
        };
        if diags.has_errors() {
            return Outcome::failed(diags);
        }

        let stdin = remain.attribute("stdin").cloned();
        debug!(query = base.name(), runner = %self.name, "prepared exec query");
        Outcome::new(
            Some(Arc::new(ExecQuery {
                base,
                runner: self.clone(),
                command,
                stdin,
                start_time,
                end_time,
                ignore_fields,
            }) as Arc<dyn PreparedQuery>),
            diags,
        )
    }
}

/// The attribute if present, otherwise the fallback expression
fn time_attribute(
    body: &Body,
    name: &str,
    fallback: &str,
    diags: &mut Diagnostics,
) -> Option<Attribute> {
    if let Some(attr) = body.attribute(name) {
        return Some(attr.clone());
    }
    match parse_expression(fallback, &format!("default_{name}.hcl")) {
        Ok(expr) => Some(Attribute::synthetic(name, expr)),
        Err(errors) => {
            diags.extend(errors);
            None
        }
    }
}

#[derive(Debug)]
pub struct ExecQuery {
    base: QueryBase,
    runner: ExecRunner,
    command: Attribute,
    stdin: Option<Attribute>,
    start_time: Attribute,
    end_time: Attribute,
    ignore_fields: Vec<String>,
}

/// One evaluated invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ExecCommand {
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
}

impl ExecCommand {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            working_dir: None,
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_stdin(mut self, input: String) -> Self {
        self.stdin = Some(input);
        self
    }

    /// The command line as a user would type it
    pub fn to_shell_command(&self) -> String {
        let mut cmd = String::new();
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                cmd.push(' ');
            }
            if arg.is_empty() || arg.contains([' ', '\'', '"', '*', '$']) {
                cmd.push_str(&format!("'{}'", arg.replace('\'', r"'\''")));
            } else {
                cmd.push_str(arg);
            }
        }
        cmd
    }

    fn spawn(&self) -> Result<Child> {
        let (program, args) = self
            .args
            .split_first()
            .ok_or_else(|| Error::backend("no command specified"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.spawn()
            .map_err(|err| Error::backend(format!("failed to spawn `{program}`: {err}")))
    }
}

fn read_to_end<R>(mut reader: R) -> PipeReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

/// Output of one pipe, read in the background
type PipeReader = JoinHandle<std::io::Result<Vec<u8>>>;

/// Deadline and cancellation shared by everything one run waits on
#[derive(Debug, Clone)]
struct RunBudget {
    label: String,
    started: Instant,
    deadline: Instant,
    cancel: CancellationToken,
}

impl RunBudget {
    /// Wait for a pipe to close. A program can leave a background process
    /// holding the pipe open, so the read is bounded like the process.
    async fn drain(&self, reader: &mut PipeReader) -> Result<Vec<u8>> {
        let drained = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            joined = tokio::time::timeout_at(self.deadline, &mut *reader) => match joined {
                Ok(Ok(read)) => read.map_err(Error::from),
                Ok(Err(err)) => Err(Error::backend(format!("{}: reading output: {err}", self.label))),
                Err(_) => Err(Error::Timeout {
                    operation: self.label.clone(),
                    elapsed: self.started.elapsed(),
                }),
            },
        };
        if drained.is_err() {
            reader.abort();
        }
        drained
    }
}

/// A running child process seen as a pollable job
struct ProcessJob {
    child: Child,
    stderr: Option<PipeReader>,
    status: Option<ExitStatus>,
    budget: RunBudget,
}

#[async_trait]
impl PollableJob for ProcessJob {
    async fn poll(&mut self) -> Result<JobStatus> {
        let Some(status) = self.child.try_wait()? else {
            return Ok(JobStatus::Running);
        };
        self.status = Some(status);
        if status.success() {
            return Ok(JobStatus::Finished);
        }
        let stderr = match self.stderr.take() {
            Some(mut reader) => self.budget.drain(&mut reader).await?,
            None => Vec::new(),
        };
        Ok(JobStatus::Failed(format!(
            "{status}: {}",
            String::from_utf8_lossy(&stderr).trim()
        )))
    }

    async fn cancel(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}

impl Drop for ProcessJob {
    fn drop(&mut self) {
        if let Some(reader) = self.stderr.take() {
            reader.abort();
        }
    }
}

impl ExecQuery {
    fn evaluate(&self, variables: &Variables, functions: &Functions) -> Result<ExecCommand> {
        let ctx = self.base.eval_context(variables, functions);
        let args = eval_non_empty_string_list(&ctx, &self.command, "command")?;
        let start_time = eval_number(&ctx, &self.start_time, "start_time")?;
        let end_time = eval_number(&ctx, &self.end_time, "end_time")?;
        let stdin = self
            .stdin
            .as_ref()
            .map(|attr| eval_string(&ctx, attr, "stdin"))
            .transpose()?;

        let mut command = ExecCommand::new(args);
        if let Some(dir) = &self.runner.working_dir {
            command = command.with_working_dir(dir.clone());
        }
        for (key, value) in &self.runner.env {
            command = command.with_env(key, value);
        }
        command = command
            .with_env("QUERY_NAME", self.name())
            .with_env("QUERY_START_TIME", format_epoch(start_time))
            .with_env("QUERY_END_TIME", format_epoch(end_time));
        if let Some(input) = stdin {
            command = command.with_stdin(input);
        }
        Ok(command)
    }
}

fn format_epoch(seconds: f64) -> String {
    format!("{}", seconds.floor() as i64)
}

#[async_trait]
impl PreparedQuery for ExecQuery {
    fn base(&self) -> &QueryBase {
        &self.base
    }

    async fn run(
        &self,
        ctx: &RunContext,
        variables: &Variables,
        functions: &Functions,
    ) -> Result<QueryResult> {
        let command = self.evaluate(variables, functions)?;
        let shell_command = command.to_shell_command();
        info!(
            request_id = ctx.request_id(),
            query = self.name(),
            "exec: {shell_command}"
        );

        let started = Instant::now();
        let budget = RunBudget {
            label: format!("exec query `{}`", self.name()),
            started,
            deadline: started + self.runner.waiter.timeout,
            cancel: ctx.cancellation().clone(),
        };

        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (command.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(err) = pipe.write_all(input.as_bytes()).await {
                    warn!("failed to write stdin: {err}");
                }
            });
        }
        let mut stdout = child
            .stdout
            .take()
            .map(read_to_end)
            .ok_or_else(|| Error::backend("stdout is not captured"))?;
        let stderr = child.stderr.take().map(read_to_end);

        let mut job = ProcessJob {
            child,
            stderr,
            status: None,
            budget: budget.clone(),
        };
        if let Err(err) = wait_for_completion(&mut job, ctx, self.runner.waiter, &budget.label).await {
            stdout.abort();
            return Err(err);
        }
        debug!(
            request_id = ctx.request_id(),
            query = self.name(),
            status = ?job.status,
            "process exited"
        );

        let output = match budget.drain(&mut stdout).await {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    request_id = ctx.request_id(),
                    query = self.name(),
                    "stdout stayed open after the process exited: {err}"
                );
                if let Err(kill_err) = job.cancel().await {
                    debug!("kill after exit: {kill_err}");
                }
                return Err(err);
            }
        };
        let mut builder =
            RecordsBuilder::new(self.name(), shell_command).ignore_fields(self.ignore_fields.iter().cloned());
        for line in output.split(|b| *b == b'\n') {
            builder.push_json_line(line);
        }
        Ok(builder.finish())
    }
}
