//! query-runner core - Declarative named queries against external data services
//!
//! This crate provides functionality to:
//! - Load HCL configuration declaring `query_runner` and `query` blocks
//! - Resolve runner references through a registry of runner types
//! - Run prepared queries concurrently and normalize their results
pub mod batch;
pub mod context;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod job;
pub mod query;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod result;
pub mod runners;
pub mod scope;
pub mod waiter;

// Re-export commonly used types and traits
pub use error::{Error, ErrorKind, Result};

// Re-export main API components
pub use batch::run_batch;
pub use context::RunContext;
pub use diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Severity, SourceMap, SourceRange};
pub use document::{Attribute, Block, Body, Document};
pub use job::{JobStatus, PollableJob, wait_for_completion};
pub use query::{Outcome, PreparedQueries, PreparedQuery, QueryBase, QueryRunner, QueryRunners};
pub use reference::{QueryRef, RunnerRef, RunnerRefError};
pub use registry::{RegistryError, RunnerDefinition, RunnerRegistry, RunnerRegistryBuilder};
pub use resolver::{ConfigResolver, Resolution};
pub use result::{Cell, QueryResult, QueryResults, RecordsBuilder};
pub use scope::{EvalScope, Functions, Variables};
pub use waiter::{WaitState, Waiter, WaiterConfig};
