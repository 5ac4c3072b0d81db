//! Built-in runner adapters

pub mod exec;
pub mod static_rows;

use crate::registry::RunnerDefinition;

/// Definitions of every built-in runner type
pub fn builtin() -> Vec<RunnerDefinition> {
    vec![static_rows::definition(), exec::definition()]
}
