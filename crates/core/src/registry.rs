//! Runner registry
//!
//! Maps a runner type name (the first label of a `query_runner` block) to
//! the factory that builds runner instances of that type.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::diagnostics::{Diagnostic, DiagnosticCode, SourceRange};
use crate::document::Body;
use crate::query::{Outcome, QueryRunner};
use crate::runners;
use crate::scope::EvalScope;

/// Largest edit distance for which an unknown type gets a suggestion
const SUGGESTION_DISTANCE: usize = 2;

/// Builds a runner from its name, its block body and the base scope
pub type RunnerFactory =
    Arc<dyn Fn(&str, &Body, &EvalScope) -> Outcome<Arc<dyn QueryRunner>> + Send + Sync>;

/// One adapter type
#[derive(Clone)]
pub struct RunnerDefinition {
    pub type_name: String,
    pub factory: Option<RunnerFactory>,
}

impl RunnerDefinition {
    pub fn new<F>(type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str, &Body, &EvalScope) -> Outcome<Arc<dyn QueryRunner>> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            factory: Some(Arc::new(factory)),
        }
    }
}

impl fmt::Debug for RunnerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerDefinition")
            .field("type_name", &self.type_name)
            .field("factory", &self.factory.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid runner definition: {0}")]
    InvalidDefinition(String),

    #[error("{}", unknown_type_message(.requested, .suggestion.as_deref()))]
    UnknownType {
        requested: String,
        suggestion: Option<String>,
    },
}

fn unknown_type_message(requested: &str, suggestion: Option<&str>) -> String {
    match suggestion {
        Some(suggestion) => format!(
            "The query runner type \"{requested}\" is invalid. Did you mean \"{suggestion}\"?"
        ),
        None => format!(
            "The query runner type \"{requested}\" is invalid. maybe not implemented or typo"
        ),
    }
}

/// Registered runner types, ordered by name
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    definitions: BTreeMap<String, RunnerDefinition>,
}

impl fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

impl RunnerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `static` and `exec` runners
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for definition in runners::builtin() {
            registry.insert(definition);
        }
        registry
    }

    /// Register a runner type, replacing any earlier one with the same name
    pub fn register(&mut self, definition: RunnerDefinition) -> Result<(), RegistryError> {
        if definition.type_name.is_empty() {
            return Err(RegistryError::InvalidDefinition(
                "type name is empty".to_owned(),
            ));
        }
        if definition.factory.is_none() {
            return Err(RegistryError::InvalidDefinition(format!(
                "runner type \"{}\" has no factory",
                definition.type_name
            )));
        }
        self.insert(definition);
        Ok(())
    }

    fn insert(&mut self, definition: RunnerDefinition) {
        let type_name = definition.type_name.clone();
        if self.definitions.insert(type_name.clone(), definition).is_some() {
            warn!("query runner type \"{type_name}\" registered twice, the last one wins");
        }
    }

    pub fn resolve(&self, type_name: &str) -> Result<&RunnerDefinition, RegistryError> {
        self.definitions
            .get(type_name)
            .ok_or_else(|| RegistryError::UnknownType {
                requested: type_name.to_owned(),
                suggestion: self.suggest(type_name),
            })
    }

    /// Closest registered name within the suggestion distance
    fn suggest(&self, type_name: &str) -> Option<String> {
        self.definitions
            .keys()
            .map(|candidate| (levenshtein_distance(type_name, candidate), candidate))
            .filter(|(distance, _)| *distance <= SUGGESTION_DISTANCE)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| candidate.clone())
    }

    /// Build a runner instance for a `query_runner "<type>" "<name>"` block
    pub fn build(
        &self,
        runner_type: &str,
        name: &str,
        body: &Body,
        scope: &EvalScope,
        subject: Option<&SourceRange>,
    ) -> Outcome<Arc<dyn QueryRunner>> {
        let factory = match self.resolve(runner_type) {
            Ok(RunnerDefinition {
                factory: Some(factory),
                ..
            }) => factory,
            Ok(_) => {
                return Outcome::failed(
                    Diagnostic::error(
                        "Invalid query_runner type",
                        format!("The query runner type \"{runner_type}\" has no factory"),
                    )
                    .with_code(DiagnosticCode::UnknownRunnerType)
                    .with_subject(subject.cloned()),
                );
            }
            Err(err) => {
                return Outcome::failed(
                    Diagnostic::error("Invalid query_runner type", err.to_string())
                        .with_code(DiagnosticCode::UnknownRunnerType)
                        .with_subject(subject.cloned()),
                );
            }
        };
        debug!(runner_type, name, "building query runner");
        factory(name, body, scope)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.definitions.contains_key(type_name)
    }

    /// All registered type names in sorted order
    pub fn type_names(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }
}

/// Builder for registries with a custom set of runner types
#[derive(Debug, Default)]
pub struct RunnerRegistryBuilder {
    definitions: Vec<RunnerDefinition>,
}

impl RunnerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(mut self, definition: RunnerDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Add the built-in runner types
    pub fn with_builtin(mut self) -> Self {
        self.definitions.extend(runners::builtin());
        self
    }

    /// Build the registry, rejecting the first invalid definition
    pub fn build(self) -> Result<RunnerRegistry, RegistryError> {
        let mut registry = RunnerRegistry::new();
        for definition in self.definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }
}

/// Edit distance between two strings, by bytes
fn levenshtein_distance(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }
    let (short, long) = if a.len() <= b.len() {
        (a.as_bytes(), b.as_bytes())
    } else {
        (b.as_bytes(), a.as_bytes())
    };
    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0usize; short.len() + 1];
    for (i, &lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &sc) in short.iter().enumerate() {
            let cost = usize::from(sc != lc);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}
