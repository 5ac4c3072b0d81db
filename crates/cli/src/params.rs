use std::io::Read;

use anyhow::{Context, Result};
use queryrunner_core::Variables;
use queryrunner_core::scope::variables_from_json;
use serde::Deserialize;

/// What to run: query names plus the `var` payload
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Params {
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
}

impl Params {
    pub fn new(queries: Vec<String>) -> Self {
        Self {
            queries,
            variables: None,
        }
    }

    /// Decode params from a JSON document, e.g. stdin
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut input = String::new();
        reader
            .read_to_string(&mut input)
            .context("Failed to read params from stdin")?;
        serde_json::from_str(&input).context("Failed to decode params JSON")
    }

    /// Use the `--variables` payload unless the params already carry variables
    pub fn or_variables(mut self, variables: Option<&str>) -> Result<Self> {
        if self.variables.is_none() {
            if let Some(raw) = variables.filter(|raw| !raw.trim().is_empty()) {
                let value = serde_json::from_str(raw).context("Failed to decode --variables JSON")?;
                self.variables = Some(value);
            }
        }
        Ok(self)
    }

    /// Variables for evaluation, with `var` null when nothing was given
    pub fn variables(&self) -> Result<Variables> {
        let payload = self.variables.as_ref().map(ToString::to_string);
        variables_from_json(payload.as_deref()).context("Failed to convert variables")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_reader() {
        let params =
            Params::from_reader(r#"{"queries": ["a", "b"], "variables": {"x": 1}}"#.as_bytes())
                .unwrap();
        assert_eq!(params.queries, vec!["a", "b"]);
        assert_eq!(params.variables, Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn test_stdin_variables_win() {
        let params = Params::from_reader(r#"{"queries": ["a"], "variables": {"x": 1}}"#.as_bytes())
            .unwrap()
            .or_variables(Some(r#"{"x": 2}"#))
            .unwrap();
        assert_eq!(params.variables, Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn test_flag_variables_fill_in() {
        let params = Params::new(vec!["a".into()])
            .or_variables(Some(r#"{"x": 2}"#))
            .unwrap();
        let vars = params.variables().unwrap();
        let var = vars["var"].as_object().unwrap();
        assert_eq!(var["x"].as_number().and_then(|n| n.as_i64()), Some(2));
    }

    #[test]
    fn test_missing_variables_are_null() {
        let vars = Params::new(vec![]).variables().unwrap();
        assert_eq!(vars["var"], hcl::Value::Null);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(Params::from_reader("not json".as_bytes()).is_err());
        assert!(Params::default().or_variables(Some("{")).is_err());
    }
}
