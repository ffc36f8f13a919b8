use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::algebra::{Factor, FactorRow};
use crate::model::Model;
use crate::types::{Assignment, Error, Result};

#[derive(Deserialize)]
struct WireDocument {
    graph: WireGraph,
}

#[derive(Deserialize)]
struct WireGraph {
    factors: Vec<WireFactor>,
}

#[derive(Deserialize)]
struct WireFactor {
    name: String,
    #[serde(rename = "groundVariables")]
    ground_variables: Vec<serde_json::Map<String, Value>>,
}

/// Reads a model from a JSON file in the wire format `{ "graph": { "factors": [...] } }`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read, [`Error::Json`] if its
/// contents are not valid JSON or do not match the wire shape, and
/// [`Error::MalformedFactor`] if a row's `value` field is missing,
/// non-numeric, or negative, or if a factor's rows disagree on their key set
/// once `value` is excluded.
pub fn read_model(path: impl AsRef<Path>) -> Result<Model> {
    let text = fs::read_to_string(path)?;
    parse_model(&text)
}

/// Parses a model from a JSON string in the wire format. See [`read_model`]
/// for the error conditions.
pub fn parse_model(json: &str) -> Result<Model> {
    let document: WireDocument = serde_json::from_str(json)?;

    let mut factors = Vec::with_capacity(document.graph.factors.len());
    for wire_factor in document.graph.factors {
        let rows = wire_factor
            .ground_variables
            .into_iter()
            .map(|row| parse_row(&wire_factor.name, row))
            .collect::<Result<Vec<_>>>()?;
        let factor = Factor::with_name(wire_factor.name.clone(), rows)?;
        factors.push((wire_factor.name, factor));
    }

    Model::new(factors)
}

fn parse_row(factor_name: &str, mut row: serde_json::Map<String, Value>) -> Result<FactorRow> {
    let value = row.remove("value").ok_or_else(|| {
        Error::MalformedFactor(factor_name.to_string(), "row is missing a `value` field".into())
    })?;
    let weight = value.as_f64().ok_or_else(|| {
        Error::MalformedFactor(factor_name.to_string(), "row `value` is not numeric".into())
    })?;
    if weight < 0.0 {
        return Err(Error::MalformedFactor(
            factor_name.to_string(),
            "row `value` is negative".into(),
        ));
    }

    let mut assignment = Assignment::default();
    for (var, state) in row {
        let state = state.as_u64().ok_or_else(|| {
            Error::MalformedFactor(
                factor_name.to_string(),
                format!("variable `{var}`'s state is not a non-negative integer"),
            )
        })?;
        assignment.insert(var, state as usize);
    }

    Ok(FactorRow::new(assignment, weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s7_parses_the_two_variable_chain() {
        let json = r#"{
            "graph": {
                "factors": [
                    { "name": "A", "groundVariables": [
                        { "A": 0, "value": 0.6 },
                        { "A": 1, "value": 0.4 }
                    ] },
                    { "name": "B", "groundVariables": [
                        { "A": 0, "B": 0, "value": 0.9 },
                        { "A": 0, "B": 1, "value": 0.1 },
                        { "A": 1, "B": 0, "value": 0.2 },
                        { "A": 1, "B": 1, "value": 0.8 }
                    ] }
                ]
            }
        }"#;

        let model = parse_model(json).unwrap();
        assert!(model.has_variable("A"));
        assert!(model.has_variable("B"));
        assert_eq!(model.factors().len(), 2);
    }

    #[test]
    fn rejects_row_missing_value() {
        let json = r#"{"graph":{"factors":[{"name":"A","groundVariables":[{"A":0}]}]}}"#;
        assert!(matches!(parse_model(json), Err(Error::MalformedFactor(_, _))));
    }

    #[test]
    fn rejects_negative_value() {
        let json = r#"{"graph":{"factors":[{"name":"A","groundVariables":[{"A":0,"value":-1.0}]}]}}"#;
        assert!(matches!(parse_model(json), Err(Error::MalformedFactor(_, _))));
    }

    #[test]
    fn rejects_inconsistent_row_keys() {
        let json = r#"{"graph":{"factors":[{"name":"A","groundVariables":[
            {"A":0,"value":0.5},
            {"A":1,"B":0,"value":0.5}
        ]}]}}"#;
        assert!(matches!(parse_model(json), Err(Error::MalformedFactor(_, _))));
    }
}
