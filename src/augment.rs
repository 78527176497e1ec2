use crate::definitions::{DefinitionGroup, MetricType, RegisterDefinition};
use std::collections::BTreeMap;

/// A register value after it has been interpreted according to its [`MetricType`].
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Boolean(bool),
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => f.write_fmt(format_args!("{}", n)),
            Value::Boolean(b) => f.write_fmt(format_args!("{}", b)),
            Value::Text(t) => f.write_str(t),
        }
    }
}

/// One `{id, value}` record as returned by the MyUpway values endpoint.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct RawValue {
    #[serde(alias = "VariableId")]
    pub id: u32,
    #[serde(alias = "CurrentValue")]
    pub value: serde_json::Value,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CoerceError {
    #[error("`{0}` is not a number")]
    NotNumeric(String),
    #[error("`{0}` is neither `{1}` nor `{2}`")]
    NotBoolean(String, &'static str, &'static str),
    #[error("JSON value {0} cannot represent a {1} reading")]
    UnsupportedJson(serde_json::Value, MetricType),
}

/// A register definition together with its current value, if the service reported one.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Reading<'a> {
    #[serde(flatten)]
    pub definition: &'a RegisterDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct AugmentedGroup<'a> {
    pub name: &'a str,
    pub readings: Vec<Reading<'a>>,
}

/// Merge the fetched `values` into the definitions of `group`.
///
/// Every definition of the group is present in the output, in declaration order. Definitions the
/// service did not report, or reported with a value that could not be interpreted, have no value.
/// Values for IDs the group does not define are ignored. If an ID is reported more than once, the
/// first occurrence is used.
pub fn augment<'a>(group: &'a DefinitionGroup, values: &[RawValue]) -> AugmentedGroup<'a> {
    let mut by_id = BTreeMap::new();
    for raw in values {
        if group.get(raw.id).is_none() {
            tracing::trace!(group = group.name, id = raw.id, "ignoring value for unknown register");
            continue;
        }
        by_id.entry(raw.id).or_insert(&raw.value);
    }
    let readings = group
        .definitions
        .iter()
        .map(|definition| {
            let value = by_id.get(&definition.id).and_then(|raw| match coerce(definition, raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(
                        group = group.name,
                        register = definition.id,
                        error = (&e as &dyn std::error::Error),
                        "skipping malformed register value"
                    );
                    None
                }
            });
            Reading { definition, value }
        })
        .collect();
    AugmentedGroup { name: group.name, readings }
}

pub fn coerce(
    definition: &RegisterDefinition,
    raw: &serde_json::Value,
) -> Result<Value, CoerceError> {
    let kind = definition.kind;
    match (raw, kind.boolean_tokens()) {
        (serde_json::Value::Bool(b), Some(_)) => Ok(Value::Boolean(*b)),
        (serde_json::Value::Number(n), Some((truthy, falsy))) => match n.as_f64() {
            Some(n) if n == 1.0 => Ok(Value::Boolean(true)),
            Some(n) if n == 0.0 => Ok(Value::Boolean(false)),
            _ => Err(CoerceError::NotBoolean(n.to_string(), truthy, falsy)),
        },
        (serde_json::Value::String(s), Some((truthy, falsy))) => {
            parse_boolean(s, truthy, falsy).map(Value::Boolean)
        }
        (serde_json::Value::Number(n), None) => n
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Value::Number)
            .ok_or_else(|| CoerceError::NotNumeric(n.to_string())),
        (serde_json::Value::String(s), None) => match parse_number(s, definition) {
            Ok(n) => Ok(Value::Number(n)),
            Err(_) if kind == MetricType::Dimensionless && !s.trim().is_empty() => {
                Ok(Value::Text(s.trim().to_string()))
            }
            Err(e) => Err(e),
        },
        (other, _) => Err(CoerceError::UnsupportedJson(other.clone(), kind)),
    }
}

fn parse_boolean(text: &str, truthy: &'static str, falsy: &'static str) -> Result<bool, CoerceError> {
    let token = text.trim();
    if token.eq_ignore_ascii_case(truthy) || token == "1" {
        Ok(true)
    } else if token.eq_ignore_ascii_case(falsy) || token == "0" {
        Ok(false)
    } else {
        Err(CoerceError::NotBoolean(text.to_string(), truthy, falsy))
    }
}

/// Parses numbers as the web interface renders them, e.g. `5.3`, `5,3°C` or `12 kWh`.
fn parse_number(text: &str, definition: &RegisterDefinition) -> Result<f64, CoerceError> {
    let mut number = text.trim();
    let unit = definition.unit.as_str();
    for suffix in ["°C", "°", unit] {
        if suffix.is_empty() {
            continue;
        }
        if let Some(stripped) = number.strip_suffix(suffix) {
            number = stripped.trim_end();
            break;
        }
    }
    number
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CoerceError::NotNumeric(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group(name: &str) -> &'static DefinitionGroup {
        DefinitionGroup::by_name(name).unwrap()
    }

    fn raw(id: u32, value: serde_json::Value) -> RawValue {
        RawValue { id, value }
    }

    #[test]
    fn no_values_leaves_everything_unset() {
        for group in DefinitionGroup::all() {
            let augmented = augment(group, &[]);
            assert_eq!(augmented.name, group.name);
            assert_eq!(augmented.readings.len(), group.definitions.len());
            for (reading, definition) in augmented.readings.iter().zip(group.definitions) {
                assert_eq!(reading.definition, definition);
                assert_eq!(reading.value, None);
            }
        }
    }

    #[test]
    fn every_value_present() {
        let group = group("tehowatti_status");
        let values = [
            raw(40067, json!("5.3")),
            raw(40014, json!(48.1)),
            raw(40013, json!("50,2°C")),
            raw(40004, json!("-3.5 C")),
            raw(40083, json!("1.2A")),
            raw(40081, json!(0)),
            raw(40079, json!("0.8")),
            raw(43005, json!("-120DM")),
        ];
        let augmented = augment(group, &values);
        let got = augmented.readings.iter().map(|r| r.value.clone()).collect::<Vec<_>>();
        assert_eq!(
            got,
            [
                Some(Value::Number(5.3)),
                Some(Value::Number(48.1)),
                Some(Value::Number(50.2)),
                Some(Value::Number(-3.5)),
                Some(Value::Number(1.2)),
                Some(Value::Number(0.0)),
                Some(Value::Number(0.8)),
                Some(Value::Number(-120.0)),
            ]
        );
        let first = &augmented.readings[0];
        assert_eq!(first.definition.id, 40067);
        assert_eq!(first.definition.kind, MetricType::Temperature);
        assert_eq!(first.definition.unit.as_str(), "C");
    }

    #[test]
    fn on_off_tokens() {
        let group = group("tehowatti_hot_water");
        let on = augment(group, &[raw(48132, json!("ON"))]);
        assert_eq!(on.readings[0].value, Some(Value::Boolean(true)));
        let off = augment(group, &[raw(48132, json!("OFF"))]);
        assert_eq!(off.readings[0].value, Some(Value::Boolean(false)));
        let lower = augment(group, &[raw(48132, json!("off"))]);
        assert_eq!(lower.readings[0].value, Some(Value::Boolean(false)));
        let numeric = augment(group, &[raw(48132, json!(1))]);
        assert_eq!(numeric.readings[0].value, Some(Value::Boolean(true)));
    }

    #[test]
    fn yes_no_tokens() {
        let group = group("tehowatti_climate_system_1");
        let yes = augment(group, &[raw(43161, json!("YES"))]);
        assert_eq!(yes.readings[0].value, Some(Value::Boolean(true)));
        let no = augment(group, &[raw(43161, json!("NO"))]);
        assert_eq!(no.readings[0].value, Some(Value::Boolean(false)));
        // The on/off vocabulary does not apply to yes/no registers.
        let wrong = augment(group, &[raw(43161, json!("ON"))]);
        assert_eq!(wrong.readings[0].value, None);
    }

    #[test]
    fn unknown_ids_are_dropped() {
        let group = group("tehowatti_hot_water");
        let values = [raw(99999, json!("1")), raw(40067, json!("5.3")), raw(47041, json!(2))];
        let augmented = augment(group, &values);
        let ids = augmented.readings.iter().map(|r| r.definition.id).collect::<Vec<_>>();
        assert_eq!(ids, [48132, 47041]);
        assert_eq!(augmented.readings[0].value, None);
        assert_eq!(augmented.readings[1].value, Some(Value::Number(2.0)));
    }

    #[test]
    fn malformed_values_only_affect_their_register() {
        let group = group("tehowatti_addition");
        let values = [
            raw(10033, json!("maybe")),
            raw(47214, json!("16")),
            raw(43081, json!(null)),
            raw(43084, json!({"nested": true})),
            raw(47212, json!("n/a")),
            raw(40121, json!("21.5")),
        ];
        let augmented = augment(group, &values);
        let got = augmented.readings.iter().map(|r| r.value.clone()).collect::<Vec<_>>();
        assert_eq!(
            got,
            [None, Some(Value::Number(16.0)), None, None, None, Some(Value::Number(21.5))]
        );
    }

    #[test]
    fn order_follows_declaration_not_response() {
        let group = group("inverter_m8_status");
        let values = [
            raw(44362, json!("-1.0")),
            raw(44396, json!("40%")),
            raw(44703, json!("no")),
        ];
        let augmented = augment(group, &values);
        let ids = augmented.readings.iter().map(|r| r.definition.id).collect::<Vec<_>>();
        assert_eq!(ids, [44703, 44396, 44362]);
        assert_eq!(augmented.readings[1].value, Some(Value::Number(40.0)));
    }

    #[test]
    fn repeated_calls_are_equal() {
        let group = group("tehowatti_heat_meter");
        let values = [raw(44302, json!("12 kWh")), raw(40072, json!("14.2l/m"))];
        assert_eq!(augment(group, &values), augment(group, &values));
    }

    #[test]
    fn first_duplicate_wins() {
        let group = group("tehowatti_hot_water");
        let values = [raw(47041, json!(1)), raw(47041, json!(2))];
        assert_eq!(augment(group, &values).readings[1].value, Some(Value::Number(1.0)));
    }

    #[test]
    fn dimensionless_text_is_kept() {
        let group = group("tehowatti_hot_water");
        let augmented = augment(group, &[raw(47041, json!(" economy "))]);
        assert_eq!(augmented.readings[1].value, Some(Value::Text("economy".to_string())));
    }

    #[test]
    fn blank_dimensionless_text_is_malformed() {
        let group = group("tehowatti_hot_water");
        for blank in ["", "   "] {
            let augmented = augment(group, &[raw(47041, json!(blank))]);
            assert_eq!(augmented.readings[1].value, None);
        }
        let definition = group.get(47041).unwrap();
        assert!(matches!(coerce(definition, &json!(" ")), Err(CoerceError::NotNumeric(_))));
    }

    #[test]
    fn reading_serialization() {
        let group = group("tehowatti_status");
        let augmented = augment(group, &[raw(40067, json!("5.3"))]);
        let json = serde_json::to_value(&augmented.readings[..2]).unwrap();
        assert_eq!(
            json,
            json!([
                {"id": 40067, "name": "avg. outdoor temp. BT1", "type": "temperature", "unit": "C", "value": 5.3},
                {"id": 40014, "name": "hot water charging BT6", "type": "temperature", "unit": "C"},
            ])
        );
    }

    #[test]
    fn raw_value_accepts_service_field_names() {
        let value: RawValue =
            serde_json::from_value(json!({"VariableId": 40004, "CurrentValue": "-3.5°C"})).unwrap();
        assert_eq!(value, raw(40004, json!("-3.5°C")));
    }
}
