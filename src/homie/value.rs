use crate::augment::Value;
use crate::definitions::{MetricType, RegisterDefinition, Unit};
use homie5::HomieDataType;
use homie5::device_description::{HomiePropertyDescription, PropertyDescriptionBuilder};

pub(crate) fn datatype(definition: &RegisterDefinition) -> HomieDataType {
    match definition.kind {
        MetricType::BooleanYesNo | MetricType::BooleanOnOff => HomieDataType::Boolean,
        // Without a unit there is no telling whether the controller reports a count or a mode.
        MetricType::Dimensionless if definition.unit.is_empty() => HomieDataType::String,
        _ => HomieDataType::Float,
    }
}

pub(crate) fn homie_unit(unit: Unit) -> Option<&'static str> {
    match unit {
        Unit::NONE => None,
        Unit::CELSIUS => Some(homie5::HOMIE_UNIT_DEGREE_CELSIUS),
        Unit::LITERS_PER_MINUTE => Some("L/min"),
        other => Some(other.as_str()),
    }
}

pub(crate) fn property_description(definition: &RegisterDefinition) -> HomiePropertyDescription {
    let builder = PropertyDescriptionBuilder::new(datatype(definition)).name(definition.name);
    match homie_unit(definition.unit) {
        Some(unit) => builder.unit(unit).build(),
        None => builder.build(),
    }
}

/// The payload to publish for `value`, if it fits the datatype the property was described with.
pub(crate) fn payload(definition: &RegisterDefinition, value: &Value) -> Option<String> {
    match (datatype(definition), value) {
        (HomieDataType::Boolean, Value::Boolean(b)) => Some(b.to_string()),
        (HomieDataType::Float, Value::Number(n)) => Some(n.to_string()),
        (HomieDataType::String, value) => Some(value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::DefinitionGroup;

    fn definition(group: &str, id: u32) -> &'static RegisterDefinition {
        DefinitionGroup::by_name(group).unwrap().get(id).unwrap()
    }

    #[test]
    fn datatypes() {
        assert_eq!(datatype(definition("tehowatti_status", 40067)), HomieDataType::Float);
        assert_eq!(datatype(definition("tehowatti_status", 43005)), HomieDataType::Float);
        assert_eq!(datatype(definition("tehowatti_hot_water", 48132)), HomieDataType::Boolean);
        assert_eq!(datatype(definition("tehowatti_hot_water", 47041)), HomieDataType::String);
    }

    #[test]
    fn units() {
        assert_eq!(homie_unit(Unit::CELSIUS), Some(homie5::HOMIE_UNIT_DEGREE_CELSIUS));
        assert_eq!(homie_unit(Unit::LITERS_PER_MINUTE), Some("L/min"));
        assert_eq!(homie_unit(Unit::KILOWATT_HOURS), Some("kWh"));
        assert_eq!(homie_unit(Unit::NONE), None);
    }

    #[test]
    fn payloads_match_the_datatype() {
        let temperature = definition("tehowatti_status", 40067);
        assert_eq!(payload(temperature, &Value::Number(5.3)).as_deref(), Some("5.3"));
        assert_eq!(payload(temperature, &Value::Number(12.0)).as_deref(), Some("12"));
        assert_eq!(payload(temperature, &Value::Text("x".into())), None);
        let lux = definition("tehowatti_hot_water", 48132);
        assert_eq!(payload(lux, &Value::Boolean(true)).as_deref(), Some("true"));
        assert_eq!(payload(lux, &Value::Number(1.0)), None);
        let comfort = definition("tehowatti_hot_water", 47041);
        assert_eq!(payload(comfort, &Value::Text("economy".into())).as_deref(), Some("economy"));
        assert_eq!(payload(comfort, &Value::Number(2.0)).as_deref(), Some("2"));
    }

    #[test]
    fn description_carries_name_and_unit() {
        let description = property_description(definition("inverter_m8_status", 44396));
        assert_eq!(description.name.as_deref(), Some("pump speed heating medium GP1"));
        assert_eq!(description.unit.as_deref(), Some("%"));
        assert_eq!(description.datatype, HomieDataType::Float);
        assert!(!description.settable);
    }
}
