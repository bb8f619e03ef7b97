//! Taxonomy entry definitions.

use nspanel_core::{Capability, Category, DataType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Panel device category and the capability groups it uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    pub code: Category,
    pub description: String,
    #[serde(default)]
    pub required_groups: Vec<String>,
    #[serde(default)]
    pub optional_groups: Vec<String>,
}

impl CategoryDefinition {
    /// Required groups followed by optional groups.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.required_groups
            .iter()
            .chain(self.optional_groups.iter())
            .map(String::as_str)
    }
}

/// Named bundle of capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub code: String,
    pub description: String,
    pub capabilities: Vec<Capability>,
}

/// Readable/writable attribute of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub capability: Capability,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub valid_values: Option<Vec<Value>>,
    /// Pairs of (panel value, internal value)
    #[serde(default)]
    pub mapped_values: Option<Vec<(Value, Value)>>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub step_value: Option<f64>,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub invalid_value: Option<Value>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl AttributeDefinition {
    /// Translate a panel-side value to the internal representation.
    ///
    /// The value is checked against the valid values, remapped through the
    /// mapping table and checked against the numeric range and data type.
    pub fn normalize(&self, value: &Value) -> Result<Value, String> {
        if let Some(valid) = &self.valid_values {
            if !valid.contains(value) {
                return Err(format!(
                    "value {} is not one of the valid values of {}",
                    value, self.name
                ));
            }
        }

        let mapped = self
            .mapped_values
            .as_ref()
            .and_then(|pairs| pairs.iter().find(|(panel, _)| panel == value))
            .map(|(_, internal)| internal.clone())
            .unwrap_or_else(|| value.clone());

        if self.invalid_value.as_ref() == Some(&mapped) {
            return Ok(mapped);
        }

        check_type(self.data_type, &mapped, &self.name)?;
        check_range(self.min_value, self.max_value, &mapped, &self.name)?;
        Ok(mapped)
    }
}

/// Configuration knob of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationDefinition {
    pub capability: Capability,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub valid_values: Option<Vec<Value>>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub step_value: Option<f64>,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub invalid_value: Option<Value>,
}

/// Group, attribute and configuration catalogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitiesMapping {
    pub groups: Vec<GroupDefinition>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub configurations: Vec<ConfigurationDefinition>,
}

fn check_type(data_type: DataType, value: &Value, name: &str) -> Result<(), String> {
    let ok = match data_type {
        DataType::Bool => value.is_boolean(),
        DataType::Float => value.is_number(),
        DataType::String | DataType::Enum | DataType::Switch | DataType::Button => {
            value.is_string()
        }
        integer => match (value.as_i64(), integer.integer_bounds()) {
            (Some(v), Some((min, max))) => v >= min && v <= max,
            _ => false,
        },
    };

    if ok {
        Ok(())
    } else {
        Err(format!("value {} does not fit data type {:?} of {}", value, data_type, name))
    }
}

fn check_range(min: Option<f64>, max: Option<f64>, value: &Value, name: &str) -> Result<(), String> {
    let Some(number) = value.as_f64() else {
        return Ok(());
    };
    if min.is_some_and(|min| number < min) || max.is_some_and(|max| number > max) {
        return Err(format!("value {} is out of range of {}", value, name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn power_state() -> AttributeDefinition {
        serde_json::from_value(json!({
            "capability": "power",
            "name": "powerState",
            "data_type": "bool",
            "valid_values": ["on", "off"],
            "mapped_values": [["on", true], ["off", false]]
        }))
        .unwrap()
    }

    fn brightness() -> AttributeDefinition {
        serde_json::from_value(json!({
            "capability": "brightness",
            "name": "brightness",
            "data_type": "uchar",
            "min_value": 0,
            "max_value": 100
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_remaps_panel_values() {
        let attribute = power_state();
        assert_eq!(attribute.normalize(&json!("on")), Ok(json!(true)));
        assert_eq!(attribute.normalize(&json!("off")), Ok(json!(false)));
        assert!(attribute.normalize(&json!("dim")).is_err());
    }

    #[test]
    fn test_normalize_checks_range_and_type() {
        let attribute = brightness();
        assert_eq!(attribute.normalize(&json!(55)), Ok(json!(55)));
        assert!(attribute.normalize(&json!(101)).is_err());
        assert!(attribute.normalize(&json!(12.5)).is_err());
        assert!(attribute.normalize(&json!("55")).is_err());
    }

    #[test]
    fn test_invalid_sentinel_passes_through() {
        let mut attribute = brightness();
        attribute.data_type = DataType::Char;
        attribute.invalid_value = Some(json!(-1));
        assert_eq!(attribute.normalize(&json!(-1)), Ok(json!(-1)));
    }

    #[test]
    fn test_unknown_data_type_fails_to_parse() {
        let result = serde_json::from_value::<AttributeDefinition>(json!({
            "capability": "power",
            "name": "powerState",
            "data_type": "tristate"
        }));
        assert!(result.is_err());
    }
}
