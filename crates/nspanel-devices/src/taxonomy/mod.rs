//! Static taxonomy of panel categories and capabilities.
//!
//! The catalogs are bundled with the crate and loaded once at startup.
//! Loading validates referential integrity, so a broken catalog stops the
//! process before any lookup happens. After loading the store is read-only
//! and can be shared freely between tasks.

mod definitions;

pub use definitions::{
    AttributeDefinition, CapabilitiesMapping, CategoryDefinition, ConfigurationDefinition,
    GroupDefinition,
};

use nspanel_core::{Capability, Category};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Bundled categories catalog.
pub const CATEGORIES_JSON: &str = include_str!("../../resources/categories.json");

/// Bundled capabilities catalog.
pub const CAPABILITIES_JSON: &str = include_str!("../../resources/capabilities.json");

pub const CATEGORIES_FILE: &str = "categories.json";
pub const CAPABILITIES_FILE: &str = "capabilities.json";

/// Taxonomy loading error.
#[derive(Debug, thiserror::Error)]
pub enum TaxonomyError {
    #[error("Catalog {file} could not be read: {source}")]
    Missing {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog {file} is malformed: {source}")]
    Malformed {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Catalog is inconsistent: {0}")]
    Invalid(String),
}

impl From<TaxonomyError> for nspanel_core::Error {
    fn from(err: TaxonomyError) -> Self {
        nspanel_core::Error::Terminate(err.to_string())
    }
}

/// Validated, immutable taxonomy lookup tables.
#[derive(Debug, Clone)]
pub struct TaxonomyStore {
    categories: Vec<CategoryDefinition>,
    capabilities: CapabilitiesMapping,
    category_index: HashMap<Category, usize>,
    group_index: HashMap<String, usize>,
}

impl TaxonomyStore {
    /// Load the catalogs bundled with this crate.
    pub fn bundled() -> Result<Self, TaxonomyError> {
        Self::from_json(CATEGORIES_JSON, CAPABILITIES_JSON)
    }

    /// Load `categories.json` and `capabilities.json` from a directory.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, TaxonomyError> {
        let dir = dir.as_ref();
        let read = |file: &str| {
            std::fs::read_to_string(dir.join(file)).map_err(|source| TaxonomyError::Missing {
                file: file.to_string(),
                source,
            })
        };
        let categories = read(CATEGORIES_FILE)?;
        let capabilities = read(CAPABILITIES_FILE)?;
        Self::from_json(&categories, &capabilities)
    }

    /// Parse and validate both catalogs.
    pub fn from_json(categories: &str, capabilities: &str) -> Result<Self, TaxonomyError> {
        let categories: Vec<CategoryDefinition> =
            serde_json::from_str(categories).map_err(|source| TaxonomyError::Malformed {
                file: CATEGORIES_FILE.to_string(),
                source,
            })?;
        let capabilities: CapabilitiesMapping =
            serde_json::from_str(capabilities).map_err(|source| TaxonomyError::Malformed {
                file: CAPABILITIES_FILE.to_string(),
                source,
            })?;

        let store = Self::build(categories, capabilities)?;
        tracing::debug!(
            categories = store.categories.len(),
            groups = store.capabilities.groups.len(),
            attributes = store.capabilities.attributes.len(),
            configurations = store.capabilities.configurations.len(),
            "Loaded panel taxonomy"
        );
        Ok(store)
    }

    fn build(
        categories: Vec<CategoryDefinition>,
        capabilities: CapabilitiesMapping,
    ) -> Result<Self, TaxonomyError> {
        let mut group_index = HashMap::new();
        for (i, group) in capabilities.groups.iter().enumerate() {
            if group_index.insert(group.code.clone(), i).is_some() {
                return Err(TaxonomyError::Invalid(format!("group {} is defined twice", group.code)));
            }
            if let Some(unknown) = group.capabilities.iter().find(|c| c.is_unknown()) {
                return Err(TaxonomyError::Invalid(format!(
                    "group {} references unknown capability {}",
                    group.code, unknown
                )));
            }
        }

        let mut category_index = HashMap::new();
        for (i, category) in categories.iter().enumerate() {
            if category.code.is_unknown() {
                return Err(TaxonomyError::Invalid(format!("unknown category {}", category.code)));
            }
            if category_index.insert(category.code.clone(), i).is_some() {
                return Err(TaxonomyError::Invalid(format!(
                    "category {} is defined twice",
                    category.code
                )));
            }
            if let Some(missing) = category.groups().find(|g| !group_index.contains_key(*g)) {
                return Err(TaxonomyError::Invalid(format!(
                    "category {} references unknown group {}",
                    category.code, missing
                )));
            }
        }

        let mut attribute_keys = HashSet::new();
        for attribute in &capabilities.attributes {
            if attribute.capability.is_unknown() {
                return Err(TaxonomyError::Invalid(format!(
                    "attribute {} references unknown capability {}",
                    attribute.name, attribute.capability
                )));
            }
            if !attribute_keys.insert((attribute.capability.clone(), attribute.name.as_str())) {
                return Err(TaxonomyError::Invalid(format!(
                    "attribute {}.{} is defined twice",
                    attribute.capability, attribute.name
                )));
            }
            check_bounds(&attribute.capability, &attribute.name, attribute.min_value, attribute.max_value)?;
            if let (Some(valid), Some(pairs)) = (&attribute.valid_values, &attribute.mapped_values) {
                if let Some((panel, _)) = pairs.iter().find(|(panel, _)| !valid.contains(panel)) {
                    return Err(TaxonomyError::Invalid(format!(
                        "attribute {}.{} maps {} which is not a valid value",
                        attribute.capability, attribute.name, panel
                    )));
                }
            }
            check_default(
                &attribute.capability,
                &attribute.name,
                attribute.valid_values.as_deref(),
                attribute.default_value.as_ref(),
            )?;
        }

        for configuration in &capabilities.configurations {
            if configuration.capability.is_unknown() {
                return Err(TaxonomyError::Invalid(format!(
                    "configuration {} references unknown capability {}",
                    configuration.name, configuration.capability
                )));
            }
            check_bounds(
                &configuration.capability,
                &configuration.name,
                configuration.min_value,
                configuration.max_value,
            )?;
            check_default(
                &configuration.capability,
                &configuration.name,
                configuration.valid_values.as_deref(),
                configuration.default_value.as_ref(),
            )?;
        }

        Ok(Self {
            categories,
            capabilities,
            category_index,
            group_index,
        })
    }

    /// All category definitions, in catalog order.
    pub fn categories_mapping(&self) -> &[CategoryDefinition] {
        &self.categories
    }

    /// Groups, attributes and configurations.
    pub fn capabilities_mapping(&self) -> &CapabilitiesMapping {
        &self.capabilities
    }

    pub fn category(&self, code: &Category) -> Option<&CategoryDefinition> {
        self.category_index.get(code).map(|&i| &self.categories[i])
    }

    pub fn group(&self, code: &str) -> Option<&GroupDefinition> {
        self.group_index.get(code).map(|&i| &self.capabilities.groups[i])
    }

    /// Whether any group of the catalog contains the capability.
    pub fn is_known_capability(&self, capability: &Capability) -> bool {
        self.groups_for_capability(capability).next().is_some()
    }

    /// Groups containing the capability.
    pub fn groups_for_capability<'a>(
        &'a self,
        capability: &'a Capability,
    ) -> impl Iterator<Item = &'a GroupDefinition> + 'a {
        self.capabilities
            .groups
            .iter()
            .filter(move |g| g.capabilities.contains(capability))
    }

    /// Whether a device of the category may expose the capability.
    pub fn allows_capability(&self, category: &Category, capability: &Capability) -> bool {
        let Some(definition) = self.category(category) else {
            return false;
        };
        definition
            .groups()
            .filter_map(|g| self.group(g))
            .any(|g| g.capabilities.contains(capability))
    }

    /// Attributes of a capability, in catalog order.
    pub fn attributes<'a>(
        &'a self,
        capability: &'a Capability,
    ) -> impl Iterator<Item = &'a AttributeDefinition> + 'a {
        self.capabilities
            .attributes
            .iter()
            .filter(move |a| &a.capability == capability)
    }

    pub fn attribute<'a>(
        &'a self,
        capability: &Capability,
        name: &str,
    ) -> Option<&'a AttributeDefinition> {
        self.capabilities
            .attributes
            .iter()
            .find(|a| &a.capability == capability && a.name == name)
    }

    /// Configurations of a capability, in catalog order.
    pub fn configurations<'a>(
        &'a self,
        capability: &'a Capability,
    ) -> impl Iterator<Item = &'a ConfigurationDefinition> + 'a {
        self.capabilities
            .configurations
            .iter()
            .filter(move |c| &c.capability == capability)
    }
}

fn check_bounds(
    capability: &Capability,
    name: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), TaxonomyError> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(TaxonomyError::Invalid(format!(
                "{}.{} has min {} above max {}",
                capability, name, min, max
            )));
        }
    }
    Ok(())
}

fn check_default(
    capability: &Capability,
    name: &str,
    valid: Option<&[serde_json::Value]>,
    default: Option<&serde_json::Value>,
) -> Result<(), TaxonomyError> {
    if let (Some(valid), Some(default)) = (valid, default) {
        if !valid.contains(default) {
            return Err(TaxonomyError::Invalid(format!(
                "{}.{} default {} is not a valid value",
                capability, name, default
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalog_loads() {
        let store = TaxonomyStore::bundled().unwrap();
        assert_eq!(store.categories_mapping().len(), 14);
        assert_eq!(store.capabilities_mapping().groups.len(), 23);
    }

    #[test]
    fn test_every_known_code_is_in_the_catalog() {
        let store = TaxonomyStore::bundled().unwrap();
        for category in Category::KNOWN {
            assert!(store.category(category).is_some(), "missing category {}", category);
        }
        for capability in Capability::KNOWN {
            assert!(store.is_known_capability(capability), "missing capability {}", capability);
            assert!(
                store.attributes(capability).next().is_some(),
                "capability {} has no attributes",
                capability
            );
        }
    }

    #[test]
    fn test_lookups() {
        let store = TaxonomyStore::bundled().unwrap();

        let sensor = store.category(&Category::TemperatureAndHumiditySensor).unwrap();
        assert_eq!(sensor.required_groups, vec!["temperature", "humidity"]);

        assert!(store.allows_capability(&Category::TemperatureAndHumiditySensor, &Capability::Battery));
        assert!(!store.allows_capability(&Category::TemperatureAndHumiditySensor, &Capability::Power));
        assert!(!store.allows_capability(&Category::from("robotVacuum"), &Capability::Power));

        let rgb: Vec<_> = store.attributes(&Capability::ColorRgb).map(|a| a.name.as_str()).collect();
        assert_eq!(rgb, vec!["red", "green", "blue"]);

        let unit = store.configurations(&Capability::Temperature).next().unwrap();
        assert_eq!(unit.name, "unit");
        assert!(store.attribute(&Capability::Power, "powerState").is_some());
        assert!(store.group("colorTemperature").is_some());
    }

    #[test]
    fn test_attribute_outlives_capability_key() {
        let store = TaxonomyStore::bundled().unwrap();

        let attribute = {
            let capability = Capability::from("brightness");
            store.attribute(&capability, "brightness")
        };
        assert_eq!(attribute.and_then(|a| a.max_value), Some(100.0));
        assert!(store.attribute(&Capability::Brightness, "bogusAttr").is_none());
        assert!(store.attribute(&Capability::Power, "brightness").is_none());
    }

    #[test]
    fn test_unknown_group_reference_fails_fast() {
        let categories = r#"[{"code": "plug", "description": "Plug", "required_groups": ["power"], "optional_groups": ["teleport"]}]"#;
        let capabilities = r#"{"groups": [{"code": "power", "description": "Power", "capabilities": ["power"]}]}"#;

        let err = TaxonomyStore::from_json(categories, capabilities).unwrap_err();
        assert!(matches!(err, TaxonomyError::Invalid(ref msg) if msg.contains("teleport")));
    }

    #[test]
    fn test_unknown_capability_in_group_fails_fast() {
        let capabilities = r#"{"groups": [{"code": "warp", "description": "Warp", "capabilities": ["warp-drive"]}]}"#;
        let err = TaxonomyStore::from_json("[]", capabilities).unwrap_err();
        assert!(matches!(err, TaxonomyError::Invalid(_)));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CATEGORIES_FILE), CATEGORIES_JSON).unwrap();
        std::fs::write(dir.path().join(CAPABILITIES_FILE), CAPABILITIES_JSON).unwrap();

        let store = TaxonomyStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.categories_mapping().len(), 14);

        std::fs::remove_file(dir.path().join(CAPABILITIES_FILE)).unwrap();
        let err = TaxonomyStore::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, TaxonomyError::Missing { ref file, .. } if file == CAPABILITIES_FILE));
    }

    #[test]
    fn test_malformed_catalog_fails_fast() {
        let err = TaxonomyStore::from_json("{not json", CAPABILITIES_JSON).unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { ref file, .. } if file == CATEGORIES_FILE));
    }
}
