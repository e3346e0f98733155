//! Culler configuration
//!
//! Static sizing for a culler instance. Loaded once at startup, usually from
//! the same asset config that describes the prototypes.

use crate::error::{invalid_config, CullResult, ErrorContext};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a `FrustumCuller`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullerConfig {
    /// Number of instance records in the source buffer
    pub total_instance_count: u32,
    /// Number of distinct prototypes (one bucket each)
    pub prototype_count: u32,
    /// Bounding sphere radius shared by every prototype, in instance space
    pub bounding_sphere_radius: f32,
    /// Prefix for device object labels
    pub label: String,
}

impl Default for CullerConfig {
    fn default() -> Self {
        Self {
            total_instance_count: 0,
            prototype_count: 1,
            bounding_sphere_radius: 2.0,
            label: "Mass Cull".to_string(),
        }
    }
}

impl CullerConfig {
    pub fn new(
        total_instance_count: u32,
        prototype_count: u32,
        bounding_sphere_radius: f32,
    ) -> Self {
        Self {
            total_instance_count,
            prototype_count,
            bounding_sphere_radius,
            ..Default::default()
        }
    }

    /// Parse a config from TOML text and validate it
    pub fn from_toml_str(text: &str) -> CullResult<Self> {
        let config: Self = toml::from_str(text).parse_context("culler config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file and validate it
    pub fn load(path: impl AsRef<Path>) -> CullResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).io_context(&path.display().to_string())?;
        log::debug!("[Culler Config] Loaded {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> CullResult<()> {
        if self.prototype_count == 0 {
            return Err(invalid_config(
                "prototype_count",
                self.prototype_count,
                "at least one prototype is required",
            ));
        }
        if !self.bounding_sphere_radius.is_finite() || self.bounding_sphere_radius < 0.0 {
            return Err(invalid_config(
                "bounding_sphere_radius",
                self.bounding_sphere_radius,
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }

    pub(crate) fn labeled(&self, name: &str) -> String {
        format!("{} {}", self.label, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CullError;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = CullerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bounding_sphere_radius, 2.0);
    }

    #[test]
    fn test_from_toml_str_fills_missing_fields() {
        let config = CullerConfig::from_toml_str(
            r#"
            total_instance_count = 512
            prototype_count = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.total_instance_count, 512);
        assert_eq!(config.prototype_count, 4);
        assert_eq!(config.bounding_sphere_radius, 2.0);
        assert_eq!(config.label, "Mass Cull");
    }

    #[test]
    fn test_rejects_negative_radius() {
        let result = CullerConfig::from_toml_str("bounding_sphere_radius = -1.0");
        assert!(matches!(result, Err(CullError::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_zero_prototypes() {
        let result = CullerConfig::from_toml_str("prototype_count = 0");
        assert!(matches!(result, Err(CullError::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = CullerConfig::from_toml_str("prototype_count = \"many\"");
        assert!(matches!(result, Err(CullError::ConfigParse { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "total_instance_count = 6").unwrap();
        writeln!(file, "prototype_count = 3").unwrap();
        writeln!(file, "bounding_sphere_radius = 1.5").unwrap();
        writeln!(file, "label = \"Crowd\"").unwrap();

        let config = CullerConfig::load(file.path()).unwrap();
        assert_eq!(config, CullerConfig {
            total_instance_count: 6,
            prototype_count: 3,
            bounding_sphere_radius: 1.5,
            label: "Crowd".to_string(),
        });
        assert_eq!(config.labeled("Visible Output"), "Crowd Visible Output");
    }

    #[test]
    fn test_load_missing_file() {
        let result = CullerConfig::load("/nonexistent/cull.toml");
        assert!(matches!(result, Err(CullError::Io { .. })));
    }
}
