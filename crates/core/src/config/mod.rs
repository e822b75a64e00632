use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{placer::PatternPlacer, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub placer: PatternPlacer,
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a configuration file; missing options keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{overwrite::PatternOverwriteMode, reconcile::TimingOverwriteMode};

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(AppConfig::from_json("{}").unwrap(), AppConfig::default());
    }

    #[test]
    fn reads_policies_by_name() {
        let config = AppConfig::from_json(
            r#"{ "placer": {
                "pattern_overwrite_mode": "CompleteOverwrite",
                "timing_overwrite_mode": "RelativeMix",
                "beat_divisors": [{ "numerator": 1, "denominator": 4 }]
            } }"#,
        )
        .unwrap();
        assert_eq!(config.placer.pattern_overwrite_mode, PatternOverwriteMode::CompleteOverwrite);
        assert_eq!(config.placer.timing_overwrite_mode, TimingOverwriteMode::RelativeMix);
        assert_eq!(config.placer.beat_divisors.len(), 1);
        assert!(config.placer.include_hitsounds);
    }

    #[test]
    fn saved_config_loads_back() {
        let path = std::env::temp_dir().join(format!("pattern-placer-config-{}.json", std::process::id()));
        let mut config = AppConfig::default();
        config.placer.fix_stacking = true;
        config.placer.custom_rotate = 0.5;

        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            AppConfig::from_json("{ placer: "),
            Err(crate::PlacementError::Json(_))
        ));
    }
}
