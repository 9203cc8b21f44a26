use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MapError;

pub const DEFAULT_EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldMapConfig {
    /// Mirror every layer and block request for the land-for-sale overlay.
    pub request_land_for_sale: bool,
    /// Ask the grid to list empty cells in block replies.
    pub include_nonexistent: bool,
    /// Base URL for web map tiles; objects-layer images are fetched from it when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_server_url: Option<String>,
    pub event_time_format: String,
}

impl Default for WorldMapConfig {
    fn default() -> Self {
        Self {
            request_land_for_sale: true,
            include_nonexistent: true,
            map_server_url: None,
            event_time_format: DEFAULT_EVENT_TIME_FORMAT.to_string(),
        }
    }
}

impl WorldMapConfig {
    pub fn from_toml(source: &str) -> Result<Self, MapError> {
        Ok(toml::from_str(source)?)
    }

    /// Loads the config file, `Ok(None)` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, MapError> {
        if !path.exists() {
            return Ok(None);
        }
        let source = fs::read_to_string(path)?;
        Self::from_toml(&source).map(Some)
    }

    pub fn web_tiles_enabled(&self) -> bool {
        self.map_server_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{WorldMapConfig, DEFAULT_EVENT_TIME_FORMAT};

    #[test]
    fn empty_toml_yields_defaults() {
        let config = WorldMapConfig::from_toml("").expect("parse empty config");
        assert_eq!(config, WorldMapConfig::default());
        assert!(config.request_land_for_sale);
        assert!(config.include_nonexistent);
        assert_eq!(config.event_time_format, DEFAULT_EVENT_TIME_FORMAT);
        assert!(!config.web_tiles_enabled());
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = WorldMapConfig::from_toml(
            "request_land_for_sale = false\nmap_server_url = \"https://tiles.example/\"\n",
        )
        .expect("parse partial config");
        assert!(!config.request_land_for_sale);
        assert!(config.include_nonexistent);
        assert!(config.web_tiles_enabled());
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = WorldMapConfig::from_toml("request_land_for_sale = \"maybe\"")
            .expect_err("wrong type must fail");
        assert!(err.to_string().contains("failed to parse world map config"));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let loaded = WorldMapConfig::load(Path::new("/nonexistent/worldmap.toml"))
            .expect("missing file is fine");
        assert!(loaded.is_none());
    }
}
