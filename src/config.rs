//! Configuration for the base map providers and for the climate explorer.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::projection::GeoPos;
use crate::selection::Selection;
use crate::{MapError, TileId};

/// Configuration for a map provider.
pub trait MapConfig {
    /// Returns the URL for a given tile.
    fn tile_url(&self, tile: &TileId) -> String;

    /// Returns the attribution text to be displayed on the map. If returns `None`, no attribution is shown.
    fn attribution(&self) -> Option<&String>;

    /// Returns the attribution URL to be linked from the attribution text.
    fn attribution_url(&self) -> Option<&String>;

    /// The default geographical center of the map.
    fn default_center(&self) -> GeoPos;

    /// The default zoom level of the map.
    fn default_zoom(&self) -> u8;
}

/// Metropolitan France, where the climate tilesets are produced.
pub const FRANCE_CENTER: GeoPos = GeoPos {
    lon: 4.326,
    lat: 46.487,
};

/// Configuration for the OpenStreetMap tile server.
///
/// # Example
///
/// ```
/// use climate_map_view::config::OpenStreetMapConfig;
/// let config = OpenStreetMapConfig::default();
/// ```
#[cfg(feature = "openstreetmap")]
pub struct OpenStreetMapConfig {
    base_url: String,
    attribution: String,
    attribution_url: String,
    default_center: GeoPos,
    default_zoom: u8,
}

#[cfg(feature = "openstreetmap")]
impl Default for OpenStreetMapConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tile.openstreetmap.org".to_string(),
            attribution: "© OpenStreetMap contributors".to_string(),
            attribution_url: "https://www.openstreetmap.org".to_string(),
            default_center: FRANCE_CENTER,
            default_zoom: 5,
        }
    }
}

#[cfg(feature = "openstreetmap")]
impl OpenStreetMapConfig {
    /// Opens the map on `center` at `zoom` instead of the default view.
    pub fn with_view(mut self, center: GeoPos, zoom: u8) -> Self {
        self.default_center = center;
        self.default_zoom = zoom;
        self
    }
}

#[cfg(feature = "openstreetmap")]
impl MapConfig for OpenStreetMapConfig {
    fn tile_url(&self, tile: &TileId) -> String {
        format!("{}/{}/{}/{}.png", self.base_url, tile.z, tile.x, tile.y)
    }

    fn attribution(&self) -> Option<&String> {
        Some(&self.attribution)
    }

    fn attribution_url(&self) -> Option<&String> {
        Some(&self.attribution_url)
    }

    fn default_center(&self) -> GeoPos {
        self.default_center
    }

    fn default_zoom(&self) -> u8 {
        self.default_zoom
    }
}

/// A tile source defined by a URL template with `{z}`, `{x}` and `{y}` placeholders.
///
/// # Example
///
/// ```
/// use climate_map_view::config::{MapConfig, TemplateMapConfig};
/// use climate_map_view::TileId;
/// let config = TemplateMapConfig::new("https://tiles.example.org/{z}/{x}/{y}.png");
/// assert_eq!(config.tile_url(&TileId { z: 1, x: 0, y: 1 }), "https://tiles.example.org/1/0/1.png");
/// ```
pub struct TemplateMapConfig {
    template: String,
    attribution: Option<String>,
}

impl TemplateMapConfig {
    /// Creates a config from a URL template.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            attribution: None,
        }
    }

    /// Sets the attribution text.
    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }
}

impl MapConfig for TemplateMapConfig {
    fn tile_url(&self, tile: &TileId) -> String {
        self.template
            .replace("{z}", &tile.z.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string())
    }

    fn attribution(&self) -> Option<&String> {
        self.attribution.as_ref()
    }

    fn attribution_url(&self) -> Option<&String> {
        None
    }

    fn default_center(&self) -> GeoPos {
        FRANCE_CENTER
    }

    fn default_zoom(&self) -> u8 {
        5
    }
}

/// A base map overlay drawn above the climate data, such as water and labels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceOverlay {
    /// `{z}/{x}/{y}` URL template of the overlay tiles.
    pub url_template: String,

    /// Opacity of the overlay, 0 to 1.
    #[serde(default = "default_overlay_opacity")]
    pub opacity: f32,

    /// Attribution of the overlay tiles.
    #[serde(default)]
    pub attribution: Option<String>,
}

fn default_overlay_opacity() -> f32 {
    0.2
}

impl Default for ReferenceOverlay {
    fn default() -> Self {
        Self {
            url_template: "https://basemaps.cartocdn.com/light_only_labels/{z}/{x}/{y}.png"
                .to_string(),
            opacity: default_overlay_opacity(),
            attribution: Some("© CARTO".to_string()),
        }
    }
}

/// Settings of the climate explorer. Every field has a default, so a partial JSON file works.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Scheme and host serving `/tilesets/...`.
    pub tileset_origin: String,

    /// Id of the base map layer the climate layer is inserted beneath.
    pub anchor_layer_id: String,

    /// Overlay added as the anchor layer. `None` leaves the climate layer on top.
    pub reference_overlay: Option<ReferenceOverlay>,

    /// Where the map opens.
    pub default_center: GeoPos,

    /// Zoom level the map opens at.
    pub default_zoom: u8,

    /// Selection shown at startup.
    pub initial_selection: Selection,

    /// Blend colors between colormap stops instead of stepping.
    pub colormap_gradient: bool,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            tileset_origin: "http://127.0.0.1:8083".to_string(),
            anchor_layer_id: "water".to_string(),
            reference_overlay: Some(ReferenceOverlay::default()),
            default_center: FRANCE_CENTER,
            default_zoom: 5,
            initial_selection: Selection::default(),
            colormap_gradient: true,
        }
    }
}

impl ExplorerConfig {
    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, MapError> {
        let mut config: ExplorerConfig = serde_json::from_str(json)?;
        while config.tileset_origin.ends_with('/') {
            config.tileset_origin.pop();
        }
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
