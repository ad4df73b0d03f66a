//! The `index.json` manifest describing a multi-channel series tileset, and how it is fetched.

use eyre::WrapErr;
use log::debug;
use poll_promise::Promise;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::projection::{GeoPos, MERCATOR_HALF_EXTENT, world_tiles};
use crate::{MapError, TileId, download};

/// How tile pixels encode values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RasterEncoding {
    /// Channels holding the value, most significant first, e.g. `"rgb"`, `"gb"`, `"r"`.
    pub channels: String,

    /// Number of values per pixel. Only scalar rasters are produced.
    #[serde(default = "one")]
    pub vector_dimension: u32,

    /// Value step between two successive encoded integers.
    pub polynomial_slope: f64,

    /// Value encoded by the integer 0.
    pub polynomial_offset: f64,
}

fn one() -> u32 {
    1
}

impl RasterEncoding {
    /// Decodes an RGBA pixel. Transparent pixels carry no data.
    pub fn decode(&self, rgba: [u8; 4]) -> Option<f32> {
        if rgba[3] == 0 {
            return None;
        }
        let mut code: u32 = 0;
        for channel in self.channels.chars() {
            let byte = match channel {
                'r' => rgba[0],
                'g' => rgba[1],
                'b' => rgba[2],
                _ => return None,
            };
            code = (code << 8) | u32::from(byte);
        }
        Some((self.polynomial_offset + code as f64 * self.polynomial_slope) as f32)
    }

    fn validate(&self) -> Result<(), MapError> {
        let channels = &self.channels;
        if channels.is_empty()
            || channels.len() > 3
            || !channels.chars().all(|c| matches!(c, 'r' | 'g' | 'b'))
        {
            return Err(MapError::InvalidManifest(format!(
                "unsupported channels `{channels}`"
            )));
        }
        if self.polynomial_slope == 0.0 || !self.polynomial_slope.is_finite() {
            return Err(MapError::InvalidManifest(
                "polynomial slope must be finite and non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// One tileset of the series, at one position along the series axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesEntry {
    /// Tile path relative to the tileset prefix, with `{z}`, `{x}` and `{y}` placeholders.
    pub tile_url_pattern: String,

    /// Position along the series axis (the warming level for climate tilesets).
    #[serde(default)]
    pub series_axis_value: Option<f64>,

    /// Free-form metadata of the entry.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SeriesEntry {
    /// Tile path of `tile` in this entry.
    pub fn tile_path(&self, tile: TileId) -> String {
        self.tile_url_pattern
            .replace("{z}", &tile.z.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string())
    }
}

/// The series entries surrounding an axis value, and where the value sits between them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeriesBracket {
    /// Index of the entry at or below the axis value.
    pub lower: usize,
    /// Index of the entry at or above the axis value.
    pub upper: usize,
    /// Interpolation factor from `lower` (0) to `upper` (1).
    pub t: f32,
}

impl SeriesBracket {
    /// Series indices whose tiles are needed to evaluate this bracket.
    pub fn needed(&self) -> impl Iterator<Item = usize> {
        let upper = (self.upper != self.lower && self.t > 0.0).then_some(self.upper);
        std::iter::once(self.lower).chain(upper)
    }

    /// Blends the lower and upper values. Nodata on either needed side is nodata.
    pub fn blend(&self, lower: Option<f32>, upper: Option<f32>) -> Option<f32> {
        let lower = lower?;
        if self.upper == self.lower || self.t <= 0.0 {
            return Some(lower);
        }
        let upper = upper?;
        Some(lower + (upper - lower) * self.t)
    }
}

/// Description of a tiled raster dataset, fetched from `{prefix}index.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetManifest {
    /// Dataset name.
    #[serde(default)]
    pub name: String,

    /// Dataset description.
    #[serde(default)]
    pub description: String,

    /// Attribution lines of the data producers.
    #[serde(default)]
    pub attribution: Vec<String>,

    /// `[minx, miny, maxx, maxy]` in EPSG:3857 metres.
    pub bounds: [f64; 4],

    /// Coordinate reference system of `bounds` and of the tile grid.
    #[serde(default = "default_crs")]
    pub crs: String,

    /// Lowest zoom level with tiles.
    pub min_zoom: u8,

    /// Highest zoom level with tiles.
    pub max_zoom: u8,

    /// Tile width and height in pixels.
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    /// Image format of the tiles, e.g. `webp`.
    #[serde(default)]
    pub raster_format: String,

    /// Pixel value encoding.
    pub raster_encoding: RasterEncoding,

    /// Real world unit of decoded values.
    #[serde(default)]
    pub pixel_unit: Option<String>,

    /// Name of the series axis.
    #[serde(default)]
    pub series_axis_name: Option<String>,

    /// Unit of the series axis.
    #[serde(default)]
    pub series_axis_unit: Option<String>,

    /// Tilesets along the series axis, sorted by axis value once parsed.
    pub series: Vec<SeriesEntry>,

    /// Free-form metadata of the dataset.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_crs() -> String {
    "EPSG:3857".to_string()
}

fn default_tile_size() -> u32 {
    512
}

impl DatasetManifest {
    /// Parses and validates a manifest document.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, MapError> {
        let mut manifest: DatasetManifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        manifest.series.sort_by(|a, b| {
            let a = a.series_axis_value.unwrap_or(f64::NEG_INFINITY);
            let b = b.series_axis_value.unwrap_or(f64::NEG_INFINITY);
            a.total_cmp(&b)
        });
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), MapError> {
        if self.series.is_empty() {
            return Err(MapError::InvalidManifest("series is empty".to_string()));
        }
        if self.min_zoom > self.max_zoom {
            return Err(MapError::InvalidManifest(format!(
                "minZoom {} is above maxZoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.raster_encoding.vector_dimension != 1 {
            return Err(MapError::InvalidManifest(format!(
                "vector dimension {} is not supported",
                self.raster_encoding.vector_dimension
            )));
        }
        self.raster_encoding.validate()
    }

    /// Unit of the decoded values, empty when the manifest does not declare one.
    pub fn unit(&self) -> &str {
        self.pixel_unit.as_deref().unwrap_or("")
    }

    /// Whether `pos` falls inside the dataset bounds.
    pub fn contains(&self, pos: GeoPos) -> bool {
        let (x, y) = pos.to_mercator();
        let [min_x, min_y, max_x, max_y] = self.bounds;
        (min_x..=max_x).contains(&x) && (min_y..=max_y).contains(&y)
    }

    /// Whether `tile` overlaps the dataset bounds, i.e. is worth requesting.
    pub fn intersects_tile(&self, tile: TileId) -> bool {
        let size = 2.0 * MERCATOR_HALF_EXTENT / world_tiles(tile.z);
        let min_x = tile.x as f64 * size - MERCATOR_HALF_EXTENT;
        let max_y = MERCATOR_HALF_EXTENT - tile.y as f64 * size;
        let [bounds_min_x, bounds_min_y, bounds_max_x, bounds_max_y] = self.bounds;
        min_x < bounds_max_x
            && min_x + size > bounds_min_x
            && max_y - size < bounds_max_y
            && max_y > bounds_min_y
    }

    /// Zoom level whose tiles are used when the map shows `map_zoom`.
    pub fn data_zoom(&self, map_zoom: u8) -> u8 {
        map_zoom.clamp(self.min_zoom, self.max_zoom)
    }

    /// Locates `axis_value` in the series, clamping it to the covered range.
    pub fn bracket(&self, axis_value: f64) -> SeriesBracket {
        let axis = |i: usize| self.series[i].series_axis_value.unwrap_or(0.0);
        let last = self.series.len().saturating_sub(1);

        if last == 0 || axis_value <= axis(0) {
            return SeriesBracket {
                lower: 0,
                upper: 0,
                t: 0.0,
            };
        }
        if axis_value >= axis(last) {
            return SeriesBracket {
                lower: last,
                upper: last,
                t: 0.0,
            };
        }

        let upper = (1..=last)
            .find(|&i| axis(i) >= axis_value)
            .unwrap_or(last);
        if axis(upper) == axis_value {
            return SeriesBracket {
                lower: upper,
                upper,
                t: 0.0,
            };
        }
        let lower = upper - 1;
        let span = axis(upper) - axis(lower);
        let t = if span > 0.0 {
            (axis_value - axis(lower)) / span
        } else {
            0.0
        };
        SeriesBracket {
            lower,
            upper,
            t: t as f32,
        }
    }
}

/// Fetches dataset manifests in the background.
pub trait ManifestFetcher {
    /// Starts fetching the manifest at `url`. The promise resolves once the document is
    /// downloaded and parsed.
    fn fetch(&self, url: String) -> Promise<Result<DatasetManifest, Arc<eyre::Report>>>;
}

/// Fetches manifests over HTTP on a background thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpManifestFetcher;

impl ManifestFetcher for HttpManifestFetcher {
    fn fetch(&self, url: String) -> Promise<Result<DatasetManifest, Arc<eyre::Report>>> {
        Promise::spawn_thread("fetch_manifest", move || {
            debug!("Fetching manifest from {}", url);
            let result: Result<DatasetManifest, eyre::Report> = download(&url)
                .and_then(|bytes| DatasetManifest::from_json_slice(&bytes))
                .wrap_err_with(|| format!("Failed to load dataset manifest from {}", url));
            result.map_err(Arc::new)
        })
    }
}
