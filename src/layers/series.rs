//! A raster layer whose pixels encode climate values, with one tileset per position along a
//! series axis (the warming level).

use egui::{Color32, ColorImage, Painter, Rect, Response, TextureHandle, pos2};
use eyre::WrapErr;
use log::{debug, error, warn};
use poll_promise::Promise;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::colormap::Colormap;
use crate::layers::Layer;
use crate::manifest::{DatasetManifest, RasterEncoding, SeriesBracket};
use crate::projection::{GeoPos, MapProjection, lat_to_y, lon_to_x};
use crate::{MapError, TileId, download, visible_tile_ids};

// Overzoomed-out views would request thousands of data tiles.
const MAX_VISIBLE_TILES: usize = 64;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// The value under a picked coordinate.
#[derive(Clone, Debug, PartialEq)]
pub struct PickingInfo {
    /// Decoded value, interpolated along the series axis.
    pub value: f32,
    /// Unit declared by the dataset.
    pub unit: String,
}

/// What a series layer is built from.
#[derive(Clone, Debug)]
pub struct SeriesTileLayerSpecification {
    /// The dataset manifest.
    pub dataset_specification: Arc<DatasetManifest>,
    /// Colormap applied to decoded values.
    pub colormap: Colormap,
    /// Blend between colormap stops instead of stepping.
    pub colormap_gradient: bool,
    /// Absolute URL the series tile patterns are relative to, ending with `/`.
    pub tile_url_prefix: String,
}

/// Decoded values of one raster tile. Nodata is stored as NaN.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedTile {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl DecodedTile {
    /// Decodes RGBA pixels row by row.
    pub fn from_rgba(width: usize, height: usize, rgba: &[u8], encoding: &RasterEncoding) -> Self {
        let values = rgba
            .chunks_exact(4)
            .map(|p| encoding.decode([p[0], p[1], p[2], p[3]]).unwrap_or(f32::NAN))
            .collect();
        Self {
            width,
            height,
            values,
        }
    }

    /// Builds a tile from already decoded values, `None` being nodata.
    pub fn from_values(width: usize, height: usize, values: &[Option<f32>]) -> Self {
        Self {
            width,
            height,
            values: values.iter().map(|v| v.unwrap_or(f32::NAN)).collect(),
        }
    }

    fn value(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied().filter(|v| !v.is_nan())
    }

    /// Value at the fractional position `(u, v)` inside the tile, both in `[0, 1)`.
    pub fn sample(&self, u: f64, v: f64) -> Option<f32> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let px = ((u * self.width as f64) as usize).min(self.width - 1);
        let py = ((v * self.height as f64) as usize).min(self.height - 1);
        self.value(py * self.width + px)
    }
}

/// Colors a tile at one position of the series axis.
pub fn shade_tile(
    lower: &DecodedTile,
    upper: Option<&DecodedTile>,
    bracket: SeriesBracket,
    colormap: &Colormap,
    gradient: bool,
) -> ColorImage {
    let upper = upper.filter(|u| u.width == lower.width && u.height == lower.height);
    let mut pixels = Vec::with_capacity(lower.values.len() * 4);
    for index in 0..lower.values.len() {
        let value = bracket.blend(lower.value(index), upper.and_then(|u| u.value(index)));
        match value {
            Some(value) => pixels.extend_from_slice(&colormap.rgba_at(value, gradient)),
            None => pixels.extend_from_slice(&[0, 0, 0, 0]),
        }
    }
    ColorImage::from_rgba_unmultiplied([lower.width, lower.height], &pixels)
}

enum RasterTile {
    Loading(Promise<Result<Arc<DecodedTile>, Arc<eyre::Report>>>),
    Ready(Arc<DecodedTile>),
    Failed,
}

fn fetch_raster(
    url: String,
    encoding: RasterEncoding,
) -> Promise<Result<Arc<DecodedTile>, Arc<eyre::Report>>> {
    Promise::spawn_thread("download_raster_tile", move || {
        let result: Result<_, eyre::Report> = (|| -> Result<_, MapError> {
            debug!("Downloading raster tile from {}", &url);
            let bytes = download(&url)?;
            let image = image::load_from_memory(&bytes)?.to_rgba8();
            Ok(Arc::new(DecodedTile::from_rgba(
                image.width() as usize,
                image.height() as usize,
                image.as_raw(),
                &encoding,
            )))
        })()
        .wrap_err_with(|| format!("Failed to download raster tile from {}", &url));

        result.map_err(Arc::new)
    })
}

struct ShadedTile {
    axis_value: f64,
    texture: TextureHandle,
}

/// A tiled raster layer over a series of datasets, colorized with a colormap.
///
/// The layer shows the series at one axis value, interpolating between the two nearest
/// tilesets, and answers picks with the decoded value under a coordinate.
pub struct SeriesTileLayer {
    instance: u64,
    specification: SeriesTileLayerSpecification,
    axis_value: f64,
    data_zoom: u8,
    rasters: HashMap<(usize, TileId), RasterTile>,
    shaded: HashMap<TileId, ShadedTile>,
    visible_tiles: Vec<(TileId, Rect)>,
}

impl SeriesTileLayer {
    /// Creates the layer. Nothing is downloaded until the layer is shown.
    pub fn new(specification: SeriesTileLayerSpecification) -> Self {
        let manifest = &specification.dataset_specification;
        let axis_value = manifest
            .series
            .first()
            .and_then(|entry| entry.series_axis_value)
            .unwrap_or(0.0);
        let data_zoom = manifest.min_zoom;
        Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            specification,
            axis_value,
            data_zoom,
            rasters: HashMap::new(),
            shaded: HashMap::new(),
            visible_tiles: Vec::new(),
        }
    }

    /// Process-unique number of this layer object.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// The dataset manifest.
    pub fn dataset(&self) -> &DatasetManifest {
        &self.specification.dataset_specification
    }

    /// The colormap.
    pub fn colormap(&self) -> &Colormap {
        &self.specification.colormap
    }

    /// Current position along the series axis.
    pub fn series_axis_value(&self) -> f64 {
        self.axis_value
    }

    /// Moves the layer along the series axis. Tiles are re-shaded on the next frame.
    pub fn set_series_axis_value(&mut self, value: f64) {
        self.axis_value = value;
    }

    fn tile_url(&self, series: usize, tile: TileId) -> String {
        format!(
            "{}{}",
            self.specification.tile_url_prefix,
            self.dataset().series[series].tile_path(tile)
        )
    }

    /// The decoded value under `pos`.
    ///
    /// `Ok(None)` outside the dataset or on nodata, [`MapError::TileNotReady`] while the tiles
    /// under `pos` are still downloading.
    pub fn pick(&self, pos: GeoPos) -> Result<Option<PickingInfo>, MapError> {
        let manifest = self.dataset();
        if !manifest.contains(pos) {
            return Ok(None);
        }

        let zoom = self.data_zoom;
        let x = lon_to_x(pos.lon, zoom);
        let y = lat_to_y(pos.lat, zoom);
        let tile = TileId {
            z: zoom,
            x: x.floor() as u32,
            y: y.floor() as u32,
        };

        let sample = |series: usize| match self.rasters.get(&(series, tile)) {
            Some(RasterTile::Ready(decoded)) => Ok(decoded.sample(x.fract(), y.fract())),
            _ => Err(MapError::TileNotReady),
        };

        let bracket = manifest.bracket(self.axis_value);
        let mut needed = bracket.needed();
        let lower = match needed.next() {
            Some(series) => sample(series)?,
            None => None,
        };
        let upper = match needed.next() {
            Some(series) => sample(series)?,
            None => None,
        };

        Ok(bracket.blend(lower, upper).map(|value| PickingInfo {
            value,
            unit: manifest.unit().to_string(),
        }))
    }

    /// Starts or polls the download of one raster. Returns `true` once it is settled.
    fn poll_raster(&mut self, series: usize, tile: TileId) -> bool {
        let key = (series, tile);
        if !self.rasters.contains_key(&key) {
            let url = self.tile_url(series, tile);
            let encoding = self.dataset().raster_encoding.clone();
            self.rasters
                .insert(key, RasterTile::Loading(fetch_raster(url, encoding)));
        }

        let Some(state) = self.rasters.get_mut(&key) else {
            return false;
        };
        if let RasterTile::Loading(promise) = state {
            match promise.ready() {
                Some(Ok(decoded)) => *state = RasterTile::Ready(decoded.clone()),
                Some(Err(e)) => {
                    error!("{:?}", e);
                    *state = RasterTile::Failed;
                }
                None => return false,
            }
        }
        true
    }

    fn ready_raster(&self, series: usize, tile: TileId) -> Option<&DecodedTile> {
        match self.rasters.get(&(series, tile)) {
            Some(RasterTile::Ready(decoded)) => Some(decoded.as_ref()),
            _ => None,
        }
    }

    /// Re-shades `tile` if the axis value moved since it was last colored.
    fn refresh_texture(&mut self, ctx: &egui::Context, tile: TileId, bracket: SeriesBracket) {
        if self
            .shaded
            .get(&tile)
            .is_some_and(|shaded| shaded.axis_value == self.axis_value)
        {
            return;
        }

        let mut needed = bracket.needed();
        let Some(lower) = needed.next().and_then(|s| self.ready_raster(s, tile)) else {
            return;
        };
        let upper = match needed.next() {
            Some(series) => match self.ready_raster(series, tile) {
                Some(upper) => Some(upper),
                None => return,
            },
            None => None,
        };

        let image = shade_tile(
            lower,
            upper,
            bracket,
            &self.specification.colormap,
            self.specification.colormap_gradient,
        );
        let axis_value = self.axis_value;
        match self.shaded.get_mut(&tile) {
            Some(shaded) => {
                shaded.texture.set(image, Default::default());
                shaded.axis_value = axis_value;
            }
            None => {
                let texture = ctx.load_texture(
                    format!(
                        "climate_{}_{}_{}_{}",
                        self.instance, tile.z, tile.x, tile.y
                    ),
                    image,
                    Default::default(),
                );
                self.shaded.insert(
                    tile,
                    ShadedTile {
                        axis_value,
                        texture,
                    },
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_decoded(&mut self, series: usize, tile: TileId, decoded: DecodedTile) {
        self.data_zoom = tile.z;
        self.rasters
            .insert((series, tile), RasterTile::Ready(Arc::new(decoded)));
    }
}

impl Layer for SeriesTileLayer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handle_input(&mut self, response: &Response, projection: &MapProjection) -> bool {
        let manifest = Arc::clone(&self.specification.dataset_specification);
        self.data_zoom = manifest.data_zoom(projection.zoom());

        let mut tiles: Vec<TileId> = visible_tile_ids(projection, self.data_zoom)
            .into_iter()
            .filter(|tile| manifest.intersects_tile(*tile))
            .collect();
        if tiles.len() > MAX_VISIBLE_TILES {
            warn!(
                "{} climate tiles in view at zoom {}, showing the first {}",
                tiles.len(),
                self.data_zoom,
                MAX_VISIBLE_TILES
            );
            tiles.truncate(MAX_VISIBLE_TILES);
        }

        let bracket = manifest.bracket(self.axis_value);
        let mut pending = false;
        for tile in &tiles {
            for series in bracket.needed() {
                pending |= !self.poll_raster(series, *tile);
            }
            self.refresh_texture(&response.ctx, *tile, bracket);
        }
        if pending {
            response.ctx.request_repaint();
        }

        self.visible_tiles = tiles
            .into_iter()
            .map(|tile| (tile, projection.tile_rect(tile.z, tile.x, tile.y)))
            .collect();
        false
    }

    fn draw(&self, painter: &Painter, _: &MapProjection) {
        for (tile, rect) in &self.visible_tiles {
            if let Some(shaded) = self.shaded.get(tile) {
                painter.image(
                    shaded.texture.id(),
                    *rect,
                    Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
                    Color32::WHITE,
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::colormap::{ColormapRegistry, ValueRange};
    use crate::manifest::tests::france_manifest;
    use crate::selection::Indicator;

    pub(crate) const PARIS: GeoPos = GeoPos {
        lon: 2.35,
        lat: 48.85,
    };
    pub(crate) const PARIS_TILE: TileId = TileId { z: 5, x: 16, y: 11 };

    pub(crate) fn tasmin0_layer() -> SeriesTileLayer {
        let colormap = ColormapRegistry::climate_defaults()
            .get(Indicator::Tasmin0)
            .cloned()
            .unwrap();
        SeriesTileLayer::new(SeriesTileLayerSpecification {
            dataset_specification: Arc::new(france_manifest()),
            colormap,
            colormap_gradient: true,
            tile_url_prefix: "http://127.0.0.1:8083/tilesets/CMCC/tasmin0_01/".to_string(),
        })
    }

    fn constant(value: f32) -> DecodedTile {
        DecodedTile::from_values(2, 2, &[Some(value); 4])
    }

    #[test]
    fn new_layer_starts_at_first_series_value() {
        let layer = tasmin0_layer();
        assert_eq!(layer.series_axis_value(), 1.5);
        assert_eq!(layer.colormap().range(), ValueRange { min: 0.0, max: 30.0 });
    }

    #[test]
    fn instances_are_unique() {
        assert_ne!(tasmin0_layer().instance(), tasmin0_layer().instance());
    }

    #[test]
    fn tile_urls_follow_series_patterns() {
        let layer = tasmin0_layer();
        assert_eq!(
            layer.tile_url(2, PARIS_TILE),
            "http://127.0.0.1:8083/tilesets/CMCC/tasmin0_01/2-7/5/16/11.webp"
        );
    }

    #[test]
    fn pick_outside_coverage_is_none() {
        let layer = tasmin0_layer();
        let new_york = GeoPos {
            lon: -74.0,
            lat: 40.7,
        };
        assert_eq!(layer.pick(new_york).unwrap(), None);
    }

    #[test]
    fn pick_before_tiles_load_is_not_ready() {
        let layer = tasmin0_layer();
        assert!(matches!(layer.pick(PARIS), Err(MapError::TileNotReady)));
    }

    #[test]
    fn pick_interpolates_along_the_axis() {
        let mut layer = tasmin0_layer();
        layer.insert_decoded(0, PARIS_TILE, constant(10.0));
        layer.insert_decoded(1, PARIS_TILE, constant(20.0));

        let info = layer.pick(PARIS).unwrap().unwrap();
        assert_eq!(info.value, 10.0);
        assert_eq!(info.unit, "days");

        layer.set_series_axis_value(1.75);
        assert_eq!(layer.pick(PARIS).unwrap().unwrap().value, 15.0);

        // 2.35 needs the 2.0 and 2.7 tilesets; 2.7 is missing.
        layer.set_series_axis_value(2.35);
        assert!(matches!(layer.pick(PARIS), Err(MapError::TileNotReady)));
    }

    #[test]
    fn pick_on_nodata_is_none() {
        let mut layer = tasmin0_layer();
        layer.insert_decoded(0, PARIS_TILE, DecodedTile::from_values(1, 1, &[None]));
        assert_eq!(layer.pick(PARIS).unwrap(), None);
    }

    #[test]
    fn decodes_rgba_rows() {
        let encoding = france_manifest().raster_encoding;
        let tile = DecodedTile::from_rgba(2, 1, &[0, 0x13, 0x88, 255, 0, 0, 0, 0], &encoding);
        assert_eq!(tile.sample(0.0, 0.0), Some(0.0));
        assert_eq!(tile.sample(0.9, 0.0), None);
    }

    #[test]
    fn shading_leaves_nodata_transparent() {
        let colormap = ColormapRegistry::climate_defaults()
            .get(Indicator::Tas)
            .cloned()
            .unwrap();
        let lower = DecodedTile::from_values(2, 1, &[Some(30.0), None]);
        let bracket = SeriesBracket {
            lower: 0,
            upper: 0,
            t: 0.0,
        };
        let image = shade_tile(&lower, None, bracket, &colormap, true);
        assert_eq!(image.size, [2, 1]);
        assert_eq!(image.pixels[0], colormap.color_at(30.0, true));
        assert_eq!(image.pixels[1], Color32::TRANSPARENT);
    }
}
