#![warn(missing_docs)]

//! A map viewer for exploring climate-impact indicators with `egui`.
//!
//! The crate provides a `Map` widget showing a slippy base map, a layer stack drawn on top of
//! it, and the orchestration that swaps a climate raster layer whenever the user picks another
//! model, indicator or month, and moves it along the warming-level axis.
//!
//! # Example
//!
//! ```no_run
//! use eframe::egui;
//! use climate_map_view::{app::ClimateExplorer, config::ExplorerConfig};
//!
//! fn main() -> eframe::Result {
//!     eframe::run_native(
//!         "Climate explorer",
//!         eframe::NativeOptions::default(),
//!         Box::new(|_cc| {
//!             let app = ClimateExplorer::new(ExplorerConfig::default())?;
//!             Ok(Box::new(app))
//!         }),
//!     )
//! }
//! ```

/// Application state and the `eframe::App` tying controls, map and orchestrator together.
pub mod app;
/// Per-indicator colormaps and legend swatches.
pub mod colormap;
/// Configuration traits and types for the map and the explorer.
pub mod config;
/// UI controls for the selection, legend and hover readout.
pub mod controls;
/// The map host surface used by the layer orchestration.
pub mod host;
/// Map layers.
pub mod layers;
/// Dataset manifests and their fetching.
pub mod manifest;
/// Climate layer swapping.
pub mod orchestrator;
/// Map projection.
pub mod projection;
/// The user's selection.
pub mod selection;

use eframe::egui;
use egui::{Color32, Rect, Response, Sense, Ui, Widget, pos2};
use eyre::WrapErr;
use log::{debug, error};
use once_cell::sync::Lazy;
use poll_promise::Promise;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::MapConfig;
use crate::host::{MapHost, PointerMoveHandler, PointerSubscriptions, SubscriptionId};
use crate::layers::{Layer, LayerStack};
use crate::projection::{GeoPos, MapProjection, lat_to_y, lon_to_x, world_tiles};
use crate::selection::Indicator;

// The size of a base map tile in pixels.
pub(crate) const TILE_SIZE: u32 = 256;
/// The minimum zoom level.
pub const MIN_ZOOM: u8 = 0;
/// The maximum zoom level.
pub const MAX_ZOOM: u8 = 19;

// Reuse the reqwest client for every download by making it a static variable.
static CLIENT: Lazy<reqwest::blocking::Client> = Lazy::new(|| {
    reqwest::blocking::Client::builder()
        .user_agent(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .expect("Failed to build reqwest client")
});

/// Errors that can occur while using the map and its climate layers.
#[derive(Error, Debug)]
pub enum MapError {
    /// An error occurred while making a web request.
    #[error("Connection error")]
    ConnectionError(#[from] reqwest::Error),

    /// A download answered with a non-success status.
    #[error("A download failed. HTTP Status: `{0}`")]
    DownloadError(String),

    /// The downloaded tile bytes could not be converted to an image.
    #[error("Unable to convert downloaded map tile bytes as image")]
    TileBytesConversionError(#[from] image::ImageError),

    /// A manifest or configuration document is not valid JSON or misses required keys.
    #[error("Unable to parse JSON document")]
    JsonParseError(#[from] serde_json::Error),

    /// The manifest parsed but describes something that cannot be displayed.
    #[error("Invalid dataset manifest: {0}")]
    InvalidManifest(String),

    /// An indicator offered by the UI has no colormap.
    #[error("No colormap registered for indicator `{0}`")]
    MissingColormap(Indicator),

    /// No layer with this id is attached to the map.
    #[error("No layer `{0}` on the map")]
    LayerNotFound(String),

    /// A layer with this id is already attached to the map.
    #[error("Layer `{0}` is already on the map")]
    DuplicateLayer(String),

    /// The tiles needed to answer a pick have not been decoded yet.
    #[error("Raster tile not loaded yet")]
    TileNotReady,

    /// The configuration file could not be read.
    #[error("Unable to read configuration")]
    ConfigIoError(#[from] std::io::Error),
}

/// Downloads `url` with the shared client.
pub(crate) fn download(url: &str) -> Result<Vec<u8>, MapError> {
    let response = CLIENT.get(url).send()?;
    if !response.status().is_success() {
        return Err(MapError::DownloadError(response.status().to_string()));
    }
    Ok(response.bytes()?.to_vec())
}

/// A unique identifier for a map tile.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TileId {
    /// The zoom level.
    pub z: u8,

    /// The x-coordinate of the tile.
    pub x: u32,

    /// The y-coordinate of the tile.
    pub y: u32,
}

/// Tiles of zoom level `zoom` that intersect the widget rectangle of `projection`.
pub(crate) fn visible_tile_ids(projection: &MapProjection, zoom: u8) -> Vec<TileId> {
    let rect = projection.widget_rect();
    let top_left = projection.unproject(rect.min);
    let bottom_right = projection.unproject(rect.max);

    // Edges landing on a tile boundary must not pull in the neighbouring tile.
    const EDGE: f64 = 1e-9;
    let last = world_tiles(zoom) as i64 - 1;
    let first_index = |v: f64| ((v + EDGE).floor() as i64).clamp(0, last) as u32;
    let last_index = |v: f64| ((v - EDGE).ceil() as i64 - 1).clamp(0, last) as u32;

    let x_min = first_index(lon_to_x(top_left.lon, zoom));
    let x_max = last_index(lon_to_x(bottom_right.lon, zoom)).max(x_min);
    let y_min = first_index(lat_to_y(top_left.lat, zoom));
    let y_max = last_index(lat_to_y(bottom_right.lat, zoom)).max(y_min);

    (x_min..=x_max)
        .flat_map(|x| (y_min..=y_max).map(move |y| TileId { z: zoom, x, y }))
        .collect()
}

/// The state of a base map tile in the cache.
pub(crate) enum Tile {
    /// The tile is being downloaded.
    Loading(Promise<Result<egui::ColorImage, Arc<eyre::Report>>>),

    /// The tile is in memory.
    Loaded(egui::TextureHandle),

    /// The tile failed to download.
    Failed(Arc<eyre::Report>),
}

fn fetch_tile_image(url: String) -> Promise<Result<egui::ColorImage, Arc<eyre::Report>>> {
    Promise::spawn_thread("download_tile", move || {
        let result: Result<_, eyre::Report> = (|| -> Result<_, MapError> {
            debug!("Downloading tile from {}", &url);
            let bytes = download(&url)?;
            let image = image::load_from_memory(&bytes)?.to_rgba8();
            let size = [image.width() as _, image.height() as _];
            Ok(egui::ColorImage::from_rgba_unmultiplied(
                size,
                image.as_raw(),
            ))
        })()
        .wrap_err_with(|| format!("Failed to download tile from {}", &url));

        result.map_err(Arc::new)
    })
}

/// Starts downloading `tile_id` if it is unknown and turns finished downloads into textures.
pub(crate) fn load_tile(
    tiles: &mut HashMap<TileId, Tile>,
    config: &dyn MapConfig,
    ctx: &egui::Context,
    tile_id: TileId,
) {
    let state = tiles
        .entry(tile_id)
        .or_insert_with(|| Tile::Loading(fetch_tile_image(config.tile_url(&tile_id))));

    if let Tile::Loading(promise) = state {
        match promise.ready() {
            Some(Ok(color_image)) => {
                let texture = ctx.load_texture(
                    format!("tile_{}_{}_{}", tile_id.z, tile_id.x, tile_id.y),
                    color_image.clone(),
                    Default::default(),
                );
                *state = Tile::Loaded(texture);
            }
            Some(Err(e)) => {
                error!("{:?}", e);
                *state = Tile::Failed(e.clone());
            }
            None => ctx.request_repaint(),
        }
    }
}

/// Paints a cached tile, or a placeholder while it is missing.
pub(crate) fn draw_tile(
    tiles: &HashMap<TileId, Tile>,
    painter: &egui::Painter,
    tile_id: &TileId,
    tile_rect: Rect,
    tint: Color32,
) {
    match tiles.get(tile_id) {
        Some(Tile::Loaded(texture)) => {
            painter.image(
                texture.id(),
                tile_rect,
                Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
                tint,
            );
        }
        Some(Tile::Failed(_)) => {
            painter.rect_stroke(
                tile_rect,
                0.0,
                egui::Stroke::new(1.0, Color32::from_rgba_unmultiplied(200, 60, 60, tint.a())),
                egui::StrokeKind::Inside,
            );
        }
        Some(Tile::Loading(_)) | None => {}
    }
}

/// The map widget.
///
/// It draws base map tiles from its [`MapConfig`], and on top of them a stack of named layers.
/// It implements [`MapHost`] so climate layers can be swapped in and out.
pub struct Map {
    /// The geographical center of the map.
    pub center: GeoPos,

    /// The zoom level of the map.
    pub zoom: u8,

    tiles: HashMap<TileId, Tile>,

    /// The geographical position under the mouse pointer, if any.
    pub mouse_pos: Option<GeoPos>,

    /// Configuration for the base map, such as the tile server URL.
    config: Box<dyn MapConfig>,

    layers: LayerStack,

    pointer_subscriptions: PointerSubscriptions,
}

impl Map {
    /// Creates a new `Map` widget.
    ///
    /// # Arguments
    ///
    /// * `config` - A type that implements `MapConfig`, which provides the base map tiles.
    pub fn new<C: MapConfig + 'static>(config: C) -> Self {
        let center = config.default_center();
        let zoom = config.default_zoom();
        Self {
            tiles: HashMap::new(),
            mouse_pos: None,
            config: Box::new(config),
            center,
            zoom,
            layers: LayerStack::new(),
            pointer_subscriptions: PointerSubscriptions::new(),
        }
    }

    /// Adds a layer on top of the others.
    pub fn add_layer(&mut self, id: &str, layer: impl Layer) -> Result<(), MapError> {
        self.layers.insert(id, Box::new(layer), None)
    }

    /// Gets a layer by id and type.
    pub fn layer<T: Layer>(&self, id: &str) -> Option<&T> {
        self.layers.get_as(id)
    }

    /// Gets a mutable layer by id and type.
    pub fn layer_mut<T: Layer>(&mut self, id: &str) -> Option<&mut T> {
        self.layers.get_as_mut(id)
    }

    /// The attached layers, bottom first.
    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// Calls the pointer-move handlers as if the pointer moved to `pos`.
    pub fn emit_pointer_move(&mut self, pos: GeoPos) {
        self.pointer_subscriptions.dispatch(Some(pos), &self.layers);
    }

    /// Tells the pointer-move handlers that the pointer left the map.
    pub fn emit_pointer_leave(&mut self) {
        self.pointer_subscriptions.dispatch(None, &self.layers);
    }

    /// Dispatches a move or a leave if the pointer changed since `previous`.
    fn notify_pointer(&mut self, previous: Option<GeoPos>) {
        match self.mouse_pos {
            Some(pos) if Some(pos) != previous => self.emit_pointer_move(pos),
            None if previous.is_some() => self.emit_pointer_leave(),
            _ => {}
        }
    }

    fn clamped_center(&self, center: GeoPos, zoom: u8, rect: &Rect) -> GeoPos {
        let world = world_tiles(zoom);
        let clamp_axis = |value: f64, view: f32| {
            let half = view as f64 / TILE_SIZE as f64 / 2.0;
            // A world smaller than the viewport stays centered.
            if half * 2.0 >= world {
                world / 2.0
            } else {
                value.clamp(half, world - half)
            }
        };
        let x = clamp_axis(lon_to_x(center.lon, zoom), rect.width());
        let y = clamp_axis(lat_to_y(center.lat, zoom), rect.height());
        GeoPos {
            lon: projection::x_to_lon(x, zoom),
            lat: projection::y_to_lat(y, zoom),
        }
    }

    /// Handles panning, zooming and the pointer position.
    fn handle_input(&mut self, ui: &Ui, rect: &Rect, response: &Response) {
        let projection = MapProjection::new(self.zoom, self.center, *rect);

        if response.dragged() {
            let dragged_center = projection.unproject(rect.center() - response.drag_delta());
            self.center = self.clamped_center(dragged_center, self.zoom, rect);
        }

        // Double-click zooms in on the clicked location.
        if response.double_clicked() {
            if let Some(pointer_pos) = response.interact_pointer_pos() {
                let new_zoom = (self.zoom + 1).clamp(MIN_ZOOM, MAX_ZOOM);
                if new_zoom != self.zoom {
                    self.center = projection.unproject(pointer_pos);
                    self.zoom = new_zoom;
                }
            }
        }

        let hover_pos = response.hover_pos().filter(|_| response.hovered());
        let Some(pointer_pos) = hover_pos else {
            self.mouse_pos = None;
            return;
        };
        self.mouse_pos = Some(projection.unproject(pointer_pos));

        let scroll = ui.input(|i| i.raw_scroll_delta.y);
        if scroll == 0.0 {
            return;
        }
        let old_zoom = self.zoom;
        let mut new_zoom = (self.zoom as i32 + scroll.signum() as i32)
            .clamp(MIN_ZOOM as i32, MAX_ZOOM as i32) as u8;

        // Reject zooming out past the point where the world is smaller than the widget.
        if scroll < 0.0 {
            let world_pixel_size = world_tiles(new_zoom) * TILE_SIZE as f64;
            if world_pixel_size < rect.width() as f64 || world_pixel_size < rect.height() as f64 {
                new_zoom = old_zoom;
            }
        }
        if new_zoom == old_zoom {
            return;
        }

        // Keep the geo-coordinate under the pointer in place.
        let target = projection.unproject(pointer_pos);
        let zoomed = MapProjection::new(new_zoom, self.center, *rect);
        let drift = zoomed.project(target) - pointer_pos;
        self.zoom = new_zoom;
        self.center = self.clamped_center(zoomed.unproject(rect.center() + drift), new_zoom, rect);
    }

    /// Draws the base tiles, the layers and the attribution.
    fn draw(&mut self, ui: &mut Ui, rect: &Rect) {
        let painter = ui.painter_at(*rect);
        painter.rect_filled(*rect, 0.0, Color32::from_rgb(220, 220, 220)); // Background

        let projection = MapProjection::new(self.zoom, self.center, *rect);
        for tile_id in visible_tile_ids(&projection, self.zoom) {
            load_tile(&mut self.tiles, self.config.as_ref(), ui.ctx(), tile_id);
            let tile_rect = projection.tile_rect(tile_id.z, tile_id.x, tile_id.y);
            draw_tile(&self.tiles, &painter, &tile_id, tile_rect, Color32::WHITE);
        }

        for layer in self.layers.iter() {
            layer.draw(&painter, &projection);
        }

        self.draw_attribution(ui, rect);
    }

    /// Draws the attribution text.
    fn draw_attribution(&self, ui: &mut Ui, rect: &Rect) {
        let Some(attribution) = self.config.attribution() else {
            return;
        };
        let bg_color = if ui.visuals().dark_mode {
            Color32::from_black_alpha(150)
        } else {
            Color32::from_white_alpha(150)
        };

        let frame = egui::Frame::NONE
            .inner_margin(egui::Margin::same(5))
            .fill(bg_color)
            .corner_radius(3.0);

        egui::Area::new(ui.id().with("attribution"))
            .fixed_pos(rect.left_bottom())
            .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(5.0, -5.0))
            .show(ui.ctx(), |ui| {
                frame.show(ui, |ui| {
                    ui.style_mut().override_text_style = Some(egui::TextStyle::Small);
                    ui.style_mut().wrap_mode = Some(egui::TextWrapMode::Extend);

                    if let Some(url) = self.config.attribution_url() {
                        ui.hyperlink_to(attribution, url);
                    } else {
                        ui.label(attribution);
                    }
                });
            });
    }
}

impl MapHost for Map {
    fn add_layer_before(
        &mut self,
        id: &str,
        layer: Box<dyn Layer>,
        before: Option<&str>,
    ) -> Result<(), MapError> {
        if let Some(anchor) = before.filter(|anchor| !self.layers.contains(anchor)) {
            debug!("Anchor layer `{}` missing, adding `{}` on top", anchor, id);
        }
        self.layers.insert(id, layer, before)
    }

    fn remove_layer(&mut self, id: &str) -> Result<Box<dyn Layer>, MapError> {
        self.layers.remove(id)
    }

    fn layer_dyn_mut(&mut self, id: &str) -> Option<&mut dyn Layer> {
        self.layers.get_mut(id)
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layers.contains(id)
    }

    fn on_pointer_move(&mut self, handler: PointerMoveHandler) -> SubscriptionId {
        self.pointer_subscriptions.subscribe(handler)
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        self.pointer_subscriptions.unsubscribe(subscription)
    }

    fn subscription_count(&self) -> usize {
        self.pointer_subscriptions.len()
    }
}

impl Widget for &mut Map {
    fn ui(self, ui: &mut Ui) -> Response {
        let (rect, response) =
            ui.allocate_exact_size(ui.available_size(), Sense::drag().union(Sense::click()));

        let projection = MapProjection::new(self.zoom, self.center, rect);
        let mut consumed = false;
        for layer in self.layers.iter_mut_top_down() {
            if layer.handle_input(&response, &projection) {
                consumed = true;
                break;
            }
        }

        let previous_pointer = self.mouse_pos;
        if consumed {
            self.mouse_pos = response.hover_pos().map(|p| projection.unproject(p));
        } else {
            self.handle_input(ui, &rect, &response);
        }
        self.notify_pointer(previous_pointer);

        self.draw(ui, &rect);

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenStreetMapConfig;
    use crate::layers::tests::BlankLayer;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_tile_id_to_url() {
        let config = OpenStreetMapConfig::default();
        let tile_id = TileId {
            z: 10,
            x: 524,
            y: 360,
        };
        assert_eq!(
            config.tile_url(&tile_id),
            "https://tile.openstreetmap.org/10/524/360.png"
        );
    }

    #[test]
    fn test_map_new() {
        let config = OpenStreetMapConfig::default();
        let default_center = config.default_center();
        let default_zoom = config.default_zoom();

        let map = Map::new(config);

        assert_eq!(map.center, default_center);
        assert_eq!(map.zoom, default_zoom);
        assert!(map.mouse_pos.is_none());
        assert!(map.tiles.is_empty());
        assert!(map.layers().is_empty());
        assert_eq!(map.subscription_count(), 0);
    }

    #[test]
    fn visible_tiles_cover_the_widget() {
        let rect = Rect::from_min_max(pos2(0.0, 0.0), pos2(512.0, 512.0));
        let projection = MapProjection::new(2, GeoPos::default(), rect);
        let tiles = visible_tile_ids(&projection, 2);
        assert_eq!(tiles.len(), 4);
        assert!(tiles.contains(&TileId { z: 2, x: 1, y: 1 }));
        assert!(tiles.contains(&TileId { z: 2, x: 2, y: 2 }));
    }

    #[test]
    fn visible_tiles_are_clamped_to_the_world() {
        let rect = Rect::from_min_max(pos2(0.0, 0.0), pos2(2048.0, 2048.0));
        let projection = MapProjection::new(1, GeoPos::default(), rect);
        let tiles = visible_tile_ids(&projection, 1);
        assert_eq!(tiles.len(), 4);
        assert!(tiles.iter().all(|t| t.x <= 1 && t.y <= 1));
    }

    #[test]
    fn host_layers_and_subscriptions() {
        let mut map = Map::new(OpenStreetMapConfig::default());
        map.add_layer("water", BlankLayer).unwrap();
        map.add_layer_before("climate-layer", Box::new(BlankLayer), Some("water"))
            .unwrap();
        assert_eq!(
            map.layers().ids().collect::<Vec<_>>(),
            vec!["climate-layer", "water"]
        );
        assert!(map.layer::<BlankLayer>("climate-layer").is_some());
        assert!(map.remove_layer("climate-layer").is_ok());
        assert!(matches!(
            map.remove_layer("climate-layer"),
            Err(MapError::LayerNotFound(_))
        ));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let subscription = map.on_pointer_move(Box::new(move |pos, layers| {
            sink.borrow_mut().push((pos, layers.len()));
        }));
        map.emit_pointer_move(GeoPos { lon: 2.0, lat: 48.0 });
        assert_eq!(
            seen.borrow().as_slice(),
            &[(Some(GeoPos { lon: 2.0, lat: 48.0 }), 1)]
        );

        assert!(map.unsubscribe(subscription));
        map.emit_pointer_move(GeoPos::default());
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(map.subscription_count(), 0);
    }

    #[test]
    fn pointer_changes_are_dispatched_once() {
        let mut map = Map::new(OpenStreetMapConfig::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        map.on_pointer_move(Box::new(move |pos, _| sink.borrow_mut().push(pos)));

        let paris = GeoPos { lon: 2.35, lat: 48.85 };
        map.mouse_pos = Some(paris);
        map.notify_pointer(None);
        map.notify_pointer(Some(paris));
        map.mouse_pos = None;
        map.notify_pointer(Some(paris));
        map.notify_pointer(None);

        assert_eq!(seen.borrow().as_slice(), &[Some(paris), None]);
    }
}
