//! A layer of plain raster tiles drawn over the base map.

use egui::{Color32, Painter, Rect, Response};
use std::{any::Any, collections::HashMap};

use crate::{
    Tile, TileId, config::MapConfig, draw_tile, layers::Layer, load_tile,
    projection::MapProjection, visible_tile_ids,
};

/// A layer that fetches and renders raster tiles from a [`MapConfig`], e.g. the base map's
/// water and label overlay that climate data is slotted beneath.
pub struct TileLayer {
    tiles: HashMap<TileId, Tile>,
    visible_tiles: Vec<(TileId, Rect)>,
    /// Opacity applied to the tile images, 0 to 1.
    pub opacity: f32,
    config: Box<dyn MapConfig>,
}

impl TileLayer {
    /// Creates a new tile layer with the given tile source.
    pub fn new(config: impl MapConfig + 'static) -> Self {
        Self {
            tiles: Default::default(),
            visible_tiles: Default::default(),
            opacity: 1.0,
            config: Box::new(config),
        }
    }

    /// Sets the opacity.
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    fn tint(&self) -> Color32 {
        Color32::from_white_alpha((self.opacity.clamp(0.0, 1.0) * 255.0).round() as u8)
    }
}

impl Layer for TileLayer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handle_input(&mut self, response: &Response, projection: &MapProjection) -> bool {
        self.visible_tiles = visible_tile_ids(projection, projection.zoom())
            .into_iter()
            .map(|id| (id, projection.tile_rect(id.z, id.x, id.y)))
            .collect();
        for (tile_id, _) in &self.visible_tiles {
            load_tile(
                &mut self.tiles,
                self.config.as_ref(),
                &response.ctx,
                *tile_id,
            );
        }
        false
    }

    fn draw(&self, painter: &Painter, _: &MapProjection) {
        let tint = self.tint();
        for (tile_id, tile_rect) in &self.visible_tiles {
            draw_tile(&self.tiles, painter, tile_id, *tile_rect, tint);
        }
    }
}
