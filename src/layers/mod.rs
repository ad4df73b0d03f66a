//! Layers drawn on top of the base map, and the ordered stack that holds them.

use egui::{Painter, Response};
use std::any::Any;

use crate::MapError;
use crate::projection::MapProjection;

/// Raster tile overlay, used for the base map's reference layer.
pub mod tile;

/// Multi-channel series raster layer for climate datasets.
pub mod series;

/// A trait for map layers.
pub trait Layer: Any {
    /// Handles user input for the layer. Returns `true` if the input was handled and should not be
    /// processed further by the map.
    fn handle_input(&mut self, response: &Response, projection: &MapProjection) -> bool;

    /// Draws the layer.
    fn draw(&self, painter: &Painter, projection: &MapProjection);

    /// Gets the layer as a `dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Gets the layer as a mutable `dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Named layers in drawing order, bottom first.
#[derive(Default)]
pub struct LayerStack {
    entries: Vec<(String, Box<dyn Layer>)>,
}

impl LayerStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key == id)
    }

    /// Inserts `layer` directly beneath the layer `before`, or on top when `before` is `None`
    /// or not in the stack.
    pub fn insert(
        &mut self,
        id: &str,
        layer: Box<dyn Layer>,
        before: Option<&str>,
    ) -> Result<(), MapError> {
        if self.contains(id) {
            return Err(MapError::DuplicateLayer(id.to_string()));
        }
        let index = before
            .and_then(|anchor| self.position(anchor))
            .unwrap_or(self.entries.len());
        self.entries.insert(index, (id.to_string(), layer));
        Ok(())
    }

    /// Removes and returns the layer `id`.
    pub fn remove(&mut self, id: &str) -> Result<Box<dyn Layer>, MapError> {
        let index = self
            .position(id)
            .ok_or_else(|| MapError::LayerNotFound(id.to_string()))?;
        Ok(self.entries.remove(index).1)
    }

    /// Whether a layer named `id` is in the stack.
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// The layer `id`.
    pub fn get(&self, id: &str) -> Option<&dyn Layer> {
        self.entries
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, layer)| layer.as_ref())
    }

    /// The layer `id`, mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut dyn Layer> {
        self.entries
            .iter_mut()
            .find(|(key, _)| key == id)
            .map(|(_, layer)| layer.as_mut() as &mut dyn Layer)
    }

    /// The layer `id`, downcast to its concrete type.
    pub fn get_as<T: Layer>(&self, id: &str) -> Option<&T> {
        self.get(id).and_then(|layer| layer.as_any().downcast_ref())
    }

    /// The layer `id`, downcast mutably to its concrete type.
    pub fn get_as_mut<T: Layer>(&mut self, id: &str) -> Option<&mut T> {
        self.get_mut(id)
            .and_then(|layer| layer.as_any_mut().downcast_mut())
    }

    /// Layer ids, bottom first.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Layers bottom first.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &dyn Layer> {
        self.entries.iter().map(|(_, layer)| layer.as_ref())
    }

    /// Layers top first, for input handling.
    pub(crate) fn iter_mut_top_down(&mut self) -> impl Iterator<Item = &mut Box<dyn Layer>> {
        self.entries.iter_mut().rev().map(|(_, layer)| layer)
    }
}
