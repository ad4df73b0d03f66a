//! Map projection.
//!
//! Web Mercator helpers shared by the map widget, the base tiles and the climate raster layers.

use egui::{Pos2, Rect};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::TILE_SIZE;

/// Half the extent of the Web Mercator plane, in metres.
pub const MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// A geographical position in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    /// Longitude.
    pub lon: f64,
    /// Latitude.
    pub lat: f64,
}

impl From<(f64, f64)> for GeoPos {
    fn from((lon, lat): (f64, f64)) -> Self {
        Self { lon, lat }
    }
}

impl GeoPos {
    /// Converts the position to EPSG:3857 metres. (x, y)
    pub fn to_mercator(self) -> (f64, f64) {
        let x = self.lon.to_radians() * 6_378_137.0;
        let y = (PI / 4.0 + self.lat.to_radians() / 2.0).tan().ln() * 6_378_137.0;
        (x, y)
    }
}

/// Converts longitude to the fractional x-coordinate of a tile at a given zoom level.
pub(crate) fn lon_to_x(lon: f64, zoom: u8) -> f64 {
    (lon + 180.0) / 360.0 * world_tiles(zoom)
}

/// Converts latitude to the fractional y-coordinate of a tile at a given zoom level.
pub(crate) fn lat_to_y(lat: f64, zoom: u8) -> f64 {
    (1.0 - lat.to_radians().tan().asinh() / PI) / 2.0 * world_tiles(zoom)
}

/// Converts a fractional tile x-coordinate back to longitude.
pub(crate) fn x_to_lon(x: f64, zoom: u8) -> f64 {
    x / world_tiles(zoom) * 360.0 - 180.0
}

/// Converts a fractional tile y-coordinate back to latitude.
pub(crate) fn y_to_lat(y: f64, zoom: u8) -> f64 {
    let n = PI - 2.0 * PI * y / world_tiles(zoom);
    n.sinh().atan().to_degrees()
}

/// Number of tiles along one axis of the world at `zoom`.
pub(crate) fn world_tiles(zoom: u8) -> f64 {
    2.0_f64.powi(zoom as i32)
}

/// A helper for converting between geographical and screen coordinates.
#[derive(Clone, Debug)]
pub struct MapProjection {
    zoom: u8,
    center: GeoPos,
    widget_rect: Rect,
}

impl MapProjection {
    /// Creates a new `MapProjection`.
    pub fn new(zoom: u8, center: GeoPos, widget_rect: Rect) -> Self {
        Self {
            zoom,
            center,
            widget_rect,
        }
    }

    /// The zoom level the projection was built for.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// The screen rectangle of the map widget.
    pub fn widget_rect(&self) -> Rect {
        self.widget_rect
    }

    /// Projects a geographical coordinate to a screen coordinate.
    pub fn project(&self, geo_pos: GeoPos) -> Pos2 {
        let dx = (lon_to_x(geo_pos.lon, self.zoom) - lon_to_x(self.center.lon, self.zoom))
            * TILE_SIZE as f64;
        let dy = (lat_to_y(geo_pos.lat, self.zoom) - lat_to_y(self.center.lat, self.zoom))
            * TILE_SIZE as f64;

        self.widget_rect.center() + egui::vec2(dx as f32, dy as f32)
    }

    /// Un-projects a screen coordinate to a geographical coordinate.
    pub fn unproject(&self, screen_pos: Pos2) -> GeoPos {
        let offset = screen_pos - self.widget_rect.center();

        let target_x = lon_to_x(self.center.lon, self.zoom) + offset.x as f64 / TILE_SIZE as f64;
        let target_y = lat_to_y(self.center.lat, self.zoom) + offset.y as f64 / TILE_SIZE as f64;

        GeoPos {
            lon: x_to_lon(target_x, self.zoom),
            lat: y_to_lat(target_y, self.zoom),
        }
    }

    /// Screen rectangle covered by the tile `(x, y)` of zoom level `zoom`, which may differ
    /// from the projection's own zoom.
    pub fn tile_rect(&self, zoom: u8, x: u32, y: u32) -> Rect {
        let top_left = GeoPos {
            lon: x_to_lon(x as f64, zoom),
            lat: y_to_lat(y as f64, zoom),
        };
        let bottom_right = GeoPos {
            lon: x_to_lon(x as f64 + 1.0, zoom),
            lat: y_to_lat(y as f64 + 1.0, zoom),
        };
        Rect::from_min_max(self.project(top_left), self.project(bottom_right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::pos2;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn coord_conversion_roundtrip() {
        // Paris and Lyon.
        for (lon, lat) in [(2.3522, 48.8566), (4.8357, 45.764)] {
            let zoom = 9;
            let final_lon = x_to_lon(lon_to_x(lon, zoom), zoom);
            let final_lat = y_to_lat(lat_to_y(lat, zoom), zoom);
            assert!((lon - final_lon).abs() < EPSILON);
            assert!((lat - final_lat).abs() < EPSILON);
        }
    }

    #[test]
    fn tile_coordinates_at_known_points() {
        assert!((lon_to_x(0.0, 8) - 128.0).abs() < EPSILON);
        assert!((lat_to_y(0.0, 8) - 128.0).abs() < EPSILON);
        assert!((x_to_lon(0.0, 0) + 180.0).abs() < EPSILON);
        assert!((y_to_lat(0.0, 0) - 85.0511287798).abs() < 1e-6);
        assert!((y_to_lat(1.0, 0) + 85.0511287798).abs() < 1e-6);
    }

    #[test]
    fn mercator_of_origin_and_antimeridian() {
        let (x, y) = GeoPos { lon: 0.0, lat: 0.0 }.to_mercator();
        assert!(x.abs() < 1e-6 && y.abs() < 1e-6);

        let (x, _) = GeoPos {
            lon: 180.0,
            lat: 0.0,
        }
        .to_mercator();
        assert!((x - MERCATOR_HALF_EXTENT).abs() < 1e-3);
    }

    #[test]
    fn project_unproject_center() {
        let center = GeoPos {
            lon: 4.326,
            lat: 46.487,
        };
        let rect = Rect::from_min_max(pos2(0.0, 0.0), pos2(800.0, 600.0));
        let projection = MapProjection::new(5, center, rect);

        let screen = projection.project(center);
        assert!((screen.x - 400.0).abs() < 1e-3);
        assert!((screen.y - 300.0).abs() < 1e-3);

        let back = projection.unproject(pos2(400.0, 300.0));
        assert!((back.lon - center.lon).abs() < 1e-6);
        assert!((back.lat - center.lat).abs() < 1e-6);
    }

    #[test]
    fn tile_rect_scales_with_zoom_difference() {
        let rect = Rect::from_min_max(pos2(0.0, 0.0), pos2(512.0, 512.0));
        let projection = MapProjection::new(3, GeoPos::default(), rect);

        let same_zoom = projection.tile_rect(3, 4, 4);
        assert!((same_zoom.width() - TILE_SIZE as f32).abs() < 1e-2);

        let deeper = projection.tile_rect(4, 8, 8);
        assert!((deeper.width() - TILE_SIZE as f32 / 2.0).abs() < 1e-2);
    }
}
