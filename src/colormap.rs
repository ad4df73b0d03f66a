//! Value-range to color mapping for climate layers and their legends.

use egui::{Color32, ColorImage};
use std::collections::HashMap;

use crate::MapError;
use crate::selection::Indicator;

/// A color at a normalized position of a colormap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorStop {
    /// Position in `[0, 1]`.
    pub position: f32,
    /// Unmultiplied RGBA.
    pub rgba: [u8; 4],
}

impl ColorStop {
    const fn opaque(position: f32, r: u8, g: u8, b: u8) -> Self {
        Self {
            position,
            rgba: [r, g, b, 255],
        }
    }
}

/// A named list of color stops, independent of any value range.
#[derive(Clone, Debug, PartialEq)]
pub struct ColormapDescription {
    name: String,
    stops: Vec<ColorStop>,
}

const TURBO_STOPS: [ColorStop; 11] = [
    ColorStop::opaque(0.0, 48, 18, 59),
    ColorStop::opaque(0.1, 65, 69, 171),
    ColorStop::opaque(0.2, 70, 117, 237),
    ColorStop::opaque(0.3, 57, 162, 252),
    ColorStop::opaque(0.4, 27, 207, 212),
    ColorStop::opaque(0.5, 36, 236, 166),
    ColorStop::opaque(0.6, 97, 252, 108),
    ColorStop::opaque(0.7, 164, 252, 59),
    ColorStop::opaque(0.8, 254, 185, 56),
    ColorStop::opaque(0.9, 235, 93, 26),
    ColorStop::opaque(1.0, 122, 4, 3),
];

impl ColormapDescription {
    /// Creates a description. Stops are sorted by position.
    pub fn new(name: impl Into<String>, mut stops: Vec<ColorStop>) -> Self {
        stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        Self {
            name: name.into(),
            stops,
        }
    }

    /// The rainbow-like "turbo" description.
    pub fn turbo() -> Self {
        Self::new("turbo", TURBO_STOPS.to_vec())
    }

    /// Makes the stop at `index` fully transparent, so values around it fade out of the map.
    pub fn with_transparent_stop(mut self, index: usize) -> Self {
        if let Some(stop) = self.stops.get_mut(index) {
            stop.rgba[3] = 0;
        }
        self
    }

    /// The description's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The color stops, sorted by position.
    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }
}

/// Inclusive value range a colormap is stretched over.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueRange {
    /// Value mapped to the first stop.
    pub min: f32,
    /// Value mapped to the last stop.
    pub max: f32,
}

/// A colormap bound to a value range.
#[derive(Clone, Debug, PartialEq)]
pub struct Colormap {
    description: ColormapDescription,
    range: ValueRange,
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round() as u8
}

impl Colormap {
    /// Binds a description to a value range.
    pub fn from_description(description: ColormapDescription, range: ValueRange) -> Self {
        Self { description, range }
    }

    /// The value range.
    pub fn range(&self) -> ValueRange {
        self.range
    }

    /// The underlying description.
    pub fn description(&self) -> &ColormapDescription {
        &self.description
    }

    fn normalize(&self, value: f32) -> f32 {
        let span = self.range.max - self.range.min;
        if span == 0.0 {
            return 0.0;
        }
        ((value - self.range.min) / span).clamp(0.0, 1.0)
    }

    /// Unmultiplied RGBA for `value`. With `gradient` off, colors step at each stop instead
    /// of blending.
    pub fn rgba_at(&self, value: f32, gradient: bool) -> [u8; 4] {
        let stops = self.description.stops();
        let Some(first) = stops.first() else {
            return [0, 0, 0, 0];
        };
        let t = self.normalize(value);
        if t <= first.position {
            return first.rgba;
        }

        for pair in stops.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if t <= hi.position {
                if !gradient {
                    return if t == hi.position { hi.rgba } else { lo.rgba };
                }
                let width = hi.position - lo.position;
                let f = if width > 0.0 {
                    (t - lo.position) / width
                } else {
                    1.0
                };
                return [
                    lerp(lo.rgba[0], hi.rgba[0], f),
                    lerp(lo.rgba[1], hi.rgba[1], f),
                    lerp(lo.rgba[2], hi.rgba[2], f),
                    lerp(lo.rgba[3], hi.rgba[3], f),
                ];
            }
        }
        stops[stops.len() - 1].rgba
    }

    /// Color for `value`.
    pub fn color_at(&self, value: f32, gradient: bool) -> Color32 {
        let [r, g, b, a] = self.rgba_at(value, gradient);
        Color32::from_rgba_unmultiplied(r, g, b, a)
    }

    /// Horizontal legend swatch running from `min` on the left to `max` on the right.
    pub fn swatch(&self, width: usize, height: usize) -> ColorImage {
        let width = width.max(1);
        let height = height.max(1);
        let row: Vec<[u8; 4]> = (0..width)
            .map(|x| {
                let t = if width == 1 {
                    0.0
                } else {
                    x as f32 / (width - 1) as f32
                };
                let value = self.range.min + t * (self.range.max - self.range.min);
                self.rgba_at(value, true)
            })
            .collect();

        let mut pixels = Vec::with_capacity(width * height * 4);
        for _ in 0..height {
            for rgba in &row {
                pixels.extend_from_slice(rgba);
            }
        }
        ColorImage::from_rgba_unmultiplied([width, height], &pixels)
    }
}

/// The colormap of every indicator.
#[derive(Clone, Debug, Default)]
pub struct ColormapRegistry {
    colormaps: HashMap<Indicator, Colormap>,
}

impl ColormapRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The ranges used for the published climate tilesets.
    pub fn climate_defaults() -> Self {
        let turbo = ColormapDescription::turbo;
        let range = |min, max| ValueRange { min, max };

        let mut registry = Self::new();
        registry.insert(
            Indicator::Dju,
            Colormap::from_description(turbo().with_transparent_stop(1), range(0.0, 600.0)),
        );
        registry.insert(
            Indicator::Tas,
            Colormap::from_description(turbo(), range(-10.0, 30.0)),
        );
        registry.insert(
            Indicator::Tasmin0,
            Colormap::from_description(turbo(), range(0.0, 30.0)),
        );
        registry.insert(
            Indicator::Tasmax30,
            Colormap::from_description(turbo(), range(0.0, 30.0)),
        );
        registry.insert(
            Indicator::Rsds,
            Colormap::from_description(turbo(), range(0.0, 300.0)),
        );
        registry.insert(
            Indicator::Ws,
            Colormap::from_description(turbo(), range(0.0, 8.0)),
        );
        registry
    }

    /// Sets the colormap of an indicator, returning the previous one.
    pub fn insert(&mut self, indicator: Indicator, colormap: Colormap) -> Option<Colormap> {
        self.colormaps.insert(indicator, colormap)
    }

    /// Removes the colormap of an indicator.
    pub fn remove(&mut self, indicator: Indicator) -> Option<Colormap> {
        self.colormaps.remove(&indicator)
    }

    /// The colormap of an indicator, if registered.
    pub fn get(&self, indicator: Indicator) -> Option<&Colormap> {
        self.colormaps.get(&indicator)
    }

    /// Fails with the first indicator lacking a colormap.
    pub fn ensure_covers(&self, indicators: &[Indicator]) -> Result<(), MapError> {
        match indicators.iter().find(|i| !self.colormaps.contains_key(i)) {
            Some(missing) => Err(MapError::MissingColormap(*missing)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stop() -> Colormap {
        Colormap::from_description(
            ColormapDescription::new(
                "bw",
                vec![
                    ColorStop::opaque(1.0, 255, 255, 255),
                    ColorStop::opaque(0.0, 0, 0, 0),
                ],
            ),
            ValueRange {
                min: -10.0,
                max: 30.0,
            },
        )
    }

    #[test]
    fn stops_are_sorted_on_construction() {
        let colormap = two_stop();
        assert_eq!(colormap.description().stops()[0].position, 0.0);
    }

    #[test]
    fn gradient_interpolates_and_clamps() {
        let colormap = two_stop();
        assert_eq!(colormap.rgba_at(-10.0, true), [0, 0, 0, 255]);
        assert_eq!(colormap.rgba_at(30.0, true), [255, 255, 255, 255]);
        assert_eq!(colormap.rgba_at(10.0, true), [128, 128, 128, 255]);
        assert_eq!(colormap.rgba_at(-100.0, true), [0, 0, 0, 255]);
        assert_eq!(colormap.rgba_at(100.0, true), [255, 255, 255, 255]);
    }

    #[test]
    fn stepped_mode_keeps_lower_stop() {
        let colormap = two_stop();
        assert_eq!(colormap.rgba_at(29.0, false), [0, 0, 0, 255]);
        assert_eq!(colormap.rgba_at(30.0, false), [255, 255, 255, 255]);
    }

    #[test]
    fn degree_days_fade_out_near_zero() {
        let registry = ColormapRegistry::climate_defaults();
        let dju = registry.get(Indicator::Dju).unwrap();
        // Second turbo stop sits at 10% of [0, 600].
        assert_eq!(dju.rgba_at(60.0, true)[3], 0);
        assert_eq!(dju.rgba_at(600.0, true)[3], 255);
    }

    #[test]
    fn climate_defaults_ranges() {
        let registry = ColormapRegistry::climate_defaults();
        let range = |i| registry.get(i).unwrap().range();
        assert_eq!(range(Indicator::Dju), ValueRange { min: 0.0, max: 600.0 });
        assert_eq!(range(Indicator::Tas), ValueRange { min: -10.0, max: 30.0 });
        assert_eq!(range(Indicator::Rsds), ValueRange { min: 0.0, max: 300.0 });
        assert_eq!(range(Indicator::Ws), ValueRange { min: 0.0, max: 8.0 });
        assert!(registry.ensure_covers(&Indicator::ALL).is_ok());
        for indicator in Indicator::ALL {
            assert_eq!(registry.get(indicator).unwrap().description().name(), "turbo");
        }
        assert_eq!(two_stop().description().name(), "bw");
    }

    #[test]
    fn ensure_covers_reports_missing_indicator() {
        let mut registry = ColormapRegistry::climate_defaults();
        registry.remove(Indicator::Tas);
        match registry.ensure_covers(&Indicator::ALL) {
            Err(MapError::MissingColormap(indicator)) => assert_eq!(indicator, Indicator::Tas),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn swatch_spans_the_range() {
        let swatch = two_stop().swatch(5, 2);
        assert_eq!(swatch.size, [5, 2]);
        assert_eq!(swatch.pixels[0], Color32::BLACK);
        assert_eq!(swatch.pixels[4], Color32::WHITE);
        assert_eq!(swatch.pixels[5], Color32::BLACK);
    }
}
