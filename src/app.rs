//! The climate explorer application: a side panel of controls next to the map.

use eframe::egui;
use egui::TextureHandle;
use log::{debug, info};

#[cfg(feature = "openstreetmap")]
use crate::config::OpenStreetMapConfig;
use crate::Map;
use crate::MapError;
use crate::colormap::ColormapRegistry;
use crate::config::{ExplorerConfig, TemplateMapConfig};
use crate::controls;
use crate::layers::tile::TileLayer;
use crate::manifest::{HttpManifestFetcher, ManifestFetcher};
use crate::orchestrator::LayerOrchestrator;
use crate::selection::{Indicator, Selection, SelectionChange};

/// Map, selection and climate layer orchestration in one `eframe` app.
pub struct ClimateExplorer<F: ManifestFetcher = HttpManifestFetcher> {
    map: Map,
    selection: Selection,
    orchestrator: LayerOrchestrator<F>,
    legend_texture: Option<(Indicator, TextureHandle)>,
}

impl ClimateExplorer {
    /// Builds the explorer and starts loading the initial selection.
    ///
    /// Fails if an indicator offered by the controls has no colormap.
    pub fn new(config: ExplorerConfig) -> Result<Self, MapError> {
        Self::with_fetcher(
            config,
            HttpManifestFetcher,
            ColormapRegistry::climate_defaults(),
        )
    }
}

impl<F: ManifestFetcher> ClimateExplorer<F> {
    /// Builds the explorer with a custom manifest fetcher and colormaps.
    pub fn with_fetcher(
        config: ExplorerConfig,
        fetcher: F,
        colormaps: ColormapRegistry,
    ) -> Result<Self, MapError> {
        colormaps.ensure_covers(&Indicator::ALL)?;

        let mut map = base_map(&config);
        if let Some(overlay) = &config.reference_overlay {
            let mut tiles = TemplateMapConfig::new(&overlay.url_template);
            if let Some(attribution) = &overlay.attribution {
                tiles = tiles.with_attribution(attribution);
            }
            map.add_layer(
                &config.anchor_layer_id,
                TileLayer::new(tiles).with_opacity(overlay.opacity),
            )?;
        }

        let selection = config.initial_selection;
        let mut orchestrator = LayerOrchestrator::new(fetcher, colormaps, &config);
        orchestrator.refresh_layer(&mut map, &selection);
        info!(
            "Climate explorer started on {} with {}",
            config.tileset_origin,
            selection.tile_url_prefix()
        );

        Ok(Self {
            map,
            selection,
            orchestrator,
            legend_texture: None,
        })
    }

    /// The current selection.
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// The map widget.
    pub fn map(&self) -> &Map {
        &self.map
    }

    /// The climate layer orchestration.
    pub fn orchestrator(&self) -> &LayerOrchestrator<F> {
        &self.orchestrator
    }

    /// Reacts to a control having changed `change` in the selection.
    pub fn apply(&mut self, change: SelectionChange) {
        debug!("Selection changed: {:?}", change);
        if change.needs_new_layer() {
            self.orchestrator
                .refresh_layer(&mut self.map, &self.selection);
        } else {
            self.orchestrator
                .set_warming_level(&mut self.map, self.selection.warming_level);
        }
    }

    /// Replaces the selection, swapping or moving the climate layer as needed.
    pub fn select(&mut self, selection: Selection) {
        let previous = std::mem::replace(&mut self.selection, selection);
        if previous.tile_url_prefix() != selection.tile_url_prefix() {
            self.apply(SelectionChange::Indicator);
        } else if previous.warming_level != selection.warming_level {
            self.apply(SelectionChange::WarmingLevel);
        }
    }

    /// Applies finished background work to the map.
    pub fn poll(&mut self) {
        self.orchestrator.poll(&mut self.map);
    }

    fn legend_texture(&mut self, ctx: &egui::Context) -> Option<TextureHandle> {
        let Some(legend) = self.orchestrator.legend() else {
            self.legend_texture = None;
            return None;
        };
        match &self.legend_texture {
            Some((indicator, texture)) if *indicator == legend.indicator => Some(texture.clone()),
            _ => {
                let texture =
                    ctx.load_texture("climate_legend", legend.swatch.clone(), Default::default());
                self.legend_texture = Some((legend.indicator, texture.clone()));
                Some(texture)
            }
        }
    }
}

fn base_map(config: &ExplorerConfig) -> Map {
    #[cfg(feature = "openstreetmap")]
    let map = Map::new(
        OpenStreetMapConfig::default().with_view(config.default_center, config.default_zoom),
    );

    #[cfg(not(feature = "openstreetmap"))]
    let map = {
        let mut map = Map::new(
            TemplateMapConfig::new("https://tile.openstreetmap.org/{z}/{x}/{y}.png")
                .with_attribution("© OpenStreetMap contributors"),
        );
        map.center = config.default_center;
        map.zoom = config.default_zoom;
        map
    };

    map
}

impl<F: ManifestFetcher> eframe::App for ClimateExplorer<F> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll();
        if self.orchestrator.is_loading() {
            ctx.request_repaint();
        }

        let legend_texture = self.legend_texture(ctx);
        let mut change = None;
        egui::SidePanel::left("controls")
            .resizable(false)
            .default_width(280.0)
            .show(ctx, |ui| {
                ui.heading("Climate explorer");
                change = controls::selection_panel(ui, &mut self.selection);
                ui.separator();

                if self.orchestrator.is_loading() {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label("Loading dataset…");
                    });
                } else if let (Some(legend), Some(texture)) =
                    (self.orchestrator.legend(), &legend_texture)
                {
                    controls::legend_panel(ui, legend, texture);
                } else {
                    ui.weak("No data for this selection");
                }
                controls::hover_readout(ui, self.orchestrator.hover().as_ref());
                ui.separator();
                controls::info_drawer(ui);
            });

        if let Some(change) = change {
            self.apply(change);
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                ui.add(&mut self.map);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MapHost;
    use crate::layers::series::SeriesTileLayer;
    use crate::orchestrator::CLIMATE_LAYER_ID;
    use crate::orchestrator::tests::FakeFetcher;
    use crate::selection::{Model, Month, WarmingLevel};

    fn explorer(config: ExplorerConfig) -> (ClimateExplorer<FakeFetcher>, FakeFetcher) {
        let fetcher = FakeFetcher::default();
        let app = ClimateExplorer::with_fetcher(
            config,
            fetcher.clone(),
            ColormapRegistry::climate_defaults(),
        )
        .unwrap();
        (app, fetcher)
    }

    #[test]
    fn starts_loading_the_initial_selection() {
        let (mut app, fetcher) = explorer(ExplorerConfig::default());
        assert_eq!(fetcher.count(), 1);
        assert_eq!(
            fetcher.url(0),
            "http://127.0.0.1:8083/tilesets/CMCC/dju_01/index.json"
        );
        assert_eq!(app.map().layers().ids().collect::<Vec<_>>(), vec!["water"]);

        fetcher.succeed(0);
        app.poll();
        assert_eq!(
            app.map().layers().ids().collect::<Vec<_>>(),
            vec![CLIMATE_LAYER_ID, "water"]
        );
    }

    #[test]
    fn missing_colormap_fails_construction() {
        let mut colormaps = ColormapRegistry::climate_defaults();
        colormaps.remove(Indicator::Rsds);
        let result = ClimateExplorer::with_fetcher(
            ExplorerConfig::default(),
            FakeFetcher::default(),
            colormaps,
        );
        assert!(matches!(
            result,
            Err(MapError::MissingColormap(Indicator::Rsds))
        ));
    }

    #[test]
    fn without_overlay_the_layer_goes_on_top() {
        let config = ExplorerConfig {
            reference_overlay: None,
            ..Default::default()
        };
        let (mut app, fetcher) = explorer(config);
        assert!(app.map().layers().is_empty());
        fetcher.succeed(0);
        app.poll();
        assert_eq!(
            app.map().layers().ids().collect::<Vec<_>>(),
            vec![CLIMATE_LAYER_ID]
        );
    }

    #[test]
    fn only_tileset_changes_fetch() {
        let (mut app, fetcher) = explorer(ExplorerConfig::default());
        fetcher.succeed(0);
        app.poll();

        let warmer = Selection {
            warming_level: WarmingLevel::new(2.7),
            ..*app.selection()
        };
        app.select(warmer);
        assert_eq!(fetcher.count(), 1);
        let layer = app
            .map()
            .layer::<SeriesTileLayer>(CLIMATE_LAYER_ID)
            .unwrap();
        assert_eq!(layer.series_axis_value(), 2.7);

        let other = Selection {
            model: Model::Ipsl,
            month: Month::new(8).unwrap(),
            ..warmer
        };
        app.select(other);
        assert_eq!(fetcher.count(), 2);
        assert_eq!(
            fetcher.url(1),
            "http://127.0.0.1:8083/tilesets/IPSL/dju_08/index.json"
        );
        assert!(!app.map().has_layer(CLIMATE_LAYER_ID));

        fetcher.succeed(1);
        app.poll();
        let layer = app
            .map()
            .layer::<SeriesTileLayer>(CLIMATE_LAYER_ID)
            .unwrap();
        assert_eq!(layer.series_axis_value(), 2.7);
        assert_eq!(app.map().subscription_count(), 1);
    }

    #[test]
    fn apply_routes_changes() {
        let (mut app, fetcher) = explorer(ExplorerConfig::default());
        app.selection.indicator = Indicator::Ws;
        app.apply(SelectionChange::Indicator);
        assert_eq!(fetcher.count(), 2);
        app.selection.warming_level = WarmingLevel::new(4.0);
        app.apply(SelectionChange::WarmingLevel);
        assert_eq!(fetcher.count(), 2);
        assert_eq!(app.orchestrator().warming_level(), WarmingLevel::new(4.0));
    }
}
