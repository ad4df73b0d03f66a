//! Swapping the climate layer when the selection changes.
//!
//! A selection of model, indicator and month names one tileset. [`LayerOrchestrator`] removes
//! the climate layer showing the previous tileset, fetches the manifest of the new one in the
//! background, and once it arrives attaches a fresh [`SeriesTileLayer`] beneath the anchor
//! layer together with a pointer subscription that keeps the hover value up to date. Moving
//! the warming level only moves the attached layer along its series axis.
//!
//! Every call to [`LayerOrchestrator::refresh_layer`] starts a new generation. A manifest that
//! arrives for an older generation is dropped, so the layer on the map always belongs to the
//! latest selection.

use egui::ColorImage;
use log::{debug, error, warn};
use poll_promise::Promise;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::colormap::{ColormapRegistry, ValueRange};
use crate::config::ExplorerConfig;
use crate::host::{MapHost, SubscriptionId};
use crate::layers::LayerStack;
use crate::layers::series::{PickingInfo, SeriesTileLayer, SeriesTileLayerSpecification};
use crate::manifest::{DatasetManifest, HttpManifestFetcher, ManifestFetcher};
use crate::projection::GeoPos;
use crate::selection::{Indicator, Selection, WarmingLevel};

/// Id of the climate layer in the map's layer stack.
pub const CLIMATE_LAYER_ID: &str = "climate-layer";

const SWATCH_SIZE: [usize; 2] = [256, 12];

/// What the legend panel shows for the attached layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Legend {
    /// Indicator the layer shows.
    pub indicator: Indicator,
    /// Values at the left and right ends of the swatch.
    pub range: ValueRange,
    /// Unit of the values.
    pub unit: String,
    /// The colormap from `range.min` to `range.max`.
    pub swatch: ColorImage,
}

struct PendingManifest {
    generation: u64,
    indicator: Indicator,
    tile_url_prefix: String,
    promise: Promise<Result<DatasetManifest, Arc<eyre::Report>>>,
}

/// Keeps exactly one climate layer and one hover subscription in sync with the selection.
pub struct LayerOrchestrator<F: ManifestFetcher = HttpManifestFetcher> {
    fetcher: F,
    colormaps: ColormapRegistry,
    tileset_origin: String,
    anchor_layer_id: String,
    colormap_gradient: bool,
    warming_level: WarmingLevel,
    generation: u64,
    pending: Vec<PendingManifest>,
    subscription: Option<SubscriptionId>,
    hover: Rc<RefCell<Option<PickingInfo>>>,
    legend: Option<Legend>,
}

impl<F: ManifestFetcher> LayerOrchestrator<F> {
    /// Creates an orchestrator fetching manifests with `fetcher` from the configured origin.
    pub fn new(fetcher: F, colormaps: ColormapRegistry, config: &ExplorerConfig) -> Self {
        Self {
            fetcher,
            colormaps,
            tileset_origin: config.tileset_origin.clone(),
            anchor_layer_id: config.anchor_layer_id.clone(),
            colormap_gradient: config.colormap_gradient,
            warming_level: config.initial_selection.warming_level,
            generation: 0,
            pending: Vec::new(),
            subscription: None,
            hover: Rc::new(RefCell::new(None)),
            legend: None,
        }
    }

    /// Starts showing the tileset of `selection`.
    ///
    /// The current climate layer is removed right away. The new one is attached by a later
    /// [`poll`](Self::poll), once its manifest is fetched.
    pub fn refresh_layer(&mut self, host: &mut dyn MapHost, selection: &Selection) {
        let tile_url_prefix = selection.tile_url_prefix();
        self.generation += 1;
        self.warming_level = selection.warming_level;

        match host.remove_layer(CLIMATE_LAYER_ID) {
            Ok(_) => debug!("Removed climate layer for generation {}", self.generation),
            Err(e) => debug!("Nothing to remove before swapping: {}", e),
        }
        // Nothing is shown until the new layer is attached.
        *self.hover.borrow_mut() = None;
        self.legend = None;

        let url = format!("{}{}index.json", self.tileset_origin, tile_url_prefix);
        debug!("Fetching manifest {} (generation {})", url, self.generation);
        self.pending.push(PendingManifest {
            generation: self.generation,
            indicator: selection.indicator,
            tile_url_prefix,
            promise: self.fetcher.fetch(url),
        });
    }

    /// Applies completed manifest fetches. Call once per frame.
    ///
    /// Returns `true` when a new climate layer was attached.
    pub fn poll(&mut self, host: &mut dyn MapHost) -> bool {
        let mut attached = false;
        for pending in std::mem::take(&mut self.pending) {
            let PendingManifest {
                generation,
                indicator,
                tile_url_prefix,
                promise,
            } = pending;

            let result = match promise.try_take() {
                Ok(result) => result,
                Err(promise) => {
                    self.pending.push(PendingManifest {
                        generation,
                        indicator,
                        tile_url_prefix,
                        promise,
                    });
                    continue;
                }
            };

            if generation != self.generation {
                debug!(
                    "Dropping manifest of {} from generation {}, now at {}",
                    tile_url_prefix, generation, self.generation
                );
                continue;
            }

            match result {
                Ok(manifest) => {
                    attached |= self.attach(host, indicator, tile_url_prefix, manifest);
                }
                Err(e) => {
                    error!("{:?}", e);
                    self.clear(host);
                }
            }
        }
        attached
    }

    fn attach(
        &mut self,
        host: &mut dyn MapHost,
        indicator: Indicator,
        tile_url_prefix: String,
        manifest: DatasetManifest,
    ) -> bool {
        let Some(colormap) = self.colormaps.get(indicator).cloned() else {
            error!("No colormap for indicator `{}`, climate layer not shown", indicator);
            self.clear(host);
            return false;
        };

        let colormap_name = colormap.description().name().to_string();
        let legend = Legend {
            indicator,
            range: colormap.range(),
            unit: manifest.unit().to_string(),
            swatch: colormap.swatch(SWATCH_SIZE[0], SWATCH_SIZE[1]),
        };

        let mut layer = SeriesTileLayer::new(SeriesTileLayerSpecification {
            dataset_specification: Arc::new(manifest),
            colormap,
            colormap_gradient: self.colormap_gradient,
            tile_url_prefix: format!("{}{}", self.tileset_origin, tile_url_prefix),
        });
        layer.set_series_axis_value(self.warming_level.value());
        let instance = layer.instance();

        if host.remove_layer(CLIMATE_LAYER_ID).is_ok() {
            warn!("A climate layer was still attached, replaced it");
        }
        let anchor = Some(self.anchor_layer_id.as_str());
        if let Err(e) = host.add_layer_before(CLIMATE_LAYER_ID, Box::new(layer), anchor) {
            error!("Unable to attach the climate layer: {}", e);
            self.clear(host);
            return false;
        }

        if let Some(previous) = self.subscription.take() {
            host.unsubscribe(previous);
        }
        *self.hover.borrow_mut() = None;
        let hover = Rc::clone(&self.hover);
        self.subscription = Some(host.on_pointer_move(Box::new(
            move |pos: Option<GeoPos>, layers: &LayerStack| {
                *hover.borrow_mut() =
                    pos.and_then(|pos| pick_climate_layer(layers, instance, pos));
            },
        )));

        debug!(
            "Climate layer {} attached for {} with colormap `{}`",
            instance, indicator, colormap_name
        );
        self.legend = Some(legend);
        true
    }

    /// Leaves no hover subscription and nothing to show in the legend and readout.
    fn clear(&mut self, host: &mut dyn MapHost) {
        if let Some(previous) = self.subscription.take() {
            host.unsubscribe(previous);
        }
        *self.hover.borrow_mut() = None;
        self.legend = None;
    }

    /// Moves the attached climate layer to `level` without fetching anything.
    pub fn set_warming_level(&mut self, host: &mut dyn MapHost, level: WarmingLevel) {
        self.warming_level = level;
        let layer = host
            .layer_dyn_mut(CLIMATE_LAYER_ID)
            .and_then(|layer| layer.as_any_mut().downcast_mut::<SeriesTileLayer>());
        match layer {
            Some(layer) => layer.set_series_axis_value(level.value()),
            None => debug!("No climate layer to move to {}", level),
        }
    }

    /// The value under the pointer, if any.
    pub fn hover(&self) -> Option<PickingInfo> {
        self.hover.borrow().clone()
    }

    /// Legend of the attached climate layer.
    pub fn legend(&self) -> Option<&Legend> {
        self.legend.as_ref()
    }

    /// Whether the manifest of the latest selection is still being fetched.
    pub fn is_loading(&self) -> bool {
        self.pending.iter().any(|p| p.generation == self.generation)
    }

    /// Number of `refresh_layer` calls so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Warming level new layers are created at.
    pub fn warming_level(&self) -> WarmingLevel {
        self.warming_level
    }
}

fn pick_climate_layer(layers: &LayerStack, instance: u64, pos: GeoPos) -> Option<PickingInfo> {
    let layer = layers.get_as::<SeriesTileLayer>(CLIMATE_LAYER_ID)?;
    if layer.instance() != instance {
        warn!("Hover subscription outlived its climate layer {}", instance);
        return None;
    }
    match layer.pick(pos) {
        Ok(info) => info,
        Err(e) => {
            debug!("No value under the pointer: {}", e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Map;
    use crate::config::TemplateMapConfig;
    use crate::layers::series::DecodedTile;
    use crate::layers::tests::BlankLayer;
    use crate::manifest::tests::france_manifest;
    use crate::selection::{Model, Month};
    use crate::{MapError, TileId};
    use poll_promise::Sender;

    pub(crate) type ManifestResult = Result<DatasetManifest, Arc<eyre::Report>>;

    /// Records requests and lets the test decide when and how they complete.
    #[derive(Clone, Default)]
    pub(crate) struct FakeFetcher {
        requests: Rc<RefCell<Vec<(String, Option<Sender<ManifestResult>>)>>>,
    }

    impl ManifestFetcher for FakeFetcher {
        fn fetch(&self, url: String) -> Promise<ManifestResult> {
            let (sender, promise) = Promise::new();
            self.requests.borrow_mut().push((url, Some(sender)));
            promise
        }
    }

    impl FakeFetcher {
        pub(crate) fn count(&self) -> usize {
            self.requests.borrow().len()
        }

        pub(crate) fn url(&self, index: usize) -> String {
            self.requests.borrow()[index].0.clone()
        }

        pub(crate) fn complete(&self, index: usize, result: ManifestResult) {
            let sender = self.requests.borrow_mut()[index].1.take().unwrap();
            sender.send(result);
        }

        pub(crate) fn succeed(&self, index: usize) {
            self.complete(index, Ok(france_manifest()));
        }

        pub(crate) fn fail(&self, index: usize) {
            self.complete(index, Err(Arc::new(eyre::eyre!("HTTP 404"))));
        }
    }

    const PARIS: GeoPos = GeoPos {
        lon: 2.35,
        lat: 48.85,
    };
    const PARIS_TILE: TileId = TileId { z: 5, x: 16, y: 11 };
    const NEW_YORK: GeoPos = GeoPos {
        lon: -74.0,
        lat: 40.7,
    };

    fn setup(colormaps: ColormapRegistry) -> (Map, LayerOrchestrator<FakeFetcher>, FakeFetcher) {
        let mut map = Map::new(TemplateMapConfig::new("https://base/{z}/{x}/{y}.png"));
        map.add_layer("water", BlankLayer).unwrap();
        let fetcher = FakeFetcher::default();
        let orchestrator =
            LayerOrchestrator::new(fetcher.clone(), colormaps, &ExplorerConfig::default());
        (map, orchestrator, fetcher)
    }

    fn selection(indicator: Indicator) -> Selection {
        Selection {
            indicator,
            ..Default::default()
        }
    }

    fn climate_instance(map: &Map) -> Option<u64> {
        map.layer::<SeriesTileLayer>(CLIMATE_LAYER_ID)
            .map(SeriesTileLayer::instance)
    }

    #[test]
    fn fetches_manifest_of_the_selected_tileset() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &Selection::default());
        assert_eq!(
            fetcher.url(0),
            "http://127.0.0.1:8083/tilesets/CMCC/dju_01/index.json"
        );

        let ipsl_july = Selection {
            model: Model::Ipsl,
            indicator: Indicator::Tasmax30,
            month: Month::new(7).unwrap(),
            ..Default::default()
        };
        orchestrator.refresh_layer(&mut map, &ipsl_july);
        assert_eq!(
            fetcher.url(1),
            "http://127.0.0.1:8083/tilesets/IPSL/tasmax30_07/index.json"
        );
        assert_eq!(orchestrator.generation(), 2);
    }

    #[test]
    fn attaches_layer_beneath_anchor_with_legend() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &Selection::default());
        assert!(orchestrator.is_loading());
        assert!(!orchestrator.poll(&mut map));

        fetcher.succeed(0);
        assert!(orchestrator.poll(&mut map));
        assert!(!orchestrator.is_loading());
        assert_eq!(
            map.layers().ids().collect::<Vec<_>>(),
            vec![CLIMATE_LAYER_ID, "water"]
        );
        assert_eq!(map.subscription_count(), 1);

        let legend = orchestrator.legend().unwrap();
        assert_eq!(legend.indicator, Indicator::Dju);
        assert_eq!(legend.range, ValueRange { min: 0.0, max: 600.0 });
        assert_eq!(legend.unit, "days");
        assert_eq!(legend.swatch.size, SWATCH_SIZE);
    }

    #[test]
    fn missing_anchor_puts_layer_on_top() {
        let mut map = Map::new(TemplateMapConfig::new("https://base/{z}/{x}/{y}.png"));
        map.add_layer("labels", BlankLayer).unwrap();
        let fetcher = FakeFetcher::default();
        let mut orchestrator = LayerOrchestrator::new(
            fetcher.clone(),
            ColormapRegistry::climate_defaults(),
            &ExplorerConfig::default(),
        );
        orchestrator.refresh_layer(&mut map, &Selection::default());
        fetcher.succeed(0);
        orchestrator.poll(&mut map);
        assert_eq!(
            map.layers().ids().collect::<Vec<_>>(),
            vec!["labels", CLIMATE_LAYER_ID]
        );
    }

    #[test]
    fn at_most_one_layer_and_subscription_across_changes() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        for (index, indicator) in Indicator::ALL.into_iter().enumerate() {
            orchestrator.refresh_layer(&mut map, &selection(indicator));
            assert!(!map.has_layer(CLIMATE_LAYER_ID));
            fetcher.succeed(index);
            orchestrator.poll(&mut map);

            let climate_layers = map
                .layers()
                .ids()
                .filter(|id| *id == CLIMATE_LAYER_ID)
                .count();
            assert_eq!(climate_layers, 1);
            assert_eq!(map.subscription_count(), 1);
            assert_eq!(orchestrator.legend().unwrap().indicator, indicator);
        }
        assert_eq!(map.layers().len(), 2);
    }

    #[test]
    fn fetch_failure_leaves_no_layer() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &Selection::default());
        fetcher.succeed(0);
        orchestrator.poll(&mut map);
        assert!(map.has_layer(CLIMATE_LAYER_ID));

        orchestrator.refresh_layer(&mut map, &selection(Indicator::Ws));
        fetcher.fail(1);
        assert!(!orchestrator.poll(&mut map));
        assert!(!map.has_layer(CLIMATE_LAYER_ID));
        assert!(map.has_layer("water"));
        assert_eq!(map.subscription_count(), 0);
        assert!(orchestrator.legend().is_none());
        assert!(orchestrator.hover().is_none());
    }

    #[test]
    fn missing_colormap_aborts_the_swap() {
        let mut colormaps = ColormapRegistry::climate_defaults();
        colormaps.remove(Indicator::Tas);
        assert!(matches!(
            colormaps.ensure_covers(&Indicator::ALL),
            Err(MapError::MissingColormap(Indicator::Tas))
        ));
        let (mut map, mut orchestrator, fetcher) = setup(colormaps);

        orchestrator.refresh_layer(&mut map, &Selection::default());
        fetcher.succeed(0);
        orchestrator.poll(&mut map);
        assert!(map.has_layer(CLIMATE_LAYER_ID));

        orchestrator.refresh_layer(&mut map, &selection(Indicator::Tas));
        fetcher.succeed(1);
        assert!(!orchestrator.poll(&mut map));
        assert!(!map.has_layer(CLIMATE_LAYER_ID));
        assert_eq!(map.subscription_count(), 0);
        assert!(orchestrator.legend().is_none());
    }

    #[test]
    fn warming_level_moves_layer_without_fetching() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &Selection::default());
        fetcher.succeed(0);
        orchestrator.poll(&mut map);
        let instance = climate_instance(&map);

        orchestrator.set_warming_level(&mut map, WarmingLevel::new(2.7));
        assert_eq!(fetcher.count(), 1);
        assert_eq!(climate_instance(&map), instance);
        let layer = map.layer::<SeriesTileLayer>(CLIMATE_LAYER_ID).unwrap();
        assert_eq!(layer.series_axis_value(), 2.7);
    }

    #[test]
    fn layer_created_at_current_warming_level() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &Selection::default());
        // Slider moved while the manifest was in flight.
        orchestrator.set_warming_level(&mut map, WarmingLevel::new(4.0));
        fetcher.succeed(0);
        orchestrator.poll(&mut map);
        let layer = map.layer::<SeriesTileLayer>(CLIMATE_LAYER_ID).unwrap();
        assert_eq!(layer.series_axis_value(), 4.0);
    }

    #[test]
    fn hover_reads_the_attached_layer() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &selection(Indicator::Tasmin0));
        fetcher.succeed(0);
        orchestrator.poll(&mut map);

        map.emit_pointer_move(NEW_YORK);
        assert_eq!(orchestrator.hover(), None);

        // Tiles still downloading.
        map.emit_pointer_move(PARIS);
        assert_eq!(orchestrator.hover(), None);

        map.layer_mut::<SeriesTileLayer>(CLIMATE_LAYER_ID)
            .unwrap()
            .insert_decoded(0, PARIS_TILE, DecodedTile::from_values(1, 1, &[Some(12.5)]));
        map.emit_pointer_move(PARIS);
        assert_eq!(
            orchestrator.hover(),
            Some(PickingInfo {
                value: 12.5,
                unit: "days".to_string()
            })
        );

        map.emit_pointer_move(NEW_YORK);
        assert_eq!(orchestrator.hover(), None);
    }

    fn tasmin0_with_value_under_paris() -> (Map, LayerOrchestrator<FakeFetcher>, FakeFetcher) {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &selection(Indicator::Tasmin0));
        fetcher.succeed(0);
        orchestrator.poll(&mut map);
        map.layer_mut::<SeriesTileLayer>(CLIMATE_LAYER_ID)
            .unwrap()
            .insert_decoded(0, PARIS_TILE, DecodedTile::from_values(1, 1, &[Some(12.5)]));
        map.emit_pointer_move(PARIS);
        assert!(orchestrator.hover().is_some());
        (map, orchestrator, fetcher)
    }

    #[test]
    fn refresh_clears_hover_and_legend_until_attached() {
        let (mut map, mut orchestrator, fetcher) = tasmin0_with_value_under_paris();
        assert_eq!(orchestrator.legend().unwrap().indicator, Indicator::Tasmin0);

        orchestrator.refresh_layer(&mut map, &selection(Indicator::Ws));
        assert!(orchestrator.hover().is_none());
        assert!(orchestrator.legend().is_none());
        assert_eq!(map.subscription_count(), 1);

        // Pointer moves over the old position while the fetch is in flight.
        map.emit_pointer_move(PARIS);
        assert!(orchestrator.hover().is_none());

        fetcher.succeed(1);
        orchestrator.poll(&mut map);
        assert_eq!(orchestrator.legend().unwrap().indicator, Indicator::Ws);
        assert_eq!(map.subscription_count(), 1);
    }

    #[test]
    fn pointer_leaving_the_map_clears_hover() {
        let (mut map, orchestrator, _fetcher) = tasmin0_with_value_under_paris();
        map.emit_pointer_leave();
        assert_eq!(orchestrator.hover(), None);
        assert!(orchestrator.legend().is_some());
    }

    #[test]
    fn stale_manifest_is_discarded() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &selection(Indicator::Dju));
        orchestrator.refresh_layer(&mut map, &selection(Indicator::Ws));

        fetcher.succeed(1);
        assert!(orchestrator.poll(&mut map));
        let latest = climate_instance(&map);
        assert_eq!(orchestrator.legend().unwrap().indicator, Indicator::Ws);

        fetcher.succeed(0);
        assert!(!orchestrator.poll(&mut map));
        assert_eq!(climate_instance(&map), latest);
        assert_eq!(orchestrator.legend().unwrap().indicator, Indicator::Ws);
        assert_eq!(map.subscription_count(), 1);
    }

    #[test]
    fn stale_failure_does_not_clear_current_layer() {
        let (mut map, mut orchestrator, fetcher) = setup(ColormapRegistry::climate_defaults());
        orchestrator.refresh_layer(&mut map, &selection(Indicator::Dju));
        orchestrator.refresh_layer(&mut map, &selection(Indicator::Rsds));
        fetcher.succeed(1);
        orchestrator.poll(&mut map);

        fetcher.fail(0);
        orchestrator.poll(&mut map);
        assert!(map.has_layer(CLIMATE_LAYER_ID));
        assert_eq!(map.subscription_count(), 1);
    }
}
