#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // hide console window on Windows in release
#![allow(rustdoc::missing_crate_level_docs)] // it's an example

use climate_map_view::{app::ClimateExplorer, config::ExplorerConfig};
use eframe::egui;

fn main() -> eframe::Result {
    env_logger::init();

    // Optional path to a JSON configuration file.
    let config = match std::env::args().nth(1) {
        Some(path) => match ExplorerConfig::from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Unable to load {}: {}", path, e);
                ExplorerConfig::default()
            }
        },
        None => ExplorerConfig::default(),
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1100.0, 750.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Climate explorer",
        options,
        Box::new(|_cc| {
            let app = ClimateExplorer::new(config)?;
            Ok(Box::new(app))
        }),
    )
}
