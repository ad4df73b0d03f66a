//! Widgets around the map: the selection menus and sliders, the legend and the hover readout.
//!
//! Controls edit a [`Selection`] in place and report which part of it changed. Deciding what a
//! change means for the climate layer is left to the caller.

use egui::{ComboBox, RichText, Slider, TextureHandle, Ui, vec2};

use crate::layers::series::PickingInfo;
use crate::orchestrator::Legend;
use crate::selection::{Indicator, Model, Month, Selection, SelectionChange, WarmingLevel};

// Resolution of the warming-level slider, in °C.
pub(crate) const WARMING_LEVEL_STEP: f64 = 0.01;

/// Drop-down of the climate models.
pub fn model_menu(ui: &mut Ui, model: &mut Model) -> bool {
    let mut changed = false;
    ComboBox::from_label("Model")
        .selected_text(model.label())
        .show_ui(ui, |ui| {
            for option in Model::ALL {
                changed |= ui
                    .selectable_value(model, option, option.label())
                    .changed();
            }
        });
    changed
}

/// Drop-down of the indicators.
pub fn indicator_menu(ui: &mut Ui, indicator: &mut Indicator) -> bool {
    let mut changed = false;
    ComboBox::from_label("Indicator")
        .selected_text(indicator.label())
        .width(220.0)
        .show_ui(ui, |ui| {
            for option in Indicator::ALL {
                changed |= ui
                    .selectable_value(indicator, option, option.label())
                    .on_hover_text(option.description())
                    .changed();
            }
        });
    changed
}

/// Month slider labelled with month names.
pub fn month_slider(ui: &mut Ui, month: &mut Month) -> bool {
    let mut number = month.number();
    ui.add(
        Slider::new(&mut number, 1..=12)
            .text("Month")
            .custom_formatter(|n, _| {
                Month::new(n as u8)
                    .map(Month::name)
                    .unwrap_or_default()
                    .to_string()
            }),
    );
    match Month::new(number) {
        Some(picked) if picked != *month => {
            *month = picked;
            true
        }
        _ => false,
    }
}

/// Warming-level slider, with buttons jumping to the published levels.
pub fn warming_level_slider(ui: &mut Ui, level: &mut WarmingLevel) -> bool {
    let mut value = level.value();
    ui.add(
        Slider::new(&mut value, WarmingLevel::MIN..=WarmingLevel::MAX)
            .text("Warming level")
            .step_by(WARMING_LEVEL_STEP)
            .custom_formatter(|v, _| format!("+{v:.2}°C")),
    );
    ui.horizontal(|ui| {
        for mark in WarmingLevel::MARKS {
            if ui
                .small_button(WarmingLevel::new(mark).to_string())
                .clicked()
            {
                value = mark;
            }
        }
    });

    let picked = WarmingLevel::new(value);
    if picked == *level {
        return false;
    }
    *level = picked;
    true
}

/// Every selection control, top to bottom. Returns the first change made this frame.
pub fn selection_panel(ui: &mut Ui, selection: &mut Selection) -> Option<SelectionChange> {
    let mut change = None;
    if model_menu(ui, &mut selection.model) {
        change = Some(SelectionChange::Model);
    }
    if indicator_menu(ui, &mut selection.indicator) {
        change = change.or(Some(SelectionChange::Indicator));
    }
    if month_slider(ui, &mut selection.month) {
        change = change.or(Some(SelectionChange::Month));
    }
    ui.separator();
    if warming_level_slider(ui, &mut selection.warming_level) {
        change = change.or(Some(SelectionChange::WarmingLevel));
    }
    change
}

/// Text of the hover readout, e.g. `12.35 days`.
pub fn format_hover(info: &PickingInfo) -> String {
    if info.unit.is_empty() {
        format!("{:.2}", info.value)
    } else {
        format!("{:.2} {}", info.value, info.unit)
    }
}

/// The value under the pointer, or a dash.
pub fn hover_readout(ui: &mut Ui, hover: Option<&PickingInfo>) {
    let text = hover.map(format_hover).unwrap_or_else(|| "–".to_string());
    ui.horizontal(|ui| {
        ui.label("Value:");
        ui.label(RichText::new(text).monospace().strong());
    });
}

/// Swatch of the colormap with its range and unit.
pub fn legend_panel(ui: &mut Ui, legend: &Legend, swatch: &TextureHandle) {
    ui.label(RichText::new(legend.indicator.label()).strong());
    let size = vec2(ui.available_width().min(260.0), 14.0);
    ui.add(egui::Image::new((swatch.id(), size)));
    ui.horizontal(|ui| {
        ui.set_width(size.x);
        ui.label(format!("{}", legend.range.min));
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            ui.label(format!("{}", legend.range.max));
        });
    });
    if !legend.unit.is_empty() {
        ui.weak(&legend.unit);
    }
}

/// Collapsible descriptions of the indicators and models.
pub fn info_drawer(ui: &mut Ui) {
    egui::CollapsingHeader::new("About the data")
        .default_open(false)
        .show(ui, |ui| {
            for indicator in Indicator::ALL {
                ui.label(RichText::new(indicator.label()).strong());
                ui.label(indicator.description());
                ui.add_space(4.0);
            }
            ui.separator();
            ui.label("Models");
            for model in Model::ALL {
                ui.label(format!("{} ({})", model.label(), model.key()));
            }
            ui.separator();
            ui.label(
                "Warming levels follow the French adaptation trajectory: +1.5°C, +2°C, \
                 +2.7°C and +4°C of global warming. Values in between are interpolated.",
            );
        });
}
