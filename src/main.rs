// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
mod daq;
mod engine;
mod gui;
mod types;

use eframe::egui;

fn main() -> eframe::Result<()> {
    env_logger::init();
    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([1100.0, 680.0])
        .with_min_inner_size([900.0, 560.0])
        .with_title("voltaq - continuous voltage acquisition");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "voltaq",
        options,
        Box::new(|_cc| Box::new(gui::VoltaqApp::default())),
    )
}
