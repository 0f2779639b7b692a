// src/gui.rs
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};

use anyhow::{Context, Result};
use eframe::egui;
use egui::Color32;
use egui_plot::{Line, Plot, PlotBounds, PlotPoints};
use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::daq::preview::PreviewFrame;
use crate::daq::sink::FileFormat;
use crate::engine::{self, Drivers};
use crate::types::{
    AcquireParams, EngineCommand, EngineEvent, EngineMessage, RunSummary, SerialConfig,
    SwitchConfig,
};

static SETTINGS_PATH: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var_os("VOLTAQ_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("voltaq_settings.json"))
});

const CHANNEL_COLORS: [Color32; 8] = [
    Color32::from_rgb(0, 255, 255),
    Color32::from_rgb(255, 0, 255),
    Color32::YELLOW,
    Color32::GREEN,
    Color32::RED,
    Color32::LIGHT_BLUE,
    Color32::WHITE,
    Color32::GOLD,
];

/// Draft configuration persisted between sessions.
#[derive(Serialize, Deserialize)]
struct DraftSettings {
    params: AcquireParams,
    write_enabled: bool,
    format: FileFormat,
    switching_enabled: bool,
    switching: SwitchConfig,
    serial_enabled: bool,
    serial_port: String,
}

impl Default for DraftSettings {
    fn default() -> Self {
        Self {
            params: AcquireParams::default(),
            write_enabled: false,
            format: FileFormat::Text,
            switching_enabled: false,
            switching: SwitchConfig::default(),
            serial_enabled: false,
            serial_port: "COM3".to_owned(),
        }
    }
}

fn load_settings() -> Result<DraftSettings> {
    let raw = std::fs::read_to_string(&*SETTINGS_PATH)
        .with_context(|| format!("reading {}", SETTINGS_PATH.display()))?;
    serde_json::from_str(&raw).context("parsing settings")
}

fn save_settings(settings: &DraftSettings) -> Result<()> {
    let raw = serde_json::to_string_pretty(settings)?;
    std::fs::write(&*SETTINGS_PATH, raw)
        .with_context(|| format!("writing {}", SETTINGS_PATH.display()))?;
    Ok(())
}

pub struct VoltaqApp {
    // draft configuration
    settings: DraftSettings,
    file_path_text: String,

    // run state
    is_running: bool,
    frame: Option<PreviewFrame>,
    applied_bounds: Option<(f64, f64)>,
    last_summary: Option<RunSummary>,
    log_messages: Vec<String>,

    // engine channels
    rx: Receiver<EngineMessage>,
    tx: Sender<EngineEvent>,
}

impl Default for VoltaqApp {
    fn default() -> Self {
        let (tx_msg, rx_msg) = channel();
        let (events_tx, events_rx) = channel();
        engine::spawn_thread(tx_msg, events_tx.clone(), events_rx, Drivers::simulated());

        let settings = load_settings().unwrap_or_else(|e| {
            warn!("settings not loaded: {e:#}");
            DraftSettings::default()
        });
        let file_path_text = settings.params.file_path.display().to_string();

        Self {
            settings,
            file_path_text,
            is_running: false,
            frame: None,
            applied_bounds: None,
            last_summary: None,
            log_messages: vec!["voltaq ready.".to_owned()],
            rx: rx_msg,
            tx: events_tx,
        }
    }
}

impl VoltaqApp {
    fn log(&mut self, msg: &str) {
        self.log_messages.push(format!("> {msg}"));
        if self.log_messages.len() > 8 {
            self.log_messages.remove(0);
        }
    }

    fn send(&self, command: EngineCommand) {
        let _ = self.tx.send(command.into());
    }

    fn switching_config(&self) -> Option<SwitchConfig> {
        self.settings
            .switching_enabled
            .then_some(self.settings.switching)
    }

    fn serial_config(&self) -> Option<SerialConfig> {
        self.settings.serial_enabled.then(|| SerialConfig {
            port: self.settings.serial_port.clone(),
        })
    }

    fn start_clicked(&mut self) {
        self.settings.params.file_path = PathBuf::from(self.file_path_text.trim());
        if let Err(e) = save_settings(&self.settings) {
            warn!("settings not saved: {e:#}");
        }
        // Push the draft toggles, then snapshot the run.
        self.send(EngineCommand::SetWriteEnabled(self.settings.write_enabled));
        self.send(EngineCommand::SetFormat(self.settings.format));
        self.send(EngineCommand::SetSwitching(self.switching_config()));
        self.send(EngineCommand::SetSerial(self.serial_config()));
        self.send(EngineCommand::Start(self.settings.params.clone()));
    }

    fn drain_messages(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                EngineMessage::Log(line) => self.log(&line),
                EngineMessage::RunState(running) => {
                    self.is_running = running;
                    if !running {
                        self.frame = None;
                        self.applied_bounds = None;
                    }
                }
                EngineMessage::Preview(frame) => {
                    if frame.bounds_changed {
                        self.applied_bounds = Some(frame.bounds);
                    }
                    self.frame = Some(frame);
                }
                EngineMessage::Error(text) => self.log(&format!("ERROR: {text}")),
                EngineMessage::RunFinished(summary) => {
                    let achieved = summary.result.achieved_rate_hz();
                    self.log(&format!(
                        "Run finished: {} samples/channel, {achieved:.1} Hz achieved",
                        summary.result.samples_per_channel
                    ));
                    self.last_summary = Some(summary);
                }
            }
        }
    }

    fn controls_panel(&mut self, ui: &mut egui::Ui) {
        ui.add_space(10.0);
        ui.heading("voltaq");
        ui.label("Continuous voltage acquisition");
        ui.separator();

        ui.add_enabled_ui(!self.is_running, |ui| {
            ui.label("ANALOG INPUT");
            egui::Grid::new("analog_grid").num_columns(2).show(ui, |ui| {
                ui.label("Channels:");
                ui.add(egui::DragValue::new(&mut self.settings.params.channels).clamp_range(1..=8));
                ui.end_row();
                ui.label("Rate (Hz):");
                ui.add(
                    egui::DragValue::new(&mut self.settings.params.rate_hz)
                        .clamp_range(1.0..=2_000_000.0),
                );
                ui.end_row();
                ui.label("Samples/block:");
                ui.add(
                    egui::DragValue::new(&mut self.settings.params.samples_per_block)
                        .clamp_range(1..=2_000_000),
                );
                ui.end_row();
                ui.label("Min (V):");
                ui.add(
                    egui::DragValue::new(&mut self.settings.params.min_volts)
                        .clamp_range(-10.0..=10.0),
                );
                ui.end_row();
                ui.label("Max (V):");
                ui.add(
                    egui::DragValue::new(&mut self.settings.params.max_volts)
                        .clamp_range(-10.0..=10.0),
                );
                ui.end_row();
            });

            ui.separator();
            ui.label("WRITE TO FILE");
            if ui
                .checkbox(&mut self.settings.write_enabled, "Enable writing")
                .changed()
            {
                self.send(EngineCommand::SetWriteEnabled(self.settings.write_enabled));
            }
            ui.horizontal(|ui| {
                let text = ui.radio_value(&mut self.settings.format, FileFormat::Text, "Text file");
                let binary =
                    ui.radio_value(&mut self.settings.format, FileFormat::Binary, "Binary file");
                if text.changed() || binary.changed() {
                    self.send(EngineCommand::SetFormat(self.settings.format));
                }
            });
            ui.text_edit_singleline(&mut self.file_path_text);

            ui.separator();
            ui.label("DIGITAL OUTPUT SWITCHING");
            if ui
                .checkbox(&mut self.settings.switching_enabled, "Enable switching")
                .changed()
            {
                self.send(EngineCommand::SetSwitching(self.switching_config()));
            }
            egui::Grid::new("switch_grid").num_columns(2).show(ui, |ui| {
                ui.label("Default line:");
                ui.add(
                    egui::DragValue::new(&mut self.settings.switching.default_line)
                        .clamp_range(0..=3),
                );
                ui.end_row();
                ui.label("Switch line:");
                ui.add(
                    egui::DragValue::new(&mut self.settings.switching.switch_line)
                        .clamp_range(0..=3),
                );
                ui.end_row();
                ui.label("Period (ms):");
                ui.add(
                    egui::DragValue::new(&mut self.settings.switching.period_ms)
                        .clamp_range(10..=100_000),
                );
                ui.end_row();
            });

            ui.separator();
            ui.label("SERIAL READER");
            if ui
                .checkbox(&mut self.settings.serial_enabled, "Enable reading")
                .changed()
            {
                self.send(EngineCommand::SetSerial(self.serial_config()));
            }
            ui.horizontal(|ui| {
                ui.label("Port:");
                ui.text_edit_singleline(&mut self.settings.serial_port);
            });
        });

        ui.separator();
        if self.is_running {
            if ui.button("STOP").clicked() {
                self.send(EngineCommand::Stop);
            }
        } else {
            let can_start =
                !self.settings.write_enabled || !self.file_path_text.trim().is_empty();
            if ui
                .add_enabled(can_start, egui::Button::new("START"))
                .clicked()
            {
                self.start_clicked();
            }
        }

        if let Some(summary) = self.last_summary {
            ui.add_space(10.0);
            ui.label(format!(
                "Last run: {} samples/channel",
                summary.result.samples_per_channel
            ));
            ui.label(format!(
                "Achieved rate: {:.1} Hz",
                summary.result.achieved_rate_hz()
            ));
            if summary.lenient_parses > 0 {
                ui.colored_label(
                    Color32::YELLOW,
                    format!("Lenient serial parses: {}", summary.lenient_parses),
                );
            }
        }

        ui.add_space(10.0);
        egui::ScrollArea::vertical().max_height(120.0).show(ui, |ui| {
            for line in &self.log_messages {
                ui.monospace(line);
            }
        });
    }

    fn preview_panel(&self, ui: &mut egui::Ui) {
        Plot::new("preview_plot")
            .view_aspect(2.0)
            .show(ui, |plot_ui| {
                let Some(frame) = &self.frame else {
                    return;
                };
                for (i, series) in frame.series.iter().enumerate() {
                    if series.is_empty() {
                        continue;
                    }
                    let color = CHANNEL_COLORS[i % CHANNEL_COLORS.len()];
                    plot_ui.line(
                        Line::new(PlotPoints::new(series.clone()))
                            .name(format!("Dev1/ai{i}"))
                            .color(color),
                    );
                }
                if let Some((lo, hi)) = self.applied_bounds {
                    let x0 = frame
                        .series
                        .iter()
                        .filter_map(|s| s.first())
                        .map(|p| p[0])
                        .fold(f64::INFINITY, f64::min);
                    let x1 = frame
                        .series
                        .iter()
                        .filter_map(|s| s.last())
                        .map(|p| p[0])
                        .fold(f64::NEG_INFINITY, f64::max);
                    if x0.is_finite() && x1 > x0 {
                        plot_ui.set_plot_bounds(PlotBounds::from_min_max([x0, lo], [x1, hi]));
                    }
                }
            });
    }
}

impl eframe::App for VoltaqApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_messages();

        let mut visuals = egui::Visuals::dark();
        visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(10, 10, 15);
        ctx.set_visuals(visuals);

        egui::SidePanel::left("controls")
            .min_width(300.0)
            .show(ctx, |ui| self.controls_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.label("Acquisition preview: time (s) vs voltage (V)");
            self.preview_panel(ui);
        });

        if self.is_running {
            ctx.request_repaint();
        }
    }
}
