#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // hide console window on Windows in release

use eframe::egui;
use refuge_map::app::RefugeApp;
use refuge_map::config::AppSettings;

fn main() -> eframe::Result {
    env_logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1080.0, 720.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Refuge Map",
        options,
        Box::new(|_cc| Ok(Box::new(RefugeApp::new(AppSettings::from_env())))),
    )
}
