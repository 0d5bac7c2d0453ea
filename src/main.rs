#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use clap::{Parser, ValueEnum};
use eframe::{egui, App, NativeOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use mri_slice_qc::config::{self, Overrides, Settings};
use mri_slice_qc::record;
use mri_slice_qc::session::SessionStatus;
use mri_slice_qc::source::{JsonDirSource, SliceArray, SliceSource};
use mri_slice_qc::{CsvTable, Error, KeyCatalog, NavCommand, ReviewSession, ReviewStore, SliceKey};

const VIEWED_BG: egui::Color32 = egui::Color32::from_rgb(200, 255, 200);
const NOT_VIEWED_BG: egui::Color32 = egui::Color32::from_rgb(255, 220, 220);

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    /// Start an empty table; an existing file at the path is overwritten.
    New,
    /// Resume from an existing table.
    Load,
}

#[derive(Parser, Debug)]
#[command(name = "mri-slice-qc", version, about = "Score MRI slices 0-3 and keep a review table up to date")]
struct Args {
    /// TOML config file (defaults to ./config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the slice datasets
    #[arg(long)]
    container: Option<PathBuf>,

    /// Review table (CSV) to write
    #[arg(long)]
    output: Option<PathBuf>,

    /// Create a new table or load an existing one
    #[arg(long, value_enum)]
    mode: OutputMode,

    /// Cine playback rate in frames per second
    #[arg(long)]
    fps: Option<f32>,
}

enum Action {
    Navigate(NavCommand),
    Rate(i64),
    RetrySave,
}

struct SliceQcApp {
    session: ReviewSession,
    source: JsonDirSource,
    fps: f32,
    current_array: Option<SliceArray>,
    texture: Option<egui::TextureHandle>,
    texture_for: Option<(String, usize)>,
    timepoint: usize,
    playing: bool,
    last_frame_at: Instant,
    message: Option<String>,
    load_warnings: Vec<String>,
}

impl SliceQcApp {
    fn open(settings: &Settings, mode: OutputMode) -> Result<Self, Error> {
        let source = JsonDirSource::open(&settings.container)?;
        let catalog = KeyCatalog::build(source.list_keys()?)?;
        info!("catalog built: {} slices in {}", catalog.len(), settings.container.display());

        let table = CsvTable::new(&settings.output);
        let mut load_warnings = Vec::new();
        let store = match mode {
            OutputMode::Load => {
                if !settings.output.is_file() {
                    return Err(Error::Config(format!(
                        "cannot load {}: file does not exist",
                        settings.output.display()
                    )));
                }
                let report = table.load()?;
                info!(
                    "loaded {} rows from {} ({} rejected, {} with warnings)",
                    report.records.len(),
                    settings.output.display(),
                    report.rejected.len(),
                    report.warnings.len()
                );
                load_warnings = report
                    .rejected
                    .iter()
                    .map(|row| format!("skipped {row}"))
                    .chain(report.warnings.iter().map(|row| format!("kept {row}")))
                    .collect();
                ReviewStore::seeded(report.records)
            }
            OutputMode::New => {
                if settings.output.exists() {
                    warn!("{} exists and will be overwritten", settings.output.display());
                }
                ReviewStore::new()
            }
        };

        let session = ReviewSession::start(catalog, store, table)?;
        let first = session.current()?.clone();

        let mut app = Self {
            session,
            source,
            fps: settings.fps,
            current_array: None,
            texture: None,
            texture_for: None,
            timepoint: 0,
            playing: false,
            last_frame_at: Instant::now(),
            message: None,
            load_warnings,
        };
        app.display(first);
        Ok(app)
    }

    /// Loads the array for `key` and reports the landing. A slice whose
    /// array cannot be read is not marked viewed.
    fn display(&mut self, key: SliceKey) {
        match self.source.read_slice(key.as_str()) {
            Ok(array) => {
                self.timepoint = self.timepoint.min(array.timepoints() - 1);
                self.current_array = Some(array);
                self.texture_for = None;
            }
            Err(e) => {
                error!("cannot display {}: {}", key, e);
                self.current_array = None;
                self.message = Some(format!("Cannot display {key}: {e}"));
                return;
            }
        }
        match self.session.on_slice_displayed(key.as_str(), record::now()) {
            Ok(_) => self.clear_message_if_saved(),
            Err(e) => self.message = Some(e.to_string()),
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Navigate(command) => match self.session.navigate(&command) {
                Ok(Some(key)) => self.display(key),
                Ok(None) => {}
                Err(e) => self.message = Some(e.to_string()),
            },
            Action::Rate(value) => {
                let key = match self.session.current() {
                    Ok(key) => key.to_string(),
                    Err(e) => {
                        self.message = Some(e.to_string());
                        return;
                    }
                };
                match self.session.on_rating_changed(&key, value, record::now()) {
                    Ok(_) => self.clear_message_if_saved(),
                    Err(e) => self.message = Some(e.to_string()),
                }
            }
            Action::RetrySave => match self.session.retry_save() {
                Ok(()) => self.clear_message_if_saved(),
                Err(e) => self.message = Some(e.to_string()),
            },
        }
    }

    fn clear_message_if_saved(&mut self) {
        if !self.session.pending_save() {
            self.message = None;
        }
    }

    fn keyboard_actions(ctx: &egui::Context, actions: &mut Vec<Action>) {
        ctx.input(|i| {
            if i.key_pressed(egui::Key::ArrowLeft) {
                actions.push(Action::Navigate(NavCommand::Previous));
            }
            if i.key_pressed(egui::Key::ArrowRight) {
                actions.push(Action::Navigate(NavCommand::Next));
            }
            if i.key_pressed(egui::Key::N) {
                actions.push(Action::Navigate(NavCommand::NextUnviewed));
            }
            for (key, value) in [
                (egui::Key::Num0, 0),
                (egui::Key::Num1, 1),
                (egui::Key::Num2, 2),
                (egui::Key::Num3, 3),
            ] {
                if i.key_pressed(key) {
                    actions.push(Action::Rate(value));
                }
            }
        });
    }

    fn advance_cine(&mut self, ctx: &egui::Context) {
        let Some(array) = &self.current_array else {
            return;
        };
        if !self.playing || array.timepoints() < 2 {
            return;
        }
        let frame = Duration::from_secs_f32(1.0 / self.fps);
        if self.last_frame_at.elapsed() >= frame {
            self.timepoint = (self.timepoint + 1) % array.timepoints();
            self.last_frame_at = Instant::now();
        }
        ctx.request_repaint_after(frame);
    }

    fn refresh_texture(&mut self, ctx: &egui::Context, key: &str) {
        let Some(array) = &self.current_array else {
            return;
        };
        let wanted = (key.to_string(), self.timepoint);
        if self.texture_for.as_ref() == Some(&wanted) {
            return;
        }
        let pixels = array.gray_frame(self.timepoint);
        let image = egui::ColorImage::from_gray([array.cols(), array.rows()], &pixels);
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::NEAREST),
            None => self.texture = Some(ctx.load_texture("slice", image, egui::TextureOptions::NEAREST)),
        }
        self.texture_for = Some(wanted);
    }

    fn side_panel(&self, ui: &mut egui::Ui, status: &SessionStatus, actions: &mut Vec<Action>) {
        ui.heading("MRI Slice QC");
        ui.separator();

        ui.label("Slice key");
        egui::ComboBox::from_id_source("slice_key")
            .width(300.0)
            .selected_text(status.key.as_str())
            .show_ui(ui, |ui| {
                for (key, viewed) in self.session.dropdown_entries() {
                    let bg = if viewed { VIEWED_BG } else { NOT_VIEWED_BG };
                    let text = egui::RichText::new(key.as_str())
                        .background_color(bg)
                        .color(egui::Color32::BLACK);
                    if ui.selectable_label(key.as_str() == status.key, text).clicked() {
                        actions.push(Action::Navigate(NavCommand::JumpTo(key.to_string())));
                    }
                }
            });

        ui.horizontal(|ui| {
            if ui.button("◀ Prev").clicked() {
                actions.push(Action::Navigate(NavCommand::Previous));
            }
            if ui.button("Next ▶").clicked() {
                actions.push(Action::Navigate(NavCommand::Next));
            }
            if ui.button("Next unviewed (N)").clicked() {
                actions.push(Action::Navigate(NavCommand::NextUnviewed));
            }
        });
        ui.add_space(10.0);

        let viewed = if status.viewed { "VIEWED" } else { "NOT viewed" };
        let rating = status.rating.map_or_else(|| "-".to_string(), |r| r.to_string());
        ui.label(format!(
            "Status: {} | Rating: {} | {}/{}",
            viewed,
            rating,
            status.index + 1,
            status.total
        ));
        ui.label(&status.key);
        ui.label(format!("Reviewed {} of {}", status.viewed_total, status.total));
        ui.add_space(10.0);

        ui.group(|ui| {
            ui.label("Quality score (0–3)");
            for value in 0..=3u8 {
                let selected = status.rating.map(|r| r.value()) == Some(value);
                let radio = egui::RadioButton::new(selected, value.to_string());
                if ui.add_enabled(status.viewed, radio).clicked() {
                    actions.push(Action::Rate(i64::from(value)));
                }
            }
        });

        if let Some(message) = &self.message {
            ui.add_space(10.0);
            ui.colored_label(egui::Color32::RED, message);
        }
        if self.session.pending_save() && ui.button("Retry save").clicked() {
            actions.push(Action::RetrySave);
        }

        if !self.load_warnings.is_empty() {
            ui.add_space(10.0);
            ui.collapsing(format!("{} table load warnings", self.load_warnings.len()), |ui| {
                egui::ScrollArea::vertical().max_height(200.0).show(ui, |ui| {
                    for warning in &self.load_warnings {
                        ui.label(warning);
                    }
                });
            });
        }
    }
}

impl App for SliceQcApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let status = match self.session.status() {
            Ok(status) => status,
            Err(e) => {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.colored_label(egui::Color32::RED, e.to_string());
                });
                return;
            }
        };

        self.advance_cine(ctx);
        self.refresh_texture(ctx, &status.key);

        let mut actions = Vec::new();
        Self::keyboard_actions(ctx, &mut actions);

        egui::SidePanel::left("review_panel")
            .min_width(280.0)
            .default_width(340.0)
            .show(ctx, |ui| self.side_panel(ui, &status, &mut actions));

        egui::CentralPanel::default().show(ctx, |ui| {
            let (Some(array), Some(texture)) = (&self.current_array, &self.texture) else {
                ui.label("No image for this slice.");
                return;
            };
            if array.timepoints() > 1 {
                ui.horizontal(|ui| {
                    ui.checkbox(&mut self.playing, "Play");
                    ui.add(egui::Slider::new(&mut self.timepoint, 0..=array.timepoints() - 1).text("t"));
                });
            }
            ui.label(format!(
                "{} × {} × {} timepoints",
                array.rows(),
                array.cols(),
                array.timepoints()
            ));

            let avail = ui.available_size();
            let aspect = array.cols() as f32 / array.rows() as f32;
            let mut size = egui::vec2(avail.x, avail.x / aspect);
            if size.y > avail.y {
                size = egui::vec2(avail.y * aspect, avail.y);
            }
            ui.image((texture.id(), size));
        });

        if !actions.is_empty() {
            for action in actions {
                self.apply(action);
            }
            ctx.request_repaint();
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if let Err(e) = self.session.retry_save() {
            error!("final save failed: {}", e);
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let overrides = Overrides {
        container_dir: args.container,
        output_csv: args.output,
        playback_fps: args.fps,
    };
    let opened = config::load_config(args.config.as_deref())
        .and_then(|config| config.resolve(overrides))
        .and_then(|settings| {
            let app = SliceQcApp::open(&settings, args.mode)?;
            Ok((settings, app))
        });
    let (settings, app) = match opened {
        Ok(pair) => pair,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(settings.window)
            .with_min_inner_size([900.0, 600.0])
            .with_title("MRI Slice QC (0–3)"),
        ..Default::default()
    };
    match eframe::run_native("MRI Slice QC (0–3)", options, Box::new(move |_cc| Box::new(app))) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("viewer failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
