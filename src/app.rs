//! The desktop application shell: panels, windows, and the async glue
//! between the map layers and the backend.

use eframe::egui;
use log::error;
use poll_promise::Promise;

use crate::Map;
use crate::backend::{self, ApplyOutcome, BackendError, CreateOutcome, RenameOutcome,
                     ValidateOutcome};
use crate::config::{AppSettings, InputModePreference, SatelliteConfig, TerrainConfig};
use crate::draw::{CloseOutcome, DrawPhase, DrawPurpose, InputMode};
use crate::editor::{OverlayEditor, SelectMode, SelectOutcome};
use crate::geocode::{self, GeocodeError, Place};
use crate::layers::draw::DrawLayer;
use crate::layers::overlay::OverlayLayer;
use crate::layers::path::{PathHit, PathLayer};
use crate::layers::refuge::RefugeLayer;
use crate::projection::GeoPos;
use crate::track::{PathRecorder, PositionSource};
use crate::types::{PathPopup, PathRecord, Refuge, Ring};

const REFUGE_LAYER: &str = "refuges";
const PATH_LAYER: &str = "paths";
const OVERLAY_LAYER: &str = "overlays";
const DRAW_LAYER: &str = "drawing";

/// How long the delete undo toast stays up before the backend delete fires.
const DELETE_TOAST_MS: f64 = 5_000.0;

/// The single outstanding mutation request. The UI blocks further mutations
/// until it resolves.
enum PendingMutation {
    Create(Promise<Result<CreateOutcome, BackendError>>),
    Rename(Promise<Result<RenameOutcome, BackendError>>),
    Delete(Promise<Result<(), BackendError>>),
    Validate(Promise<Result<ValidateOutcome, BackendError>>),
    Apply(Promise<Result<ApplyOutcome, BackendError>>),
    SavePath(Promise<Result<PathRecord, BackendError>>),
    UpdatePath(Promise<Result<(), BackendError>>),
    DeletePath(Promise<Result<(), BackendError>>),
    AttachPopup(Promise<Result<(), BackendError>>),
    Init(Promise<Result<(), BackendError>>),
}

struct RenameState {
    id: String,
    buffer: String,
}

struct DeletedRefuge {
    refuge: Refuge,
    expires_at_ms: f64,
}

/// The application.
pub struct RefugeApp {
    map: Map,
    settings: AppSettings,
    satellite_active: bool,

    status: String,
    now_ms: f64,
    touch_seen: bool,

    refuges: Vec<Refuge>,
    paths: Vec<PathRecord>,

    refuges_fetch: Option<Promise<Result<Vec<Refuge>, BackendError>>>,
    paths_fetch: Option<Promise<Result<Vec<PathRecord>, BackendError>>>,
    search_promise: Option<Promise<Result<Vec<Place>, GeocodeError>>>,
    pending: Option<PendingMutation>,

    name_input: String,
    rename: Option<RenameState>,
    path_rename: Option<RenameState>,
    deleted: Option<DeletedRefuge>,
    pending_overlay: Option<Ring>,

    search_query: String,
    search_results: Vec<Place>,

    record_name: String,
    recorder: Option<PathRecorder>,
    position_source: Option<Box<dyn PositionSource>>,

    popup_target: Option<PathHit>,
    popup_caption: String,
    popup_image_url: String,
}

impl RefugeApp {
    /// Builds the app, registers the layers, and kicks off the initial
    /// fetches.
    pub fn new(settings: AppSettings) -> Self {
        let mut map = Map::new(SatelliteConfig::default());
        map.add_layer(REFUGE_LAYER, RefugeLayer::new());
        map.add_layer(PATH_LAYER, PathLayer::new());
        map.add_layer(OVERLAY_LAYER, OverlayLayer::new());
        map.add_layer(DRAW_LAYER, DrawLayer::new());

        let mut app = Self {
            map,
            settings,
            satellite_active: true,
            status: "Loading refuges…".to_string(),
            now_ms: 0.0,
            touch_seen: false,
            refuges: Vec::new(),
            paths: Vec::new(),
            refuges_fetch: None,
            paths_fetch: None,
            search_promise: None,
            pending: None,
            name_input: String::new(),
            rename: None,
            path_rename: None,
            deleted: None,
            pending_overlay: None,
            search_query: String::new(),
            search_results: Vec::new(),
            record_name: String::new(),
            recorder: None,
            position_source: None,
            popup_target: None,
            popup_caption: String::new(),
            popup_image_url: String::new(),
        };

        if let Some(payload) = app.settings.init_payload.clone() {
            let base = app.settings.backend_base_url.clone();
            app.pending = Some(PendingMutation::Init(Promise::spawn_thread(
                "init_data",
                move || backend::post_init_data(&base, &payload),
            )));
        }

        app.refresh_refuges();
        app.refresh_paths();
        app
    }

    /// Installs a platform position source for path recording and
    /// center-on-me.
    pub fn set_position_source(&mut self, source: Box<dyn PositionSource>) {
        self.position_source = Some(source);
    }

    fn with_draw_layer<R>(&mut self, f: impl FnOnce(&mut DrawLayer) -> R) -> Option<R> {
        self.map.layer_mut::<DrawLayer>(DRAW_LAYER).map(f)
    }

    fn with_refuge_layer<R>(&mut self, f: impl FnOnce(&mut RefugeLayer) -> R) -> Option<R> {
        self.map.layer_mut::<RefugeLayer>(REFUGE_LAYER).map(f)
    }

    fn with_path_layer<R>(&mut self, f: impl FnOnce(&mut PathLayer) -> R) -> Option<R> {
        self.map.layer_mut::<PathLayer>(PATH_LAYER).map(f)
    }

    fn with_overlay_layer<R>(&mut self, f: impl FnOnce(&mut OverlayLayer) -> R) -> Option<R> {
        self.map.layer_mut::<OverlayLayer>(OVERLAY_LAYER).map(f)
    }

    fn active_draw_mode(&self) -> InputMode {
        match self.settings.input_mode {
            InputModePreference::Pointer => InputMode::PointerDirect,
            InputModePreference::Reticle => InputMode::CenterReticle,
            InputModePreference::Auto => {
                if self.touch_seen {
                    InputMode::CenterReticle
                } else {
                    InputMode::PointerDirect
                }
            }
        }
    }

    fn set_browse_interactive(&mut self, on: bool) {
        self.with_refuge_layer(|l| l.interactive = on);
        self.with_path_layer(|l| l.interactive = on);
    }

    fn refresh_refuges(&mut self) {
        let base = self.settings.backend_base_url.clone();
        self.refuges_fetch = Some(Promise::spawn_thread("fetch_refuges", move || {
            backend::fetch_refuges(&base)
        }));
    }

    fn refresh_paths(&mut self) {
        let base = self.settings.backend_base_url.clone();
        self.paths_fetch = Some(Promise::spawn_thread("fetch_paths", move || {
            backend::fetch_paths(&base)
        }));
    }

    fn poll_fetches(&mut self) {
        if let Some(promise) = self.refuges_fetch.take() {
            match promise.try_take() {
                Ok(Ok(refuges)) => {
                    self.refuges = refuges.clone();
                    self.with_refuge_layer(|l| l.set_refuges(refuges));
                    if self.status == "Loading refuges…" {
                        self.status.clear();
                    }
                }
                Ok(Err(e)) => {
                    error!("Failed to fetch refuges: {e}");
                    self.status = "Failed to load refuges".to_string();
                }
                Err(promise) => self.refuges_fetch = Some(promise),
            }
        }

        if let Some(promise) = self.paths_fetch.take() {
            match promise.try_take() {
                Ok(Ok(paths)) => {
                    self.paths = paths.clone();
                    self.with_path_layer(|l| l.set_paths(paths));
                }
                Ok(Err(e)) => {
                    error!("Failed to fetch paths: {e}");
                    self.status = "Failed to load paths".to_string();
                }
                Err(promise) => self.paths_fetch = Some(promise),
            }
        }

        if let Some(promise) = self.search_promise.take() {
            match promise.try_take() {
                Ok(Ok(places)) => {
                    if places.is_empty() {
                        self.status = "No places found".to_string();
                    }
                    self.search_results = places;
                }
                Ok(Err(e)) => {
                    error!("Place search failed: {e}");
                    self.status = "Place search failed".to_string();
                }
                Err(promise) => self.search_promise = Some(promise),
            }
        }
    }

    fn poll_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.pending = match pending {
            PendingMutation::Create(promise) => match promise.try_take() {
                Ok(result) => {
                    self.on_create_result(result);
                    None
                }
                Err(promise) => Some(PendingMutation::Create(promise)),
            },
            PendingMutation::Rename(promise) => match promise.try_take() {
                Ok(result) => {
                    self.on_rename_result(result);
                    None
                }
                Err(promise) => Some(PendingMutation::Rename(promise)),
            },
            PendingMutation::Delete(promise) => match promise.try_take() {
                Ok(result) => {
                    match result {
                        Ok(()) => self.refresh_refuges(),
                        Err(e) => {
                            error!("Failed to delete refuge: {e}");
                            self.status = "Failed to delete refuge".to_string();
                            self.refresh_refuges();
                        }
                    }
                    None
                }
                Err(promise) => Some(PendingMutation::Delete(promise)),
            },
            PendingMutation::Validate(promise) => match promise.try_take() {
                Ok(result) => {
                    self.on_validate_result(result);
                    None
                }
                Err(promise) => Some(PendingMutation::Validate(promise)),
            },
            PendingMutation::Apply(promise) => match promise.try_take() {
                Ok(result) => {
                    self.on_apply_result(result);
                    None
                }
                Err(promise) => Some(PendingMutation::Apply(promise)),
            },
            PendingMutation::SavePath(promise) => match promise.try_take() {
                Ok(result) => {
                    match result {
                        Ok(record) => {
                            self.status = format!("Path '{}' saved", record.name);
                            self.refresh_paths();
                        }
                        Err(e) => {
                            error!("Failed to save path: {e}");
                            self.status = "Failed to save path".to_string();
                        }
                    }
                    None
                }
                Err(promise) => Some(PendingMutation::SavePath(promise)),
            },
            PendingMutation::UpdatePath(promise) => match promise.try_take() {
                Ok(result) => {
                    match result {
                        Ok(()) => {
                            self.status = "Path updated".to_string();
                            self.path_rename = None;
                            self.refresh_paths();
                        }
                        Err(e) => {
                            error!("Failed to update path: {e}");
                            self.status = "Failed to update path".to_string();
                        }
                    }
                    None
                }
                Err(promise) => Some(PendingMutation::UpdatePath(promise)),
            },
            PendingMutation::DeletePath(promise) => match promise.try_take() {
                Ok(result) => {
                    if let Err(e) = result {
                        error!("Failed to delete path: {e}");
                        self.status = "Failed to delete path".to_string();
                    }
                    self.refresh_paths();
                    None
                }
                Err(promise) => Some(PendingMutation::DeletePath(promise)),
            },
            PendingMutation::AttachPopup(promise) => match promise.try_take() {
                Ok(result) => {
                    match result {
                        Ok(()) => {
                            self.status = "Popup attached".to_string();
                            self.refresh_paths();
                        }
                        Err(e) => {
                            error!("Failed to attach popup: {e}");
                            self.status = "Failed to attach popup".to_string();
                        }
                    }
                    None
                }
                Err(promise) => Some(PendingMutation::AttachPopup(promise)),
            },
            PendingMutation::Init(promise) => match promise.try_take() {
                Ok(result) => {
                    if let Err(e) = result {
                        // Init forwarding is best-effort; the app works on.
                        error!("init-data forwarding failed: {e}");
                    }
                    None
                }
                Err(promise) => Some(PendingMutation::Init(promise)),
            },
        };
    }

    fn on_create_result(&mut self, result: Result<CreateOutcome, BackendError>) {
        match result {
            Ok(CreateOutcome::Created(refuge)) => {
                self.status = format!("Refuge '{}' saved", refuge.name);
                self.name_input.clear();
                self.with_draw_layer(|l| l.finish_saved());
                self.set_browse_interactive(true);
                self.refresh_refuges();
            }
            Ok(CreateOutcome::DuplicateName) => {
                // The drawn geometry and its preview stay; only the name is
                // re-prompted.
                self.status = "That name is already in use".to_string();
            }
            Ok(CreateOutcome::FullOverlap) => {
                self.status =
                    "Shape overlaps existing refuges completely, nothing to save".to_string();
                self.with_draw_layer(|l| l.cancel());
                self.set_browse_interactive(true);
            }
            Ok(CreateOutcome::Rejected(message)) => {
                self.status = message;
            }
            Err(e) => {
                error!("Failed to create refuge: {e}");
                self.status = "Error saving refuge".to_string();
            }
        }
    }

    fn on_rename_result(&mut self, result: Result<RenameOutcome, BackendError>) {
        match result {
            Ok(RenameOutcome::Renamed) => {
                self.status = "Refuge renamed".to_string();
                self.rename = None;
                self.refresh_refuges();
            }
            Ok(RenameOutcome::DuplicateName) => {
                self.status = "That name is already in use".to_string();
            }
            Ok(RenameOutcome::Rejected(message)) => {
                self.status = message;
                self.rename = None;
            }
            Err(e) => {
                error!("Failed to rename refuge: {e}");
                self.status = "Failed to rename refuge".to_string();
            }
        }
    }

    fn on_validate_result(&mut self, result: Result<ValidateOutcome, BackendError>) {
        let ring = self.pending_overlay.take();
        match (result, ring) {
            (Ok(ValidateOutcome::Ok), Some(ring)) => {
                let added = self
                    .with_overlay_layer(|l| {
                        l.editor.as_mut().and_then(|editor| editor.push_overlay(ring))
                    })
                    .flatten();
                self.status = match added {
                    Some(_) => "Overlay added".to_string(),
                    None => "Overlay was nested inside other overlays and dropped".to_string(),
                };
                self.start_overlay_draw();
            }
            (Ok(ValidateOutcome::WouldFragment(message)), _) => {
                self.status = message;
                self.start_overlay_draw();
            }
            (Err(e), _) => {
                error!("Overlay validation failed: {e}");
                self.status = "Failed to validate overlay".to_string();
                self.start_overlay_draw();
            }
            (Ok(ValidateOutcome::Ok), None) => {}
        }
    }

    fn on_apply_result(&mut self, result: Result<ApplyOutcome, BackendError>) {
        match result {
            Ok(ApplyOutcome::Applied(refuge)) => {
                self.status = format!("Refuge '{}' updated", refuge.name);
                if let Some(slot) = self.refuges.iter_mut().find(|r| r.id == refuge.id) {
                    *slot = refuge.clone();
                }
                let refuges = self.refuges.clone();
                self.with_refuge_layer(|l| l.set_refuges(refuges));
                // Reopen the editor fresh so lock states derive from the new
                // geometry.
                self.with_overlay_layer(|l| {
                    l.editor = Some(OverlayEditor::new(refuge));
                    l.selecting = false;
                });
                self.start_overlay_draw();
            }
            Ok(ApplyOutcome::Rejected(message)) => {
                self.status = message;
            }
            Err(e) => {
                error!("Failed to apply overlays: {e}");
                self.status = "Failed to update refuge".to_string();
            }
        }
    }

    fn start_refuge_draw(&mut self) {
        let mode = self.active_draw_mode();
        self.set_browse_interactive(false);
        self.with_draw_layer(|l| l.start(mode, DrawPurpose::SaveRefuge));
        self.status = "Draw the refuge outline".to_string();
    }

    fn start_overlay_draw(&mut self) {
        let mode = self.active_draw_mode();
        self.set_browse_interactive(false);
        self.with_overlay_layer(|l| l.selecting = false);
        self.with_draw_layer(|l| l.start(mode, DrawPurpose::YieldRing));
    }

    fn cancel_drawing(&mut self) {
        self.with_draw_layer(|l| l.cancel());
        let editing = self
            .with_overlay_layer(|l| l.editor.is_some())
            .unwrap_or(false);
        if !editing {
            self.set_browse_interactive(true);
        }
    }

    fn open_editor(&mut self, refuge: Refuge) {
        self.with_overlay_layer(|l| {
            l.editor = Some(OverlayEditor::new(refuge));
            l.selecting = false;
            l.select_mode = SelectMode::Adjoin;
        });
        self.status = "Draw an overlay across the refuge border".to_string();
        self.start_overlay_draw();
    }

    fn close_editor(&mut self) {
        self.with_overlay_layer(|l| {
            l.editor = None;
            l.selecting = false;
        });
        self.cancel_drawing();
        self.set_browse_interactive(true);
    }

    /// Routes a ring closed in overlay mode through the client-side overlap
    /// gate and the backend fragmentation check.
    fn handle_overlay_ring(&mut self, ring: Ring) {
        let Some((overlaps, covers, refuge_id)) = self
            .with_overlay_layer(|l| {
                l.editor.as_ref().map(|editor| {
                    (
                        editor.ring_overlaps_refuge(&ring),
                        editor.ring_covers_refuge(&ring),
                        editor.refuge().id.clone(),
                    )
                })
            })
            .flatten()
        else {
            return;
        };

        if self.pending.is_some() {
            // A mutation is already in flight; the ring is dropped rather
            // than queued behind it.
            self.status = "Saving…".to_string();
            return;
        }

        if !overlaps {
            self.status = "Overlay must overlap the refuge".to_string();
            self.start_overlay_draw();
            return;
        }

        if covers {
            // A covering overlay is subtract-locked locally; the
            // fragmentation check does not apply to it.
            self.with_overlay_layer(|l| {
                if let Some(editor) = l.editor.as_mut() {
                    editor.push_overlay(ring);
                }
            });
            self.status = "Overlay added".to_string();
            self.start_overlay_draw();
            return;
        }

        let base = self.settings.backend_base_url.clone();
        let validate_ring = ring.clone();
        self.pending_overlay = Some(ring);
        self.pending = Some(PendingMutation::Validate(Promise::spawn_thread(
            "validate_overlay",
            move || backend::validate_subtract_overlay(&base, &refuge_id, &validate_ring),
        )));
        self.status = "Checking overlay…".to_string();
    }

    fn tick_recorder(&mut self) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        // Fall back to following the map center when no platform position
        // source is wired in.
        let pos = self
            .position_source
            .as_mut()
            .and_then(|s| s.poll())
            .unwrap_or(self.map.center);
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        if recorder.tick(pos, self.now_ms, timestamp_ms) {
            let samples = recorder.samples().to_vec();
            self.with_path_layer(|l| l.live = Some(samples));
        }
    }

    fn expire_delete_toast(&mut self) {
        let expired = self
            .deleted
            .as_ref()
            .is_some_and(|d| self.now_ms >= d.expires_at_ms)
            && self.pending.is_none();
        if expired {
            if let Some(deleted) = self.deleted.take() {
                let base = self.settings.backend_base_url.clone();
                self.pending = Some(PendingMutation::Delete(Promise::spawn_thread(
                    "delete_refuge",
                    move || backend::delete_refuge(&base, &deleted.refuge.id),
                )));
            }
        }
    }

    fn after_map(&mut self) {
        // Reticle visibility follows the active session's mode.
        let reticle = self
            .with_draw_layer(|l| {
                l.controller()
                    .session()
                    .map(|s| s.mode() == InputMode::CenterReticle)
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        self.map.show_reticle = reticle;

        if let Some(outcome) = self.with_draw_layer(|l| l.take_close_outcome()).flatten() {
            match outcome {
                CloseOutcome::NeedMorePoints => {
                    self.status = "Need at least 3 points".to_string();
                }
                CloseOutcome::Closed => {
                    let saving = self
                        .with_draw_layer(|l| {
                            l.controller()
                                .session()
                                .map(|s| s.purpose() == DrawPurpose::SaveRefuge)
                                .unwrap_or(false)
                        })
                        .unwrap_or(false);
                    if saving {
                        self.status = "Name the new refuge".to_string();
                    }
                }
                CloseOutcome::TooFarFromStart => {}
            }
        }

        if let Some(completed) = self.with_draw_layer(|l| l.take_completed()).flatten() {
            self.handle_overlay_ring(completed.ring);
        }

        if let Some(id) = self.with_refuge_layer(|l| l.take_clicked()).flatten() {
            if let Some(refuge) = self.refuges.iter().find(|r| r.id == id) {
                self.status = refuge.name.clone();
            }
        }

        if let Some(hit) = self.with_path_layer(|l| l.take_clicked()).flatten() {
            self.popup_caption.clear();
            self.popup_image_url.clear();
            self.popup_target = Some(hit);
        }

        if let Some(outcome) = self.with_overlay_layer(|l| l.take_select_outcome()).flatten() {
            self.status = match outcome {
                SelectOutcome::Selected => "Overlay selected".to_string(),
                SelectOutcome::AlreadySelected => "Already selected".to_string(),
                SelectOutcome::LockedToOther => "Locked to the other selection".to_string(),
                SelectOutcome::AdjoinLocked => {
                    "Nested overlays cannot be adjoined".to_string()
                }
                SelectOutcome::SubtractLocked => {
                    "Subtracting this overlay would erase the refuge".to_string()
                }
                SelectOutcome::Missing => "That overlay is gone".to_string(),
            };
        }
    }

    fn refuge_center(refuge: &Refuge) -> Option<GeoPos> {
        let outer = &refuge.footprint.polygons.first()?.outer;
        if outer.is_empty() {
            return None;
        }
        let n = outer.len() as f64;
        Some(GeoPos {
            lon: outer.iter().map(|p| p.lon).sum::<f64>() / n,
            lat: outer.iter().map(|p| p.lat).sum::<f64>() / n,
        })
    }

    fn side_panel(&mut self, ui: &mut egui::Ui) {
        let busy = self.pending.is_some();
        let drawing = self
            .with_draw_layer(|l| l.controller().is_active())
            .unwrap_or(false);
        let editing = self
            .with_overlay_layer(|l| l.editor.is_some())
            .unwrap_or(false);

        ui.heading("Refuges");
        ui.separator();

        let refuges = self.refuges.clone();
        for refuge in &refuges {
            ui.horizontal(|ui| {
                let selected = self
                    .map
                    .layer_mut::<RefugeLayer>(REFUGE_LAYER)
                    .map(|l| l.selected.as_deref() == Some(refuge.id.as_str()))
                    .unwrap_or(false);

                if ui.selectable_label(selected, &refuge.name).clicked() {
                    self.with_refuge_layer(|l| l.selected = Some(refuge.id.clone()));
                    if let Some(center) = Self::refuge_center(refuge) {
                        self.map.set_center(center);
                    }
                }

                if ui
                    .small_button("✏")
                    .on_hover_text("Rename")
                    .clicked()
                {
                    self.rename = Some(RenameState {
                        id: refuge.id.clone(),
                        buffer: refuge.name.clone(),
                    });
                }
                if ui
                    .add_enabled(!editing && !drawing, egui::Button::new("⬡").small())
                    .on_hover_text("Edit area")
                    .clicked()
                {
                    self.open_editor(refuge.clone());
                }
                if ui
                    .add_enabled(!busy && self.deleted.is_none(), egui::Button::new("🗑").small())
                    .on_hover_text("Delete")
                    .clicked()
                {
                    self.refuges.retain(|r| r.id != refuge.id);
                    let refuges = self.refuges.clone();
                    self.with_refuge_layer(|l| l.set_refuges(refuges));
                    self.deleted = Some(DeletedRefuge {
                        refuge: refuge.clone(),
                        expires_at_ms: self.now_ms + DELETE_TOAST_MS,
                    });
                }
            });

            if self.rename.as_ref().map(|r| r.id.as_str()) == Some(refuge.id.as_str()) {
                ui.horizontal(|ui| {
                    if let Some(rename) = self.rename.as_mut() {
                        ui.text_edit_singleline(&mut rename.buffer);
                    }
                    let buffer = self
                        .rename
                        .as_ref()
                        .map(|r| r.buffer.clone())
                        .unwrap_or_default();
                    if ui
                        .add_enabled(!busy && !buffer.trim().is_empty(), egui::Button::new("Save"))
                        .clicked()
                    {
                        let base = self.settings.backend_base_url.clone();
                        let id = refuge.id.clone();
                        self.pending = Some(PendingMutation::Rename(Promise::spawn_thread(
                            "rename_refuge",
                            move || backend::rename_refuge(&base, &id, buffer.trim()),
                        )));
                    }
                    if ui.button("Cancel").clicked() {
                        self.rename = None;
                    }
                });
            }
        }

        ui.add_space(8.0);
        if !editing {
            if drawing {
                ui.horizontal(|ui| {
                    if ui.button("Undo point").clicked() {
                        self.with_draw_layer(|l| l.undo_vertex());
                    }
                    if ui.button("Cancel drawing").clicked() {
                        self.cancel_drawing();
                        self.status = "Drawing cancelled".to_string();
                    }
                    if ui.button("Hide hints").clicked() {
                        self.with_draw_layer(|l| l.mute_hints());
                    }
                });
            } else if ui.button("Draw new refuge").clicked() {
                self.start_refuge_draw();
            }
        }

        if editing {
            ui.add_space(8.0);
            ui.heading("Edit area");
            ui.separator();
            self.editor_panel(ui, busy);
        }

        ui.add_space(8.0);
        ui.heading("Paths");
        ui.separator();

        let paths = self.paths.clone();
        for record in &paths {
            ui.horizontal(|ui| {
                let selected = self
                    .map
                    .layer_mut::<PathLayer>(PATH_LAYER)
                    .map(|l| l.selected.as_deref() == Some(record.id.as_str()))
                    .unwrap_or(false);
                if ui.selectable_label(selected, &record.name).clicked() {
                    self.with_path_layer(|l| l.selected = Some(record.id.clone()));
                    if let Some(first) = record.points.first() {
                        self.map.set_center(first.geo());
                    }
                }
                if !record.popups.is_empty() {
                    ui.weak(format!("{} popups", record.popups.len()));
                }
                if ui.small_button("✏").on_hover_text("Rename").clicked() {
                    self.path_rename = Some(RenameState {
                        id: record.id.clone(),
                        buffer: record.name.clone(),
                    });
                }
                if ui
                    .add_enabled(!busy, egui::Button::new("🗑").small())
                    .on_hover_text("Delete")
                    .clicked()
                {
                    let base = self.settings.backend_base_url.clone();
                    let id = record.id.clone();
                    self.pending = Some(PendingMutation::DeletePath(Promise::spawn_thread(
                        "delete_path",
                        move || backend::delete_path(&base, &id),
                    )));
                }
            });

            if self.path_rename.as_ref().map(|r| r.id.as_str()) == Some(record.id.as_str()) {
                ui.horizontal(|ui| {
                    if let Some(rename) = self.path_rename.as_mut() {
                        ui.text_edit_singleline(&mut rename.buffer);
                    }
                    let buffer = self
                        .path_rename
                        .as_ref()
                        .map(|r| r.buffer.clone())
                        .unwrap_or_default();
                    if ui
                        .add_enabled(!busy && !buffer.trim().is_empty(), egui::Button::new("Save"))
                        .clicked()
                    {
                        // Path updates are a full replace; only the name
                        // changes here.
                        let mut updated = record.clone();
                        updated.name = buffer.trim().to_string();
                        let base = self.settings.backend_base_url.clone();
                        self.pending = Some(PendingMutation::UpdatePath(Promise::spawn_thread(
                            "update_path",
                            move || backend::update_path(&base, &updated),
                        )));
                    }
                    if ui.button("Cancel").clicked() {
                        self.path_rename = None;
                    }
                });
            }
        }

        ui.add_space(4.0);
        if self.recorder.is_some() {
            ui.horizontal(|ui| {
                let count = self.recorder.as_ref().map(|r| r.samples().len()).unwrap_or(0);
                ui.label(format!("Recording… {count} points"));
                if ui.add_enabled(!busy, egui::Button::new("Stop")).clicked() {
                    if let Some(recorder) = self.recorder.take() {
                        let (name, samples) = recorder.finish();
                        self.with_path_layer(|l| l.live = None);
                        if samples.len() < 2 {
                            self.status = "Path too short to save".to_string();
                        } else {
                            let base = self.settings.backend_base_url.clone();
                            self.pending =
                                Some(PendingMutation::SavePath(Promise::spawn_thread(
                                    "create_path",
                                    move || backend::create_path(&base, &name, &samples),
                                )));
                        }
                    }
                }
            });
        } else {
            ui.horizontal(|ui| {
                ui.text_edit_singleline(&mut self.record_name);
                let can_start = !self.record_name.trim().is_empty();
                if ui
                    .add_enabled(can_start, egui::Button::new("Record"))
                    .clicked()
                {
                    self.recorder = Some(PathRecorder::new(self.record_name.trim()));
                    self.record_name.clear();
                    self.status = "Recording path".to_string();
                }
            });
        }

        ui.add_space(8.0);
        ui.heading("Search");
        ui.separator();
        ui.horizontal(|ui| {
            let field = ui.text_edit_singleline(&mut self.search_query);
            let go = ui.button("Find").clicked()
                || (field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)));
            if go && !self.search_query.trim().is_empty() {
                let base = self.settings.geocoder_base_url.clone();
                let query = self.search_query.trim().to_string();
                self.search_promise = Some(Promise::spawn_thread("search_places", move || {
                    geocode::search_places(&base, &query)
                }));
            }
        });
        let results = self.search_results.clone();
        for place in &results {
            if ui.link(&place.display_name).clicked() {
                self.map.set_center(place.pos);
                self.search_results.clear();
            }
        }

        ui.add_space(8.0);
        ui.heading("Map");
        ui.separator();
        ui.horizontal(|ui| {
            if ui.selectable_label(self.satellite_active, "Satellite").clicked()
                && !self.satellite_active
            {
                self.map.set_tile_provider(SatelliteConfig::default());
                self.satellite_active = true;
            }
            if ui.selectable_label(!self.satellite_active, "Terrain").clicked()
                && self.satellite_active
            {
                self.map.set_tile_provider(TerrainConfig::default());
                self.satellite_active = false;
            }
        });
        ui.horizontal(|ui| {
            ui.label("Input:");
            ui.selectable_value(&mut self.settings.input_mode, InputModePreference::Auto, "Auto");
            ui.selectable_value(
                &mut self.settings.input_mode,
                InputModePreference::Pointer,
                "Pointer",
            );
            ui.selectable_value(
                &mut self.settings.input_mode,
                InputModePreference::Reticle,
                "Reticle",
            );
        });
        if ui.button("Center on me").clicked() {
            match self.position_source.as_mut().and_then(|s| s.poll()) {
                Some(pos) => self.map.set_center(pos),
                None => self.status = "No position available".to_string(),
            }
        }
    }

    fn editor_panel(&mut self, ui: &mut egui::Ui, busy: bool) {
        let Some((name, overlay_count, has_selection, selecting, select_mode)) = self
            .with_overlay_layer(|l| {
                l.editor.as_ref().map(|editor| {
                    (
                        editor.refuge().name.clone(),
                        editor.overlays().len(),
                        editor.has_selection(),
                        l.selecting,
                        l.select_mode,
                    )
                })
            })
            .flatten()
        else {
            return;
        };

        ui.label(format!("Editing '{name}' — {overlay_count} overlays"));

        ui.horizontal(|ui| {
            if ui.add_enabled(!busy, egui::Button::new("Draw overlay")).clicked() {
                self.start_overlay_draw();
            }
            if ui
                .selectable_label(selecting && select_mode == SelectMode::Adjoin, "Adjoin")
                .clicked()
            {
                self.with_draw_layer(|l| l.cancel());
                self.with_overlay_layer(|l| {
                    l.selecting = true;
                    l.select_mode = SelectMode::Adjoin;
                });
                self.status = "Tap an overlay to adjoin it".to_string();
            }
            if ui
                .selectable_label(selecting && select_mode == SelectMode::Subtract, "Subtract")
                .clicked()
            {
                self.with_draw_layer(|l| l.cancel());
                self.with_overlay_layer(|l| {
                    l.selecting = true;
                    l.select_mode = SelectMode::Subtract;
                });
                self.status = "Tap an overlay to subtract it".to_string();
            }
        });

        ui.horizontal(|ui| {
            if ui.button("Undo selection").clicked() {
                let undone = self
                    .with_overlay_layer(|l| {
                        let mode = l.select_mode;
                        l.editor.as_mut().map(|e| e.undo_selection(mode))
                    })
                    .flatten()
                    .unwrap_or(false);
                if !undone {
                    self.status = "Nothing to unselect".to_string();
                }
            }
            if ui.button("Remove last overlay").clicked() {
                let removed = self
                    .with_overlay_layer(|l| l.editor.as_mut().map(|e| e.undo_last_overlay()))
                    .flatten()
                    .unwrap_or(false);
                if !removed {
                    self.status = "No overlays to remove".to_string();
                }
            }
        });

        ui.horizontal(|ui| {
            if ui
                .add_enabled(!busy && has_selection, egui::Button::new("Apply changes"))
                .clicked()
            {
                if let Some((id, (adjoin, subtract))) = self
                    .with_overlay_layer(|l| {
                        l.editor
                            .as_ref()
                            .map(|e| (e.refuge().id.clone(), e.payload()))
                    })
                    .flatten()
                {
                    // No overlay may complete while the request is in
                    // flight.
                    self.with_draw_layer(|l| l.cancel());
                    let base = self.settings.backend_base_url.clone();
                    self.pending = Some(PendingMutation::Apply(Promise::spawn_thread(
                        "apply_overlays",
                        move || backend::apply_overlays(&base, &id, adjoin, subtract),
                    )));
                    self.status = "Saving…".to_string();
                }
            }
            if ui.button("Close editor").clicked() {
                self.close_editor();
                self.status.clear();
            }
        });
    }

    fn name_prompt_window(&mut self, ctx: &egui::Context) {
        let closing_save = self
            .with_draw_layer(|l| {
                l.controller()
                    .session()
                    .map(|s| {
                        s.phase() == DrawPhase::Closing && s.purpose() == DrawPurpose::SaveRefuge
                    })
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        if !closing_save {
            return;
        }

        let busy = self.pending.is_some();
        egui::Window::new("New refuge")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, 40.0))
            .show(ctx, |ui| {
                ui.label("Name the refuge:");
                ui.text_edit_singleline(&mut self.name_input);

                ui.horizontal(|ui| {
                    let name = self.name_input.trim().to_string();
                    if ui
                        .add_enabled(!busy && !name.is_empty(), egui::Button::new("Save"))
                        .clicked()
                    {
                        if let Some(ring) = self.with_draw_layer(|l| l.pending_ring()).flatten() {
                            let base = self.settings.backend_base_url.clone();
                            self.pending = Some(PendingMutation::Create(Promise::spawn_thread(
                                "create_refuge",
                                move || backend::create_refuge(&base, &name, &ring),
                            )));
                            self.status = "Saving…".to_string();
                        }
                    }
                    if self.name_input.trim().is_empty() {
                        ui.weak("A name is required");
                    }
                    if ui.add_enabled(!busy, egui::Button::new("Discard")).clicked() {
                        self.cancel_drawing();
                        self.name_input.clear();
                        self.status = "Drawing discarded".to_string();
                    }
                });
            });
    }

    fn popup_window(&mut self, ctx: &egui::Context) {
        let Some(target) = self.popup_target.clone() else {
            return;
        };
        let Some(path_name) = self
            .paths
            .iter()
            .find(|p| p.id == target.path_id)
            .map(|p| p.name.clone())
        else {
            self.popup_target = None;
            return;
        };

        let busy = self.pending.is_some();
        let mut open = true;
        egui::Window::new(format!("Point {} on '{}'", target.point_index, path_name))
            .collapsible(false)
            .resizable(false)
            .open(&mut open)
            .show(ctx, |ui| {
                ui.label("Caption:");
                ui.text_edit_singleline(&mut self.popup_caption);
                ui.label("Image URL:");
                ui.text_edit_singleline(&mut self.popup_image_url);

                let has_content = !self.popup_caption.trim().is_empty()
                    || !self.popup_image_url.trim().is_empty();
                if ui
                    .add_enabled(!busy && has_content, egui::Button::new("Attach popup"))
                    .clicked()
                {
                    let popup = PathPopup {
                        caption: Some(self.popup_caption.trim().to_string())
                            .filter(|s| !s.is_empty()),
                        image_url: Some(self.popup_image_url.trim().to_string())
                            .filter(|s| !s.is_empty()),
                    };
                    let base = self.settings.backend_base_url.clone();
                    let path_id = target.path_id.clone();
                    let index = target.point_index;
                    self.pending = Some(PendingMutation::AttachPopup(Promise::spawn_thread(
                        "attach_popup",
                        move || backend::attach_popup(&base, &path_id, index, &popup),
                    )));
                    self.status = "Saving…".to_string();
                    self.popup_target = None;
                }
            });
        if !open {
            self.popup_target = None;
        }
    }

    fn delete_toast(&mut self, ctx: &egui::Context) {
        let Some(name) = self.deleted.as_ref().map(|d| d.refuge.name.clone()) else {
            return;
        };
        egui::Window::new("deleted_toast")
            .title_bar(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_BOTTOM, egui::vec2(0.0, -40.0))
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(format!("Deleted '{name}'"));
                    if ui.button("Undo").clicked() {
                        if let Some(deleted) = self.deleted.take() {
                            self.refuges.push(deleted.refuge);
                            let refuges = self.refuges.clone();
                            self.with_refuge_layer(|l| l.set_refuges(refuges));
                            self.status = "Delete undone".to_string();
                        }
                    }
                });
            });
        // Keep repainting so the toast expires without input.
        ctx.request_repaint_after(std::time::Duration::from_millis(250));
    }
}

impl eframe::App for RefugeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.now_ms = ctx.input(|i| i.time) * 1_000.0;
        if ctx.input(|i| i.any_touches()) {
            self.touch_seen = true;
        }

        self.poll_fetches();
        self.poll_pending();
        self.tick_recorder();
        self.expire_delete_toast();

        egui::SidePanel::left("side_panel")
            .default_width(300.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| self.side_panel(ui));
            });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if self.pending.is_some() {
                    ui.spinner();
                    ui.label("Saving…");
                    ui.separator();
                }
                ui.label(&self.status);
                if let Some(pos) = self.map.mouse_pos {
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        ui.weak(format!("{:.5}, {:.5}", pos.lat, pos.lon));
                    });
                }
            });
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                ui.add(&mut self.map);
            });

        self.after_map();

        self.name_prompt_window(ctx);
        self.popup_window(ctx);
        self.delete_toast(ctx);

        // The recorder samples on a timer, not on input.
        if self.recorder.is_some() {
            ctx.request_repaint_after(std::time::Duration::from_millis(250));
        }
    }
}
