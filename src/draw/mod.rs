//! The polygon drawing session: vertex capture, closing-gesture detection,
//! undo and teardown.
//!
//! A session is a plain state struct driven by one of the two input adapters
//! in [`input`]; rendering is handled by the draw layer. All timing-dependent
//! behavior takes an explicit `now_ms` so the machine tests without a UI
//! loop.

use egui::Pos2;

use crate::projection::{GeoPos, MapProjection};
use crate::types::Ring;

/// Input adapters feeding sessions.
pub mod input;

/// Empirically tuned interaction thresholds.
///
/// These were calibrated by hand in the field; treat them as configuration,
/// not invariants.
#[derive(Clone, Copy, Debug)]
pub struct DrawTuning {
    /// Screen-space distance to the first vertex within which a closing
    /// gesture is accepted.
    pub close_threshold_px: f32,

    /// Window for two taps to count as a synthetic double tap.
    pub double_tap_window_ms: f64,

    /// A vertex added this recently before a closing gesture is assumed to be
    /// the misread first half of the double tap and is discarded.
    pub redundant_vertex_window_ms: f64,

    /// How long after the last cursor movement the helper message switches
    /// from the movement hint to the proximity-based hint.
    pub idle_hint_ms: f64,
}

impl Default for DrawTuning {
    fn default() -> Self {
        Self {
            close_threshold_px: 8.0,
            double_tap_window_ms: 280.0,
            redundant_vertex_window_ms: 600.0,
            idle_hint_ms: 450.0,
        }
    }
}

/// How vertices are derived from user gestures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Vertices land at the exact click/tap position.
    PointerDirect,

    /// Vertices land at the map center; the map pans under a fixed reticle.
    CenterReticle,
}

/// What happens to the ring once the session closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawPurpose {
    /// The ring is named and persisted as a new refuge.
    SaveRefuge,

    /// The ring is handed to the caller (overlay editing); no backend call.
    YieldRing,
}

/// Session phase. The idle and terminal states are the controller's empty
/// slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawPhase {
    /// Accepting vertices.
    Active,

    /// Ring closed, awaiting a name (or already yielded).
    Closing,
}

/// Result of a closing gesture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The ring closed; the session is now in [`DrawPhase::Closing`].
    Closed,

    /// Fewer than three vertices; the session stays active and untouched.
    NeedMorePoints,

    /// The gesture landed too far from the first vertex and was ignored.
    TooFarFromStart,
}

/// The helper message shown while drawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawHint {
    /// No vertices yet.
    AddVertex,

    /// Vertices exist; keep going.
    DragToDraw,

    /// Three or more vertices and the cursor/reticle is near the start.
    CloseArea,
}

impl DrawHint {
    /// The user-facing message for this hint.
    pub fn message(self, mode: InputMode) -> &'static str {
        match (self, mode) {
            (DrawHint::AddVertex, InputMode::PointerDirect) => "Click to add a point",
            (DrawHint::AddVertex, InputMode::CenterReticle) => "Tap to add a point",
            (DrawHint::DragToDraw, _) => "Drag to draw the line",
            (DrawHint::CloseArea, InputMode::PointerDirect) => "Double click to close the area",
            (DrawHint::CloseArea, InputMode::CenterReticle) => "Double tap to close the area",
        }
    }
}

/// One in-progress polygon draw.
pub struct DrawingSession {
    mode: InputMode,
    purpose: DrawPurpose,
    tuning: DrawTuning,
    vertices: Ring,
    phase: DrawPhase,
    guide: Option<GeoPos>,
    last_vertex_at: Option<f64>,
    last_move_at: Option<f64>,
    hints_muted: bool,
}

impl DrawingSession {
    fn new(mode: InputMode, purpose: DrawPurpose, tuning: DrawTuning) -> Self {
        Self {
            mode,
            purpose,
            tuning,
            vertices: Vec::new(),
            phase: DrawPhase::Active,
            guide: None,
            last_vertex_at: None,
            last_move_at: None,
            hints_muted: false,
        }
    }

    /// The session's input mode.
    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// What the closed ring will be used for.
    pub fn purpose(&self) -> DrawPurpose {
        self.purpose
    }

    /// Current phase.
    pub fn phase(&self) -> DrawPhase {
        self.phase
    }

    /// The committed vertices, in insertion order.
    pub fn vertices(&self) -> &[GeoPos] {
        &self.vertices
    }

    /// The live guide endpoint (cursor or reticle position).
    pub fn guide(&self) -> Option<GeoPos> {
        self.guide
    }

    /// The interaction thresholds in effect.
    pub fn tuning(&self) -> &DrawTuning {
        &self.tuning
    }

    /// Stops showing helper messages for the rest of the session.
    pub fn mute_hints(&mut self) {
        self.hints_muted = true;
    }

    /// Appends a vertex. Ignored once the session is closing.
    pub fn add_vertex(&mut self, pos: GeoPos, now_ms: f64) {
        if self.phase != DrawPhase::Active {
            return;
        }
        self.vertices.push(pos);
        self.last_vertex_at = Some(now_ms);
    }

    /// Removes the most recent vertex. No-op when empty or closing.
    pub fn undo(&mut self) {
        if self.phase != DrawPhase::Active {
            return;
        }
        if self.vertices.pop().is_some() {
            self.last_vertex_at = None;
        }
    }

    /// Moves the guide endpoint. Movement timestamps drive the idle-hint
    /// switch, so the timestamp only advances when the position actually
    /// changed.
    pub fn update_guide(&mut self, pos: GeoPos, now_ms: f64) {
        if self.phase != DrawPhase::Active {
            return;
        }
        if self.guide != Some(pos) {
            self.last_move_at = Some(now_ms);
        }
        self.guide = Some(pos);
    }

    /// Whether a screen position falls within the closing threshold of the
    /// first vertex.
    pub fn near_first_vertex(&self, screen_pos: Pos2, projection: &MapProjection) -> bool {
        match self.vertices.first() {
            Some(first) => {
                projection.project(*first).distance(screen_pos) <= self.tuning.close_threshold_px
            }
            None => false,
        }
    }

    /// Attempts to close the ring at the given gesture position.
    ///
    /// A vertex committed within the redundancy window immediately before the
    /// gesture is treated as the misread first half of the double tap and
    /// dropped, but never below the three-vertex minimum.
    pub fn try_close(
        &mut self,
        screen_pos: Pos2,
        projection: &MapProjection,
        now_ms: f64,
    ) -> CloseOutcome {
        if self.phase == DrawPhase::Closing {
            return CloseOutcome::Closed;
        }

        let discard_last = self.vertices.len() > 3
            && matches!(self.last_vertex_at,
                Some(t) if now_ms - t <= self.tuning.redundant_vertex_window_ms);
        let effective_len = self.vertices.len() - usize::from(discard_last);

        if effective_len < 3 {
            return CloseOutcome::NeedMorePoints;
        }
        if !self.near_first_vertex(screen_pos, projection) {
            return CloseOutcome::TooFarFromStart;
        }

        if discard_last {
            self.vertices.pop();
        }
        self.phase = DrawPhase::Closing;
        self.guide = None;
        CloseOutcome::Closed
    }

    /// The helper message to show, or `None` when muted.
    pub fn hint(&self, projection: &MapProjection, now_ms: f64) -> Option<DrawHint> {
        if self.hints_muted || self.phase != DrawPhase::Active {
            return None;
        }
        if self.vertices.is_empty() {
            return Some(DrawHint::AddVertex);
        }

        let moving =
            matches!(self.last_move_at, Some(t) if now_ms - t < self.tuning.idle_hint_ms);
        if !moving && self.vertices.len() >= 3 {
            if let Some(guide) = self.guide {
                if self.near_first_vertex(projection.project(guide), projection) {
                    return Some(DrawHint::CloseArea);
                }
            }
        }
        Some(DrawHint::DragToDraw)
    }
}

/// Owner of the single authoritative drawing session slot.
///
/// Only one session may exist at a time; starting a new one tears down any
/// previous session, and teardown is idempotent.
#[derive(Default)]
pub struct DrawController {
    session: Option<DrawingSession>,
    tuning: Option<DrawTuning>,
}

impl DrawController {
    /// Creates a controller with custom tuning.
    pub fn with_tuning(tuning: DrawTuning) -> Self {
        Self {
            session: None,
            tuning: Some(tuning),
        }
    }

    /// Starts a fresh session, tearing down any previous one.
    pub fn start(&mut self, mode: InputMode, purpose: DrawPurpose) -> &mut DrawingSession {
        let tuning = self.tuning.unwrap_or_default();
        self.session
            .insert(DrawingSession::new(mode, purpose, tuning))
    }

    /// Tears down the active session, if any. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        self.session = None;
    }

    /// Takes the closed ring and tears the session down.
    ///
    /// Returns `None` if no session is active or the ring is not closed yet.
    pub fn finish(&mut self) -> Option<Ring> {
        match &self.session {
            Some(session) if session.phase == DrawPhase::Closing => {
                self.session.take().map(|s| s.vertices)
            }
            _ => None,
        }
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// The active session.
    pub fn session(&self) -> Option<&DrawingSession> {
        self.session.as_ref()
    }

    /// The active session, mutably.
    pub fn session_mut(&mut self) -> Option<&mut DrawingSession> {
        self.session.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{Rect, pos2};

    fn projection() -> MapProjection {
        MapProjection::new(
            10,
            GeoPos::new(15.0, 15.0),
            Rect::from_min_max(pos2(0.0, 0.0), pos2(800.0, 600.0)),
        )
    }

    fn start_session(controller: &mut DrawController) -> &mut DrawingSession {
        controller.start(InputMode::PointerDirect, DrawPurpose::SaveRefuge)
    }

    #[test]
    fn close_rejected_below_three_vertices() {
        let mut controller = DrawController::default();
        let projection = projection();
        let session = start_session(&mut controller);

        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        session.add_vertex(GeoPos::new(10.0, 20.0), 1_000.0);

        let first_screen = projection.project(GeoPos::new(10.0, 10.0));
        let outcome = session.try_close(first_screen, &projection, 2_000.0);

        assert_eq!(outcome, CloseOutcome::NeedMorePoints);
        assert_eq!(session.phase(), DrawPhase::Active);
        // The failed attempt neither added nor removed a vertex.
        assert_eq!(session.vertices().len(), 2);
    }

    #[test]
    fn close_rejected_away_from_first_vertex() {
        let mut controller = DrawController::default();
        let projection = projection();
        let session = start_session(&mut controller);

        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        session.add_vertex(GeoPos::new(10.0, 20.0), 1_000.0);
        session.add_vertex(GeoPos::new(20.0, 20.0), 2_000.0);

        let elsewhere = projection.project(GeoPos::new(20.0, 20.0));
        let outcome = session.try_close(elsewhere, &projection, 10_000.0);

        assert_eq!(outcome, CloseOutcome::TooFarFromStart);
        assert_eq!(session.phase(), DrawPhase::Active);
    }

    #[test]
    fn close_succeeds_near_first_vertex() {
        let mut controller = DrawController::default();
        let projection = projection();
        let session = start_session(&mut controller);

        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        session.add_vertex(GeoPos::new(10.0, 20.0), 1_000.0);
        session.add_vertex(GeoPos::new(20.0, 20.0), 2_000.0);
        session.add_vertex(GeoPos::new(20.0, 10.0), 3_000.0);

        let first_screen = projection.project(GeoPos::new(10.0, 10.0));
        let outcome = session.try_close(first_screen, &projection, 10_000.0);

        assert_eq!(outcome, CloseOutcome::Closed);
        assert_eq!(session.phase(), DrawPhase::Closing);
        assert_eq!(session.vertices().len(), 4);
    }

    #[test]
    fn rapid_double_tap_discards_redundant_vertex() {
        let mut controller = DrawController::default();
        let projection = projection();
        let session = start_session(&mut controller);

        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        session.add_vertex(GeoPos::new(10.0, 20.0), 1_000.0);
        session.add_vertex(GeoPos::new(20.0, 20.0), 2_000.0);
        // Misread first half of a double tap lands a fourth vertex near the
        // start...
        session.add_vertex(GeoPos::new(10.001, 10.001), 5_000.0);
        // ...and the close gesture follows within the redundancy window.
        let first_screen = projection.project(GeoPos::new(10.0, 10.0));
        let outcome = session.try_close(first_screen, &projection, 5_200.0);

        assert_eq!(outcome, CloseOutcome::Closed);
        assert_eq!(session.vertices().len(), 3);
    }

    #[test]
    fn redundant_discard_never_breaks_the_minimum() {
        let mut controller = DrawController::default();
        let projection = projection();
        let session = start_session(&mut controller);

        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        session.add_vertex(GeoPos::new(10.0, 20.0), 100.0);
        session.add_vertex(GeoPos::new(20.0, 20.0), 200.0);

        // Third vertex is recent, but discarding it would leave only two.
        let first_screen = projection.project(GeoPos::new(10.0, 10.0));
        let outcome = session.try_close(first_screen, &projection, 300.0);

        assert_eq!(outcome, CloseOutcome::Closed);
        assert_eq!(session.vertices().len(), 3);
    }

    #[test]
    fn undo_pops_only_while_active() {
        let mut controller = DrawController::default();
        let projection = projection();
        let session = start_session(&mut controller);

        session.undo(); // empty: no-op
        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        session.add_vertex(GeoPos::new(10.0, 20.0), 100.0);
        session.undo();
        assert_eq!(session.vertices().len(), 1);

        session.add_vertex(GeoPos::new(10.0, 20.0), 1_000.0);
        session.add_vertex(GeoPos::new(20.0, 20.0), 2_000.0);
        let first_screen = projection.project(GeoPos::new(10.0, 10.0));
        session.try_close(first_screen, &projection, 10_000.0);

        session.undo(); // closing: no-op
        assert_eq!(session.vertices().len(), 3);
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut controller = DrawController::default();
        controller.cancel(); // nothing active: no-op

        controller.start(InputMode::CenterReticle, DrawPurpose::YieldRing);
        assert!(controller.is_active());

        controller.cancel();
        assert!(!controller.is_active());
        controller.cancel(); // already torn down: still a no-op
        assert!(!controller.is_active());
    }

    #[test]
    fn starting_replaces_the_previous_session() {
        let mut controller = DrawController::default();
        let session = controller.start(InputMode::PointerDirect, DrawPurpose::SaveRefuge);
        session.add_vertex(GeoPos::new(1.0, 1.0), 0.0);

        let session = controller.start(InputMode::PointerDirect, DrawPurpose::SaveRefuge);
        assert!(session.vertices().is_empty());
    }

    #[test]
    fn finish_requires_a_closed_ring() {
        let mut controller = DrawController::default();
        let projection = projection();

        assert!(controller.finish().is_none());

        let session = start_session(&mut controller);
        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        assert!(controller.finish().is_none());
        assert!(controller.is_active());

        let session = controller.session_mut().unwrap();
        session.add_vertex(GeoPos::new(10.0, 20.0), 1_000.0);
        session.add_vertex(GeoPos::new(20.0, 20.0), 2_000.0);
        let first_screen = projection.project(GeoPos::new(10.0, 10.0));
        session.try_close(first_screen, &projection, 10_000.0);

        let ring = controller.finish().unwrap();
        assert_eq!(ring.len(), 3);
        assert!(!controller.is_active());
    }

    #[test]
    fn finished_ring_serializes_closed() {
        let mut controller = DrawController::default();
        let projection = projection();
        let session = start_session(&mut controller);

        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        session.add_vertex(GeoPos::new(10.0, 20.0), 1_000.0);
        session.add_vertex(GeoPos::new(20.0, 20.0), 2_000.0);
        session.add_vertex(GeoPos::new(20.0, 10.0), 3_000.0);
        let first_screen = projection.project(GeoPos::new(10.0, 10.0));
        session.try_close(first_screen, &projection, 10_000.0);

        let ring = controller.finish().unwrap();
        let geometry = crate::types::ring_to_polygon_geometry(&ring);

        match geometry.value {
            geojson::Value::Polygon(rings) => {
                assert_eq!(
                    rings,
                    vec![vec![
                        vec![10.0, 10.0],
                        vec![10.0, 20.0],
                        vec![20.0, 20.0],
                        vec![20.0, 10.0],
                        vec![10.0, 10.0],
                    ]]
                );
            }
            other => panic!("expected Polygon, got {other:?}"),
        }
    }

    #[test]
    fn hint_progression() {
        let mut controller = DrawController::default();
        let projection = projection();
        let session = start_session(&mut controller);

        assert_eq!(session.hint(&projection, 0.0), Some(DrawHint::AddVertex));

        session.add_vertex(GeoPos::new(10.0, 10.0), 0.0);
        session.update_guide(GeoPos::new(12.0, 12.0), 0.0);
        assert_eq!(session.hint(&projection, 100.0), Some(DrawHint::DragToDraw));

        session.add_vertex(GeoPos::new(10.0, 20.0), 1_000.0);
        session.add_vertex(GeoPos::new(20.0, 20.0), 2_000.0);

        // Guide parked on the first vertex, but still inside the idle window:
        // the movement hint wins.
        session.update_guide(GeoPos::new(10.0, 10.0), 3_000.0);
        assert_eq!(
            session.hint(&projection, 3_100.0),
            Some(DrawHint::DragToDraw)
        );

        // After the idle window the proximity hint takes over.
        assert_eq!(
            session.hint(&projection, 3_600.0),
            Some(DrawHint::CloseArea)
        );

        session.mute_hints();
        assert_eq!(session.hint(&projection, 3_700.0), None);
    }
}
