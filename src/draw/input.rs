//! Input adapters translating map gestures into drawing-session calls.
//!
//! Both adapters satisfy the same contract against the session — primary
//! activate, move, close gesture, cancel — but derive the events
//! differently: [`PointerAdapter`] trusts the device's precise pointer,
//! [`ReticleAdapter`] commits vertices at the map center so a finger never
//! occludes the target point.

use egui::{Pos2, Response};

use crate::draw::{CloseOutcome, DrawPhase, DrawingSession};
use crate::projection::{GeoPos, MapProjection};

/// What an adapter did with this frame's input.
#[derive(Clone, Copy, Debug, Default)]
pub struct InputEffect {
    /// Whether the map should skip its own input handling this frame.
    pub consumed: bool,

    /// The result of a closing gesture, if one fired.
    pub close: Option<CloseOutcome>,
}

/// Desktop/mouse input: vertices at the exact click position.
#[derive(Default)]
pub struct PointerAdapter {
    last_tap: Option<(f64, Pos2)>,
}

impl PointerAdapter {
    /// Resets tap bookkeeping (called when a session starts or ends).
    pub fn reset(&mut self) {
        self.last_tap = None;
    }

    /// Feeds one frame of widget input into the session.
    pub fn process(
        &mut self,
        response: &Response,
        projection: &MapProjection,
        session: &mut DrawingSession,
        now_ms: f64,
    ) -> InputEffect {
        let mut effect = InputEffect::default();

        if let Some(hover) = response.hover_pos() {
            session.update_guide(projection.unproject(hover), now_ms);
        }

        if session.phase() != DrawPhase::Active {
            // A closed preview is on screen; swallow stray double clicks so
            // the map does not zoom underneath the name prompt.
            effect.consumed = response.double_clicked();
            return effect;
        }

        let pointer = response.interact_pointer_pos();

        if response.double_clicked() {
            if let Some(pos) = pointer {
                effect.close = Some(session.try_close(pos, projection, now_ms));
            }
            effect.consumed = true;
            self.last_tap = None;
            return effect;
        }

        if response.clicked() {
            if let Some(pos) = pointer {
                let double_tap = matches!(self.last_tap,
                    Some((t, _)) if now_ms - t <= session.tuning().double_tap_window_ms);

                if double_tap && session.near_first_vertex(pos, projection) {
                    effect.close = Some(session.try_close(pos, projection, now_ms));
                    effect.consumed = true;
                    self.last_tap = None;
                    return effect;
                }

                // A tap near the first vertex of a closable ring is the start
                // of a closing gesture, not a new vertex.
                let suppress =
                    session.vertices().len() >= 3 && session.near_first_vertex(pos, projection);
                if !suppress {
                    session.add_vertex(projection.unproject(pos), now_ms);
                }
                self.last_tap = Some((now_ms, pos));
            }
        }

        effect
    }
}

/// Coarse-pointer input: the map pans under a fixed center reticle and any
/// tap commits the vertex at the current map center.
#[derive(Default)]
pub struct ReticleAdapter {
    last_tap_at: Option<f64>,
    last_center: Option<GeoPos>,
}

impl ReticleAdapter {
    /// Resets tap bookkeeping (called when a session starts or ends).
    pub fn reset(&mut self) {
        self.last_tap_at = None;
        self.last_center = None;
    }

    /// Feeds one frame of widget input into the session.
    pub fn process(
        &mut self,
        response: &Response,
        projection: &MapProjection,
        session: &mut DrawingSession,
        now_ms: f64,
    ) -> InputEffect {
        let mut effect = InputEffect::default();
        let center = projection.center();
        let center_screen = projection.widget_rect().center();

        // The reticle is the cursor: panning the map is the movement.
        if self.last_center != Some(center) {
            session.update_guide(center, now_ms);
            self.last_center = Some(center);
        }

        if session.phase() != DrawPhase::Active {
            effect.consumed = response.double_clicked();
            return effect;
        }

        // Double-tap zoom stays disabled for the whole drawing session.
        if response.double_clicked() {
            effect.close = Some(session.try_close(center_screen, projection, now_ms));
            effect.consumed = true;
            self.last_tap_at = None;
            return effect;
        }

        if response.clicked() {
            let double_tap = matches!(self.last_tap_at,
                Some(t) if now_ms - t <= session.tuning().double_tap_window_ms);

            if double_tap && session.near_first_vertex(center_screen, projection) {
                effect.close = Some(session.try_close(center_screen, projection, now_ms));
                effect.consumed = true;
                self.last_tap_at = None;
                return effect;
            }

            let suppress = session.vertices().len() >= 3
                && session.near_first_vertex(center_screen, projection);
            if !suppress {
                session.add_vertex(center, now_ms);
            }
            self.last_tap_at = Some(now_ms);
        }

        effect
    }
}
