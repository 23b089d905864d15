//! The layer that runs and renders the active drawing session.

use egui::{Color32, Painter, Response, Shape, Stroke};
use log::warn;
use std::any::Any;

use crate::draw::input::{InputEffect, PointerAdapter, ReticleAdapter};
use crate::draw::{CloseOutcome, DrawController, DrawPhase, DrawPurpose, DrawTuning, InputMode};
use crate::layers::Layer;
use crate::projection::MapProjection;
use crate::types::Ring;

/// A ring handed back to the application after a session closed in
/// [`DrawPurpose::YieldRing`] mode.
#[derive(Clone, Debug)]
pub struct CompletedRing {
    /// The closed ring.
    pub ring: Ring,
}

/// Runs the drawing session against map input and renders its state.
pub struct DrawLayer {
    controller: DrawController,
    pointer: PointerAdapter,
    reticle: ReticleAdapter,

    /// A ring yielded by an overlay-mode session; taken by the app.
    completed: Option<CompletedRing>,

    /// The most recent closing-gesture outcome; taken by the app for the
    /// status line.
    last_close: Option<CloseOutcome>,

    line_stroke: Stroke,
    guide_stroke: Stroke,
    preview_fill: Color32,
    anchor_fill: Color32,
}

impl Default for DrawLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawLayer {
    /// Creates an idle layer.
    pub fn new() -> Self {
        Self {
            controller: DrawController::default(),
            pointer: PointerAdapter::default(),
            reticle: ReticleAdapter::default(),
            completed: None,
            last_close: None,
            line_stroke: Stroke::new(2.0, Color32::from_rgb(230, 70, 70)),
            guide_stroke: Stroke::new(1.5, Color32::from_rgba_unmultiplied(230, 70, 70, 160)),
            preview_fill: Color32::from_rgba_unmultiplied(230, 70, 70, 70),
            anchor_fill: Color32::from_rgb(255, 255, 255),
        }
    }

    /// Creates a layer with custom interaction thresholds.
    pub fn with_tuning(tuning: DrawTuning) -> Self {
        Self {
            controller: DrawController::with_tuning(tuning),
            ..Self::new()
        }
    }

    /// Starts a fresh session, replacing any active one.
    pub fn start(&mut self, mode: InputMode, purpose: DrawPurpose) {
        self.pointer.reset();
        self.reticle.reset();
        self.completed = None;
        self.last_close = None;
        self.controller.start(mode, purpose);
    }

    /// Cancels the active session, if any.
    pub fn cancel(&mut self) {
        self.pointer.reset();
        self.reticle.reset();
        self.controller.cancel();
    }

    /// Removes the most recent vertex of the active session.
    pub fn undo_vertex(&mut self) {
        if let Some(session) = self.controller.session_mut() {
            session.undo();
        }
    }

    /// Mutes helper messages for the active session.
    pub fn mute_hints(&mut self) {
        if let Some(session) = self.controller.session_mut() {
            session.mute_hints();
        }
    }

    /// The session controller.
    pub fn controller(&self) -> &DrawController {
        &self.controller
    }

    /// Tears down a save-mode session whose ring was persisted.
    pub fn finish_saved(&mut self) {
        self.controller.cancel();
    }

    /// The closed ring of a save-mode session awaiting a name.
    pub fn pending_ring(&self) -> Option<Ring> {
        self.controller
            .session()
            .filter(|s| s.phase() == DrawPhase::Closing)
            .map(|s| s.vertices().to_vec())
    }

    /// Takes the ring yielded by an overlay-mode session, if one closed.
    pub fn take_completed(&mut self) -> Option<CompletedRing> {
        self.completed.take()
    }

    /// Takes the most recent closing-gesture outcome.
    pub fn take_close_outcome(&mut self) -> Option<CloseOutcome> {
        self.last_close.take()
    }
}

impl Layer for DrawLayer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handle_input(&mut self, response: &Response, projection: &MapProjection) -> bool {
        let Some(session) = self.controller.session_mut() else {
            return false;
        };

        let now_ms = response.ctx.input(|i| i.time) * 1_000.0;

        let effect: InputEffect = match session.mode() {
            InputMode::PointerDirect => self.pointer.process(response, projection, session, now_ms),
            InputMode::CenterReticle => self.reticle.process(response, projection, session, now_ms),
        };

        if let Some(outcome) = effect.close {
            self.last_close = Some(outcome);
            if outcome == CloseOutcome::Closed && session.purpose() == DrawPurpose::YieldRing {
                match self.controller.finish() {
                    Some(ring) => self.completed = Some(CompletedRing { ring }),
                    None => warn!("Closed overlay session had no ring to yield"),
                }
            }
        }

        effect.consumed
    }

    fn draw(&self, painter: &Painter, projection: &MapProjection) {
        let Some(session) = self.controller.session() else {
            return;
        };

        let screen: Vec<egui::Pos2> = session
            .vertices()
            .iter()
            .map(|p| projection.project(*p))
            .collect();

        if session.phase() == DrawPhase::Closing {
            // Filled preview of the closed ring.
            if screen.len() >= 3 {
                let flat: Vec<f64> = screen
                    .iter()
                    .flat_map(|p| [p.x as f64, p.y as f64])
                    .collect();
                match earcutr::earcut(&flat, &[], 2) {
                    Ok(indices) => {
                        let mut mesh = egui::Mesh::default();
                        mesh.vertices = screen
                            .iter()
                            .map(|p| egui::epaint::Vertex {
                                pos: *p,
                                uv: Default::default(),
                                color: self.preview_fill,
                            })
                            .collect();
                        mesh.indices = indices.into_iter().map(|i| i as u32).collect();
                        painter.add(Shape::Mesh(mesh.into()));
                    }
                    Err(e) => warn!("Failed to triangulate draw preview: {e:?}"),
                }
                painter.add(Shape::Path(egui::epaint::PathShape {
                    points: screen,
                    closed: true,
                    fill: Color32::TRANSPARENT,
                    stroke: self.line_stroke.into(),
                }));
            }
            return;
        }

        // The committed polyline so far.
        if screen.len() > 1 {
            painter.add(Shape::line(screen.clone(), self.line_stroke));
        }

        // Dashed guide from the last committed vertex to the cursor/reticle.
        if let (Some(last), Some(guide)) = (screen.last(), session.guide()) {
            painter.extend(Shape::dashed_line(
                &[*last, projection.project(guide)],
                self.guide_stroke,
                6.0,
                4.0,
            ));
        }

        // Vertex markers; the first vertex is the closing anchor and gets a
        // distinct ring around it.
        for (i, point) in screen.iter().enumerate() {
            painter.circle_filled(*point, 3.0, self.line_stroke.color);
            if i == 0 {
                painter.circle_stroke(
                    *point,
                    session.tuning().close_threshold_px,
                    Stroke::new(1.5, self.anchor_fill),
                );
            }
        }

        // Helper message at the top of the view.
        let now_ms = painter.ctx().input(|i| i.time) * 1_000.0;
        if let Some(hint) = session.hint(projection, now_ms) {
            let rect = projection.widget_rect();
            painter.text(
                egui::pos2(rect.center().x, rect.top() + 18.0),
                egui::Align2::CENTER_CENTER,
                hint.message(session.mode()),
                egui::FontId::proportional(14.0),
                Color32::WHITE,
            );
        }
    }
}
