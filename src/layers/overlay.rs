//! The layer that renders and drives overlay selection during refuge
//! editing.

use egui::{Color32, Painter, Response, Shape, Stroke};
use log::warn;
use std::any::Any;

use crate::editor::{Overlay, OverlayEditor, OverlayRole, SelectMode, SelectOutcome};
use crate::geometry::signed_area;
use crate::layers::Layer;
use crate::projection::MapProjection;

/// Renders the overlay set of an active edit session and applies click
/// selection.
pub struct OverlayLayer {
    /// The active edit session, if any.
    pub editor: Option<OverlayEditor>,

    /// Which role clicks assign.
    pub select_mode: SelectMode,

    /// Whether clicks select overlays. Off while an overlay is being drawn.
    pub selecting: bool,

    /// Outcome of the most recent selection click; taken by the app.
    pub last_select: Option<SelectOutcome>,

    unselected_stroke: Stroke,
    adjoin_fill: Color32,
    subtract_fill: Color32,
    neutral_fill: Color32,
    locked_fill: Color32,
}

impl Default for OverlayLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayLayer {
    /// Creates an idle layer.
    pub fn new() -> Self {
        Self {
            editor: None,
            select_mode: SelectMode::Adjoin,
            selecting: false,
            last_select: None,
            unselected_stroke: Stroke::new(2.0, Color32::from_rgb(90, 90, 220)),
            adjoin_fill: Color32::from_rgba_unmultiplied(60, 180, 60, 90),
            subtract_fill: Color32::from_rgba_unmultiplied(220, 60, 60, 90),
            neutral_fill: Color32::from_rgba_unmultiplied(90, 90, 220, 50),
            locked_fill: Color32::from_rgba_unmultiplied(120, 120, 120, 60),
        }
    }

    /// Takes the outcome of the most recent selection click.
    pub fn take_select_outcome(&mut self) -> Option<SelectOutcome> {
        self.last_select.take()
    }

    fn fill_for(&self, overlay: &Overlay) -> Color32 {
        match overlay.role {
            OverlayRole::Adjoin => self.adjoin_fill,
            OverlayRole::Subtract => self.subtract_fill,
            OverlayRole::None => {
                // Fully locked shapes read as inert.
                if overlay.adjoin_locked && overlay.subtract_locked {
                    self.locked_fill
                } else {
                    self.neutral_fill
                }
            }
        }
    }
}

impl Layer for OverlayLayer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handle_input(&mut self, response: &Response, projection: &MapProjection) -> bool {
        let Some(editor) = self.editor.as_mut() else {
            return false;
        };
        if !self.selecting {
            return false;
        }

        if response.clicked() {
            if let Some(pointer_pos) = response.interact_pointer_pos() {
                let geo = projection.unproject(pointer_pos);
                if let Some(id) = editor.overlay_at(geo) {
                    self.last_select = Some(editor.select(id, self.select_mode));
                }
            }
        }

        false
    }

    fn draw(&self, painter: &Painter, projection: &MapProjection) {
        let Some(editor) = &self.editor else {
            return;
        };

        // Larger overlays first so nested ones stay visible and clickable.
        let mut order: Vec<&Overlay> = editor.overlays().iter().collect();
        order.sort_by(|a, b| {
            signed_area(&b.ring)
                .abs()
                .partial_cmp(&signed_area(&a.ring).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for overlay in order {
            let screen: Vec<egui::Pos2> = overlay
                .ring
                .iter()
                .map(|p| projection.project(*p))
                .collect();
            if screen.len() < 3 {
                continue;
            }

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
                            color: self.fill_for(overlay),
                        })
                        .collect();
                    mesh.indices = indices.into_iter().map(|i| i as u32).collect();
                    painter.add(Shape::Mesh(mesh.into()));
                }
                Err(e) => warn!("Failed to triangulate overlay: {e:?}"),
            }

            painter.add(Shape::Path(egui::epaint::PathShape {
                points: screen,
                closed: true,
                fill: Color32::TRANSPARENT,
                stroke: self.unselected_stroke.into(),
            }));
        }
    }
}
