//! A layer rendering the persisted refuges.

use egui::{Color32, Mesh, Painter, Response, Shape, Stroke};
use log::warn;
use std::any::Any;

use crate::geometry::{footprint_contains, signed_area};
use crate::layers::Layer;
use crate::projection::{GeoPos, MapProjection};
use crate::types::{PolygonRings, Refuge};

/// Renders refuges and lets the user select one by clicking it.
pub struct RefugeLayer {
    refuges: Vec<Refuge>,

    /// Id of the selected refuge, highlighted when drawn.
    pub selected: Option<String>,

    /// Id of a refuge clicked since the app last looked; taken by the app.
    pub clicked: Option<String>,

    /// Whether clicks select refuges. Disabled while drawing or editing.
    pub interactive: bool,

    stroke: Stroke,
    fill: Color32,
    selected_fill: Color32,
}

impl Default for RefugeLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RefugeLayer {
    /// Creates an empty layer.
    pub fn new() -> Self {
        Self {
            refuges: Vec::new(),
            selected: None,
            clicked: None,
            interactive: true,
            stroke: Stroke::new(2.0, Color32::from_rgb(30, 120, 40)),
            fill: Color32::from_rgba_unmultiplied(60, 170, 80, 60),
            selected_fill: Color32::from_rgba_unmultiplied(60, 170, 80, 120),
        }
    }

    /// Replaces the rendered refuge set.
    pub fn set_refuges(&mut self, refuges: Vec<Refuge>) {
        if let Some(selected) = &self.selected {
            if !refuges.iter().any(|r| &r.id == selected) {
                self.selected = None;
            }
        }
        self.refuges = refuges;
    }

    /// The rendered refuges.
    pub fn refuges(&self) -> &[Refuge] {
        &self.refuges
    }

    /// Takes the most recent click, if any.
    pub fn take_clicked(&mut self) -> Option<String> {
        self.clicked.take()
    }

    fn footprint_area(refuge: &Refuge) -> f64 {
        refuge
            .footprint
            .polygons
            .iter()
            .map(|p| signed_area(&p.outer).abs())
            .sum()
    }

    /// The smallest refuge containing the position, so nested or adjacent
    /// shapes resolve predictably.
    fn refuge_at(&self, pos: GeoPos) -> Option<&Refuge> {
        self.refuges
            .iter()
            .filter(|r| footprint_contains(&r.footprint, pos))
            .min_by(|a, b| {
                Self::footprint_area(a)
                    .partial_cmp(&Self::footprint_area(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    fn draw_polygon(
        &self,
        painter: &Painter,
        projection: &MapProjection,
        polygon: &PolygonRings,
        fill: Color32,
    ) {
        if polygon.outer.len() < 3 {
            warn!("Skipping refuge polygon with fewer than 3 vertices");
            return;
        }

        // Flatten outer + holes for triangulation; earcutr takes hole start
        // indices into the flattened vertex list.
        let mut screen_points: Vec<egui::Pos2> =
            polygon.outer.iter().map(|p| projection.project(*p)).collect();
        let mut hole_indices = Vec::new();
        for hole in &polygon.holes {
            hole_indices.push(screen_points.len());
            screen_points.extend(hole.iter().map(|p| projection.project(*p)));
        }

        let flat_points: Vec<f64> = screen_points
            .iter()
            .flat_map(|p| [p.x as f64, p.y as f64])
            .collect();

        match earcutr::earcut(&flat_points, &hole_indices, 2) {
            Ok(indices) => {
                let mut mesh = Mesh::default();
                mesh.vertices = screen_points
                    .iter()
                    .map(|p| egui::epaint::Vertex {
                        pos: *p,
                        uv: Default::default(),
                        color: fill,
                    })
                    .collect();
                mesh.indices = indices.into_iter().map(|i| i as u32).collect();
                painter.add(Shape::Mesh(mesh.into()));
            }
            Err(e) => {
                warn!("Failed to triangulate refuge polygon: {e:?}");
            }
        }

        // Outline every ring, holes included.
        for ring in std::iter::once(&polygon.outer).chain(polygon.holes.iter()) {
            let points: Vec<egui::Pos2> = ring.iter().map(|p| projection.project(*p)).collect();
            painter.add(Shape::Path(egui::epaint::PathShape {
                points,
                closed: true,
                fill: Color32::TRANSPARENT,
                stroke: self.stroke.into(),
            }));
        }
    }

    fn label_anchor(refuge: &Refuge) -> Option<GeoPos> {
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
}

impl Layer for RefugeLayer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handle_input(&mut self, response: &Response, projection: &MapProjection) -> bool {
        if !self.interactive {
            return false;
        }

        if response.clicked() {
            if let Some(pointer_pos) = response.interact_pointer_pos() {
                let geo = projection.unproject(pointer_pos);
                if let Some(id) = self.refuge_at(geo).map(|r| r.id.clone()) {
                    self.selected = Some(id.clone());
                    self.clicked = Some(id);
                }
            }
        }

        // Selection never blocks panning or zooming.
        false
    }

    fn draw(&self, painter: &Painter, projection: &MapProjection) {
        // Larger refuges first, so smaller ones stay visible on top.
        let mut order: Vec<&Refuge> = self.refuges.iter().collect();
        order.sort_by(|a, b| {
            Self::footprint_area(b)
                .partial_cmp(&Self::footprint_area(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for refuge in order {
            let fill = if self.selected.as_deref() == Some(refuge.id.as_str()) {
                self.selected_fill
            } else {
                self.fill
            };
            for polygon in &refuge.footprint.polygons {
                self.draw_polygon(painter, projection, polygon, fill);
            }

            if let Some(anchor) = Self::label_anchor(refuge) {
                painter.text(
                    projection.project(anchor),
                    egui::Align2::CENTER_CENTER,
                    &refuge.name,
                    egui::FontId::proportional(13.0),
                    Color32::WHITE,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Footprint;

    fn refuge(id: &str, x: f64, size: f64) -> Refuge {
        Refuge {
            id: id.to_string(),
            name: id.to_string(),
            footprint: Footprint::from_outer_ring(vec![
                GeoPos::new(x, 10.0),
                GeoPos::new(x, 10.0 + size),
                GeoPos::new(x + size, 10.0 + size),
                GeoPos::new(x + size, 10.0),
            ]),
        }
    }

    #[test]
    fn refuge_layer_new() {
        let layer = RefugeLayer::new();
        assert!(layer.interactive);
        assert!(layer.refuges().is_empty());
        assert!(layer.selected.is_none());
    }

    #[test]
    fn smallest_containing_refuge_wins() {
        let mut layer = RefugeLayer::new();
        layer.set_refuges(vec![refuge("big", 10.0, 5.0), refuge("small", 11.0, 1.0)]);

        let hit = layer.refuge_at(GeoPos::new(11.5, 10.5));
        assert_eq!(hit.map(|r| r.id.as_str()), Some("small"));

        let hit = layer.refuge_at(GeoPos::new(14.0, 13.0));
        assert_eq!(hit.map(|r| r.id.as_str()), Some("big"));

        assert!(layer.refuge_at(GeoPos::new(50.0, 50.0)).is_none());
    }

    #[test]
    fn stale_selection_is_cleared_on_refresh() {
        let mut layer = RefugeLayer::new();
        layer.set_refuges(vec![refuge("a", 10.0, 1.0)]);
        layer.selected = Some("a".to_string());

        layer.set_refuges(vec![refuge("b", 10.0, 1.0)]);
        assert!(layer.selected.is_none());
    }

    #[test]
    fn refuge_layer_as_any() {
        let mut layer = RefugeLayer::new();
        assert!(layer.as_any().is::<RefugeLayer>());
        assert!(layer.as_any_mut().is::<RefugeLayer>());
    }
}
