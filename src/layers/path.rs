//! A layer rendering recorded paths and the live recording preview.

use egui::{Color32, Painter, Response, Shape, Stroke};
use std::any::Any;

use crate::layers::{Layer, dist_sq_to_segment};
use crate::projection::MapProjection;
use crate::types::{PathRecord, PathSample};

/// Screen-space distance within which a click lands on a path.
const CLICK_TOLERANCE_PX: f32 = 8.0;

/// A click on a path: the path id and the nearest sample index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathHit {
    /// The clicked path.
    pub path_id: String,

    /// The sample nearest to the click, used for popup attachment.
    pub point_index: usize,
}

/// Renders persisted paths, their popup markers, and the in-progress
/// recording.
pub struct PathLayer {
    paths: Vec<PathRecord>,

    /// Samples of the recording in progress, drawn in a distinct color.
    pub live: Option<Vec<PathSample>>,

    /// Id of the selected path, highlighted when drawn.
    pub selected: Option<String>,

    /// The most recent click on a path; taken by the app.
    pub clicked: Option<PathHit>,

    /// Whether clicks select paths. Disabled while drawing or editing.
    pub interactive: bool,

    stroke: Stroke,
    selected_stroke: Stroke,
    live_stroke: Stroke,
    popup_fill: Color32,
}

impl Default for PathLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PathLayer {
    /// Creates an empty layer.
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            live: None,
            selected: None,
            clicked: None,
            interactive: true,
            stroke: Stroke::new(3.0, Color32::from_rgb(40, 90, 200)),
            selected_stroke: Stroke::new(4.0, Color32::from_rgb(90, 140, 250)),
            live_stroke: Stroke::new(3.0, Color32::from_rgb(220, 120, 40)),
            popup_fill: Color32::from_rgb(250, 200, 60),
        }
    }

    /// Replaces the rendered path set.
    pub fn set_paths(&mut self, paths: Vec<PathRecord>) {
        if let Some(selected) = &self.selected {
            if !paths.iter().any(|p| &p.id == selected) {
                self.selected = None;
            }
        }
        self.paths = paths;
    }

    /// The rendered paths.
    pub fn paths(&self) -> &[PathRecord] {
        &self.paths
    }

    /// Takes the most recent click, if any.
    pub fn take_clicked(&mut self) -> Option<PathHit> {
        self.clicked.take()
    }

    fn hit_at(&self, screen_pos: egui::Pos2, projection: &MapProjection) -> Option<PathHit> {
        let tolerance_sq = CLICK_TOLERANCE_PX * CLICK_TOLERANCE_PX;

        for record in self.paths.iter().rev() {
            if record.points.len() < 2 {
                continue;
            }
            let screen: Vec<egui::Pos2> = record
                .points
                .iter()
                .map(|s| projection.project(s.geo()))
                .collect();

            for i in 0..screen.len() - 1 {
                if dist_sq_to_segment(screen_pos, screen[i], screen[i + 1]) < tolerance_sq {
                    // Snap to whichever endpoint of the segment is closer.
                    let point_index = if screen_pos.distance_sq(screen[i])
                        <= screen_pos.distance_sq(screen[i + 1])
                    {
                        i
                    } else {
                        i + 1
                    };
                    return Some(PathHit {
                        path_id: record.id.clone(),
                        point_index,
                    });
                }
            }
        }
        None
    }

    fn draw_polyline(
        painter: &Painter,
        projection: &MapProjection,
        points: &[PathSample],
        stroke: Stroke,
    ) {
        if points.len() > 1 {
            let screen: Vec<egui::Pos2> =
                points.iter().map(|s| projection.project(s.geo())).collect();
            painter.add(Shape::line(screen, stroke));
        }
    }
}

impl Layer for PathLayer {
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
                if let Some(hit) = self.hit_at(pointer_pos, projection) {
                    self.selected = Some(hit.path_id.clone());
                    self.clicked = Some(hit);
                }
            }
        }

        false
    }

    fn draw(&self, painter: &Painter, projection: &MapProjection) {
        for record in &self.paths {
            let stroke = if self.selected.as_deref() == Some(record.id.as_str()) {
                self.selected_stroke
            } else {
                self.stroke
            };
            Self::draw_polyline(painter, projection, &record.points, stroke);

            // Endpoints and annotated points get markers.
            if let Some(first) = record.points.first() {
                painter.circle_filled(projection.project(first.geo()), 4.0, stroke.color);
            }
            if let Some(last) = record.points.last() {
                painter.circle_filled(projection.project(last.geo()), 4.0, stroke.color);
            }
            for index in record.popups.keys() {
                if let Some(sample) = record.points.get(*index) {
                    painter.circle_filled(projection.project(sample.geo()), 5.0, self.popup_fill);
                }
            }
        }

        if let Some(live) = &self.live {
            Self::draw_polyline(painter, projection, live, self.live_stroke);
            if let Some(last) = live.last() {
                painter.circle_filled(projection.project(last.geo()), 5.0, self.live_stroke.color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::GeoPos;
    use egui::{Rect, pos2};

    fn record(id: &str, coords: &[(f64, f64)]) -> PathRecord {
        PathRecord {
            id: id.to_string(),
            name: id.to_string(),
            points: coords
                .iter()
                .enumerate()
                .map(|(i, (lon, lat))| PathSample {
                    lat: *lat,
                    lng: *lon,
                    timestamp: i as i64 * 1_000,
                })
                .collect(),
            popups: Default::default(),
        }
    }

    #[test]
    fn click_near_segment_snaps_to_nearest_sample() {
        let mut layer = PathLayer::new();
        layer.set_paths(vec![record("walk", &[(10.0, 10.0), (10.2, 10.0)])]);

        let projection = MapProjection::new(
            12,
            GeoPos::new(10.1, 10.0),
            Rect::from_min_max(pos2(0.0, 0.0), pos2(800.0, 600.0)),
        );

        // Just off the midpoint of the segment, slightly toward the start.
        let start = projection.project(GeoPos::new(10.0, 10.0));
        let end = projection.project(GeoPos::new(10.2, 10.0));
        let near_start = pos2(start.x + (end.x - start.x) * 0.4, start.y + 3.0);

        let hit = layer.hit_at(near_start, &projection).unwrap();
        assert_eq!(hit.path_id, "walk");
        assert_eq!(hit.point_index, 0);

        // Far away from the path: no hit.
        assert!(layer.hit_at(pos2(0.0, 0.0), &projection).is_none());
    }

    #[test]
    fn stale_selection_is_cleared_on_refresh() {
        let mut layer = PathLayer::new();
        layer.set_paths(vec![record("a", &[(10.0, 10.0), (10.1, 10.0)])]);
        layer.selected = Some("a".to_string());

        layer.set_paths(vec![]);
        assert!(layer.selected.is_none());
    }
}
