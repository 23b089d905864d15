//! Overlay-based refuge editing.
//!
//! The editor collects candidate rings drawn over one target refuge,
//! classifies each as selectable for adjoin or subtract, and assembles the
//! apply-overlays request. All rules here are client-side; the
//! "would fragment the refuge" check is the backend's and runs before a ring
//! enters the overlay set.

use geojson::Geometry;

use crate::geometry::{point_in_ring, ring_contains_footprint, ring_contains_ring,
                      ring_overlaps_footprint, signed_area};
use crate::projection::GeoPos;
use crate::types::{Refuge, Ring, ring_to_polygon_geometry};

/// The two boolean roles an overlay can be chosen for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectMode {
    /// Union the overlay into the refuge.
    Adjoin,

    /// Remove the overlay's area from the refuge.
    Subtract,
}

/// An overlay's current selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverlayRole {
    /// Not selected.
    #[default]
    None,

    /// Chosen for adjoin.
    Adjoin,

    /// Chosen for subtract.
    Subtract,
}

/// Result of a selection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The overlay joined the requested selection.
    Selected,

    /// It was already selected in this mode.
    AlreadySelected,

    /// It belongs to the other mode's selection.
    LockedToOther,

    /// Nested inside another overlay; adjoining it would be redundant.
    AdjoinLocked,

    /// It covers the whole refuge; subtracting it would erase the refuge.
    SubtractLocked,

    /// The overlay no longer exists (dropped by a containment recompute).
    Missing,
}

/// A candidate ring drawn during editing.
#[derive(Clone, Debug)]
pub struct Overlay {
    /// Stable identity within this edit session.
    pub id: usize,

    /// The drawn ring.
    pub ring: Ring,

    /// Current selection.
    pub role: OverlayRole,

    /// Set when the overlay is nested inside exactly one other overlay.
    pub adjoin_locked: bool,

    /// Set when the overlay fully covers the refuge.
    pub subtract_locked: bool,
}

/// Editing state for one target refuge.
pub struct OverlayEditor {
    refuge: Refuge,
    overlays: Vec<Overlay>,
    next_id: usize,
    adjoin_stack: Vec<usize>,
    subtract_stack: Vec<usize>,
}

impl OverlayEditor {
    /// Opens an editor over the given refuge.
    pub fn new(refuge: Refuge) -> Self {
        Self {
            refuge,
            overlays: Vec::new(),
            next_id: 0,
            adjoin_stack: Vec::new(),
            subtract_stack: Vec::new(),
        }
    }

    /// The refuge under edit.
    pub fn refuge(&self) -> &Refuge {
        &self.refuge
    }

    /// The current overlay set.
    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    /// Whether a candidate ring shares any area with the refuge.
    pub fn ring_overlaps_refuge(&self, ring: &[GeoPos]) -> bool {
        ring_overlaps_footprint(ring, &self.refuge.footprint)
    }

    /// Whether a candidate ring fully covers the refuge.
    pub fn ring_covers_refuge(&self, ring: &[GeoPos]) -> bool {
        ring_contains_footprint(ring, &self.refuge.footprint)
    }

    /// Adds a validated ring to the overlay set and returns its id.
    ///
    /// Lock state is recomputed for the whole set; the new overlay itself may
    /// be dropped again when it lands inside two or more existing overlays,
    /// in which case `None` is returned.
    pub fn push_overlay(&mut self, ring: Ring) -> Option<usize> {
        let id = self.next_id;
        self.next_id += 1;
        self.overlays.push(Overlay {
            id,
            ring,
            role: OverlayRole::None,
            adjoin_locked: false,
            subtract_locked: false,
        });
        self.recompute();
        self.overlays.iter().any(|o| o.id == id).then_some(id)
    }

    /// Removes the most recently drawn overlay. Returns false when empty.
    pub fn undo_last_overlay(&mut self) -> bool {
        match self.overlays.pop() {
            Some(removed) => {
                self.adjoin_stack.retain(|id| *id != removed.id);
                self.subtract_stack.retain(|id| *id != removed.id);
                self.recompute();
                true
            }
            None => false,
        }
    }

    /// Attempts to select an overlay for the given mode.
    pub fn select(&mut self, id: usize, mode: SelectMode) -> SelectOutcome {
        let Some(overlay) = self.overlays.iter_mut().find(|o| o.id == id) else {
            return SelectOutcome::Missing;
        };

        match (overlay.role, mode) {
            (OverlayRole::Adjoin, SelectMode::Adjoin)
            | (OverlayRole::Subtract, SelectMode::Subtract) => SelectOutcome::AlreadySelected,
            (OverlayRole::Adjoin, SelectMode::Subtract)
            | (OverlayRole::Subtract, SelectMode::Adjoin) => SelectOutcome::LockedToOther,
            (OverlayRole::None, SelectMode::Adjoin) => {
                if overlay.adjoin_locked {
                    SelectOutcome::AdjoinLocked
                } else {
                    overlay.role = OverlayRole::Adjoin;
                    self.adjoin_stack.push(id);
                    SelectOutcome::Selected
                }
            }
            (OverlayRole::None, SelectMode::Subtract) => {
                if overlay.subtract_locked {
                    SelectOutcome::SubtractLocked
                } else {
                    overlay.role = OverlayRole::Subtract;
                    self.subtract_stack.push(id);
                    SelectOutcome::Selected
                }
            }
        }
    }

    /// Unwinds the most recent selection in the given mode. Returns false
    /// when that mode has no selection history left.
    pub fn undo_selection(&mut self, mode: SelectMode) -> bool {
        let stack = match mode {
            SelectMode::Adjoin => &mut self.adjoin_stack,
            SelectMode::Subtract => &mut self.subtract_stack,
        };
        while let Some(id) = stack.pop() {
            if let Some(overlay) = self.overlays.iter_mut().find(|o| o.id == id) {
                overlay.role = OverlayRole::None;
                return true;
            }
            // Stale entry for a dropped overlay; keep unwinding.
        }
        false
    }

    /// Whether anything is selected in either mode.
    pub fn has_selection(&self) -> bool {
        self.overlays.iter().any(|o| o.role != OverlayRole::None)
    }

    /// The smallest overlay containing the given position, so nested shapes
    /// stay clickable.
    pub fn overlay_at(&self, pos: GeoPos) -> Option<usize> {
        let mut hit: Option<(f64, usize)> = None;
        for overlay in &self.overlays {
            if point_in_ring(pos, &overlay.ring) {
                let area = signed_area(&overlay.ring).abs();
                if hit.is_none_or(|(best, _)| area < best) {
                    hit = Some((area, overlay.id));
                }
            }
        }
        hit.map(|(_, id)| id)
    }

    /// The apply-overlays payload: closed-ring GeoJSON polygons for each
    /// selection set.
    pub fn payload(&self) -> (Vec<Geometry>, Vec<Geometry>) {
        let collect = |role: OverlayRole| -> Vec<Geometry> {
            self.overlays
                .iter()
                .filter(|o| o.role == role)
                .map(|o| ring_to_polygon_geometry(&o.ring))
                .collect()
        };
        (collect(OverlayRole::Adjoin), collect(OverlayRole::Subtract))
    }

    /// Recomputes containment-derived state for the whole set: overlays
    /// nested inside two or more others are dropped, nesting inside exactly
    /// one other locks adjoin, covering the refuge locks subtract. Dropping a
    /// container can change the counts of what it contained, so this loops
    /// until stable.
    fn recompute(&mut self) {
        loop {
            let drop_ids: Vec<usize> = self
                .overlays
                .iter()
                .filter(|o| self.containers_of(o).len() >= 2)
                .map(|o| o.id)
                .collect();
            if drop_ids.is_empty() {
                break;
            }
            self.overlays.retain(|o| !drop_ids.contains(&o.id));
            self.adjoin_stack.retain(|id| !drop_ids.contains(id));
            self.subtract_stack.retain(|id| !drop_ids.contains(id));
        }

        let locks: Vec<(bool, bool)> = self
            .overlays
            .iter()
            .map(|o| {
                (
                    self.containers_of(o).len() == 1,
                    ring_contains_footprint(&o.ring, &self.refuge.footprint),
                )
            })
            .collect();

        for (overlay, (adjoin_locked, subtract_locked)) in self.overlays.iter_mut().zip(locks) {
            overlay.adjoin_locked = adjoin_locked;
            overlay.subtract_locked = subtract_locked;
            // A selection that a new overlay has since locked out is revoked.
            if adjoin_locked && overlay.role == OverlayRole::Adjoin {
                overlay.role = OverlayRole::None;
            }
            if subtract_locked && overlay.role == OverlayRole::Subtract {
                overlay.role = OverlayRole::None;
            }
        }
        let roles: Vec<(usize, OverlayRole)> =
            self.overlays.iter().map(|o| (o.id, o.role)).collect();
        self.adjoin_stack.retain(|id| {
            roles
                .iter()
                .any(|(oid, role)| oid == id && *role == OverlayRole::Adjoin)
        });
        self.subtract_stack.retain(|id| {
            roles
                .iter()
                .any(|(oid, role)| oid == id && *role == OverlayRole::Subtract)
        });
    }

    fn containers_of(&self, overlay: &Overlay) -> Vec<usize> {
        self.overlays
            .iter()
            .filter(|other| other.id != overlay.id && ring_contains_ring(&other.ring, &overlay.ring))
            .map(|other| other.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Footprint;

    fn square(x: f64, y: f64, size: f64) -> Ring {
        vec![
            GeoPos::new(x, y),
            GeoPos::new(x, y + size),
            GeoPos::new(x + size, y + size),
            GeoPos::new(x + size, y),
        ]
    }

    fn editor() -> OverlayEditor {
        // Refuge: unit square at (10, 10).
        OverlayEditor::new(Refuge {
            id: "r1".to_string(),
            name: "North Camp".to_string(),
            footprint: Footprint::from_outer_ring(square(10.0, 10.0, 1.0)),
        })
    }

    #[test]
    fn overlap_gate() {
        let editor = editor();
        assert!(editor.ring_overlaps_refuge(&square(10.5, 10.5, 1.0)));
        assert!(!editor.ring_overlaps_refuge(&square(50.0, 50.0, 1.0)));
    }

    #[test]
    fn nested_overlay_is_adjoin_locked_but_subtractable() {
        let mut editor = editor();

        // B covers the whole refuge; C is nested inside B.
        let b = editor.push_overlay(square(9.0, 9.0, 3.0)).unwrap();
        let c = editor.push_overlay(square(10.2, 10.2, 0.5)).unwrap();

        let overlays = editor.overlays();
        assert_eq!(overlays.len(), 2);

        let overlay_c = overlays.iter().find(|o| o.id == c).unwrap();
        assert!(overlay_c.adjoin_locked);
        assert!(!overlay_c.subtract_locked);

        assert_eq!(editor.select(c, SelectMode::Adjoin), SelectOutcome::AdjoinLocked);
        assert_eq!(editor.select(c, SelectMode::Subtract), SelectOutcome::Selected);

        // B covers the whole refuge, so it cannot be subtracted.
        let overlay_b = editor.overlays().iter().find(|o| o.id == b).unwrap();
        assert!(overlay_b.subtract_locked);
        assert!(!overlay_b.adjoin_locked);
        assert_eq!(
            editor.select(b, SelectMode::Subtract),
            SelectOutcome::SubtractLocked
        );

        // Adjoin stays available for the container.
        assert_eq!(editor.select(b, SelectMode::Adjoin), SelectOutcome::Selected);
    }

    #[test]
    fn overlay_nested_in_two_others_is_dropped() {
        let mut editor = editor();

        editor.push_overlay(square(9.0, 9.0, 3.0)).unwrap();
        editor.push_overlay(square(9.5, 9.5, 2.0)).unwrap();
        // Inside both of the above.
        let dropped = editor.push_overlay(square(10.2, 10.2, 0.3));

        assert!(dropped.is_none());
        assert_eq!(editor.overlays().len(), 2);
    }

    #[test]
    fn selection_is_mutually_exclusive() {
        let mut editor = editor();
        let id = editor.push_overlay(square(10.5, 10.5, 0.4)).unwrap();

        assert_eq!(editor.select(id, SelectMode::Adjoin), SelectOutcome::Selected);
        assert_eq!(
            editor.select(id, SelectMode::Adjoin),
            SelectOutcome::AlreadySelected
        );
        assert_eq!(
            editor.select(id, SelectMode::Subtract),
            SelectOutcome::LockedToOther
        );
    }

    #[test]
    fn selection_stacks_undo_independently() {
        let mut editor = editor();
        let a = editor.push_overlay(square(10.1, 10.1, 0.3)).unwrap();
        let b = editor.push_overlay(square(10.6, 10.6, 0.3)).unwrap();

        editor.select(a, SelectMode::Adjoin);
        editor.select(b, SelectMode::Subtract);
        assert!(editor.has_selection());

        assert!(editor.undo_selection(SelectMode::Adjoin));
        let overlay_a = editor.overlays().iter().find(|o| o.id == a).unwrap();
        assert_eq!(overlay_a.role, OverlayRole::None);

        // The subtract stack is untouched by the adjoin undo.
        let overlay_b = editor.overlays().iter().find(|o| o.id == b).unwrap();
        assert_eq!(overlay_b.role, OverlayRole::Subtract);

        assert!(editor.undo_selection(SelectMode::Subtract));
        assert!(!editor.undo_selection(SelectMode::Subtract));
        assert!(!editor.has_selection());
    }

    #[test]
    fn undo_last_overlay_is_independent_of_selection_undo() {
        let mut editor = editor();
        let a = editor.push_overlay(square(10.1, 10.1, 0.3)).unwrap();
        let b = editor.push_overlay(square(10.6, 10.6, 0.3)).unwrap();
        editor.select(a, SelectMode::Adjoin);
        editor.select(b, SelectMode::Adjoin);

        assert!(editor.undo_last_overlay()); // removes b entirely
        assert_eq!(editor.overlays().len(), 1);

        // b is gone from the adjoin stack too; the next undo lands on a.
        assert!(editor.undo_selection(SelectMode::Adjoin));
        let overlay_a = editor.overlays().iter().find(|o| o.id == a).unwrap();
        assert_eq!(overlay_a.role, OverlayRole::None);
    }

    #[test]
    fn payload_closes_rings_per_selection() {
        let mut editor = editor();
        let a = editor.push_overlay(square(10.1, 10.1, 0.3)).unwrap();
        let b = editor.push_overlay(square(10.6, 10.6, 0.3)).unwrap();
        editor.select(a, SelectMode::Adjoin);
        editor.select(b, SelectMode::Subtract);

        let (adjoin, subtract) = editor.payload();
        assert_eq!(adjoin.len(), 1);
        assert_eq!(subtract.len(), 1);

        match &adjoin[0].value {
            geojson::Value::Polygon(rings) => {
                assert_eq!(rings.len(), 1);
                assert_eq!(rings[0].len(), 5);
                assert_eq!(rings[0].first(), rings[0].last());
            }
            other => panic!("expected Polygon, got {other:?}"),
        }
    }

    #[test]
    fn smallest_overlay_wins_hit_testing() {
        let mut editor = editor();
        let big = editor.push_overlay(square(9.0, 9.0, 3.0)).unwrap();
        let small = editor.push_overlay(square(10.2, 10.2, 0.5)).unwrap();

        assert_eq!(editor.overlay_at(GeoPos::new(10.4, 10.4)), Some(small));
        assert_eq!(editor.overlay_at(GeoPos::new(9.2, 9.2)), Some(big));
        assert_eq!(editor.overlay_at(GeoPos::new(50.0, 50.0)), None);
    }
}
