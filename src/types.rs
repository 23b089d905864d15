//! Domain types shared between the map layers, the editor and the backend
//! client.

use std::collections::BTreeMap;

use geojson::{Geometry, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::projection::GeoPos;

/// An open ring of vertices. The closing edge back to the first vertex is
/// implied; rings are only closed explicitly when serialized to GeoJSON.
pub type Ring = Vec<GeoPos>;

/// Errors raised while decoding geometry payloads.
#[derive(Error, Debug)]
pub enum GeometryError {
    /// The GeoJSON geometry was not a Polygon or MultiPolygon.
    #[error("Unsupported GeoJSON geometry type")]
    UnsupportedGeometry,

    /// A coordinate position did not carry two components.
    #[error("Malformed coordinate position")]
    MalformedPosition,
}

/// One polygon of a footprint: an outer boundary plus optional holes.
///
/// Holes are never drawn by this client but arrive in server responses after
/// subtract edits, and must render.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolygonRings {
    /// The outer boundary.
    pub outer: Ring,

    /// Interior holes.
    pub holes: Vec<Ring>,
}

/// The full geometry of a refuge: one or more polygons.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Footprint {
    /// The constituent polygons.
    pub polygons: Vec<PolygonRings>,
}

fn position_to_geo(pos: &[f64]) -> Result<GeoPos, GeometryError> {
    if pos.len() < 2 {
        return Err(GeometryError::MalformedPosition);
    }
    Ok(GeoPos {
        lon: pos[0],
        lat: pos[1],
    })
}

fn decode_ring(positions: &[Vec<f64>]) -> Result<Ring, GeometryError> {
    let mut ring: Ring = positions
        .iter()
        .map(|p| position_to_geo(p))
        .collect::<Result<_, _>>()?;

    // GeoJSON rings repeat the first vertex at the end; the open form drops it.
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    Ok(ring)
}

/// Serializes an open ring as a closed GeoJSON ring.
pub fn close_ring(ring: &[GeoPos]) -> Vec<Vec<f64>> {
    ring.iter()
        .chain(ring.first())
        .map(|p| vec![p.lon, p.lat])
        .collect()
}

/// Wraps an open ring into a closed single-ring GeoJSON Polygon geometry.
pub fn ring_to_polygon_geometry(ring: &[GeoPos]) -> Geometry {
    Geometry::new(Value::Polygon(vec![close_ring(ring)]))
}

impl Footprint {
    /// A footprint consisting of a single hole-free polygon.
    pub fn from_outer_ring(outer: Ring) -> Self {
        Self {
            polygons: vec![PolygonRings {
                outer,
                holes: Vec::new(),
            }],
        }
    }

    /// Iterates every ring of every polygon, outer rings and holes alike.
    pub fn rings(&self) -> impl Iterator<Item = &Ring> {
        self.polygons
            .iter()
            .flat_map(|p| std::iter::once(&p.outer).chain(p.holes.iter()))
    }

    /// Whether the footprint carries no geometry at all.
    pub fn is_empty(&self) -> bool {
        self.polygons.iter().all(|p| p.outer.is_empty())
    }

    /// Decodes a GeoJSON Polygon or MultiPolygon geometry.
    pub fn from_geojson(geometry: &Geometry) -> Result<Self, GeometryError> {
        let polygon_from_rings = |rings: &Vec<Vec<Vec<f64>>>| -> Result<PolygonRings, GeometryError> {
            let mut decoded = rings.iter().map(|r| decode_ring(r));
            let outer = decoded.next().transpose()?.unwrap_or_default();
            let holes = decoded.collect::<Result<_, _>>()?;
            Ok(PolygonRings { outer, holes })
        };

        match &geometry.value {
            Value::Polygon(rings) => Ok(Self {
                polygons: vec![polygon_from_rings(rings)?],
            }),
            Value::MultiPolygon(polys) => Ok(Self {
                polygons: polys
                    .iter()
                    .map(polygon_from_rings)
                    .collect::<Result<_, _>>()?,
            }),
            _ => Err(GeometryError::UnsupportedGeometry),
        }
    }

    /// Encodes the footprint back into GeoJSON: a Polygon when there is a
    /// single constituent, a MultiPolygon otherwise.
    pub fn to_geojson(&self) -> Geometry {
        let encode = |p: &PolygonRings| -> Vec<Vec<Vec<f64>>> {
            std::iter::once(&p.outer)
                .chain(p.holes.iter())
                .map(|r| close_ring(r))
                .collect()
        };

        if self.polygons.len() == 1 {
            Geometry::new(Value::Polygon(encode(&self.polygons[0])))
        } else {
            Geometry::new(Value::MultiPolygon(
                self.polygons.iter().map(encode).collect(),
            ))
        }
    }
}

/// A named, persisted geofenced area.
#[derive(Clone, Debug)]
pub struct Refuge {
    /// Server-assigned identity.
    pub id: String,

    /// Display name, unique among refuges (enforced server-side).
    pub name: String,

    /// The area geometry.
    pub footprint: Footprint,
}

/// A single recorded location sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathSample {
    /// Latitude in degrees.
    pub lat: f64,

    /// Longitude in degrees.
    pub lng: f64,

    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl PathSample {
    /// The sample position as a `GeoPos`.
    pub fn geo(&self) -> GeoPos {
        GeoPos {
            lon: self.lng,
            lat: self.lat,
        }
    }
}

/// An annotation attached to a single path point.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathPopup {
    /// Caption text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    /// Image URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A named, persisted ordered sequence of timestamped samples.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PathRecord {
    /// Server-assigned identity.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Ordered samples.
    pub points: Vec<PathSample>,

    /// Popups keyed by point index.
    #[serde(default)]
    pub popups: BTreeMap<usize, PathPopup>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(coords: &[(f64, f64)]) -> Ring {
        coords.iter().map(|(lon, lat)| GeoPos::new(*lon, *lat)).collect()
    }

    #[test]
    fn close_ring_repeats_first_vertex() {
        let open = ring(&[(10.0, 10.0), (10.0, 20.0), (20.0, 20.0), (20.0, 10.0)]);
        let closed = close_ring(&open);
        assert_eq!(closed.len(), 5);
        assert_eq!(closed[0], vec![10.0, 10.0]);
        assert_eq!(closed[4], vec![10.0, 10.0]);
    }

    #[test]
    fn polygon_roundtrip_strips_and_restores_closing_vertex() {
        let open = ring(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)]);
        let footprint = Footprint::from_outer_ring(open.clone());

        let geometry = footprint.to_geojson();
        let back = Footprint::from_geojson(&geometry).unwrap();

        assert_eq!(back.polygons.len(), 1);
        assert_eq!(back.polygons[0].outer, open);
        assert!(back.polygons[0].holes.is_empty());
    }

    #[test]
    fn multipolygon_decodes_all_rings() {
        let geometry = Geometry::new(Value::MultiPolygon(vec![
            vec![vec![
                vec![0.0, 0.0],
                vec![0.0, 1.0],
                vec![1.0, 1.0],
                vec![0.0, 0.0],
            ]],
            vec![
                vec![
                    vec![5.0, 5.0],
                    vec![5.0, 9.0],
                    vec![9.0, 9.0],
                    vec![9.0, 5.0],
                    vec![5.0, 5.0],
                ],
                vec![
                    vec![6.0, 6.0],
                    vec![6.0, 7.0],
                    vec![7.0, 7.0],
                    vec![6.0, 6.0],
                ],
            ],
        ]));

        let footprint = Footprint::from_geojson(&geometry).unwrap();
        assert_eq!(footprint.polygons.len(), 2);
        assert_eq!(footprint.polygons[1].holes.len(), 1);
        assert_eq!(footprint.rings().count(), 3);
    }

    #[test]
    fn point_geometry_is_rejected() {
        let geometry = Geometry::new(Value::Point(vec![1.0, 2.0]));
        assert!(Footprint::from_geojson(&geometry).is_err());
    }
}
