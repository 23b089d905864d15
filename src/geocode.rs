//! Free-text place lookup against a Nominatim-compatible geocoder.

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::CLIENT;
use crate::projection::GeoPos;

/// Errors from the geocoding request.
#[derive(Error, Debug)]
pub enum GeocodeError {
    /// An error occurred while making a web request.
    #[error("Connection error")]
    Connection(#[from] reqwest::Error),

    /// A result row carried a coordinate that did not parse.
    #[error("Malformed coordinate in geocoder response")]
    MalformedCoordinate,
}

/// One place hit.
#[derive(Clone, Debug)]
pub struct Place {
    /// Human-readable place description.
    pub display_name: String,

    /// Position of the hit.
    pub pos: GeoPos,
}

// Nominatim serializes coordinates as strings.
#[derive(Deserialize)]
struct PlaceWire {
    display_name: String,
    lat: String,
    lon: String,
}

fn place_from_wire(wire: PlaceWire) -> Result<Place, GeocodeError> {
    let lat: f64 = wire
        .lat
        .parse()
        .map_err(|_| GeocodeError::MalformedCoordinate)?;
    let lon: f64 = wire
        .lon
        .parse()
        .map_err(|_| GeocodeError::MalformedCoordinate)?;
    Ok(Place {
        display_name: wire.display_name,
        pos: GeoPos { lon, lat },
    })
}

/// Searches for places matching the free-text query.
pub fn search_places(base: &str, query: &str) -> Result<Vec<Place>, GeocodeError> {
    let url = format!("{}/search", base.trim_end_matches('/'));
    debug!("GET {url}?q={query}");
    let wires: Vec<PlaceWire> = CLIENT
        .get(url)
        .query(&[("format", "json"), ("q", query)])
        .send()?
        .json()?;
    wires.into_iter().map(place_from_wire).collect()
}
