//! Client for the persistence backend.
//!
//! All functions here block and are meant to run inside
//! `poll_promise::Promise::spawn_thread`. Responses arrive as
//! `{status, ...}` envelopes; classification into tagged outcomes is kept as
//! pure functions of the status code and body so it can be tested without a
//! server. No call is ever retried automatically; recovery is user-driven.

use log::debug;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::CLIENT;
use crate::types::{Footprint, GeometryError, PathPopup, PathRecord, PathSample, Refuge, Ring,
                   ring_to_polygon_geometry};

/// Errors from transport or undecodable responses.
#[derive(Error, Debug)]
pub enum BackendError {
    /// An error occurred while making a web request.
    #[error("Connection error")]
    Connection(#[from] reqwest::Error),

    /// The response body was not the expected envelope.
    #[error("Unexpected backend response: {0}")]
    UnexpectedResponse(String),

    /// A refuge geometry payload could not be decoded.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Result of creating a refuge.
#[derive(Debug)]
pub enum CreateOutcome {
    /// The refuge was persisted.
    Created(Refuge),

    /// The name is taken; keep the drawn geometry and re-prompt.
    DuplicateName,

    /// The shape is completely covered by existing refuges; nothing to save.
    FullOverlap,

    /// Any other server-side rejection.
    Rejected(String),
}

/// Result of renaming a refuge.
#[derive(Debug)]
pub enum RenameOutcome {
    /// The rename was persisted.
    Renamed,

    /// The name is taken.
    DuplicateName,

    /// Any other server-side rejection.
    Rejected(String),
}

/// Result of the subtract-overlay boundary check.
#[derive(Debug)]
pub enum ValidateOutcome {
    /// The overlay is safe to subtract.
    Ok,

    /// Subtracting the overlay would split the refuge.
    WouldFragment(String),
}

/// Result of applying overlay selections.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The refuge was rewritten; the returned geometry replaces local state.
    Applied(Refuge),

    /// The server declined the modification.
    Rejected(String),
}

fn id_string(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

#[derive(Deserialize)]
struct RefugeWire {
    id: serde_json::Value,
    name: String,
    polygon: geojson::Geometry,
}

impl RefugeWire {
    fn into_refuge(self) -> Result<Refuge, BackendError> {
        Ok(Refuge {
            id: id_string(&self.id),
            name: self.name,
            footprint: Footprint::from_geojson(&self.polygon)?,
        })
    }
}

#[derive(Deserialize)]
struct RefugeListEnvelope {
    #[allow(dead_code)]
    status: String,
    #[serde(default)]
    refuges: Vec<RefugeWire>,
}

#[derive(Deserialize)]
struct RefugeEnvelope {
    status: String,
    refuge: Option<RefugeWire>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct StatusEnvelope {
    status: String,
    message: Option<String>,
}

#[derive(Deserialize)]
struct PathWire {
    id: serde_json::Value,
    name: String,
    #[serde(default)]
    points: Vec<PathSample>,
    #[serde(default)]
    popups: std::collections::BTreeMap<usize, PathPopup>,
}

impl PathWire {
    fn into_record(self) -> PathRecord {
        PathRecord {
            id: id_string(&self.id),
            name: self.name,
            points: self.points,
            popups: self.popups,
        }
    }
}

#[derive(Deserialize)]
struct PathListEnvelope {
    #[allow(dead_code)]
    status: String,
    #[serde(default)]
    paths: Vec<PathWire>,
}

#[derive(Deserialize)]
struct PathEnvelope {
    status: String,
    path: Option<PathWire>,
    message: Option<String>,
}

fn api(base: &str, path: &str) -> String {
    format!("{}/api/{}", base.trim_end_matches('/'), path)
}

fn classify_create(status: u16, body: &str) -> Result<CreateOutcome, BackendError> {
    if let Ok(envelope) = serde_json::from_str::<RefugeEnvelope>(body) {
        if envelope.status == "success" {
            if let Some(wire) = envelope.refuge {
                return Ok(CreateOutcome::Created(wire.into_refuge()?));
            }
        }
        let message = envelope.message.unwrap_or_default();
        if status == 409 || message.contains("already exists") {
            return Ok(CreateOutcome::DuplicateName);
        }
        if message.contains("overlaps existing areas completely")
            || message.contains("nothing to save")
        {
            return Ok(CreateOutcome::FullOverlap);
        }
        if !message.is_empty() {
            return Ok(CreateOutcome::Rejected(message));
        }
    }
    if status == 409 {
        return Ok(CreateOutcome::DuplicateName);
    }
    Err(BackendError::UnexpectedResponse(format!("HTTP {status}")))
}

fn classify_rename(status: u16, body: &str) -> Result<RenameOutcome, BackendError> {
    if let Ok(envelope) = serde_json::from_str::<StatusEnvelope>(body) {
        if envelope.status == "success" {
            return Ok(RenameOutcome::Renamed);
        }
        let message = envelope.message.unwrap_or_default();
        if status == 409 || message.contains("already exists") {
            return Ok(RenameOutcome::DuplicateName);
        }
        if !message.is_empty() {
            return Ok(RenameOutcome::Rejected(message));
        }
    }
    if status == 409 {
        return Ok(RenameOutcome::DuplicateName);
    }
    Err(BackendError::UnexpectedResponse(format!("HTTP {status}")))
}

fn classify_validate(status: u16, body: &str) -> Result<ValidateOutcome, BackendError> {
    if let Ok(envelope) = serde_json::from_str::<StatusEnvelope>(body) {
        if envelope.status == "success" {
            return Ok(ValidateOutcome::Ok);
        }
        return Ok(ValidateOutcome::WouldFragment(
            envelope
                .message
                .unwrap_or_else(|| "overlay rejected".to_string()),
        ));
    }
    Err(BackendError::UnexpectedResponse(format!("HTTP {status}")))
}

fn classify_apply(status: u16, body: &str) -> Result<ApplyOutcome, BackendError> {
    if let Ok(envelope) = serde_json::from_str::<RefugeEnvelope>(body) {
        if envelope.status == "success" {
            if let Some(wire) = envelope.refuge {
                return Ok(ApplyOutcome::Applied(wire.into_refuge()?));
            }
        }
        if let Some(message) = envelope.message {
            return Ok(ApplyOutcome::Rejected(message));
        }
    }
    Err(BackendError::UnexpectedResponse(format!("HTTP {status}")))
}

/// Fetches every refuge.
pub fn fetch_refuges(base: &str) -> Result<Vec<Refuge>, BackendError> {
    let url = api(base, "refuges");
    debug!("GET {url}");
    let envelope: RefugeListEnvelope = CLIENT.get(url).send()?.json()?;
    envelope
        .refuges
        .into_iter()
        .map(RefugeWire::into_refuge)
        .collect()
}

/// Persists a newly drawn refuge.
pub fn create_refuge(base: &str, name: &str, ring: &Ring) -> Result<CreateOutcome, BackendError> {
    let url = api(base, "refuges");
    debug!("POST {url}");
    let body = json!({
        "name": name,
        "polygon": ring_to_polygon_geometry(ring),
    });
    let response = CLIENT.post(url).json(&body).send()?;
    let status = response.status().as_u16();
    classify_create(status, &response.text()?)
}

/// Renames a refuge.
pub fn rename_refuge(base: &str, id: &str, name: &str) -> Result<RenameOutcome, BackendError> {
    let url = api(base, &format!("refuges/{id}"));
    debug!("PUT {url}");
    let response = CLIENT.put(url).json(&json!({ "name": name })).send()?;
    let status = response.status().as_u16();
    classify_rename(status, &response.text()?)
}

/// Deletes a refuge.
pub fn delete_refuge(base: &str, id: &str) -> Result<(), BackendError> {
    let url = api(base, &format!("refuges/{id}"));
    debug!("DELETE {url}");
    let response = CLIENT.delete(url).send()?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(BackendError::UnexpectedResponse(format!(
            "HTTP {}",
            response.status()
        )))
    }
}

/// Asks the backend whether subtracting the overlay would fragment the
/// refuge.
pub fn validate_subtract_overlay(
    base: &str,
    id: &str,
    ring: &Ring,
) -> Result<ValidateOutcome, BackendError> {
    let url = api(base, &format!("refuges/{id}/validate-overlay"));
    debug!("POST {url}");
    let body = json!({
        "operation": "subtract",
        "overlay": ring_to_polygon_geometry(ring),
    });
    let response = CLIENT.post(url).json(&body).send()?;
    let status = response.status().as_u16();
    classify_validate(status, &response.text()?)
}

/// Applies the selected adjoin/subtract overlay sets in one request.
pub fn apply_overlays(
    base: &str,
    id: &str,
    adjoin: Vec<geojson::Geometry>,
    subtract: Vec<geojson::Geometry>,
) -> Result<ApplyOutcome, BackendError> {
    let url = api(base, &format!("refuges/{id}/apply-overlays"));
    debug!("POST {url}");
    let body = json!({ "adjoin": adjoin, "subtract": subtract });
    let response = CLIENT.post(url).json(&body).send()?;
    let status = response.status().as_u16();
    classify_apply(status, &response.text()?)
}

/// Fetches every recorded path.
pub fn fetch_paths(base: &str) -> Result<Vec<PathRecord>, BackendError> {
    let url = api(base, "paths");
    debug!("GET {url}");
    let envelope: PathListEnvelope = CLIENT.get(url).send()?.json()?;
    Ok(envelope.paths.into_iter().map(PathWire::into_record).collect())
}

/// Persists a freshly recorded path.
pub fn create_path(
    base: &str,
    name: &str,
    points: &[PathSample],
) -> Result<PathRecord, BackendError> {
    let url = api(base, "paths");
    debug!("POST {url}");
    let response = CLIENT
        .post(url)
        .json(&json!({ "name": name, "points": points }))
        .send()?;
    let status = response.status().as_u16();
    let body = response.text()?;
    if let Ok(envelope) = serde_json::from_str::<PathEnvelope>(&body) {
        if envelope.status == "success" {
            if let Some(wire) = envelope.path {
                return Ok(wire.into_record());
            }
        }
        if let Some(message) = envelope.message {
            return Err(BackendError::UnexpectedResponse(message));
        }
    }
    Err(BackendError::UnexpectedResponse(format!("HTTP {status}")))
}

/// Deletes a path.
pub fn delete_path(base: &str, id: &str) -> Result<(), BackendError> {
    let url = api(base, &format!("paths/{id}"));
    debug!("DELETE {url}");
    let response = CLIENT.delete(url).send()?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(BackendError::UnexpectedResponse(format!(
            "HTTP {}",
            response.status()
        )))
    }
}

/// Replaces a path wholesale.
pub fn update_path(base: &str, record: &PathRecord) -> Result<(), BackendError> {
    let url = api(base, &format!("paths/{}", record.id));
    debug!("PUT {url}");
    let response = CLIENT
        .put(url)
        .json(&json!({ "name": record.name, "points": record.points }))
        .send()?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(BackendError::UnexpectedResponse(format!(
            "HTTP {}",
            response.status()
        )))
    }
}

/// Attaches a popup annotation to one path point.
pub fn attach_popup(
    base: &str,
    path_id: &str,
    point_index: usize,
    popup: &PathPopup,
) -> Result<(), BackendError> {
    let url = api(base, &format!("paths/{path_id}/popups"));
    debug!("POST {url}");
    let response = CLIENT
        .post(url)
        .json(&json!({ "point_index": point_index, "popup": popup }))
        .send()?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(BackendError::UnexpectedResponse(format!(
            "HTTP {}",
            response.status()
        )))
    }
}

/// Forwards the host shell's opaque init payload once at startup.
pub fn post_init_data(base: &str, payload: &serde_json::Value) -> Result<(), BackendError> {
    let url = api(base, "init-data");
    debug!("POST {url}");
    let response = CLIENT.post(url).json(payload).send()?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(BackendError::UnexpectedResponse(format!(
            "HTTP {}",
            response.status()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_success_decodes_refuge() {
        let body = r#"{
            "status": "success",
            "refuge": {
                "id": 7,
                "name": "North Camp",
                "polygon": {
                    "type": "Polygon",
                    "coordinates": [[[10.0,10.0],[10.0,20.0],[20.0,20.0],[20.0,10.0],[10.0,10.0]]]
                }
            }
        }"#;

        match classify_create(200, body).unwrap() {
            CreateOutcome::Created(refuge) => {
                assert_eq!(refuge.id, "7");
                assert_eq!(refuge.name, "North Camp");
                assert_eq!(refuge.footprint.polygons[0].outer.len(), 4);
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn create_duplicate_name_from_409() {
        let body = r#"{"status":"error","message":"Refuge name already exists"}"#;
        assert!(matches!(
            classify_create(409, body).unwrap(),
            CreateOutcome::DuplicateName
        ));

        // The message alone is enough even without the status code.
        assert!(matches!(
            classify_create(400, body).unwrap(),
            CreateOutcome::DuplicateName
        ));
    }

    #[test]
    fn create_full_overlap_is_fatal_to_the_session() {
        let body =
            r#"{"status":"error","message":"Shape overlaps existing areas completely, nothing to save"}"#;
        assert!(matches!(
            classify_create(400, body).unwrap(),
            CreateOutcome::FullOverlap
        ));
    }

    #[test]
    fn create_malformed_body_is_a_transport_error() {
        assert!(classify_create(500, "<html>gateway timeout</html>").is_err());
    }

    #[test]
    fn rename_classification() {
        assert!(matches!(
            classify_rename(200, r#"{"status":"success"}"#).unwrap(),
            RenameOutcome::Renamed
        ));
        assert!(matches!(
            classify_rename(409, r#"{"status":"error","message":"name already exists"}"#).unwrap(),
            RenameOutcome::DuplicateName
        ));
    }

    #[test]
    fn validate_classification() {
        assert!(matches!(
            classify_validate(200, r#"{"status":"success"}"#).unwrap(),
            ValidateOutcome::Ok
        ));
        match classify_validate(
            400,
            r#"{"status":"error","message":"Subtracting would fragment the refuge","code":"would_fragment"}"#,
        )
        .unwrap()
        {
            ValidateOutcome::WouldFragment(message) => {
                assert!(message.contains("fragment"));
            }
            other => panic!("expected WouldFragment, got {other:?}"),
        }
    }

    #[test]
    fn apply_success_replaces_footprint() {
        let body = r#"{
            "status": "success",
            "refuge": {
                "id": "r1",
                "name": "North Camp",
                "polygon": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[0.0,0.0],[0.0,1.0],[1.0,1.0],[0.0,0.0]]],
                        [[[5.0,5.0],[5.0,6.0],[6.0,6.0],[5.0,5.0]]]
                    ]
                }
            }
        }"#;
        match classify_apply(200, body).unwrap() {
            ApplyOutcome::Applied(refuge) => {
                assert_eq!(refuge.footprint.polygons.len(), 2);
            }
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[test]
    fn api_url_tolerates_trailing_slash() {
        assert_eq!(
            api("https://example.test/", "refuges"),
            "https://example.test/api/refuges"
        );
        assert_eq!(
            api("https://example.test", "refuges/7"),
            "https://example.test/api/refuges/7"
        );
    }
}
