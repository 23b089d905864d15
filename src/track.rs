//! Path recording.
//!
//! A recorder samples a position source at a fixed cadence while recording
//! is active. The position source is a seam: on a phone it is the platform
//! geolocation watch, in the desktop build the app falls back to following
//! the map center.

use crate::projection::GeoPos;
use crate::types::PathSample;

/// Default sampling cadence while recording.
pub const DEFAULT_SAMPLE_CADENCE_MS: f64 = 3_000.0;

/// Source of the device position.
pub trait PositionSource {
    /// The current position, if one is known.
    fn poll(&mut self) -> Option<GeoPos>;
}

/// An in-progress path recording.
pub struct PathRecorder {
    name: String,
    cadence_ms: f64,
    samples: Vec<PathSample>,
    last_sample_at: Option<f64>,
}

impl PathRecorder {
    /// Starts recording under the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_cadence(name, DEFAULT_SAMPLE_CADENCE_MS)
    }

    /// Starts recording with a custom sampling cadence.
    pub fn with_cadence(name: impl Into<String>, cadence_ms: f64) -> Self {
        Self {
            name: name.into(),
            cadence_ms,
            samples: Vec::new(),
            last_sample_at: None,
        }
    }

    /// The name chosen before recording started.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The samples captured so far.
    pub fn samples(&self) -> &[PathSample] {
        &self.samples
    }

    /// Offers a position to the recorder. A sample is appended only when the
    /// cadence has elapsed since the previous one; returns whether the
    /// position was taken.
    ///
    /// `now_ms` is the monotonic session clock, `timestamp_ms` the wall-clock
    /// stamp stored with the sample.
    pub fn tick(&mut self, pos: GeoPos, now_ms: f64, timestamp_ms: i64) -> bool {
        if let Some(last) = self.last_sample_at {
            if now_ms - last < self.cadence_ms {
                return false;
            }
        }
        self.samples.push(PathSample {
            lat: pos.lat,
            lng: pos.lon,
            timestamp: timestamp_ms,
        });
        self.last_sample_at = Some(now_ms);
        true
    }

    /// Finishes recording, yielding the name and samples for the save flow.
    pub fn finish(self) -> (String, Vec<PathSample>) {
        (self.name, self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_offer_is_always_taken() {
        let mut recorder = PathRecorder::with_cadence("walk", 1_000.0);
        assert!(recorder.tick(GeoPos::new(10.0, 10.0), 0.0, 1_700_000_000_000));
        assert_eq!(recorder.samples().len(), 1);
    }

    #[test]
    fn cadence_gates_sampling() {
        let mut recorder = PathRecorder::with_cadence("walk", 1_000.0);
        recorder.tick(GeoPos::new(10.0, 10.0), 0.0, 0);
        assert!(!recorder.tick(GeoPos::new(10.1, 10.1), 400.0, 400));
        assert!(!recorder.tick(GeoPos::new(10.2, 10.2), 999.0, 999));
        assert!(recorder.tick(GeoPos::new(10.3, 10.3), 1_000.0, 1_000));
        assert_eq!(recorder.samples().len(), 2);

        // Samples keep insertion order and their own timestamps.
        assert_eq!(recorder.samples()[0].timestamp, 0);
        assert_eq!(recorder.samples()[1].timestamp, 1_000);
        assert!((recorder.samples()[1].lng - 10.3).abs() < 1e-9);
    }

    #[test]
    fn finish_hands_back_name_and_samples() {
        let mut recorder = PathRecorder::with_cadence("morning run", 500.0);
        recorder.tick(GeoPos::new(1.0, 2.0), 0.0, 10);
        let (name, samples) = recorder.finish();
        assert_eq!(name, "morning run");
        assert_eq!(samples.len(), 1);
        assert!((samples[0].lat - 2.0).abs() < 1e-9);
    }
}
