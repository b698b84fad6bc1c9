//! Request and outcome of the "submit punch" operation.
//!
//! Soft rejects are ordinary outcomes, not errors: the kiosk keeps
//! observing after any of them.

use serde::{Deserialize, Serialize};

use crate::matcher::MatchPolicy;
use crate::types::{CaptureMethod, Direction, GeoPoint, WorkerId};

/// Server-side parameters a kiosk needs to match and count down locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub cooldown_seconds: u64,
    pub match_threshold: f32,
    pub match_policy: MatchPolicy,
}

/// Where the capture session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunchOrigin {
    /// Admin-operated kiosk at a trusted physical location.
    #[default]
    Console,
    /// Employee self-service on a personal device.
    PersonalDevice,
}

impl PunchOrigin {
    /// Face captures from personal devices must come from inside the geofence.
    pub fn requires_geofence(&self, method: CaptureMethod) -> bool {
        matches!(
            (self, method),
            (PunchOrigin::PersonalDevice, CaptureMethod::Face)
        )
    }
}

/// Who is punching: an already-identified worker, or a raw RFID scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunchSubject {
    Worker(WorkerId),
    Rfid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    /// Raw code as scanned or typed; validated server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfid_code: Option<String>,
    pub method: CaptureMethod,
    #[serde(default)]
    pub origin: PunchOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl PunchRequest {
    pub fn for_worker(worker_id: WorkerId, method: CaptureMethod, origin: PunchOrigin) -> Self {
        Self {
            worker_id: Some(worker_id),
            rfid_code: None,
            method,
            origin,
            location: None,
        }
    }

    pub fn for_rfid(code: impl Into<String>, origin: PunchOrigin) -> Self {
        Self {
            worker_id: None,
            rfid_code: Some(code.into()),
            method: CaptureMethod::Rfid,
            origin,
            location: None,
        }
    }

    pub fn with_location(mut self, location: Option<GeoPoint>) -> Self {
        self.location = location;
        self
    }

    /// Exactly one of `worker_id` / `rfid_code` must be set.
    pub fn subject(&self) -> Option<PunchSubject> {
        match (&self.worker_id, &self.rfid_code) {
            (Some(id), None) => Some(PunchSubject::Worker(id.clone())),
            (None, Some(code)) => Some(PunchSubject::Rfid(code.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PunchOutcome {
    Accepted {
        worker_id: WorkerId,
        worker_name: String,
        direction: Direction,
        record_id: String,
        /// Length of the cooldown that now applies to this worker.
        cooldown_seconds: u64,
    },
    CooldownActive {
        worker_id: WorkerId,
        remaining_seconds: u64,
    },
    OutOfRange {
        distance_meters: f64,
    },
    UnknownIdentity,
    LocationUnavailable,
    GeofenceNotConfigured,
}

impl PunchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PunchOutcome::Accepted { .. })
    }

    /// Worker the outcome refers to, when the identity was resolved.
    pub fn worker_id(&self) -> Option<&WorkerId> {
        match self {
            PunchOutcome::Accepted { worker_id, .. }
            | PunchOutcome::CooldownActive { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }
}
