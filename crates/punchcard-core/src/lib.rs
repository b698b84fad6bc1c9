//! punchcard-core — Attendance capture rules.
//!
//! Identity matching against an embedding gallery, debounce of per-tick
//! detections, punch-direction resolution, geofencing and cooldown
//! arithmetic. Nothing in this crate performs I/O; the daemon and the
//! kiosk client supply clocks, storage and devices.

pub mod cooldown;
pub mod direction;
pub mod geofence;
pub mod matcher;
pub mod punch;
pub mod rfid;
pub mod stability;
pub mod types;

pub use cooldown::{CooldownCheck, CooldownWindow, DEFAULT_COOLDOWN};
pub use direction::{plan_punch, resolve_direction, PunchPlan};
pub use geofence::{GeofenceConfig, GeofenceDecision, GeofenceError};
pub use matcher::{
    ClosestMatcher, FirstMatchMatcher, MatchPolicy, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD,
};
pub use punch::{PunchOrigin, PunchOutcome, PunchRequest, PunchSubject, ServerSettings};
pub use rfid::{RfidCode, RfidError};
pub use stability::{
    Observation, StabilityFilter, DEFAULT_STABILITY_THRESHOLD, DEFAULT_STABILITY_WINDOW,
};
pub use types::{
    AttendanceRecord, CaptureMethod, Direction, Embedding, GeoPoint, Worker, WorkerEmbeddings,
    WorkerId, EMBEDDING_DIM,
};
