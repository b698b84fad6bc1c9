//! punchcard-hw — Capture device abstraction.
//!
//! Face embeddings come from an external extractor process that owns the
//! camera; RFID codes come from a line-oriented reader (keyboard wedge or
//! serial adapter); positions come from a location provider. Every device
//! call is blocking and bounded by a caller-supplied timeout.

pub mod face;
pub mod location;
mod pump;
pub mod rfid;

pub use face::{BoundingBox, CaptureError, ExtractorProcess, FaceSample, FaceSource, Readiness};
pub use location::{
    FixedLocation, LocationError, LocationProvider, NoLocation, DEFAULT_LOCATION_TIMEOUT,
};
pub use rfid::{LineRfidReader, RfidReader};
