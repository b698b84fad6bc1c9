use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::rfid::RfidCode;

/// Length of every embedding produced by the face-embedding extractor.
pub const EMBEDDING_DIM: usize = 128;

/// Opaque worker identifier (UUID text as issued at enrollment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for a newly enrolled worker.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Face embedding vector as produced by the external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Vectors of different length are never comparable and yield
    /// `f32::INFINITY`.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True if the vector has the extractor's dimension and only finite components.
    pub fn is_well_formed(&self) -> bool {
        self.values.len() == EMBEDDING_DIM && self.values.iter().all(|v| v.is_finite())
    }

    /// Little-endian byte encoding used for storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decode from [`to_le_bytes`](Self::to_le_bytes). Returns `None` on a
    /// length that is not a multiple of four.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { values })
    }
}

/// An enrolled worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub rfid_code: Option<RfidCode>,
    pub created_at: DateTime<Utc>,
}

/// Gallery entry: every reference embedding enrolled for one worker, in
/// enrollment order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEmbeddings {
    pub worker_id: WorkerId,
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

/// How a punch was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    Face,
    Rfid,
}

impl CaptureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMethod::Face => "face",
            CaptureMethod::Rfid => "rfid",
        }
    }
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face" => Ok(CaptureMethod::Face),
            "rfid" => Ok(CaptureMethod::Rfid),
            other => Err(format!("unknown capture method: {other}")),
        }
    }
}

/// Whether a punch is an arrival or a departure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("in"),
            Direction::Out => f.write_str("out"),
        }
    }
}

/// One check-in/check-out pair for a worker on a calendar day.
///
/// `check_out`, when present alongside `check_in`, is later than it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub worker_id: WorkerId,
    pub day: NaiveDate,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
    pub method: CaptureMethod,
    /// Set on check-out-only records written when no open record existed.
    pub needs_reconciliation: bool,
}

impl AttendanceRecord {
    /// Number of individual punches this record holds (0, 1 or 2).
    pub fn punch_count(&self) -> usize {
        usize::from(self.check_in.is_some()) + usize::from(self.check_out.is_some())
    }

    /// Checked in, not yet checked out.
    pub fn is_open(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_none()
    }

    /// Most recent punch timestamp held by this record.
    pub fn last_punch_at(&self) -> Option<DateTime<Utc>> {
        self.check_out.or(self.check_in)
    }
}

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(check_in: bool, check_out: bool) -> AttendanceRecord {
        let t = DateTime::parse_from_rfc3339("2026-10-19T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        AttendanceRecord {
            id: "r".into(),
            worker_id: "w".into(),
            day: t.date_naive(),
            check_in: check_in.then_some(t),
            check_out: check_out.then(|| t + chrono::Duration::hours(8)),
            method: CaptureMethod::Rfid,
            needs_reconciliation: false,
        }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_length_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_well_formed_requires_dimension_and_finite() {
        assert!(Embedding::new(vec![0.1; EMBEDDING_DIM]).is_well_formed());
        assert!(!Embedding::new(vec![0.1; 64]).is_well_formed());
        let mut values = vec![0.1; EMBEDDING_DIM];
        values[7] = f32::NAN;
        assert!(!Embedding::new(values).is_well_formed());
    }

    #[test]
    fn test_le_bytes_decoding() {
        let e = Embedding::new(vec![1.5, -0.25, 3.0]);
        let bytes = e.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Embedding::from_le_bytes(&bytes), Some(e));
        assert_eq!(Embedding::from_le_bytes(&[0, 1, 2]), None);
    }

    #[test]
    fn test_record_punch_count() {
        assert_eq!(record(true, false).punch_count(), 1);
        assert_eq!(record(false, true).punch_count(), 1);
        assert_eq!(record(true, true).punch_count(), 2);
        assert!(record(true, false).is_open());
        assert!(!record(true, true).is_open());
        assert!(!record(false, true).is_open());
    }

    #[test]
    fn test_capture_method_parse() {
        assert_eq!("face".parse::<CaptureMethod>(), Ok(CaptureMethod::Face));
        assert_eq!("rfid".parse::<CaptureMethod>(), Ok(CaptureMethod::Rfid));
        assert!("pin".parse::<CaptureMethod>().is_err());
    }

    #[test]
    fn test_geo_point_validity() {
        assert!(GeoPoint::new(23.8, 90.4).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::NAN).is_valid());
    }
}
