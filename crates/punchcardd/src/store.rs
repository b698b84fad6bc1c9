//! SQLite persistence for workers, reference embeddings, attendance records
//! and the geofence.
//!
//! All access goes through `tokio-rusqlite`, which runs statements on a
//! dedicated connection thread. Rows are read raw inside the connection
//! closure and decoded afterwards, so decode failures surface as
//! [`StoreError::Corrupt`] rather than SQLite errors.

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use punchcard_core::{
    AttendanceRecord, CaptureMethod, Embedding, GeoPoint, GeofenceConfig, PunchPlan, RfidCode,
    Worker, WorkerEmbeddings, WorkerId,
};
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS workers (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    rfid_code   TEXT UNIQUE,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
    id          TEXT PRIMARY KEY,
    worker_id   TEXT NOT NULL REFERENCES workers(id) ON DELETE CASCADE,
    vector      BLOB NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_worker ON embeddings(worker_id);

CREATE TABLE IF NOT EXISTS attendance (
    id                    TEXT PRIMARY KEY,
    worker_id             TEXT NOT NULL REFERENCES workers(id) ON DELETE CASCADE,
    day                   TEXT NOT NULL,
    check_in              TEXT,
    check_out             TEXT,
    method                TEXT NOT NULL,
    needs_reconciliation  INTEGER NOT NULL DEFAULT 0,
    CHECK (check_in IS NOT NULL OR check_out IS NOT NULL)
);
CREATE INDEX IF NOT EXISTS idx_attendance_worker_day ON attendance(worker_id, day);

CREATE TABLE IF NOT EXISTS geofence (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    enabled     INTEGER NOT NULL,
    latitude    REAL,
    longitude   REAL,
    radius_m    REAL
);
";

const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("unknown worker: {0}")]
    UnknownWorker(WorkerId),
    #[error("RFID code {0} is already assigned")]
    DuplicateRfid(RfidCode),
    #[error("attendance record {0} is not open")]
    RecordNotOpen(String),
}

/// Handle to the attendance database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

struct RawWorker {
    id: String,
    name: String,
    rfid_code: Option<String>,
    created_at: String,
}

impl RawWorker {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            rfid_code: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn decode(self) -> Result<Worker, StoreError> {
        let rfid_code = self
            .rfid_code
            .map(|c| RfidCode::parse(&c).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()?;
        Ok(Worker {
            id: WorkerId::new(self.id),
            name: self.name,
            rfid_code,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct RawRecord {
    id: String,
    worker_id: String,
    day: String,
    check_in: Option<String>,
    check_out: Option<String>,
    method: String,
    needs_reconciliation: bool,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            worker_id: row.get(1)?,
            day: row.get(2)?,
            check_in: row.get(3)?,
            check_out: row.get(4)?,
            method: row.get(5)?,
            needs_reconciliation: row.get(6)?,
        })
    }

    fn decode(self) -> Result<AttendanceRecord, StoreError> {
        Ok(AttendanceRecord {
            id: self.id,
            worker_id: WorkerId::new(self.worker_id),
            day: parse_day(&self.day)?,
            check_in: self.check_in.as_deref().map(parse_ts).transpose()?,
            check_out: self.check_out.as_deref().map(parse_ts).transpose()?,
            method: self.method.parse().map_err(StoreError::Corrupt)?,
            needs_reconciliation: self.needs_reconciliation,
        })
    }
}

const RECORD_COLUMNS: &str =
    "id, worker_id, day, check_in, check_out, method, needs_reconciliation";

fn fmt_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width UTC form so text ordering matches time ordering.
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn fmt_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

fn parse_day(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DAY_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("day {s:?}: {e}")))
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    // --- Workers ---

    pub async fn create_worker(
        &self,
        name: &str,
        rfid_code: Option<RfidCode>,
        now: DateTime<Utc>,
    ) -> Result<Worker, StoreError> {
        let worker = Worker {
            id: WorkerId::generate(),
            name: name.to_string(),
            rfid_code,
            created_at: now,
        };

        let id = worker.id.to_string();
        let name = worker.name.clone();
        let code = worker.rfid_code.as_ref().map(|c| c.as_str().to_string());
        let created_at = fmt_ts(now);

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if let Some(code) = &code {
                    let taken = tx
                        .query_row(
                            "SELECT 1 FROM workers WHERE rfid_code = ?1",
                            params![code],
                            |_| Ok(()),
                        )
                        .optional()?
                        .is_some();
                    if taken {
                        return Ok(false);
                    }
                }
                tx.execute(
                    "INSERT INTO workers (id, name, rfid_code, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, name, code, created_at],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !inserted {
            // Only reachable with a code present.
            let code = worker.rfid_code.clone().ok_or_else(|| {
                StoreError::Corrupt("duplicate reported without an RFID code".into())
            })?;
            return Err(StoreError::DuplicateRfid(code));
        }
        Ok(worker)
    }

    pub async fn worker(&self, id: &WorkerId) -> Result<Option<Worker>, StoreError> {
        let id = id.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, rfid_code, created_at FROM workers WHERE id = ?1",
                        params![id],
                        RawWorker::from_row,
                    )
                    .optional()?)
            })
            .await?;
        raw.map(RawWorker::decode).transpose()
    }

    pub async fn worker_by_rfid(&self, code: &RfidCode) -> Result<Option<Worker>, StoreError> {
        let code = code.as_str().to_string();
        let raw = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, rfid_code, created_at FROM workers WHERE rfid_code = ?1",
                        params![code],
                        RawWorker::from_row,
                    )
                    .optional()?)
            })
            .await?;
        raw.map(RawWorker::decode).transpose()
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>, StoreError> {
        let raws = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, rfid_code, created_at FROM workers ORDER BY name, id",
                )?;
                let rows = stmt
                    .query_map([], RawWorker::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        raws.into_iter().map(RawWorker::decode).collect()
    }

    /// Remove a worker with all embeddings and attendance records.
    pub async fn remove_worker(&self, id: &WorkerId) -> Result<bool, StoreError> {
        let id = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM embeddings WHERE worker_id = ?1", params![id])?;
                tx.execute("DELETE FROM attendance WHERE worker_id = ?1", params![id])?;
                let n = tx.execute("DELETE FROM workers WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(n > 0)
            })
            .await?;
        Ok(removed)
    }

    // --- Embeddings ---

    pub async fn add_embedding(
        &self,
        worker_id: &WorkerId,
        embedding: &Embedding,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let embedding_id = uuid::Uuid::new_v4().to_string();
        let id = embedding_id.clone();
        let worker = worker_id.to_string();
        let blob = embedding.to_le_bytes();
        let created_at = fmt_ts(now);

        let inserted = self
            .conn
            .call(move |conn| {
                let exists = conn
                    .query_row("SELECT 1 FROM workers WHERE id = ?1", params![worker], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    return Ok(false);
                }
                conn.execute(
                    "INSERT INTO embeddings (id, worker_id, vector, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, worker, blob, created_at],
                )?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::UnknownWorker(worker_id.clone()));
        }
        Ok(embedding_id)
    }

    /// Every worker with their reference embeddings in enrollment order.
    pub async fn gallery(&self) -> Result<Vec<WorkerEmbeddings>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT w.id, w.name, e.vector
                     FROM workers w LEFT JOIN embeddings e ON e.worker_id = w.id
                     ORDER BY w.name, w.id, e.rowid",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<Vec<u8>>>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut gallery: Vec<WorkerEmbeddings> = Vec::new();
        for (id, name, blob) in rows {
            let is_new = gallery
                .last()
                .map_or(true, |entry| entry.worker_id.as_str() != id);
            if is_new {
                gallery.push(WorkerEmbeddings {
                    worker_id: WorkerId::new(id.clone()),
                    name,
                    embeddings: Vec::new(),
                });
            }
            if let Some(blob) = blob {
                let embedding = Embedding::from_le_bytes(&blob)
                    .ok_or_else(|| StoreError::Corrupt(format!("embedding for worker {id}")))?;
                if let Some(entry) = gallery.last_mut() {
                    entry.embeddings.push(embedding);
                }
            }
        }
        Ok(gallery)
    }

    // --- Attendance ---

    /// Records for `worker_id` on `day`, oldest punch first.
    pub async fn records_for_day(
        &self,
        worker_id: &WorkerId,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let worker = worker_id.to_string();
        let day = fmt_day(day);
        let raws = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance
                     WHERE worker_id = ?1 AND day = ?2
                     ORDER BY COALESCE(check_in, check_out), rowid"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![worker, day], RawRecord::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        raws.into_iter().map(RawRecord::decode).collect()
    }

    /// Timestamp of the most recent punch ever recorded for the worker.
    pub async fn last_punch_at(
        &self,
        worker_id: &WorkerId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let worker = worker_id.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT MAX(COALESCE(check_out, check_in)) FROM attendance WHERE worker_id = ?1",
                    params![worker],
                    |row| row.get::<_, Option<String>>(0),
                )?)
            })
            .await?;
        raw.as_deref().map(parse_ts).transpose()
    }

    /// Apply a resolved punch. Returns the id of the record written.
    pub async fn apply_punch(
        &self,
        worker_id: &WorkerId,
        day: NaiveDate,
        plan: &PunchPlan,
        method: CaptureMethod,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let worker = worker_id.to_string();
        let day = fmt_day(day);
        let ts = fmt_ts(now);
        let method = method.as_str();

        match plan {
            PunchPlan::OpenRecord | PunchPlan::OrphanCheckOut => {
                let record_id = uuid::Uuid::new_v4().to_string();
                let id = record_id.clone();
                let orphan = matches!(plan, PunchPlan::OrphanCheckOut);
                self.conn
                    .call(move |conn| {
                        let (check_in, check_out) = if orphan {
                            (None, Some(ts))
                        } else {
                            (Some(ts), None)
                        };
                        conn.execute(
                            "INSERT INTO attendance
                                 (id, worker_id, day, check_in, check_out, method, needs_reconciliation)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            params![id, worker, day, check_in, check_out, method, orphan],
                        )?;
                        Ok(())
                    })
                    .await?;
                Ok(record_id)
            }
            PunchPlan::CloseRecord { record_id } => {
                let id = record_id.clone();
                let updated = self
                    .conn
                    .call(move |conn| {
                        Ok(conn.execute(
                            "UPDATE attendance SET check_out = ?1
                             WHERE id = ?2 AND worker_id = ?3
                               AND check_out IS NULL AND check_in IS NOT NULL AND check_in < ?1",
                            params![ts, id, worker],
                        )?)
                    })
                    .await?;
                if updated == 0 {
                    return Err(StoreError::RecordNotOpen(record_id.clone()));
                }
                Ok(record_id.clone())
            }
        }
    }

    // --- Geofence ---

    pub async fn geofence(&self) -> Result<GeofenceConfig, StoreError> {
        let row = self
            .conn
            .call(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT enabled, latitude, longitude, radius_m FROM geofence WHERE id = 1",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, bool>(0)?,
                                row.get::<_, Option<f64>>(1)?,
                                row.get::<_, Option<f64>>(2)?,
                                row.get::<_, Option<f64>>(3)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        Ok(match row {
            None => GeofenceConfig::default(),
            Some((enabled, latitude, longitude, radius_m)) => GeofenceConfig {
                enabled,
                center: latitude.zip(longitude).map(|(lat, lon)| GeoPoint::new(lat, lon)),
                radius_m,
            },
        })
    }

    pub async fn set_geofence(&self, config: &GeofenceConfig) -> Result<(), StoreError> {
        let enabled = config.enabled;
        let latitude = config.center.map(|c| c.latitude);
        let longitude = config.center.map(|c| c.longitude);
        let radius = config.radius_m;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO geofence (id, enabled, latitude, longitude, radius_m)
                     VALUES (1, ?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                         enabled = excluded.enabled,
                         latitude = excluded.latitude,
                         longitude = excluded.longitude,
                         radius_m = excluded.radius_m",
                    params![enabled, latitude, longitude, radius],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use punchcard_core::EMBEDDING_DIM;

    fn t(hms: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2026-10-19T{hms}Z"))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn code(s: &str) -> RfidCode {
        RfidCode::parse(s).unwrap()
    }

    fn embedding(seed: f32) -> Embedding {
        Embedding::new((0..EMBEDDING_DIM).map(|i| seed + i as f32 * 0.001).collect())
    }

    #[tokio::test]
    async fn test_create_and_lookup_worker() {
        let store = Store::open_in_memory().await.unwrap();
        let w = store
            .create_worker("Rahim", Some(code("AB1234")), t("08:00:00"))
            .await
            .unwrap();

        assert_eq!(store.worker(&w.id).await.unwrap(), Some(w.clone()));
        assert_eq!(store.worker_by_rfid(&code("AB1234")).await.unwrap(), Some(w.clone()));
        assert_eq!(store.worker_by_rfid(&code("ZZ9999")).await.unwrap(), None);
        assert_eq!(store.list_workers().await.unwrap(), vec![w]);
    }

    #[tokio::test]
    async fn test_duplicate_rfid_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_worker("Rahim", Some(code("AB1234")), t("08:00:00"))
            .await
            .unwrap();
        let err = store
            .create_worker("Karim", Some(code("AB1234")), t("08:00:01"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRfid(_)));
        // Workers without a code never collide.
        store.create_worker("A", None, t("08:00:02")).await.unwrap();
        store.create_worker("B", None, t("08:00:03")).await.unwrap();
        assert_eq!(store.list_workers().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_gallery_groups_embeddings_in_order() {
        let store = Store::open_in_memory().await.unwrap();
        let a = store.create_worker("Alice", None, t("08:00:00")).await.unwrap();
        let b = store.create_worker("Bob", None, t("08:00:00")).await.unwrap();
        store.add_embedding(&a.id, &embedding(0.1), t("08:01:00")).await.unwrap();
        store.add_embedding(&a.id, &embedding(0.2), t("08:01:00")).await.unwrap();

        let gallery = store.gallery().await.unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery[0].worker_id, a.id);
        assert_eq!(gallery[0].embeddings, vec![embedding(0.1), embedding(0.2)]);
        assert_eq!(gallery[1].worker_id, b.id);
        assert!(gallery[1].embeddings.is_empty());
    }

    #[tokio::test]
    async fn test_add_embedding_unknown_worker() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store
            .add_embedding(&WorkerId::from("ghost"), &embedding(0.1), t("08:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownWorker(_)));
    }

    #[tokio::test]
    async fn test_remove_worker_cascades() {
        let store = Store::open_in_memory().await.unwrap();
        let w = store.create_worker("Rahim", None, t("08:00:00")).await.unwrap();
        store.add_embedding(&w.id, &embedding(0.1), t("08:00:00")).await.unwrap();
        store
            .apply_punch(&w.id, t("09:00:00").date_naive(), &PunchPlan::OpenRecord, CaptureMethod::Face, t("09:00:00"))
            .await
            .unwrap();

        assert!(store.remove_worker(&w.id).await.unwrap());
        assert!(!store.remove_worker(&w.id).await.unwrap());
        assert!(store.gallery().await.unwrap().is_empty());
        assert!(store
            .records_for_day(&w.id, t("09:00:00").date_naive())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_open_close_and_orphan_punches() {
        let store = Store::open_in_memory().await.unwrap();
        let w = store.create_worker("Rahim", None, t("08:00:00")).await.unwrap();
        let day = t("09:00:00").date_naive();

        let open = store
            .apply_punch(&w.id, day, &PunchPlan::OpenRecord, CaptureMethod::Rfid, t("09:00:00"))
            .await
            .unwrap();
        let closed = store
            .apply_punch(
                &w.id,
                day,
                &PunchPlan::CloseRecord { record_id: open.clone() },
                CaptureMethod::Rfid,
                t("12:00:00"),
            )
            .await
            .unwrap();
        assert_eq!(open, closed);

        let orphan = store
            .apply_punch(&w.id, day, &PunchPlan::OrphanCheckOut, CaptureMethod::Face, t("18:00:00"))
            .await
            .unwrap();

        let records = store.records_for_day(&w.id, day).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, open);
        assert_eq!(records[0].check_in, Some(t("09:00:00")));
        assert_eq!(records[0].check_out, Some(t("12:00:00")));
        assert!(!records[0].needs_reconciliation);
        assert_eq!(records[1].id, orphan);
        assert_eq!(records[1].check_in, None);
        assert!(records[1].needs_reconciliation);

        assert_eq!(store.last_punch_at(&w.id).await.unwrap(), Some(t("18:00:00")));
    }

    #[tokio::test]
    async fn test_close_requires_open_record() {
        let store = Store::open_in_memory().await.unwrap();
        let w = store.create_worker("Rahim", None, t("08:00:00")).await.unwrap();
        let day = t("09:00:00").date_naive();
        let id = store
            .apply_punch(&w.id, day, &PunchPlan::OpenRecord, CaptureMethod::Rfid, t("09:00:00"))
            .await
            .unwrap();
        let close = PunchPlan::CloseRecord { record_id: id.clone() };

        // Check-out must be after check-in.
        let err = store
            .apply_punch(&w.id, day, &close, CaptureMethod::Rfid, t("08:59:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RecordNotOpen(_)));

        store
            .apply_punch(&w.id, day, &close, CaptureMethod::Rfid, t("10:00:00"))
            .await
            .unwrap();
        let err = store
            .apply_punch(&w.id, day, &close, CaptureMethod::Rfid, t("11:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RecordNotOpen(_)));
        let records = store.records_for_day(&w.id, day).await.unwrap();
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].check_out, Some(t("10:00:00")));
    }

    #[tokio::test]
    async fn test_records_are_scoped_to_day() {
        let store = Store::open_in_memory().await.unwrap();
        let w = store.create_worker("Rahim", None, t("08:00:00")).await.unwrap();
        let today = t("09:00:00");
        let yesterday = today - Duration::days(1);
        store
            .apply_punch(&w.id, yesterday.date_naive(), &PunchPlan::OpenRecord, CaptureMethod::Face, yesterday)
            .await
            .unwrap();
        assert!(store
            .records_for_day(&w.id, today.date_naive())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .records_for_day(&w.id, yesterday.date_naive())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_geofence_defaults_and_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.geofence().await.unwrap(), GeofenceConfig::default());

        let config = GeofenceConfig::around(GeoPoint::new(23.8103, 90.4125), 150.0);
        store.set_geofence(&config).await.unwrap();
        assert_eq!(store.geofence().await.unwrap(), config);

        let disabled = GeofenceConfig {
            enabled: false,
            ..config
        };
        store.set_geofence(&disabled).await.unwrap();
        assert_eq!(store.geofence().await.unwrap(), disabled);
    }
}
