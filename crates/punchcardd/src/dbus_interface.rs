use std::sync::Arc;

use chrono::Utc;
use punchcard_core::{Embedding, GeofenceConfig, PunchRequest, WorkerId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use zbus::message::Header;
use zbus::names::BusName;
use zbus::{interface, Connection};

use crate::service::{AttendanceService, ServiceError};
use crate::store::StoreError;

pub const BUS_NAME: &str = "org.punchcard.Attendance1";
pub const OBJECT_PATH: &str = "/org/punchcard/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Structured arguments and results are JSON strings.
///
/// Bus name: org.punchcard.Attendance1
/// Object path: /org/punchcard/Attendance1
pub struct AttendanceBus {
    service: Arc<AttendanceService>,
}

impl AttendanceBus {
    pub fn new(service: Arc<AttendanceService>) -> Self {
        Self { service }
    }
}

fn decode<T: DeserializeOwned>(what: &str, json: &str) -> zbus::fdo::Result<T> {
    serde_json::from_str(json)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("malformed {what}: {e}")))
}

fn encode<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Unix uid of the peer that sent `header`, if the bus can tell.
async fn caller_uid(connection: &Connection, header: &Header<'_>) -> Option<u32> {
    let sender = header.sender()?;
    let bus = match zbus::fdo::DBusProxy::new(connection).await {
        Ok(bus) => bus,
        Err(e) => {
            tracing::warn!(error = %e, "bus proxy unavailable; caller treated as personal device");
            return None;
        }
    };
    match bus
        .get_connection_unix_user(BusName::from(sender.clone()))
        .await
    {
        Ok(uid) => Some(uid),
        Err(e) => {
            tracing::warn!(error = %e, sender = %sender, "caller uid unknown; treated as personal device");
            None
        }
    }
}

fn to_fdo(e: ServiceError) -> zbus::fdo::Error {
    match e {
        ServiceError::InvalidRequest(msg) => zbus::fdo::Error::InvalidArgs(msg),
        ServiceError::Store(e @ (StoreError::DuplicateRfid(_) | StoreError::UnknownWorker(_))) => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        ServiceError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            zbus::fdo::Error::Failed(e.to_string())
        }
    }
}

#[interface(name = "org.punchcard.Attendance1")]
impl AttendanceBus {
    /// Submit one punch. Returns a `PunchOutcome` JSON object.
    ///
    /// The punch origin follows the caller's uid, not the request body.
    async fn submit_punch(
        &self,
        request: &str,
        #[zbus(connection)] connection: &Connection,
        #[zbus(header)] header: Header<'_>,
    ) -> zbus::fdo::Result<String> {
        let request: PunchRequest = decode("punch request", request)?;
        let caller = caller_uid(connection, &header).await;
        tracing::debug!(?request, ?caller, "submit_punch requested");
        let outcome = self
            .service
            .submit_punch(&request, caller, Utc::now())
            .await
            .map_err(to_fdo)?;
        encode(&outcome)
    }

    /// Enroll a worker. An empty `rfid_code` means none.
    async fn enroll_worker(&self, name: &str, rfid_code: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "enroll_worker requested");
        let code = Some(rfid_code.trim()).filter(|c| !c.is_empty());
        let worker = self
            .service
            .enroll_worker(name, code, Utc::now())
            .await
            .map_err(to_fdo)?;
        encode(&worker)
    }

    /// Append a reference embedding (JSON array of floats). Returns its id.
    async fn add_embedding(&self, worker_id: &str, embedding: &str) -> zbus::fdo::Result<String> {
        tracing::info!(worker_id, "add_embedding requested");
        let values: Vec<f32> = decode("embedding", embedding)?;
        self.service
            .add_embedding(&WorkerId::from(worker_id), &Embedding::new(values), Utc::now())
            .await
            .map_err(to_fdo)
    }

    /// Remove a worker with their embeddings and attendance records.
    async fn remove_worker(&self, worker_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(worker_id, "remove_worker requested");
        self.service
            .remove_worker(&WorkerId::from(worker_id))
            .await
            .map_err(to_fdo)
    }

    async fn list_workers(&self) -> zbus::fdo::Result<String> {
        let workers = self.service.list_workers().await.map_err(to_fdo)?;
        encode(&workers)
    }

    /// Every worker's reference embeddings, for kiosk-side matching.
    async fn gallery(&self) -> zbus::fdo::Result<String> {
        let gallery = self.service.gallery().await.map_err(to_fdo)?;
        tracing::debug!(workers = gallery.len(), "gallery served");
        encode(&gallery)
    }

    async fn records_today(&self, worker_id: &str) -> zbus::fdo::Result<String> {
        let records = self
            .service
            .records_today(&WorkerId::from(worker_id), Utc::now())
            .await
            .map_err(to_fdo)?;
        encode(&records)
    }

    async fn geofence(&self) -> zbus::fdo::Result<String> {
        let config = self.service.geofence().await.map_err(to_fdo)?;
        encode(&config)
    }

    async fn set_geofence(&self, config: &str) -> zbus::fdo::Result<()> {
        let config: GeofenceConfig = decode("geofence config", config)?;
        self.service.set_geofence(&config).await.map_err(to_fdo)
    }

    /// Cooldown window and matching parameters for kiosks.
    async fn settings(&self) -> zbus::fdo::Result<String> {
        encode(self.service.settings())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let workers = self.service.list_workers().await.map_err(to_fdo)?.len();
        let settings = self.service.settings();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workers": workers,
            "cooldown_seconds": settings.cooldown_seconds,
            "match_threshold": settings.match_threshold,
            "match_policy": settings.match_policy,
        })
        .to_string())
    }
}
