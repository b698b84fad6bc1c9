//! Client side of the attendance daemon's D-Bus interface.

use std::future::Future;

use punchcard_core::{
    AttendanceRecord, Embedding, GeofenceConfig, PunchOutcome, PunchRequest, ServerSettings,
    Worker, WorkerEmbeddings, WorkerId,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

// `#[zbus::proxy]` generates both `AttendanceProxy` (async) and
// `AttendanceProxyBlocking`. Only the async variant is used here.
#[zbus::proxy(
    interface = "org.punchcard.Attendance1",
    default_service = "org.punchcard.Attendance1",
    default_path = "/org/punchcard/Attendance1"
)]
trait Attendance {
    async fn submit_punch(&self, request: &str) -> zbus::Result<String>;
    async fn enroll_worker(&self, name: &str, rfid_code: &str) -> zbus::Result<String>;
    async fn add_embedding(&self, worker_id: &str, embedding: &str) -> zbus::Result<String>;
    async fn remove_worker(&self, worker_id: &str) -> zbus::Result<bool>;
    async fn list_workers(&self) -> zbus::Result<String>;
    async fn gallery(&self) -> zbus::Result<String>;
    async fn records_today(&self, worker_id: &str) -> zbus::Result<String>;
    async fn geofence(&self) -> zbus::Result<String>;
    async fn set_geofence(&self, config: &str) -> zbus::Result<()>;
    async fn settings(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),
    #[error("malformed daemon reply: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What a capture session needs from the server.
pub trait PunchClient: Send + Sync + 'static {
    fn submit_punch(
        &self,
        request: &PunchRequest,
    ) -> impl Future<Output = Result<PunchOutcome, ClientError>> + Send;

    fn gallery(&self) -> impl Future<Output = Result<Vec<WorkerEmbeddings>, ClientError>> + Send;

    fn settings(&self) -> impl Future<Output = Result<ServerSettings, ClientError>> + Send;

    fn geofence(&self) -> impl Future<Output = Result<GeofenceConfig, ClientError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    System,
    Session,
}

pub struct DbusClient {
    proxy: AttendanceProxy<'static>,
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T, ClientError> {
    Ok(serde_json::from_str(json)?)
}

impl DbusClient {
    pub async fn connect(bus: Bus) -> Result<Self, ClientError> {
        let conn = match bus {
            Bus::System => zbus::Connection::system().await?,
            Bus::Session => zbus::Connection::session().await?,
        };
        let proxy = AttendanceProxy::new(&conn).await?;
        Ok(Self { proxy })
    }

    pub async fn enroll_worker(
        &self,
        name: &str,
        rfid_code: Option<&str>,
    ) -> Result<Worker, ClientError> {
        let reply = self
            .proxy
            .enroll_worker(name, rfid_code.unwrap_or(""))
            .await?;
        decode(&reply)
    }

    pub async fn add_embedding(
        &self,
        worker_id: &WorkerId,
        embedding: &Embedding,
    ) -> Result<String, ClientError> {
        let values = serde_json::to_string(&embedding.values)?;
        Ok(self.proxy.add_embedding(worker_id.as_str(), &values).await?)
    }

    pub async fn remove_worker(&self, worker_id: &WorkerId) -> Result<bool, ClientError> {
        Ok(self.proxy.remove_worker(worker_id.as_str()).await?)
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>, ClientError> {
        decode(&self.proxy.list_workers().await?)
    }

    pub async fn records_today(
        &self,
        worker_id: &WorkerId,
    ) -> Result<Vec<AttendanceRecord>, ClientError> {
        decode(&self.proxy.records_today(worker_id.as_str()).await?)
    }

    pub async fn set_geofence(&self, config: &GeofenceConfig) -> Result<(), ClientError> {
        let json = serde_json::to_string(config)?;
        Ok(self.proxy.set_geofence(&json).await?)
    }

    /// Raw status JSON.
    pub async fn status(&self) -> Result<serde_json::Value, ClientError> {
        decode(&self.proxy.status().await?)
    }
}

impl PunchClient for DbusClient {
    async fn submit_punch(&self, request: &PunchRequest) -> Result<PunchOutcome, ClientError> {
        let json = serde_json::to_string(request)?;
        decode(&self.proxy.submit_punch(&json).await?)
    }

    async fn gallery(&self) -> Result<Vec<WorkerEmbeddings>, ClientError> {
        decode(&self.proxy.gallery().await?)
    }

    async fn settings(&self) -> Result<ServerSettings, ClientError> {
        decode(&self.proxy.settings().await?)
    }

    async fn geofence(&self) -> Result<GeofenceConfig, ClientError> {
        decode(&self.proxy.geofence().await?)
    }
}
