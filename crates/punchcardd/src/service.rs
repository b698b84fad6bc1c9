//! Server half of the attendance pipeline.
//!
//! Resolves the punch subject to a worker, applies the geofence where the
//! capture path requires it, then hands off to the cooldown authority.
//! The origin of a punch is decided here from the bus caller; the origin a
//! client claims in its request is never used.
//! Also hosts the enrollment and geofence administration used by the admin
//! console.

use chrono::{DateTime, Offset, Utc};
use punchcard_core::geofence::{self, GeofenceDecision};
use punchcard_core::{
    AttendanceRecord, Embedding, GeofenceConfig, PunchOrigin, PunchOutcome, PunchRequest,
    PunchSubject, RfidCode, ServerSettings, Worker, WorkerEmbeddings, WorkerId,
};
use thiserror::Error;

use crate::authority::{CooldownAuthority, Decision};
use crate::config::Config;
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AttendanceService {
    store: Store,
    authority: CooldownAuthority,
    settings: ServerSettings,
    console_uids: Vec<u32>,
}

impl AttendanceService {
    pub fn new(store: Store, config: &Config) -> Self {
        // Config::load validates the offset; fall back to UTC for hand-built configs.
        let day_offset = config.day_offset().unwrap_or_else(|| Utc.fix());
        Self {
            authority: CooldownAuthority::new(store.clone(), config.cooldown(), day_offset),
            store,
            settings: config.server_settings(),
            console_uids: config.console_uids.clone(),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Origin granted to a bus caller. Unknown callers are personal devices.
    pub fn origin_for(&self, caller_uid: Option<u32>) -> PunchOrigin {
        match caller_uid {
            Some(uid) if self.console_uids.contains(&uid) => PunchOrigin::Console,
            _ => PunchOrigin::PersonalDevice,
        }
    }

    /// The single "submit punch" operation.
    pub async fn submit_punch(
        &self,
        request: &PunchRequest,
        caller_uid: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<PunchOutcome, ServiceError> {
        let origin = self.origin_for(caller_uid);
        if origin != request.origin {
            tracing::info!(
                caller_uid = ?caller_uid,
                claimed = ?request.origin,
                granted = ?origin,
                "punch origin overridden"
            );
        }

        let subject = request.subject().ok_or_else(|| {
            ServiceError::InvalidRequest("exactly one of worker_id or rfid_code is required".into())
        })?;

        let Some(worker) = self.resolve(&subject).await? else {
            tracing::info!(?subject, method = %request.method, "punch rejected: unknown identity");
            return Ok(PunchOutcome::UnknownIdentity);
        };

        if origin.requires_geofence(request.method) {
            if let Some(rejection) = self.check_geofence(&worker, request).await? {
                return Ok(rejection);
            }
        }

        let outcome = match self
            .authority
            .try_accept_punch(&worker.id, request.method, now)
            .await?
        {
            Decision::Accepted {
                direction,
                record_id,
            } => PunchOutcome::Accepted {
                worker_id: worker.id,
                worker_name: worker.name,
                direction,
                record_id,
                cooldown_seconds: self.settings.cooldown_seconds,
            },
            Decision::Rejected { remaining_seconds } => PunchOutcome::CooldownActive {
                worker_id: worker.id,
                remaining_seconds,
            },
        };
        Ok(outcome)
    }

    async fn resolve(&self, subject: &PunchSubject) -> Result<Option<Worker>, ServiceError> {
        match subject {
            PunchSubject::Worker(id) => Ok(self.store.worker(id).await?),
            PunchSubject::Rfid(raw) => match RfidCode::parse(raw) {
                Ok(code) => Ok(self.store.worker_by_rfid(&code).await?),
                Err(e) => {
                    tracing::info!(error = %e, "unreadable RFID code");
                    Ok(None)
                }
            },
        }
    }

    /// `Some(outcome)` when the geofence blocks the punch.
    async fn check_geofence(
        &self,
        worker: &Worker,
        request: &PunchRequest,
    ) -> Result<Option<PunchOutcome>, ServiceError> {
        let Some(point) = request.location.filter(|p| p.is_valid()) else {
            tracing::info!(worker_id = %worker.id, "punch rejected: no usable location");
            return Ok(Some(PunchOutcome::LocationUnavailable));
        };

        let config = self.store.geofence().await?;
        match geofence::validate(point, &config) {
            GeofenceDecision::Allowed { distance_m } => {
                tracing::debug!(worker_id = %worker.id, distance_m, "inside geofence");
                Ok(None)
            }
            GeofenceDecision::Denied { distance_m } => {
                tracing::info!(
                    worker_id = %worker.id,
                    distance_m,
                    radius_m = ?config.radius_m,
                    "punch rejected: outside geofence"
                );
                Ok(Some(PunchOutcome::OutOfRange {
                    distance_meters: distance_m,
                }))
            }
            GeofenceDecision::NotConfigured => {
                tracing::warn!(
                    worker_id = %worker.id,
                    "punch rejected: geofence required but not configured"
                );
                Ok(Some(PunchOutcome::GeofenceNotConfigured))
            }
        }
    }

    // --- Administration ---

    pub async fn enroll_worker(
        &self,
        name: &str,
        rfid_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Worker, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::InvalidRequest("worker name is empty".into()));
        }
        let code = rfid_code
            .map(RfidCode::parse)
            .transpose()
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        let worker = self.store.create_worker(name, code, now).await?;
        tracing::info!(worker_id = %worker.id, name = %worker.name, "worker enrolled");
        Ok(worker)
    }

    pub async fn add_embedding(
        &self,
        worker_id: &WorkerId,
        embedding: &Embedding,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        if !embedding.is_well_formed() {
            return Err(ServiceError::InvalidRequest(format!(
                "embedding must have {} finite components, got {}",
                punchcard_core::EMBEDDING_DIM,
                embedding.values.len()
            )));
        }
        let id = self.store.add_embedding(worker_id, embedding, now).await?;
        tracing::info!(worker_id = %worker_id, embedding_id = %id, "reference embedding enrolled");
        Ok(id)
    }

    pub async fn remove_worker(&self, worker_id: &WorkerId) -> Result<bool, ServiceError> {
        let removed = self.store.remove_worker(worker_id).await?;
        self.authority.forget(worker_id);
        if removed {
            tracing::info!(worker_id = %worker_id, "worker removed");
        }
        Ok(removed)
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>, ServiceError> {
        Ok(self.store.list_workers().await?)
    }

    pub async fn gallery(&self) -> Result<Vec<WorkerEmbeddings>, ServiceError> {
        Ok(self.store.gallery().await?)
    }

    pub async fn records_today(
        &self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        Ok(self
            .store
            .records_for_day(worker_id, self.authority.day_of(now))
            .await?)
    }

    pub async fn geofence(&self) -> Result<GeofenceConfig, ServiceError> {
        Ok(self.store.geofence().await?)
    }

    pub async fn set_geofence(&self, config: &GeofenceConfig) -> Result<(), ServiceError> {
        config
            .check()
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        self.store.set_geofence(config).await?;
        tracing::info!(
            enabled = config.enabled,
            center = ?config.center,
            radius_m = ?config.radius_m,
            "geofence updated"
        );
        Ok(())
    }
}
