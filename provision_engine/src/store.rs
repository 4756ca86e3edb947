//! Durable client records backed by a JSON file.
//!
//! The store is the serialization point for everything that touches
//! address assignments: [`ClientStore::reserve`] computes the next free
//! address and claims it under a single lock acquisition, so two
//! concurrent provisioning requests can never collide on an IP.

use crate::ipam::{self, AddressPoolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// Errors surfaced by the client record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error while reading or writing the record file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record file could not be serialized or deserialized
    #[error("client record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No record with the given id
    #[error("unknown client id {0}")]
    UnknownClient(u32),

    /// The address pool is exhausted
    #[error(transparent)]
    AddressPool(#[from] AddressPoolError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One provisioned client identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Stable numeric identifier
    pub id: u32,
    /// Human label
    pub name: String,
    /// Contact address, if any
    pub email: Option<String>,
    /// Certificate common name (`client_<id>`), the session join key
    pub common_name: String,
    /// Assigned tunnel address, unique among all records
    pub ip_address: Ipv4Addr,
    /// Issued certificate PEM; immutable once attached
    pub certificate_pem: Option<String>,
    /// Issued private key PEM; immutable once attached
    pub private_key_pem: Option<String>,
    /// Optional expiry timestamp
    pub expires_at: Option<DateTime<Utc>>,
    /// Disabled records keep their artifacts but are soft-revoked
    pub enabled: bool,
}

/// Partial update for mutable client fields.
///
/// `None` leaves a field unchanged; certificates and the assigned
/// address are deliberately not updatable here.
#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// JSON-file-backed store of client records.
#[derive(Debug)]
pub struct ClientStore {
    path: PathBuf,
    state: Mutex<HashMap<u32, ClientRecord>>,
}

impl ClientStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Load records from disk, replacing in-memory state.
    ///
    /// A missing file is an empty store; a corrupt file is logged and
    /// treated as empty rather than blocking startup.
    pub async fn load(&self) {
        let contents = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    error!(file = %self.path.display(), "failed to read client records: {err}");
                }
                return;
            }
        };

        match serde_json::from_slice::<Vec<ClientRecord>>(&contents) {
            Ok(records) => {
                let mut guard = self.state.lock().await;
                guard.clear();
                for record in records {
                    guard.insert(record.id, record);
                }
            }
            Err(err) => {
                error!(file = %self.path.display(), "failed to parse client records: {err}");
            }
        }
    }

    /// All records, ordered by id.
    pub async fn list(&self) -> Vec<ClientRecord> {
        let guard = self.state.lock().await;
        let mut records: Vec<_> = guard.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Look up one record.
    pub async fn get(&self, id: u32) -> Option<ClientRecord> {
        let guard = self.state.lock().await;
        guard.get(&id).cloned()
    }

    /// Reserve an identity: allocate the next id and the lowest free
    /// address in `network`, and persist the record before releasing the
    /// lock. The record starts disabled and without certificate
    /// artifacts; [`Self::attach_certificate`] completes it.
    pub async fn reserve(
        &self,
        name: &str,
        email: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        network: Ipv4Addr,
    ) -> StoreResult<ClientRecord> {
        let mut guard = self.state.lock().await;

        let assigned = guard.values().map(|r| r.ip_address).collect();
        let ip_address = ipam::next_available_address(network, &assigned)?;
        let id = guard.keys().max().copied().unwrap_or(0) + 1;

        let record = ClientRecord {
            id,
            name: name.to_string(),
            email,
            common_name: format!("client_{id}"),
            ip_address,
            certificate_pem: None,
            private_key_pem: None,
            expires_at,
            enabled: false,
        };

        guard.insert(id, record.clone());
        self.flush(&guard).await?;
        Ok(record)
    }

    /// Attach issued certificate artifacts to a reserved record and
    /// enable it.
    pub async fn attach_certificate(
        &self,
        id: u32,
        certificate_pem: String,
        private_key_pem: String,
    ) -> StoreResult<ClientRecord> {
        let mut guard = self.state.lock().await;
        let record = guard.get_mut(&id).ok_or(StoreError::UnknownClient(id))?;

        record.certificate_pem = Some(certificate_pem);
        record.private_key_pem = Some(private_key_pem);
        record.enabled = true;
        let updated = record.clone();

        self.flush(&guard).await?;
        Ok(updated)
    }

    /// Apply a partial update to the mutable fields of a record.
    pub async fn update(&self, id: u32, update: ClientUpdate) -> StoreResult<ClientRecord> {
        let mut guard = self.state.lock().await;
        let record = guard.get_mut(&id).ok_or(StoreError::UnknownClient(id))?;

        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(email) = update.email {
            record.email = Some(email);
        }
        if let Some(expires_at) = update.expires_at {
            record.expires_at = Some(expires_at);
        }
        let updated = record.clone();

        self.flush(&guard).await?;
        Ok(updated)
    }

    /// Enable or disable a record.
    pub async fn set_enabled(&self, id: u32, enabled: bool) -> StoreResult<ClientRecord> {
        let mut guard = self.state.lock().await;
        let record = guard.get_mut(&id).ok_or(StoreError::UnknownClient(id))?;
        record.enabled = enabled;
        let updated = record.clone();

        self.flush(&guard).await?;
        Ok(updated)
    }

    /// Remove a record, freeing its address.
    pub async fn remove(&self, id: u32) -> StoreResult<ClientRecord> {
        let mut guard = self.state.lock().await;
        let removed = guard.remove(&id).ok_or(StoreError::UnknownClient(id))?;
        self.flush(&guard).await?;
        Ok(removed)
    }

    async fn flush(&self, state: &HashMap<u32, ClientRecord>) -> StoreResult<()> {
        if state.is_empty() {
            match fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(file = %self.path.display(), "failed to remove empty record file: {err}");
                }
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut records: Vec<_> = state.values().cloned().collect();
        records.sort_by_key(|r| r.id);

        let serialized = serde_json::to_vec_pretty(&records)?;
        fs::write(&self.path, serialized).await?;
        Ok(())
    }
}
