//! Provisioning orchestration.
//!
//! Ties the client store, the PKI authority, the config renderers and
//! the service supervisor together into the operations the API layer
//! and CLI drive. No retries happen here: partial multi-step failures
//! surface as failure of the whole operation and the caller decides.

use crate::ipam::AddressPoolError;
use crate::pki::{PkiAuthority, PkiError, PkiStore};
use crate::render::{
    self, render_client_config, render_server_config, ClientConfigParams, ServerConfigParams,
};
use crate::runner::CommandRunner;
use crate::service::{ServiceError, ServiceSupervisor};
use crate::status::{self, StatusReport};
use crate::store::{ClientRecord, ClientStore, ClientUpdate, StoreError};
use chrono::Utc;
use serde::Serialize;
use shared_utils::config::Config;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced by provisioning operations.
///
/// The variants are deliberately distinct per remediation: a full
/// address pool needs subnet surgery, a toolchain failure needs operator
/// eyes on the PKI host.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Certificate authority operation failed
    #[error("certificate authority failure: {0}")]
    Pki(#[from] PkiError),

    /// The client subnet has no free addresses
    #[error(transparent)]
    AddressPool(AddressPoolError),

    /// Client record store failure
    #[error("client store failure: {0}")]
    Store(StoreError),

    /// Service manager failure
    #[error("service control failure: {0}")]
    Service(#[from] ServiceError),

    /// No record with the given id
    #[error("unknown client id {0}")]
    UnknownClient(u32),

    /// Record exists but was never completed with a certificate
    #[error("client {0} has no issued certificate")]
    MissingCertificate(u32),

    /// Interface settings cannot be used as-is
    #[error("invalid interface configuration: {0}")]
    InvalidInterface(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ProvisionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AddressPool(inner) => ProvisionError::AddressPool(inner),
            StoreError::UnknownClient(id) => ProvisionError::UnknownClient(id),
            other => ProvisionError::Store(other),
        }
    }
}

/// Result alias for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// A stored client joined against the live session list.
#[derive(Debug, Clone, Serialize)]
pub struct ClientOverview {
    #[serde(flatten)]
    pub client: ClientRecord,
    pub connected: bool,
    pub real_address: Option<String>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connected_since: Option<String>,
}

/// Front door of the provisioning engine.
pub struct Provisioner {
    config: Config,
    store: ClientStore,
    pki: PkiAuthority,
    supervisor: ServiceSupervisor,
}

impl Provisioner {
    /// Build a provisioner from configuration and load the client store.
    pub async fn open(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        let pki_store = PkiStore::new(&config.pki.easy_rsa_dir, &config.pki.source_dir);
        let pki = PkiAuthority::new(pki_store, runner.clone());
        let supervisor = ServiceSupervisor::new(runner, config.service.unit.clone());
        let store = ClientStore::new(&config.store.path);
        store.load().await;

        Self {
            config,
            store,
            pki,
            supervisor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize the PKI tree (idempotent).
    pub async fn initialize(&self) -> ProvisionResult<()> {
        self.pki.initialize().await?;
        Ok(())
    }

    /// Provision a new client: reserve an identity and address, issue a
    /// certificate under its common name, and complete the record.
    ///
    /// If issuance fails the reservation is released again, so a failed
    /// provisioning attempt does not leak an address.
    pub async fn create_client(
        &self,
        name: &str,
        email: Option<String>,
        expires_in_days: Option<i64>,
    ) -> ProvisionResult<ClientRecord> {
        let network = self.network()?;
        let expires_at = expires_in_days.map(|days| Utc::now() + chrono::Duration::days(days));

        let reserved = self
            .store
            .reserve(name, email, expires_at, network)
            .await?;

        let issued = match self
            .pki
            .issue_client_certificate(&reserved.common_name)
            .await
        {
            Ok(issued) => issued,
            Err(err) => {
                if let Err(cleanup) = self.store.remove(reserved.id).await {
                    warn!(
                        client = reserved.id,
                        "failed to release reservation after issuance failure: {cleanup}"
                    );
                }
                return Err(err.into());
            }
        };

        let record = self
            .store
            .attach_certificate(reserved.id, issued.certificate_pem, issued.private_key_pem)
            .await?;

        info!(client = record.id, ip = %record.ip_address, "client provisioned");
        Ok(record)
    }

    /// Soft-revoke a client: revoke its certificate, regenerate the CRL,
    /// and disable the record. The stored artifacts stay untouched.
    pub async fn revoke_client(&self, id: u32) -> ProvisionResult<ClientRecord> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or(ProvisionError::UnknownClient(id))?;

        if record.certificate_pem.is_some() {
            self.pki
                .revoke_client_certificate(&record.common_name)
                .await?;
        }

        let updated = self.store.set_enabled(id, false).await?;
        info!(client = id, "client revoked");
        Ok(updated)
    }

    /// Delete a client entirely. Revokes the certificate first; the
    /// record is only removed once the PKI authority has accepted the
    /// revocation.
    pub async fn remove_client(&self, id: u32) -> ProvisionResult<ClientRecord> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or(ProvisionError::UnknownClient(id))?;

        if record.certificate_pem.is_some() {
            self.pki
                .revoke_client_certificate(&record.common_name)
                .await?;
        }

        let removed = self.store.remove(id).await?;
        info!(client = id, "client removed");
        Ok(removed)
    }

    /// Update mutable client fields.
    pub async fn update_client(
        &self,
        id: u32,
        update: ClientUpdate,
    ) -> ProvisionResult<ClientRecord> {
        Ok(self.store.update(id, update).await?)
    }

    /// Enable or disable a client record without touching the PKI.
    pub async fn set_client_enabled(
        &self,
        id: u32,
        enabled: bool,
    ) -> ProvisionResult<ClientRecord> {
        Ok(self.store.set_enabled(id, enabled).await?)
    }

    /// All stored client records.
    pub async fn clients(&self) -> Vec<ClientRecord> {
        self.store.list().await
    }

    /// One stored client record.
    pub async fn client(&self, id: u32) -> ProvisionResult<ClientRecord> {
        self.store
            .get(id)
            .await
            .ok_or(ProvisionError::UnknownClient(id))
    }

    /// Render the portable configuration for one client.
    pub async fn client_config(&self, id: u32) -> ProvisionResult<String> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or(ProvisionError::UnknownClient(id))?;

        let (certificate_pem, private_key_pem) =
            match (&record.certificate_pem, &record.private_key_pem) {
                (Some(cert), Some(key)) => (cert.clone(), key.clone()),
                _ => return Err(ProvisionError::MissingCertificate(id)),
            };

        let ca_pem = self.pki.ca_certificate().await?;
        let tls_auth_pem = self.pki.tls_auth_key().await?;

        Ok(render_client_config(&ClientConfigParams {
            remote_host: self.config.endpoint.public_host.clone(),
            remote_port: self.config.endpoint.public_port,
            protocol: self.config.interface.protocol,
            compression: self.config.interface.compression,
            ca_pem,
            certificate_pem,
            private_key_pem,
            tls_auth_pem,
        }))
    }

    /// Render the server configuration and replace the daemon's config
    /// file with it. Returns the rendered text.
    pub async fn apply_server_config(&self) -> ProvisionResult<String> {
        let rendered = render_server_config(&self.server_config_params()?);
        render::write_server_config(&self.server_config_path(), &rendered).await?;
        Ok(rendered)
    }

    /// Parse the daemon's live status report.
    pub async fn sessions(&self) -> StatusReport {
        status::read_status(&self.config.service.status_path).await
    }

    /// Stored clients joined against live sessions by common name.
    pub async fn client_overview(&self) -> Vec<ClientOverview> {
        let report = self.sessions().await;
        let clients = self.store.list().await;

        clients
            .into_iter()
            .map(|client| {
                let session = report
                    .sessions
                    .iter()
                    .find(|s| s.common_name == client.common_name);

                match session {
                    Some(session) => ClientOverview {
                        connected: true,
                        real_address: Some(session.real_address.clone()),
                        bytes_received: session.bytes_received,
                        bytes_sent: session.bytes_sent,
                        connected_since: Some(session.connected_since.clone()),
                        client,
                    },
                    None => ClientOverview {
                        connected: false,
                        real_address: None,
                        bytes_received: 0,
                        bytes_sent: 0,
                        connected_since: None,
                        client,
                    },
                }
            })
            .collect()
    }

    /// Whether the tunnel daemon's unit is active.
    pub async fn server_active(&self) -> bool {
        self.supervisor.is_active().await
    }

    /// Start the tunnel daemon.
    pub async fn start_server(&self) -> ProvisionResult<()> {
        Ok(self.supervisor.start().await?)
    }

    /// Stop the tunnel daemon.
    pub async fn stop_server(&self) -> ProvisionResult<()> {
        Ok(self.supervisor.stop().await?)
    }

    /// Restart the tunnel daemon.
    pub async fn restart_server(&self) -> ProvisionResult<()> {
        Ok(self.supervisor.restart().await?)
    }

    fn network(&self) -> ProvisionResult<Ipv4Addr> {
        self.config
            .interface
            .network
            .parse()
            .map_err(|_| {
                ProvisionError::InvalidInterface(format!(
                    "{} is not an IPv4 network base",
                    self.config.interface.network
                ))
            })
    }

    fn server_config_path(&self) -> PathBuf {
        self.config.pki.openvpn_dir.join("server.conf")
    }

    fn server_config_params(&self) -> ProvisionResult<ServerConfigParams> {
        let netmask: Ipv4Addr = self.config.interface.netmask.parse().map_err(|_| {
            ProvisionError::InvalidInterface(format!(
                "{} is not an IPv4 netmask",
                self.config.interface.netmask
            ))
        })?;

        let pki_store = self.pki.store();
        Ok(ServerConfigParams {
            port: self.config.interface.port,
            protocol: self.config.interface.protocol,
            network: self.network()?,
            netmask,
            dns1: self.config.interface.dns1.clone(),
            dns2: self.config.interface.dns2.clone(),
            compression: self.config.interface.compression,
            ca_path: pki_store.ca_certificate_path(),
            cert_path: pki_store.server_certificate_path(),
            key_path: pki_store.server_key_path(),
            dh_path: pki_store.dh_params_path(),
            tls_auth_path: pki_store.tls_auth_key_path(),
            crl_path: pki_store.crl_path(),
            status_path: self.config.service.status_path.clone(),
        })
    }
}
