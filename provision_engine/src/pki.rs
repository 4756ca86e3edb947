//! PKI authority adapter for FunchoVPN.
//!
//! All certificate lifecycle operations are delegated to the external
//! easy-rsa toolchain; this module owns the sequencing, idempotency, and
//! input sanitization around it. Nothing here performs cryptography
//! directly.

use crate::runner::{CommandError, CommandRunner};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Errors surfaced by PKI operations.
#[derive(Debug, Error)]
pub enum PkiError {
    /// The external toolchain failed (non-zero exit, spawn failure, timeout)
    #[error("PKI toolchain failure: {0}")]
    Tool(#[from] CommandError),

    /// The toolchain reported success but an expected output file is absent
    #[error("expected PKI artifact missing: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for PKI operations.
pub type PkiResult<T> = Result<T, PkiError>;

/// Filesystem handle for an easy-rsa tree.
///
/// Holds the root of the working copy and derives every artifact path
/// from it, so tests can point the whole adapter at a temporary
/// directory.
#[derive(Debug, Clone)]
pub struct PkiStore {
    /// Working copy of easy-rsa; the `pki/` tree lives underneath
    root: PathBuf,
    /// Distribution copy used to scaffold the working copy
    source: PathBuf,
}

impl PkiStore {
    pub fn new(root: impl Into<PathBuf>, source: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            source: source.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pki_dir(&self) -> PathBuf {
        self.root.join("pki")
    }

    pub fn ca_certificate_path(&self) -> PathBuf {
        self.pki_dir().join("ca.crt")
    }

    pub fn server_certificate_path(&self) -> PathBuf {
        self.pki_dir().join("issued").join("server.crt")
    }

    pub fn server_key_path(&self) -> PathBuf {
        self.pki_dir().join("private").join("server.key")
    }

    pub fn dh_params_path(&self) -> PathBuf {
        self.pki_dir().join("dh.pem")
    }

    pub fn tls_auth_key_path(&self) -> PathBuf {
        self.pki_dir().join("ta.key")
    }

    pub fn crl_path(&self) -> PathBuf {
        self.pki_dir().join("crl.pem")
    }

    pub fn issued_certificate_path(&self, name: &str) -> PathBuf {
        self.pki_dir().join("issued").join(format!("{name}.crt"))
    }

    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.pki_dir().join("private").join(format!("{name}.key"))
    }
}

/// A freshly issued client certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Sanitized common name the toolchain filed the artifacts under
    pub name: String,
    /// Certificate PEM text
    pub certificate_pem: String,
    /// Private key PEM text
    pub private_key_pem: String,
}

/// Adapter owning all interaction with the easy-rsa toolchain.
pub struct PkiAuthority {
    store: PkiStore,
    runner: Arc<dyn CommandRunner>,
}

impl PkiAuthority {
    pub fn new(store: PkiStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self { store, runner }
    }

    pub fn store(&self) -> &PkiStore {
        &self.store
    }

    /// Initialize the PKI tree if it does not exist yet.
    ///
    /// Safe to call repeatedly; once the `pki/` tree exists this is a
    /// no-op. The sequence is not transactional: a failed step aborts
    /// and may leave partial state on disk, which only operator action
    /// (removing the tree) will re-attempt.
    pub async fn initialize(&self) -> PkiResult<()> {
        if self.store.pki_dir().exists() {
            debug!(root = %self.store.root().display(), "PKI tree already present");
            return Ok(());
        }

        let root = self.store.root().to_path_buf();

        // Scaffold the working copy from the distribution tree.
        if !root.join("easyrsa").exists() {
            fs::create_dir_all(&root).await?;
            let source_contents = format!("{}/.", self.store.source.display());
            let root_arg = root.to_string_lossy();
            self.runner
                .run("cp", &["-a", &source_contents, root_arg.as_ref()], None)
                .await?;
        }

        info!(root = %root.display(), "initializing PKI tree");

        self.easyrsa(&["init-pki"]).await?;
        self.easyrsa(&["--batch", "build-ca", "nopass"]).await?;
        self.easyrsa(&["gen-dh"]).await?;
        self.easyrsa(&["build-server-full", "server", "nopass"])
            .await?;

        let ta_path = self.store.tls_auth_key_path();
        let ta_arg = ta_path.to_string_lossy();
        self.runner
            .run("openvpn", &["--genkey", "secret", ta_arg.as_ref()], None)
            .await?;

        info!("PKI tree initialized");
        Ok(())
    }

    /// Issue a client certificate under a sanitized version of `raw_name`.
    ///
    /// Returns the sanitized name together with the certificate and
    /// private key PEM text read back from the toolchain's output tree.
    pub async fn issue_client_certificate(&self, raw_name: &str) -> PkiResult<IssuedCertificate> {
        self.initialize().await?;

        let name = sanitize_name(raw_name);
        info!(client = %name, "issuing client certificate");

        self.easyrsa(&["build-client-full", &name, "nopass"])
            .await?;

        let certificate_pem = self
            .read_artifact(self.store.issued_certificate_path(&name))
            .await?;
        let private_key_pem = self
            .read_artifact(self.store.private_key_path(&name))
            .await?;

        Ok(IssuedCertificate {
            name,
            certificate_pem,
            private_key_pem,
        })
    }

    /// Revoke a client certificate and regenerate the revocation list.
    ///
    /// Both steps must complete for the revocation to take effect. A
    /// failure between them leaves the CRL stale; the whole operation is
    /// surfaced as failed and can be retried blindly since CRL
    /// regeneration is idempotent.
    pub async fn revoke_client_certificate(&self, name: &str) -> PkiResult<()> {
        info!(client = %name, "revoking client certificate");
        self.easyrsa(&["--batch", "revoke", name]).await?;
        self.easyrsa(&["gen-crl"]).await?;
        Ok(())
    }

    /// Read the CA certificate PEM, initializing the tree if needed.
    pub async fn ca_certificate(&self) -> PkiResult<String> {
        self.initialize().await?;
        self.read_artifact(self.store.ca_certificate_path()).await
    }

    /// Read the TLS pre-shared authentication key PEM, initializing the
    /// tree if needed.
    pub async fn tls_auth_key(&self) -> PkiResult<String> {
        self.initialize().await?;
        self.read_artifact(self.store.tls_auth_key_path()).await
    }

    async fn easyrsa(&self, args: &[&str]) -> PkiResult<String> {
        Ok(self
            .runner
            .run("./easyrsa", args, Some(self.store.root()))
            .await?)
    }

    async fn read_artifact(&self, path: PathBuf) -> PkiResult<String> {
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(PkiError::MissingArtifact(path))
            }
            Err(err) => Err(PkiError::Io(err)),
        }
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// The result is used both as a toolchain argument and as a filesystem
/// path component, so nothing shell- or path-significant may survive.
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_allowed_characters() {
        assert_eq!(sanitize_name("client_42-a"), "client_42-a");
    }

    #[test]
    fn sanitize_replaces_everything_else() {
        assert_eq!(sanitize_name("my client!!"), "my_client__");
        assert_eq!(sanitize_name("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_name("a;rm -rf /"), "a_rm_-rf__");
    }

    #[test]
    fn sanitize_handles_unicode() {
        assert_eq!(sanitize_name("café"), "caf_");
    }

    #[test]
    fn store_derives_artifact_paths() {
        let store = PkiStore::new("/srv/easy-rsa", "/usr/share/easy-rsa");
        assert_eq!(
            store.ca_certificate_path(),
            PathBuf::from("/srv/easy-rsa/pki/ca.crt")
        );
        assert_eq!(
            store.issued_certificate_path("client_1"),
            PathBuf::from("/srv/easy-rsa/pki/issued/client_1.crt")
        );
        assert_eq!(
            store.private_key_path("client_1"),
            PathBuf::from("/srv/easy-rsa/pki/private/client_1.key")
        );
        assert_eq!(store.crl_path(), PathBuf::from("/srv/easy-rsa/pki/crl.pem"));
    }
}
