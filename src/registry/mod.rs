//! Resolves any image reference (tag or digest) to the content digest the
//! registry currently serves for it, via `oci-distribution`.

pub mod auth;

use crate::metrics::{REGISTRY_CALLS_FAILURE, REGISTRY_CALLS_SUCCESS, REGISTRY_CALLS_TOTAL};
use auth::AuthManager;
use oci_distribution::{Client as OciClient, Reference, client::ClientConfig, secrets::RegistryAuth};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable for {reference}: {source}")]
    Unavailable {
        reference: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("unauthorized to read {0}")]
    Unauthorized(String),
}

pub struct RegistryClient {
    client: OciClient,
    auth_manager: AuthManager,
}

impl RegistryClient {
    pub fn new(auth_manager: AuthManager) -> Self {
        Self {
            client: OciClient::new(ClientConfig::default()),
            auth_manager,
        }
    }

    /// Resolve `image_ref:tag` (or `image_ref@sha256:hex`) to the registry's
    /// current content digest for it, as a bare hex string (no `sha256:`
    /// prefix) so it compares equal to `ClusterImage::sha_from_path()`.
    /// `namespace` scopes the credential lookup for this reference's
    /// imagePullSecrets.
    pub async fn digest(&mut self, image_ref: &str, namespace: &str) -> Result<String, RegistryError> {
        REGISTRY_CALLS_TOTAL.inc();

        let reference = Reference::try_from(image_ref).map_err(|e| RegistryError::Unavailable {
            reference: image_ref.to_string(),
            source: e.into(),
        })?;

        let auth = self.resolve_auth(image_ref, namespace).await;

        match self.client.fetch_manifest_digest(&reference, &auth).await {
            Ok(digest) => {
                REGISTRY_CALLS_SUCCESS.inc();
                let digest = digest.strip_prefix("sha256:").map(str::to_string).unwrap_or(digest);
                debug!(image = image_ref, %digest, "resolved registry digest");
                Ok(digest)
            }
            Err(e) => {
                REGISTRY_CALLS_FAILURE.inc();
                let message = e.to_string();
                if message.contains("404") || message.contains("not found") {
                    Err(RegistryError::NotFound(image_ref.to_string()))
                } else if message.contains("401") || message.contains("403") || message.contains("UNAUTHORIZED") {
                    Err(RegistryError::Unauthorized(image_ref.to_string()))
                } else {
                    Err(RegistryError::Unavailable {
                        reference: image_ref.to_string(),
                        source: e.into(),
                    })
                }
            }
        }
    }

    async fn resolve_auth(&mut self, image_ref: &str, namespace: &str) -> RegistryAuth {
        match self.auth_manager.get_auth_for_image(image_ref, namespace).await {
            Ok(auth) => auth,
            Err(e) => {
                warn!("failed to resolve auth for {}: {}", image_ref, e);
                RegistryAuth::Anonymous
            }
        }
    }
}
