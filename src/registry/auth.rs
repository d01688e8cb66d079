//! Registry credential keychain: resolves imagePullSecrets on a namespace's
//! default service account into OCI auth, caching per registry host. A
//! `REGISTRY_TOKEN` environment override is consulted before falling back
//! to the keychain.

use anyhow::{Context, Result};
use base64::prelude::*;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::{Api, Client};
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct DockerConfig {
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Clone)]
struct RegistryCredentials {
    username: String,
    password: String,
}

pub struct AuthManager {
    client: Client,
    credentials_cache: HashMap<String, RegistryCredentials>,
}

impl AuthManager {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            credentials_cache: HashMap::new(),
        }
    }

    /// Resolve auth for `image` in `namespace`. A `REGISTRY_TOKEN` env var is
    /// tried first as a bearer credential; failing that, falls all the way
    /// back to anonymous rather than failing the caller's digest lookup.
    pub async fn get_auth_for_image(&mut self, image: &str, namespace: &str) -> Result<RegistryAuth> {
        if let Ok(token) = std::env::var("REGISTRY_TOKEN")
            && !token.is_empty()
        {
            return Ok(RegistryAuth::Bearer(token));
        }

        let registry = extract_registry_from_image(image);
        debug!("resolving auth for registry {} (image {})", registry, image);

        if let Some(creds) = self.credentials_cache.get(&registry) {
            return Ok(RegistryAuth::Basic(creds.username.clone(), creds.password.clone()));
        }

        match self.fetch_credentials_from_k8s(&registry, namespace).await {
            Ok(Some(creds)) => {
                let auth = RegistryAuth::Basic(creds.username.clone(), creds.password.clone());
                self.credentials_cache.insert(registry, creds);
                Ok(auth)
            }
            Ok(None) => Ok(RegistryAuth::Anonymous),
            Err(e) => {
                warn!("failed to fetch credentials for {}: {}", registry, e);
                Ok(RegistryAuth::Anonymous)
            }
        }
    }

    async fn fetch_credentials_from_k8s(
        &self,
        registry: &str,
        namespace: &str,
    ) -> Result<Option<RegistryCredentials>> {
        let sa_api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let sa = match sa_api.get("default").await {
            Ok(sa) => sa,
            Err(e) => {
                debug!("no default service account in {}: {}", namespace, e);
                return Ok(None);
            }
        };

        let secret_names = match &sa.image_pull_secrets {
            Some(secrets) => secrets,
            None => return Ok(None),
        };

        let secrets_api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        for secret_ref in secret_names {
            match secrets_api.get(secret_ref.name.as_str()).await {
                Ok(secret) => {
                    if let Some(creds) = self.parse_secret(&secret, registry)? {
                        return Ok(Some(creds));
                    }
                }
                Err(e) => warn!("failed to get secret {}: {}", secret_ref.name, e),
            }
        }

        Ok(None)
    }

    fn parse_secret(&self, secret: &Secret, registry: &str) -> Result<Option<RegistryCredentials>> {
        let data = match &secret.data {
            Some(d) => d,
            None => return Ok(None),
        };

        if let Some(dockerconfigjson) = data.get(".dockerconfigjson") {
            return self.parse_dockerconfigjson(&dockerconfigjson.0, registry);
        }
        if let Some(dockercfg) = data.get(".dockercfg") {
            return self.parse_dockercfg(&dockercfg.0, registry);
        }
        Ok(None)
    }

    fn parse_dockerconfigjson(&self, data: &[u8], registry: &str) -> Result<Option<RegistryCredentials>> {
        let config: DockerConfig =
            serde_json::from_slice(data).context("failed to parse .dockerconfigjson")?;

        if let Some(entry) = config.auths.get(registry) {
            return self.parse_auth_entry(entry);
        }
        let https_registry = format!("https://{registry}");
        if let Some(entry) = config.auths.get(&https_registry) {
            return self.parse_auth_entry(entry);
        }
        for (key, entry) in &config.auths {
            if registry_matches(key, registry) {
                return self.parse_auth_entry(entry);
            }
        }
        Ok(None)
    }

    fn parse_dockercfg(&self, data: &[u8], registry: &str) -> Result<Option<RegistryCredentials>> {
        let auths: HashMap<String, DockerAuthEntry> =
            serde_json::from_slice(data).context("failed to parse .dockercfg")?;
        match auths.get(registry) {
            Some(entry) => self.parse_auth_entry(entry),
            None => Ok(None),
        }
    }

    fn parse_auth_entry(&self, entry: &DockerAuthEntry) -> Result<Option<RegistryCredentials>> {
        if !entry.username.is_empty() && !entry.password.is_empty() {
            return Ok(Some(RegistryCredentials {
                username: entry.username.clone(),
                password: entry.password.clone(),
            }));
        }

        if !entry.auth.is_empty() {
            let decoded = BASE64_STANDARD
                .decode(entry.auth.as_bytes())
                .context("failed to decode auth token")?;
            let auth_str = String::from_utf8(decoded).context("auth token is not valid UTF-8")?;
            if let Some((username, password)) = auth_str.split_once(':') {
                return Ok(Some(RegistryCredentials {
                    username: username.to_string(),
                    password: password.to_string(),
                }));
            }
        }

        Ok(None)
    }
}

fn extract_registry_from_image(image: &str) -> String {
    let parts: Vec<&str> = image.split('/').collect();
    if parts.len() > 1 {
        let first = parts[0];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return first.to_string();
        }
    }
    "docker.io".to_string()
}

fn registry_matches(key: &str, target: &str) -> bool {
    let key_clean = key.trim_start_matches("https://").trim_start_matches("http://");
    if key_clean == target {
        return true;
    }
    if target == "docker.io" {
        return key_clean == "index.docker.io"
            || key_clean == "registry-1.docker.io"
            || key_clean == "index.docker.io/v1/"
            || key_clean == "registry-1.docker.io/v1/";
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_registry_host() {
        assert_eq!(extract_registry_from_image("nginx:1.21"), "docker.io");
        assert_eq!(extract_registry_from_image("gcr.io/project/image:tag"), "gcr.io");
        assert_eq!(extract_registry_from_image("localhost:5000/image"), "localhost:5000");
    }

    #[test]
    fn matches_docker_hub_aliases() {
        assert!(registry_matches("index.docker.io", "docker.io"));
        assert!(registry_matches("https://registry-1.docker.io", "docker.io"));
        assert!(!registry_matches("gcr.io", "docker.io"));
    }
}
