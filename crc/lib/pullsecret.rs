//! Pull secret providers.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    config::{self, Config},
    CrcError, CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Supplies the image pull secret written into fresh VMs.
#[async_trait]
pub trait PullSecretLoader: Send + Sync {
    /// Returns a validated pull secret.
    async fn value(&self) -> CrcResult<String>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Reads the pull secret from a file without prompting.
///
/// An explicit file wins over the `pull-secret-file` setting.
pub struct NonInteractivePullSecretLoader {
    config: Arc<Config>,
    path: Option<PathBuf>,
}

/// A pull secret held in memory.
#[derive(Debug, Clone)]
pub struct StaticPullSecret(pub String);

#[derive(Deserialize)]
struct ImagePullSecret {
    #[serde(default)]
    auths: Map<String, Value>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NonInteractivePullSecretLoader {
    /// Creates a loader reading `path`, or the configured file when `path` is `None`.
    pub fn new(config: Arc<Config>, path: Option<PathBuf>) -> Self {
        Self { config, path }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks that `secret` is a JSON object with a non-empty `auths` object whose entries carry an
/// `auth` or `credsStore` field.
pub fn validate_pull_secret(secret: &str) -> CrcResult<()> {
    if secret.is_empty() {
        return Err(CrcError::PullSecret("empty pull secret".to_string()));
    }

    let parsed: ImagePullSecret = serde_json::from_str(secret)
        .map_err(|e| CrcError::PullSecret(format!("invalid pull secret: {e}")))?;

    if parsed.auths.is_empty() {
        return Err(CrcError::PullSecret(
            "invalid pull secret: missing 'auths' JSON-object field".to_string(),
        ));
    }

    for (registry, auth) in &parsed.auths {
        let has_credentials = auth
            .as_object()
            .is_some_and(|auth| auth.contains_key("auth") || auth.contains_key("credsStore"));
        if !has_credentials {
            return Err(CrcError::PullSecret(format!(
                "invalid pull secret, '{registry}' JSON-object requires either 'auth' or 'credsStore' field"
            )));
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl PullSecretLoader for NonInteractivePullSecretLoader {
    async fn value(&self) -> CrcResult<String> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => {
                let configured = self.config.get_string(config::PULL_SECRET_FILE);
                if configured.is_empty() {
                    return Err(CrcError::PullSecret(format!(
                        "no pull secret file given, use 'crc start --pull-secret-file' or 'crc config set {} <file>'",
                        config::PULL_SECRET_FILE
                    )));
                }
                PathBuf::from(configured)
            }
        };

        let secret = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CrcError::PullSecret(format!("cannot read {}: {e}", path.display()))
        })?;
        let secret = secret.trim().to_string();
        validate_pull_secret(&secret)?;
        Ok(secret)
    }
}

#[async_trait]
impl PullSecretLoader for StaticPullSecret {
    async fn value(&self) -> CrcResult<String> {
        validate_pull_secret(&self.0)?;
        Ok(self.0.clone())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
