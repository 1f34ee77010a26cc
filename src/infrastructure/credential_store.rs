use crate::domain::models::UserCredentials;
use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::sync::Mutex;

const KEYRING_SERVICE_NAME: &str = "worklog-sync.credentials";

/// Per-user credential bundle lookup. Bundles are taken as already valid.
pub trait CredentialStore: Send + Sync {
    fn load_credentials(&self, user_id: &str) -> Result<Option<UserCredentials>, InfraError>;
    fn save_credentials(&self, user_id: &str, credentials: &UserCredentials)
        -> Result<(), InfraError>;
}

/// Stores each user's bundle as a JSON payload in the OS keyring, one entry per user id.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, user_id: &str) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, user_id)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE_NAME)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load_credentials(&self, user_id: &str) -> Result<Option<UserCredentials>, InfraError> {
        let payload = match self.entry(user_id)?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let credentials = serde_json::from_str::<UserCredentials>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(credentials))
    }

    fn save_credentials(
        &self,
        user_id: &str,
        credentials: &UserCredentials,
    ) -> Result<(), InfraError> {
        credentials.validate().map_err(InfraError::Credential)?;
        let payload = serde_json::to_string(credentials)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry(user_id)?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    bundles: Mutex<HashMap<String, UserCredentials>>,
}

impl InMemoryCredentialStore {
    pub fn with_user(user_id: &str, credentials: UserCredentials) -> Self {
        Self {
            bundles: Mutex::new(HashMap::from([(user_id.to_string(), credentials)])),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load_credentials(&self, user_id: &str) -> Result<Option<UserCredentials>, InfraError> {
        let bundles = self
            .bundles
            .lock()
            .map_err(|error| InfraError::lock_poisoned("credential store", error))?;
        Ok(bundles.get(user_id).cloned())
    }

    fn save_credentials(
        &self,
        user_id: &str,
        credentials: &UserCredentials,
    ) -> Result<(), InfraError> {
        credentials.validate().map_err(InfraError::Credential)?;
        let mut bundles = self
            .bundles
            .lock()
            .map_err(|error| InfraError::lock_poisoned("credential store", error))?;
        bundles.insert(user_id.to_string(), credentials.clone());
        Ok(())
    }
}

/// Loads a bundle or fails with a credential error naming the user.
pub fn require_credentials(
    store: &dyn CredentialStore,
    user_id: &str,
) -> Result<UserCredentials, InfraError> {
    store
        .load_credentials(user_id)?
        .ok_or_else(|| InfraError::Credential(format!("no credentials stored for user {user_id}")))
}
