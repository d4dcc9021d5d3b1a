//! Platform keychain token store
//!
//! Stores the canonical JSON record (see [`crate::persistence::codec`]) as a
//! single keychain secret under `service`/`account`. Uses the macOS Keychain,
//! Windows Credential Manager or Linux Secret Service depending on which
//! `keyring` backend the final binary enables.

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::TokenStore;
use crate::error::StoreError;
use crate::persistence::codec;
use crate::types::TokenData;

/// Token store backed by one keychain entry.
pub struct KeychainTokenStore {
    service: String,
    account: String,
    entry: Entry,
}

impl KeychainTokenStore {
    /// Open the keychain entry for `service`/`account`.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the platform keychain rejects the
    /// entry name.
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Result<Self, StoreError> {
        let service = service.into();
        let account = account.into();
        let entry = Entry::new(&service, &account).map_err(|e| {
            StoreError::Backend(format!("Failed to open keychain entry {service}/{account}: {e}"))
        })?;
        Ok(Self { service, account, entry })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn account(&self) -> &str {
        &self.account
    }
}

impl std::fmt::Debug for KeychainTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainTokenStore")
            .field("service", &self.service)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenStore for KeychainTokenStore {
    async fn load(&self) -> Result<Option<TokenData>, StoreError> {
        debug!(service = %self.service, account = %self.account, "Retrieving tokens from keychain");

        match self.entry.get_password() {
            Ok(raw) => codec::decode(&raw).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("Failed to read keychain entry: {e}"))),
        }
    }

    async fn save(&self, tokens: &TokenData) -> Result<(), StoreError> {
        if tokens.is_cleared() {
            debug!(
                service = %self.service,
                account = %self.account,
                "Deleting tokens from keychain"
            );
            return match self.entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(StoreError::Backend(format!("Failed to delete keychain entry: {e}"))),
            };
        }

        debug!(service = %self.service, account = %self.account, "Storing tokens in keychain");
        let raw = codec::encode(tokens)?;
        self.entry
            .set_password(&raw)
            .map_err(|e| StoreError::Backend(format!("Failed to write keychain entry: {e}")))
    }
}
