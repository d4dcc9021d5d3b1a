//! Token storage backends
//!
//! [`TokenStore`] is the injected load/save boundary behind
//! [`crate::persistence::TokenPersistence`]. The crate ships an in-memory
//! store and, with the `keychain` feature, a platform keychain store.
//! Applications with their own storage (database row, encrypted file,
//! signed cookie) implement the trait directly.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::TokenData;

mod memory;
pub use memory::InMemoryTokenStore;

#[cfg(feature = "keychain")]
mod keychain;
#[cfg(feature = "keychain")]
pub use keychain::KeychainTokenStore;

/// Load/save pair for persisted tokens.
///
/// `load` returns `Ok(None)` when nothing is stored; errors are reserved for
/// backend failures. Saving [`TokenData::cleared`] is a logout and should
/// remove or blank the stored record.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<TokenData>, StoreError>;

    async fn save(&self, tokens: &TokenData) -> Result<(), StoreError>;
}
