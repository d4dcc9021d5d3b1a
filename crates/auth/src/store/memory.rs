use async_trait::async_trait;
use parking_lot::RwLock;

use super::TokenStore;
use crate::error::StoreError;
use crate::types::TokenData;

/// Process-local store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<Option<TokenData>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a record already stored.
    pub fn with_tokens(tokens: TokenData) -> Self {
        Self { tokens: RwLock::new(Some(tokens)) }
    }

    /// Current contents, bypassing the async interface.
    pub fn snapshot(&self) -> Option<TokenData> {
        self.tokens.read().clone()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenData>, StoreError> {
        Ok(self.tokens.read().clone())
    }

    async fn save(&self, tokens: &TokenData) -> Result<(), StoreError> {
        let mut slot = self.tokens.write();
        *slot = if tokens.is_cleared() { None } else { Some(tokens.clone()) };
        Ok(())
    }
}
