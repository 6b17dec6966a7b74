//! Chama (group savings) lookup collaborator
//!
//! Chamas are owned by the chama service; the gateway only consumes a
//! lookup capability to validate membership. The in-memory registry backs
//! tests and local development.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A member entry within a chama.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChamaMember {
    pub user_id: String,
}

/// Chama snapshot as returned by the chama service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chama {
    pub id: String,
    pub name: String,
    pub members: Vec<ChamaMember>,
}

impl Chama {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }
}

/// Lookup failure, classified by the collaborator boundary.
#[derive(Debug, thiserror::Error)]
pub enum ChamaLookupError {
    #[error("chama not found: {0}")]
    NotFound(String),

    #[error("chama lookup unavailable: {0}")]
    Unavailable(String),
}

/// Consumed interface to the chama service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChamaRegistry: Send + Sync {
    async fn find_chama(&self, chama_id: &str) -> Result<Chama, ChamaLookupError>;
}

/// In-memory chama registry for development and tests.
#[derive(Default)]
pub struct InMemoryChamaRegistry {
    chamas: RwLock<HashMap<String, Chama>>,
}

impl InMemoryChamaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, chama: Chama) {
        let mut chamas = self.chamas.write().await;
        chamas.insert(chama.id.clone(), chama);
    }
}

#[async_trait]
impl ChamaRegistry for InMemoryChamaRegistry {
    async fn find_chama(&self, chama_id: &str) -> Result<Chama, ChamaLookupError> {
        let chamas = self.chamas.read().await;
        chamas
            .get(chama_id)
            .cloned()
            .ok_or_else(|| ChamaLookupError::NotFound(chama_id.to_string()))
    }
}
