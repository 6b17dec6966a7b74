//! API key lifecycle
//!
//! Long-lived credentials for service-to-service and integrator access.
//! Keys are formatted as `sg_<random>`; only the SHA-256 digest of the
//! secret is ever stored. The plaintext is returned exactly once at issue
//! and rotation time.

use super::{AuthError, Principal, Role};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// API key prefix
pub const API_KEY_PREFIX: &str = "sg_";

/// Capability scopes grantable to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiKeyScope {
    #[serde(rename = "user:read")]
    UserRead,
    #[serde(rename = "user:write")]
    UserWrite,
    #[serde(rename = "transaction:read")]
    TransactionRead,
    #[serde(rename = "transaction:write")]
    TransactionWrite,
    #[serde(rename = "shares:read")]
    SharesRead,
    #[serde(rename = "shares:write")]
    SharesWrite,
    #[serde(rename = "solowallet:read")]
    SolowalletRead,
    #[serde(rename = "solowallet:write")]
    SolowalletWrite,
    #[serde(rename = "chama:read")]
    ChamaRead,
    #[serde(rename = "chama:write")]
    ChamaWrite,
    #[serde(rename = "admin:access")]
    AdminAccess,
    #[serde(rename = "service:auth")]
    ServiceAuth,
    #[serde(rename = "service:chama")]
    ServiceChama,
    #[serde(rename = "service:notification")]
    ServiceNotification,
    #[serde(rename = "service:swap")]
    ServiceSwap,
}

impl ApiKeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyScope::UserRead => "user:read",
            ApiKeyScope::UserWrite => "user:write",
            ApiKeyScope::TransactionRead => "transaction:read",
            ApiKeyScope::TransactionWrite => "transaction:write",
            ApiKeyScope::SharesRead => "shares:read",
            ApiKeyScope::SharesWrite => "shares:write",
            ApiKeyScope::SolowalletRead => "solowallet:read",
            ApiKeyScope::SolowalletWrite => "solowallet:write",
            ApiKeyScope::ChamaRead => "chama:read",
            ApiKeyScope::ChamaWrite => "chama:write",
            ApiKeyScope::AdminAccess => "admin:access",
            ApiKeyScope::ServiceAuth => "service:auth",
            ApiKeyScope::ServiceChama => "service:chama",
            ApiKeyScope::ServiceNotification => "service:notification",
            ApiKeyScope::ServiceSwap => "service:swap",
        }
    }

    /// Scopes a non-admin principal may grant to their own keys.
    pub fn is_self_grantable(&self) -> bool {
        !matches!(
            self,
            ApiKeyScope::AdminAccess
                | ApiKeyScope::ServiceAuth
                | ApiKeyScope::ServiceChama
                | ApiKeyScope::ServiceNotification
                | ApiKeyScope::ServiceSwap
        )
    }
}

impl std::fmt::Display for ApiKeyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API key record as persisted.
///
/// Records are never physically deleted; revocation is terminal and the
/// record is retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// Stable key identity, survives rotation.
    pub id: Uuid,

    /// SHA-256 hex digest of the secret (never the secret itself).
    pub key_hash: String,

    /// Human-readable label.
    pub name: String,

    /// User that owns this key.
    pub owner_id: String,

    /// Capabilities granted by this key.
    pub scopes: Vec<ApiKeyScope>,

    /// Expiry; ignored when `is_permanent` is set.
    pub expires_at: DateTime<Utc>,

    /// Terminal once set.
    pub revoked: bool,

    /// Updated best-effort on each successful verification.
    pub last_used_at: Option<DateTime<Utc>>,

    /// Permanent keys never expire (service-to-service credentials).
    pub is_permanent: bool,

    /// Free-form metadata.
    pub metadata: HashMap<String, String>,
}

impl ApiKeyRecord {
    pub fn has_scope(&self, scope: ApiKeyScope) -> bool {
        self.scopes.contains(&scope)
    }

    /// Principal this key authenticates as.
    pub fn principal(&self) -> Principal {
        let roles = if self.has_scope(ApiKeyScope::AdminAccess) {
            vec![Role::Admin]
        } else {
            vec![Role::Member]
        };
        Principal {
            id: self.owner_id.clone(),
            roles,
            api_key_id: Some(self.id),
            scopes: self.scopes.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Result of issuing or rotating a key. The plaintext secret appears here
/// and nowhere else.
#[derive(Debug)]
pub struct IssuedApiKey {
    pub plaintext: String,
    pub record: ApiKeyRecord,
}

/// Persistence seam for API key records.
///
/// Production backs this with the document database; the gateway only
/// consumes the contract.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Look up a record by secret digest.
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError>;

    /// Look up a record by its stable id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord>, AuthError>;

    /// Persist a new record.
    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), AuthError>;

    /// Swap the digest for an existing record. The old digest must stop
    /// resolving and the new one start resolving atomically.
    async fn replace_hash(&self, id: Uuid, new_hash: &str) -> Result<(), AuthError>;

    /// Mark a record revoked. Terminal.
    async fn set_revoked(&self, id: Uuid) -> Result<(), AuthError>;

    /// Record a successful use.
    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// All records owned by a user, including revoked ones.
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError>;
}

/// In-memory repository, used for development and tests.
///
/// Holds the records plus a digest index; rotation mutates both under a
/// single write acquisition so no caller observes the old and new digest
/// valid at the same time.
#[derive(Default)]
pub struct InMemoryApiKeyRepository {
    inner: RwLock<ApiKeyTable>,
}

#[derive(Default)]
struct ApiKeyTable {
    records: HashMap<Uuid, ApiKeyRecord>,
    by_hash: HashMap<String, Uuid>,
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        let table = self.inner.read().await;
        Ok(table
            .by_hash
            .get(key_hash)
            .and_then(|id| table.records.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord>, AuthError> {
        let table = self.inner.read().await;
        Ok(table.records.get(&id).cloned())
    }

    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), AuthError> {
        let mut table = self.inner.write().await;
        table.by_hash.insert(record.key_hash.clone(), record.id);
        table.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn replace_hash(&self, id: Uuid, new_hash: &str) -> Result<(), AuthError> {
        let mut table = self.inner.write().await;
        let record = table
            .records
            .get_mut(&id)
            .ok_or_else(|| AuthError::UpstreamUnavailable(format!("api key {id} not found")))?;
        let old_hash = std::mem::replace(&mut record.key_hash, new_hash.to_string());
        table.by_hash.remove(&old_hash);
        table.by_hash.insert(new_hash.to_string(), id);
        Ok(())
    }

    async fn set_revoked(&self, id: Uuid) -> Result<(), AuthError> {
        let mut table = self.inner.write().await;
        if let Some(record) = table.records.get_mut(&id) {
            record.revoked = true;
        }
        Ok(())
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        let mut table = self.inner.write().await;
        if let Some(record) = table.records.get_mut(&id) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError> {
        let table = self.inner.read().await;
        Ok(table
            .records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

/// API key issuance, verification, rotation, and revocation.
pub struct ApiKeyService {
    repo: Arc<dyn ApiKeyRepository>,
}

impl ApiKeyService {
    pub fn new(repo: Arc<dyn ApiKeyRepository>) -> Self {
        Self { repo }
    }

    /// Generate a fresh secret with its digest.
    pub fn generate_secret() -> (String, String) {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let random_bytes: [u8; 32] = rng.gen();
        let random_part = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            random_bytes,
        );

        let plaintext = format!("{API_KEY_PREFIX}{random_part}");
        let hash = Self::hash_secret(&plaintext);
        (plaintext, hash)
    }

    /// Digest a secret for storage or lookup.
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Issue a new key. The plaintext secret in the result is never
    /// persisted or logged.
    pub async fn issue(
        &self,
        owner_id: &str,
        name: &str,
        scopes: Vec<ApiKeyScope>,
        ttl: Duration,
        is_permanent: bool,
    ) -> Result<IssuedApiKey, AuthError> {
        let (plaintext, key_hash) = Self::generate_secret();

        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            key_hash,
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            scopes,
            expires_at: Utc::now() + ttl,
            revoked: false,
            last_used_at: None,
            is_permanent,
            metadata: HashMap::new(),
        };

        self.repo.insert(&record).await?;
        info!(key_id = %record.id, owner_id = %record.owner_id, "API key issued");

        Ok(IssuedApiKey { plaintext, record })
    }

    /// Verify a presented secret and return its record.
    ///
    /// Denies unknown digests, revoked keys, and expired non-permanent
    /// keys. A failed `last_used_at` update does not fail the verification.
    pub async fn verify(&self, presented: &str) -> Result<ApiKeyRecord, AuthError> {
        if !presented.starts_with(API_KEY_PREFIX) {
            return Err(AuthError::InvalidCredential);
        }

        let key_hash = Self::hash_secret(presented);
        let record = self
            .repo
            .find_by_hash(&key_hash)
            .await?
            .ok_or(AuthError::InvalidCredential)?;

        if record.revoked {
            return Err(AuthError::InvalidCredential);
        }

        if !record.is_permanent && record.expires_at < Utc::now() {
            return Err(AuthError::TokenExpired);
        }

        if let Err(e) = self.repo.touch_last_used(record.id, Utc::now()).await {
            warn!(key_id = %record.id, error = %e, "failed to update last_used_at");
        }

        Ok(record)
    }

    /// Allow iff the record carries the required scope.
    pub fn check_scope(record: &ApiKeyRecord, required: ApiKeyScope) -> Result<(), AuthError> {
        if record.has_scope(required) {
            Ok(())
        } else {
            Err(AuthError::Forbidden(format!(
                "api key missing scope {required}"
            )))
        }
    }

    /// Rotate the secret for an existing key identity.
    ///
    /// The old secret stops verifying the moment the new one starts; no
    /// grace period is supported.
    pub async fn rotate(&self, id: Uuid) -> Result<IssuedApiKey, AuthError> {
        let record = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or(AuthError::InvalidCredential)?;

        if record.revoked {
            return Err(AuthError::Forbidden("cannot rotate a revoked key".into()));
        }

        let (plaintext, new_hash) = Self::generate_secret();
        self.repo.replace_hash(id, &new_hash).await?;
        info!(key_id = %id, "API key rotated");

        let record = ApiKeyRecord {
            key_hash: new_hash,
            ..record
        };
        Ok(IssuedApiKey { plaintext, record })
    }

    /// Revoke a key. Terminal, irreversible.
    pub async fn revoke(&self, id: Uuid) -> Result<(), AuthError> {
        self.repo.set_revoked(id).await?;
        info!(key_id = %id, "API key revoked");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ApiKeyRecord>, AuthError> {
        self.repo.find_by_id(id).await
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError> {
        self.repo.list_for_owner(owner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ApiKeyService {
        ApiKeyService::new(Arc::new(InMemoryApiKeyRepository::new()))
    }

    #[test]
    fn test_generate_secret() {
        let (plaintext, hash) = ApiKeyService::generate_secret();
        assert!(plaintext.starts_with(API_KEY_PREFIX));
        assert_eq!(hash.len(), 64); // SHA-256 hex
        assert_eq!(ApiKeyService::hash_secret(&plaintext), hash);
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let svc = service();

        let issued = svc
            .issue(
                "user-1",
                "ci key",
                vec![ApiKeyScope::UserRead, ApiKeyScope::ChamaRead],
                Duration::days(30),
                false,
            )
            .await
            .unwrap();

        let record = svc.verify(&issued.plaintext).await.unwrap();
        assert_eq!(record.owner_id, "user-1");
        assert!(record.last_used_at.is_some());
        assert!(ApiKeyService::check_scope(&record, ApiKeyScope::ChamaRead).is_ok());
        assert!(ApiKeyService::check_scope(&record, ApiKeyScope::ChamaWrite).is_err());
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() {
        let svc = service();
        assert!(matches!(
            svc.verify("not-a-key").await,
            Err(AuthError::InvalidCredential)
        ));
        assert!(matches!(
            svc.verify("sg_unknown").await,
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_revoked_key_denied_before_expiry() {
        let svc = service();
        let issued = svc
            .issue("user-1", "k", vec![], Duration::days(30), false)
            .await
            .unwrap();

        assert!(svc.verify(&issued.plaintext).await.is_ok());
        svc.revoke(issued.record.id).await.unwrap();
        assert!(matches!(
            svc.verify(&issued.plaintext).await,
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_expiry_honors_is_permanent() {
        let svc = service();

        let expired = svc
            .issue("user-1", "expired", vec![], Duration::seconds(-60), false)
            .await
            .unwrap();
        assert!(matches!(
            svc.verify(&expired.plaintext).await,
            Err(AuthError::TokenExpired)
        ));

        let permanent = svc
            .issue("user-1", "svc", vec![], Duration::seconds(-60), true)
            .await
            .unwrap();
        assert!(svc.verify(&permanent.plaintext).await.is_ok());
    }

    #[tokio::test]
    async fn test_rotation_swaps_secrets_atomically() {
        let svc = service();
        let issued = svc
            .issue("user-1", "k", vec![], Duration::days(1), false)
            .await
            .unwrap();

        let rotated = svc.rotate(issued.record.id).await.unwrap();
        assert_eq!(rotated.record.id, issued.record.id);

        // Old secret fails, new one succeeds.
        assert!(svc.verify(&issued.plaintext).await.is_err());
        assert!(svc.verify(&rotated.plaintext).await.is_ok());
    }

    #[tokio::test]
    async fn test_rotate_revoked_key_is_forbidden() {
        let svc = service();
        let issued = svc
            .issue("user-1", "k", vec![], Duration::days(1), false)
            .await
            .unwrap();
        svc.revoke(issued.record.id).await.unwrap();

        assert!(matches!(
            svc.rotate(issued.record.id).await,
            Err(AuthError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_scope_maps_to_admin_principal() {
        let svc = service();
        let issued = svc
            .issue(
                "svc-auth",
                "internal",
                vec![ApiKeyScope::AdminAccess],
                Duration::days(365),
                true,
            )
            .await
            .unwrap();

        let principal = issued.record.principal();
        assert!(principal.is_privileged());
        assert_eq!(principal.api_key_id, Some(issued.record.id));
    }

    #[tokio::test]
    async fn test_verify_survives_touch_failure() {
        let mut repo = MockApiKeyRepository::new();
        let (plaintext, hash) = ApiKeyService::generate_secret();
        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            key_hash: hash.clone(),
            name: "k".into(),
            owner_id: "user-1".into(),
            scopes: vec![],
            expires_at: Utc::now() + Duration::days(1),
            revoked: false,
            last_used_at: None,
            is_permanent: false,
            metadata: HashMap::new(),
        };

        let found = record.clone();
        repo.expect_find_by_hash()
            .returning(move |_| Ok(Some(found.clone())));
        repo.expect_touch_last_used()
            .returning(|_, _| Err(AuthError::UpstreamUnavailable("db down".into())));

        let svc = ApiKeyService::new(Arc::new(repo));
        assert!(svc.verify(&plaintext).await.is_ok());
    }
}
