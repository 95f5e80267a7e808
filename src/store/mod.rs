//! The `TrackingStore` trait: the authoritative collection of token records
//! and the principal directory they reference.
//!
//! Implementations must make every method atomic with respect to a single
//! record. Two guarantees carry the lifecycle invariants:
//!
//! - `insert_token` rejects a duplicate token with
//!   [`StoreError::DuplicateToken`] as part of the insert itself;
//! - `commit` only writes when the stored version still equals the version
//!   the caller read, and reports [`StoreError::VersionConflict`] otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    principal::{CreatePrincipalData, Principal, Role, UpdatePrincipalData},
    stats::SystemStats,
    token::{NewTokenRecord, Token, TokenRecord},
    GeoPoint, HistoryEntry,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgTrackingStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Token {0} already exists")]
    DuplicateToken(Token),

    #[error("Token record {0} was modified concurrently")]
    VersionConflict(Uuid),

    #[error("Token record not found: {0}")]
    TokenNotFound(Uuid),

    #[error("Principal {0} already exists")]
    DuplicatePrincipal(Uuid),

    #[error("Principal not found: {0}")]
    PrincipalNotFound(Uuid),

    #[error("Stored row is invalid: {0}")]
    CorruptRow(String),
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Short backend name for health reports.
    fn backend(&self) -> &'static str;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;

    // ── Tokens ────────────────────────────────────────────────────────────

    /// Persist a new inactive, unowned record. Fails with
    /// [`StoreError::DuplicateToken`] if the token is already taken.
    async fn insert_token(&self, new: NewTokenRecord) -> Result<TokenRecord, StoreError>;

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError>;

    async fn find_by_token(&self, token: &Token) -> Result<Option<TokenRecord>, StoreError>;

    /// Write the mutable fields of `record` if its version is still current.
    ///
    /// `appended` is the history entry added by this mutation, if any. The
    /// returned record carries the bumped version.
    async fn commit(
        &self,
        record: &TokenRecord,
        appended: Option<&HistoryEntry>,
    ) -> Result<TokenRecord, StoreError>;

    /// All records, newest first.
    async fn list_tokens(&self) -> Result<Vec<TokenRecord>, StoreError>;

    /// Records owned by `owner`, newest first.
    async fn list_owned(&self, owner: Uuid) -> Result<Vec<TokenRecord>, StoreError>;

    /// The `limit` most recently updated records.
    async fn recent_tokens(&self, limit: usize) -> Result<Vec<TokenRecord>, StoreError>;

    /// Remove a record and its history. Returns `false` if it did not exist.
    async fn delete_token(&self, id: Uuid) -> Result<bool, StoreError>;

    // ── Principals ────────────────────────────────────────────────────────

    async fn insert_principal(&self, data: CreatePrincipalData) -> Result<Principal, StoreError>;

    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, StoreError>;

    /// Principals newest first, optionally restricted to one role.
    async fn list_principals(&self, role: Option<Role>) -> Result<Vec<Principal>, StoreError>;

    /// Apply a partial patch. Only the supplied columns are written, so
    /// concurrent edits to other columns survive.
    async fn update_principal(
        &self,
        id: Uuid,
        patch: UpdatePrincipalData,
        now: DateTime<Utc>,
    ) -> Result<Principal, StoreError>;

    async fn set_default_location(
        &self,
        id: Uuid,
        point: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Principal, StoreError>;

    /// Delete a principal and clear ownership of every record it held, as
    /// one unit. Returns `None` if the principal did not exist, otherwise the
    /// number of records released. History and activation are untouched.
    async fn remove_principal(&self, id: Uuid) -> Result<Option<u64>, StoreError>;

    // ── Reporting ─────────────────────────────────────────────────────────

    /// Counters for dashboards. `registered_since` bounds
    /// [`SystemStats::recent_registrations`].
    async fn stats(&self, registered_since: DateTime<Utc>) -> Result<SystemStats, StoreError>;
}
