use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    principal::{CreatePrincipalData, Principal, Role, UpdatePrincipalData},
    stats::SystemStats,
    token::{Token, TokenRecord, TransitionError},
    HistoryEntry,
};
use crate::services::coordinates::{self, CoordinateError, RawCoordinate};
use crate::services::qr_decoder::{self, DecodeError};
use crate::services::qr_generator::QrGenerationError;
use crate::services::token_generator::{GenerationError, TokenGenerator};
use crate::store::{StoreError, TrackingStore};

pub const MIN_BATCH_SIZE: i64 = 1;
pub const MAX_BATCH_SIZE: i64 = 100;

/// How many records the activity feed shows.
pub const RECENT_ACTIVITY_LIMIT: usize = 10;

/// Window used for the "recent registrations" counter.
const REGISTRATION_WINDOW_DAYS: i64 = 30;

/// Coarse failure classes callers map to stable responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    StateConflict,
    Decode,
    GenerationExhausted,
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("Count must be between 1 and 100")]
    InvalidCount(i64),

    #[error("{0}")]
    InvalidCoordinate(#[from] CoordinateError),

    #[error("Please provide a QR code or upload an image")]
    NoInputProvided,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("QR code not found")]
    TokenNotFound,

    #[error("User not found")]
    PrincipalNotFound,

    #[error("QR code is not activated")]
    InactiveToken,

    #[error("QR code is already assigned")]
    AlreadyOwned,

    #[error("QR code is not assigned to you")]
    NotOwned,

    #[error("QR code was modified concurrently")]
    ConcurrentModification,

    #[error("Superadmin accounts cannot be deleted or demoted")]
    ProtectedPrincipal,

    #[error("{0}")]
    DecodeFailed(#[from] DecodeError),

    #[error("Token generation exhausted after {0} attempts")]
    GenerationExhausted(u32),

    #[error("System randomness unavailable")]
    Entropy,

    #[error("QR rendering failed: {0}")]
    Render(#[from] QrGenerationError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Image decoding task failed: {0}")]
    DecodeTask(#[from] tokio::task::JoinError),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::InvalidCount(_)
            | LifecycleError::InvalidCoordinate(_)
            | LifecycleError::NoInputProvided
            | LifecycleError::MissingField(_) => ErrorKind::Validation,
            LifecycleError::TokenNotFound | LifecycleError::PrincipalNotFound => {
                ErrorKind::NotFound
            }
            LifecycleError::InactiveToken
            | LifecycleError::AlreadyOwned
            | LifecycleError::NotOwned
            | LifecycleError::ConcurrentModification
            | LifecycleError::ProtectedPrincipal => ErrorKind::StateConflict,
            LifecycleError::DecodeFailed(_) => ErrorKind::Decode,
            LifecycleError::GenerationExhausted(_) => ErrorKind::GenerationExhausted,
            LifecycleError::Entropy
            | LifecycleError::Render(_)
            | LifecycleError::Store(_)
            | LifecycleError::DecodeTask(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TokenNotFound(_) => LifecycleError::TokenNotFound,
            StoreError::PrincipalNotFound(_) => LifecycleError::PrincipalNotFound,
            StoreError::VersionConflict(_) => LifecycleError::ConcurrentModification,
            other => LifecycleError::Store(other),
        }
    }
}

impl From<TransitionError> for LifecycleError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::InactiveToken => LifecycleError::InactiveToken,
            TransitionError::AlreadyOwned => LifecycleError::AlreadyOwned,
            TransitionError::NotOwned => LifecycleError::NotOwned,
        }
    }
}

impl From<GenerationError> for LifecycleError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Entropy => LifecycleError::Entropy,
            GenerationError::Exhausted { attempts } => LifecycleError::GenerationExhausted(attempts),
            GenerationError::Render(e) => LifecycleError::Render(e),
            GenerationError::Store(e) => e.into(),
        }
    }
}

/// What the scanner handed in: typed text or a photo of the code.
#[derive(Debug, Clone)]
pub enum ScanInput {
    Code(String),
    Image(Vec<u8>),
}

impl ScanInput {
    /// Picks the scan input from optional request parts. An uploaded image
    /// takes precedence over a typed code; blank codes count as absent.
    pub fn from_parts(
        code: Option<String>,
        image: Option<Vec<u8>>,
    ) -> Result<Self, LifecycleError> {
        match (image, code) {
            (Some(image), _) if !image.is_empty() => Ok(ScanInput::Image(image)),
            (_, Some(code)) if !code.trim().is_empty() => Ok(ScanInput::Code(code)),
            _ => Err(LifecycleError::NoInputProvided),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub record: TokenRecord,
    /// `true` when this scan made the scanner the owner.
    pub claimed: bool,
}

/// Orchestrates every token lifecycle operation.
///
/// Each mutation reads one record, applies a transition from
/// [`TokenRecord`], and commits it back with the version it read, so two
/// writers racing on the same record cannot both succeed.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn TrackingStore>,
    generator: TokenGenerator,
}

impl LifecycleService {
    pub fn new(store: Arc<dyn TrackingStore>, generator: TokenGenerator) -> Self {
        Self { store, generator }
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    async fn load(&self, id: Uuid) -> Result<TokenRecord, LifecycleError> {
        self.store
            .find_token(id)
            .await?
            .ok_or(LifecycleError::TokenNotFound)
    }

    async fn commit(
        &self,
        record: &TokenRecord,
        appended: Option<&HistoryEntry>,
    ) -> Result<TokenRecord, LifecycleError> {
        self.store.commit(record, appended).await.map_err(|e| {
            if matches!(e, StoreError::VersionConflict(_)) {
                tracing::debug!(token_id = %record.id, "Lost optimistic write race");
            }
            e.into()
        })
    }

    // ── Issuance ──────────────────────────────────────────────────────────

    /// Issues `count` new inactive, unowned tokens.
    ///
    /// Each record is committed on its own; if the batch fails midway the
    /// records already created remain.
    #[tracing::instrument(skip(self))]
    pub async fn generate_batch(
        &self,
        count: i64,
        issuer: Uuid,
    ) -> Result<Vec<TokenRecord>, LifecycleError> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&count) {
            return Err(LifecycleError::InvalidCount(count));
        }

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let record = self
                .generator
                .ensure_unique(self.store.as_ref(), issuer)
                .await?;
            records.push(record);
        }

        tracing::info!(count, issuer = %issuer, "Generated QR tokens");

        Ok(records)
    }

    // ── Administration ────────────────────────────────────────────────────

    #[tracing::instrument(skip(self))]
    pub async fn toggle_active(&self, id: Uuid) -> Result<TokenRecord, LifecycleError> {
        let mut record = self.load(id).await?;
        let active = record.toggle_active(Utc::now());
        let record = self.commit(&record, None).await?;

        tracing::info!(token_id = %id, active, "Toggled token activation");

        Ok(record)
    }

    /// Assigns an active token to a principal on behalf of an administrator.
    #[tracing::instrument(skip(self))]
    pub async fn assign(&self, id: Uuid, user_id: Uuid) -> Result<TokenRecord, LifecycleError> {
        let mut record = self.load(id).await?;

        if !record.active {
            return Err(LifecycleError::InactiveToken);
        }

        self.store
            .find_principal(user_id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;

        record.assign(user_id, Utc::now())?;

        let record = match self.commit(&record, None).await {
            Err(LifecycleError::ConcurrentModification) => {
                // Report what the winning writer did, if it was an assignment.
                let current = self.load(id).await?;
                return Err(match current.owner() {
                    Some(owner) if owner != user_id => LifecycleError::AlreadyOwned,
                    _ => LifecycleError::ConcurrentModification,
                });
            }
            other => other?,
        };

        tracing::info!(token_id = %id, owner = %user_id, "Assigned token");

        Ok(record)
    }

    // ── Scanning ──────────────────────────────────────────────────────────

    /// Resolves a scanned code to its record and, if the token is active and
    /// unowned, makes the scanner its owner.
    #[tracing::instrument(skip(self, input))]
    pub async fn resolve_scan(
        &self,
        input: ScanInput,
        scanner: Uuid,
    ) -> Result<ScanOutcome, LifecycleError> {
        let raw = match input {
            ScanInput::Image(bytes) => {
                let payload =
                    tokio::task::spawn_blocking(move || qr_decoder::decode(&bytes)).await??;
                tracing::debug!(payload_len = payload.len(), "Decoded QR payload from image");
                payload
            }
            ScanInput::Code(code) => code,
        };

        // Text that cannot be a token cannot match a record either.
        let token = Token::normalize(&raw).map_err(|_| LifecycleError::TokenNotFound)?;

        let mut record = self
            .store
            .find_by_token(&token)
            .await?
            .ok_or(LifecycleError::TokenNotFound)?;

        if !record.claim(scanner, Utc::now())? {
            return Ok(ScanOutcome {
                record,
                claimed: false,
            });
        }

        match self.commit(&record, None).await {
            Ok(record) => {
                tracing::info!(token_id = %record.id, owner = %scanner, "Token claimed by scan");
                Ok(ScanOutcome {
                    record,
                    claimed: true,
                })
            }
            Err(LifecycleError::ConcurrentModification) => {
                let current = self.load(record.id).await?;
                Self::after_lost_claim(current)
            }
            Err(e) => Err(e),
        }
    }

    /// Reports a token whose claim lost a write race, as it now stands.
    /// Only a token that someone now owns resolves as a plain lookup.
    fn after_lost_claim(current: TokenRecord) -> Result<ScanOutcome, LifecycleError> {
        if !current.active {
            return Err(LifecycleError::InactiveToken);
        }
        if current.owner().is_none() {
            return Err(LifecycleError::ConcurrentModification);
        }
        Ok(ScanOutcome {
            record: current,
            claimed: false,
        })
    }

    // ── Owner operations ──────────────────────────────────────────────────

    /// Validates the coordinates, moves the token and appends one history
    /// entry.
    #[tracing::instrument(skip(self, latitude, longitude))]
    pub async fn update_location(
        &self,
        id: Uuid,
        requester: Uuid,
        latitude: Option<&RawCoordinate>,
        longitude: Option<&RawCoordinate>,
    ) -> Result<TokenRecord, LifecycleError> {
        let point = coordinates::validate(latitude, longitude)?;

        let mut record = self.load(id).await?;
        let entry = record.record_location(requester, point, Utc::now())?;
        let record = self.commit(&record, Some(&entry)).await?;

        tracing::debug!(
            token_id = %id,
            latitude = point.latitude,
            longitude = point.longitude,
            history_len = record.history.len(),
            "Location updated"
        );

        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    pub async fn toggle_tracking(
        &self,
        id: Uuid,
        requester: Uuid,
    ) -> Result<TokenRecord, LifecycleError> {
        let mut record = self.load(id).await?;
        let tracking = record.toggle_tracking(requester, Utc::now())?;
        let record = self.commit(&record, None).await?;

        tracing::info!(token_id = %id, tracking, "Toggled tracking");

        Ok(record)
    }

    /// Adds a gateway-authenticated principal to the directory. Returns the
    /// stored principal and whether it was created by this call.
    #[tracing::instrument(skip(self, name, email))]
    pub async fn register_principal(
        &self,
        id: Uuid,
        role: Role,
        name: &str,
        email: &str,
    ) -> Result<(Principal, bool), LifecycleError> {
        let (name, email) = (name.trim(), email.trim());
        if name.is_empty() {
            return Err(LifecycleError::MissingField("name"));
        }
        if email.is_empty() {
            return Err(LifecycleError::MissingField("email"));
        }

        if let Some(existing) = self.store.find_principal(id).await? {
            return Ok((existing, false));
        }

        let data = CreatePrincipalData {
            id,
            name: name.to_string(),
            email: email.to_string(),
            role,
        };

        match self.store.insert_principal(data).await {
            Ok(principal) => {
                tracing::info!(principal_id = %id, role = %role, "Registered principal");
                Ok((principal, true))
            }
            Err(StoreError::DuplicatePrincipal(_)) => {
                let existing = self
                    .store
                    .find_principal(id)
                    .await?
                    .ok_or(LifecycleError::PrincipalNotFound)?;
                Ok((existing, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stores a principal's preferred map position.
    #[tracing::instrument(skip(self, latitude, longitude))]
    pub async fn set_default_location(
        &self,
        principal_id: Uuid,
        latitude: Option<&RawCoordinate>,
        longitude: Option<&RawCoordinate>,
    ) -> Result<Principal, LifecycleError> {
        let point = coordinates::validate(latitude, longitude)?;

        Ok(self
            .store
            .set_default_location(principal_id, point, Utc::now())
            .await?)
    }

    // ── Superadmin operations ─────────────────────────────────────────────

    /// Deletes a principal and releases every token it owned. Returns the
    /// number of tokens released.
    #[tracing::instrument(skip(self))]
    pub async fn delete_principal(&self, principal_id: Uuid) -> Result<u64, LifecycleError> {
        let principal = self
            .store
            .find_principal(principal_id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;

        if principal.is_protected() {
            return Err(LifecycleError::ProtectedPrincipal);
        }

        let released = self
            .store
            .remove_principal(principal_id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;

        tracing::info!(principal_id = %principal_id, released, "Deleted principal");

        Ok(released)
    }

    #[tracing::instrument(skip(self, patch))]
    pub async fn update_principal(
        &self,
        principal_id: Uuid,
        patch: UpdatePrincipalData,
    ) -> Result<Principal, LifecycleError> {
        let principal = self
            .store
            .find_principal(principal_id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;

        if principal.is_protected() && patch.role.is_some_and(|role| role != Role::SuperAdmin) {
            return Err(LifecycleError::ProtectedPrincipal);
        }

        let principal = self
            .store
            .update_principal(principal_id, patch, Utc::now())
            .await?;

        tracing::info!(principal_id = %principal_id, role = %principal.role, "Updated principal");

        Ok(principal)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_token(&self, id: Uuid) -> Result<(), LifecycleError> {
        if !self.store.delete_token(id).await? {
            return Err(LifecycleError::TokenNotFound);
        }

        tracing::info!(token_id = %id, "Deleted token");

        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    pub async fn get(&self, id: Uuid) -> Result<TokenRecord, LifecycleError> {
        self.load(id).await
    }

    pub async fn list_tokens(&self) -> Result<Vec<TokenRecord>, LifecycleError> {
        Ok(self.store.list_tokens().await?)
    }

    pub async fn list_owned(&self, owner: Uuid) -> Result<Vec<TokenRecord>, LifecycleError> {
        Ok(self.store.list_owned(owner).await?)
    }

    pub async fn recent_activity(&self) -> Result<Vec<TokenRecord>, LifecycleError> {
        Ok(self.store.recent_tokens(RECENT_ACTIVITY_LIMIT).await?)
    }

    pub async fn list_principals(
        &self,
        role: Option<Role>,
    ) -> Result<Vec<Principal>, LifecycleError> {
        Ok(self.store.list_principals(role).await?)
    }

    pub async fn stats(&self) -> Result<SystemStats, LifecycleError> {
        let since = Utc::now() - Duration::days(REGISTRATION_WINDOW_DAYS);
        Ok(self.store.stats(since).await?)
    }
}
