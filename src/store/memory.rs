//! An in-process [`TrackingStore`].
//!
//! Used for local development when no database is configured, and by the
//! test suites. A single write lock makes every method atomic, which gives
//! the same per-record guarantees the Postgres store gets from row-level
//! conditional updates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    principal::{CreatePrincipalData, Principal, Role, UpdatePrincipalData},
    stats::SystemStats,
    token::{Assignment, NewTokenRecord, Token, TokenRecord},
    GeoPoint, HistoryEntry,
};
use crate::store::{StoreError, TrackingStore};

#[derive(Default)]
struct Inner {
    tokens: HashMap<Uuid, TokenRecord>,
    by_token: HashMap<Token, Uuid>,
    /// Token ids in insertion order.
    token_order: Vec<Uuid>,
    principals: HashMap<Uuid, Principal>,
    principal_order: Vec<Uuid>,
}

impl Inner {
    fn tokens_newest_first(&self) -> impl Iterator<Item = &TokenRecord> {
        self.token_order
            .iter()
            .rev()
            .filter_map(|id| self.tokens.get(id))
    }

    fn principal_mut(&mut self, id: Uuid) -> Result<&mut Principal, StoreError> {
        self.principals
            .get_mut(&id)
            .ok_or(StoreError::PrincipalNotFound(id))
    }
}

/// Cloning is cheap: clones share the same underlying maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_token(&self, new: NewTokenRecord) -> Result<TokenRecord, StoreError> {
        let mut inner = self.inner.write().await;

        if inner.by_token.contains_key(&new.token) {
            return Err(StoreError::DuplicateToken(new.token));
        }

        let now = Utc::now();
        let record = TokenRecord {
            id: Uuid::new_v4(),
            token: new.token,
            image_artifact: new.image_artifact,
            active: false,
            assignment: Assignment::Unowned,
            issuer: new.issuer,
            current_location: None,
            last_tracked_at: None,
            history: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        };

        inner.by_token.insert(record.token.clone(), record.id);
        inner.token_order.push(record.id);
        inner.tokens.insert(record.id, record.clone());

        Ok(record)
    }

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.inner.read().await.tokens.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &Token) -> Result<Option<TokenRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_token
            .get(token)
            .and_then(|id| inner.tokens.get(id))
            .cloned())
    }

    async fn commit(
        &self,
        record: &TokenRecord,
        appended: Option<&HistoryEntry>,
    ) -> Result<TokenRecord, StoreError> {
        let mut inner = self.inner.write().await;

        if let Some(owner) = record.owner() {
            if !inner.principals.contains_key(&owner) {
                return Err(StoreError::PrincipalNotFound(owner));
            }
        }

        let stored = inner
            .tokens
            .get_mut(&record.id)
            .ok_or(StoreError::TokenNotFound(record.id))?;

        if stored.version != record.version {
            return Err(StoreError::VersionConflict(record.id));
        }

        stored.active = record.active;
        stored.assignment = record.assignment;
        stored.current_location = record.current_location;
        stored.last_tracked_at = record.last_tracked_at;
        stored.updated_at = record.updated_at;
        if let Some(entry) = appended {
            stored.history.push(*entry);
        }
        stored.version += 1;

        Ok(stored.clone())
    }

    async fn list_tokens(&self) -> Result<Vec<TokenRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.tokens_newest_first().cloned().collect())
    }

    async fn list_owned(&self, owner: Uuid) -> Result<Vec<TokenRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tokens_newest_first()
            .filter(|record| record.is_owned_by(owner))
            .cloned()
            .collect())
    }

    async fn recent_tokens(&self, limit: usize) -> Result<Vec<TokenRecord>, StoreError> {
        let inner = self.inner.read().await;
        // Stable sort: equal timestamps keep newest-inserted first.
        let mut records: Vec<&TokenRecord> = inner.tokens_newest_first().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records.into_iter().take(limit).cloned().collect())
    }

    async fn delete_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;

        match inner.tokens.remove(&id) {
            Some(record) => {
                inner.by_token.remove(&record.token);
                inner.token_order.retain(|candidate| *candidate != id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_principal(&self, data: CreatePrincipalData) -> Result<Principal, StoreError> {
        let mut inner = self.inner.write().await;

        if inner.principals.contains_key(&data.id) {
            return Err(StoreError::DuplicatePrincipal(data.id));
        }

        let now = Utc::now();
        let principal = Principal {
            id: data.id,
            name: data.name,
            email: data.email,
            role: data.role,
            active: true,
            default_location: None,
            created_at: now,
            updated_at: now,
        };

        inner.principal_order.push(principal.id);
        inner.principals.insert(principal.id, principal.clone());

        Ok(principal)
    }

    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        Ok(self.inner.read().await.principals.get(&id).cloned())
    }

    async fn list_principals(&self, role: Option<Role>) -> Result<Vec<Principal>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .principal_order
            .iter()
            .rev()
            .filter_map(|id| inner.principals.get(id))
            .filter(|principal| role.map_or(true, |role| principal.role == role))
            .cloned()
            .collect())
    }

    async fn update_principal(
        &self,
        id: Uuid,
        patch: UpdatePrincipalData,
        now: DateTime<Utc>,
    ) -> Result<Principal, StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.principal_mut(id)?;
        stored.apply(patch, now);
        Ok(stored.clone())
    }

    async fn set_default_location(
        &self,
        id: Uuid,
        point: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Principal, StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.principal_mut(id)?;
        stored.default_location = Some(point);
        stored.updated_at = now;
        Ok(stored.clone())
    }

    async fn remove_principal(&self, id: Uuid) -> Result<Option<u64>, StoreError> {
        let mut inner = self.inner.write().await;

        if inner.principals.remove(&id).is_none() {
            return Ok(None);
        }
        inner.principal_order.retain(|candidate| *candidate != id);

        let now = Utc::now();
        let mut released = 0;
        for record in inner.tokens.values_mut() {
            if record.is_owned_by(id) {
                record.release(now);
                record.version += 1;
                released += 1;
            }
        }

        Ok(Some(released))
    }

    async fn stats(&self, registered_since: DateTime<Utc>) -> Result<SystemStats, StoreError> {
        let inner = self.inner.read().await;
        let count_role = |role: Role| {
            inner
                .principals
                .values()
                .filter(|principal| principal.role == role)
                .count() as i64
        };
        let count_tokens = |predicate: fn(&TokenRecord) -> bool| {
            inner.tokens.values().filter(|record| predicate(record)).count() as i64
        };

        Ok(SystemStats {
            total_users: inner.principals.len() as i64,
            total_admins: count_role(Role::Admin),
            total_regular_users: count_role(Role::User),
            total_tokens: inner.tokens.len() as i64,
            active_tokens: count_tokens(|record| record.active),
            assigned_tokens: count_tokens(|record| record.owner().is_some()),
            tracking_tokens: count_tokens(TokenRecord::is_tracking),
            recent_registrations: inner
                .principals
                .values()
                .filter(|principal| principal.created_at >= registered_since)
                .count() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(token: &str) -> NewTokenRecord {
        NewTokenRecord {
            token: Token::parse(token).unwrap(),
            image_artifact: "data:image/png;base64,".to_string(),
            issuer: Uuid::new_v4(),
        }
    }

    async fn principal(store: &MemoryStore, role: Role) -> Principal {
        store
            .insert_principal(CreatePrincipalData {
                id: Uuid::new_v4(),
                name: "Test".to_string(),
                email: "test@example.com".to_string(),
                role,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_token() {
        let store = MemoryStore::new();
        store.insert_token(new_record("AAAAAAAAAAAAAAAA")).await.unwrap();

        let result = store.insert_token(new_record("AAAAAAAAAAAAAAAA")).await;
        assert!(matches!(result, Err(StoreError::DuplicateToken(_))));
        assert_eq!(store.list_tokens().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_version() {
        let store = MemoryStore::new();
        let record = store.insert_token(new_record("AAAAAAAAAAAAAAAA")).await.unwrap();

        let mut first = record.clone();
        first.toggle_active(Utc::now());
        let committed = store.commit(&first, None).await.unwrap();
        assert_eq!(committed.version, 2);

        let mut stale = record;
        stale.toggle_active(Utc::now());
        let result = store.commit(&stale, None).await;
        assert!(matches!(result, Err(StoreError::VersionConflict(_))));
    }

    #[tokio::test]
    async fn test_commit_requires_existing_owner() {
        let store = MemoryStore::new();
        let mut record = store.insert_token(new_record("AAAAAAAAAAAAAAAA")).await.unwrap();
        record.active = true;
        record.assign(Uuid::new_v4(), Utc::now()).unwrap();

        let result = store.commit(&record, None).await;
        assert!(matches!(result, Err(StoreError::PrincipalNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_principal_releases_owned_tokens() {
        let store = MemoryStore::new();
        let owner = principal(&store, Role::User).await;

        let mut record = store.insert_token(new_record("AAAAAAAAAAAAAAAA")).await.unwrap();
        record.active = true;
        record.assign(owner.id, Utc::now()).unwrap();
        store.commit(&record, None).await.unwrap();

        assert_eq!(store.remove_principal(owner.id).await.unwrap(), Some(1));
        assert_eq!(store.remove_principal(owner.id).await.unwrap(), None);

        let record = store.find_token(record.id).await.unwrap().unwrap();
        assert_eq!(record.owner(), None);
        assert!(record.active);
    }

    #[tokio::test]
    async fn test_list_tokens_newest_first() {
        let store = MemoryStore::new();
        let first = store.insert_token(new_record("AAAAAAAAAAAAAAAA")).await.unwrap();
        let second = store.insert_token(new_record("BBBBBBBBBBBBBBBB")).await.unwrap();

        let ids: Vec<Uuid> = store
            .list_tokens()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_recent_tokens_order_by_update_then_insertion() {
        let store = MemoryStore::new();
        let mut records = Vec::new();
        for token in ["AAAAAAAAAAAAAAAA", "BBBBBBBBBBBBBBBB", "CCCCCCCCCCCCCCCC"] {
            records.push(store.insert_token(new_record(token)).await.unwrap());
        }

        let mut touched = records[0].clone();
        touched.toggle_active(Utc::now() + chrono::Duration::seconds(1));
        store.commit(&touched, None).await.unwrap();

        // Give the untouched records one shared timestamp.
        let tied = Utc::now() - chrono::Duration::seconds(1);
        for record in &records[1..] {
            let mut record = store.find_token(record.id).await.unwrap().unwrap();
            record.updated_at = tied;
            store.commit(&record, None).await.unwrap();
        }

        let ids: Vec<Uuid> = store
            .recent_tokens(3)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec![records[0].id, records[2].id, records[1].id]);
    }

    #[tokio::test]
    async fn test_principal_writes_touch_only_their_columns() {
        let store = MemoryStore::new();
        let user = principal(&store, Role::User).await;

        store
            .set_default_location(user.id, GeoPoint::new_unchecked(1.0, 2.0), Utc::now())
            .await
            .unwrap();
        let updated = store
            .update_principal(
                user.id,
                UpdatePrincipalData {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert_eq!(
            updated.default_location,
            Some(GeoPoint::new_unchecked(1.0, 2.0))
        );
        assert!(matches!(
            store
                .set_default_location(
                    Uuid::new_v4(),
                    GeoPoint::new_unchecked(0.0, 0.0),
                    Utc::now()
                )
                .await,
            Err(StoreError::PrincipalNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_counts_roles_and_token_states() {
        let store = MemoryStore::new();
        principal(&store, Role::User).await;
        principal(&store, Role::User).await;
        principal(&store, Role::Admin).await;
        store.insert_token(new_record("AAAAAAAAAAAAAAAA")).await.unwrap();

        let stats = store
            .stats(Utc::now() - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.total_regular_users, 2);
        assert_eq!(stats.total_admins, 1);
        assert_eq!(stats.total_tokens, 1);
        assert_eq!(stats.active_tokens, 0);
        assert_eq!(stats.recent_registrations, 3);
    }
}
