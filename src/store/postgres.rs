//! The Postgres implementation of [`TrackingStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{
    principal::{CreatePrincipalData, Principal, Role, UpdatePrincipalData},
    stats::SystemStats,
    token::{Assignment, NewTokenRecord, Token, TokenRecord},
    GeoPoint, HistoryEntry,
};
use crate::store::{StoreError, TrackingStore};

#[derive(Debug, FromRow)]
struct TokenRow {
    id: Uuid,
    token: String,
    image_artifact: String,
    is_active: bool,
    owner_id: Option<Uuid>,
    is_tracking: bool,
    issuer_id: Uuid,
    latitude: Option<f64>,
    longitude: Option<f64>,
    last_tracked_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TokenRow {
    fn into_record(self, history: Vec<HistoryEntry>) -> Result<TokenRecord, StoreError> {
        let token = Token::parse(&self.token)
            .map_err(|e| StoreError::CorruptRow(format!("qr_tokens.token {}: {}", self.id, e)))?;

        Ok(TokenRecord {
            id: self.id,
            token,
            image_artifact: self.image_artifact,
            active: self.is_active,
            assignment: Assignment::from_columns(self.owner_id, self.is_tracking),
            issuer: self.issuer_id,
            current_location: GeoPoint::from_columns(self.latitude, self.longitude),
            last_tracked_at: self.last_tracked_at,
            history,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    token_id: Uuid,
    latitude: f64,
    longitude: f64,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    is_active: bool,
    default_latitude: Option<f64>,
    default_longitude: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = StoreError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| StoreError::CorruptRow(format!("principals.role {}: {}", row.id, e)))?;

        Ok(Principal {
            id: row.id,
            name: row.name,
            email: row.email,
            role,
            active: row.is_active,
            default_location: GeoPoint::from_columns(row.default_latitude, row.default_longitude),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    total_users: i64,
    total_admins: i64,
    total_regular_users: i64,
    total_tokens: i64,
    active_tokens: i64,
    assigned_tokens: i64,
    tracking_tokens: i64,
    recent_registrations: i64,
}

/// A tracking store backed by a Postgres pool.
///
/// Cloning is cheap: the pool is reference-counted.
#[derive(Clone)]
pub struct PgTrackingStore {
    pool: PgPool,
}

impl PgTrackingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads history for the given records, grouped by token id, oldest first.
    async fn load_history(
        &self,
        token_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<HistoryEntry>>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT token_id, latitude, longitude, recorded_at
            FROM location_history
            WHERE token_id = ANY($1)
            ORDER BY seq ASC
            "#,
        )
        .bind(token_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<HistoryEntry>> = HashMap::new();
        for row in rows {
            grouped.entry(row.token_id).or_default().push(HistoryEntry {
                latitude: row.latitude,
                longitude: row.longitude,
                recorded_at: row.recorded_at,
            });
        }

        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<TokenRow>) -> Result<Vec<TokenRecord>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut history = self.load_history(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let entries = history.remove(&row.id).unwrap_or_default();
                row.into_record(entries)
            })
            .collect()
    }

    async fn hydrate_one(&self, row: Option<TokenRow>) -> Result<Option<TokenRecord>, StoreError> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TrackingStore for PgTrackingStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn insert_token(&self, new: NewTokenRecord) -> Result<TokenRecord, StoreError> {
        let result = sqlx::query_as::<_, TokenRow>(
            r#"
            INSERT INTO qr_tokens (token, image_artifact, issuer_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(new.token.as_str())
        .bind(&new.image_artifact)
        .bind(new.issuer)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.into_record(Vec::new()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateToken(new.token))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT * FROM qr_tokens WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate_one(row).await
    }

    async fn find_by_token(&self, token: &Token) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT * FROM qr_tokens WHERE token = $1
            "#,
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate_one(row).await
    }

    async fn commit(
        &self,
        record: &TokenRecord,
        appended: Option<&HistoryEntry>,
    ) -> Result<TokenRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (latitude, longitude) = match record.current_location {
            Some(point) => (Some(point.latitude), Some(point.longitude)),
            None => (None, None),
        };

        // The version predicate makes read-check-write a single atomic step.
        let result = sqlx::query_as::<_, TokenRow>(
            r#"
            UPDATE qr_tokens
            SET
                is_active = $3,
                owner_id = $4,
                is_tracking = $5,
                latitude = $6,
                longitude = $7,
                last_tracked_at = $8,
                updated_at = $9,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(record.id)
        .bind(record.version)
        .bind(record.active)
        .bind(record.owner())
        .bind(record.is_tracking())
        .bind(latitude)
        .bind(longitude)
        .bind(record.last_tracked_at)
        .bind(record.updated_at)
        .fetch_optional(&mut *tx)
        .await;

        let row = match result {
            Ok(Some(row)) => row,
            Ok(None) => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM qr_tokens WHERE id = $1)")
                        .bind(record.id)
                        .fetch_one(&mut *tx)
                        .await?;

                return Err(if exists {
                    StoreError::VersionConflict(record.id)
                } else {
                    StoreError::TokenNotFound(record.id)
                });
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                let owner = record.owner().unwrap_or_default();
                return Err(StoreError::PrincipalNotFound(owner));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(entry) = appended {
            sqlx::query(
                r#"
                INSERT INTO location_history (token_id, latitude, longitude, recorded_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(record.id)
            .bind(entry.latitude)
            .bind(entry.longitude)
            .bind(entry.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut history = self.load_history(&[row.id]).await?;
        row.into_record(history.remove(&record.id).unwrap_or_default())
    }

    async fn list_tokens(&self) -> Result<Vec<TokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT * FROM qr_tokens
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_owned(&self, owner: Uuid) -> Result<Vec<TokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT * FROM qr_tokens
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn recent_tokens(&self, limit: usize) -> Result<Vec<TokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT * FROM qr_tokens
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn delete_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM qr_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_principal(&self, data: CreatePrincipalData) -> Result<Principal, StoreError> {
        let result = sqlx::query_as::<_, PrincipalRow>(
            r#"
            INSERT INTO principals (id, name, email, role)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(data.id)
        .bind(&data.name)
        .bind(&data.email)
        .bind(data.role.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicatePrincipal(data.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT * FROM principals WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Principal::try_from).transpose()
    }

    async fn list_principals(&self, role: Option<Role>) -> Result<Vec<Principal>, StoreError> {
        let rows = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT * FROM principals
            WHERE ($1::TEXT IS NULL OR role = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(role.map(|role| role.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Principal::try_from).collect()
    }

    async fn update_principal(
        &self,
        id: Uuid,
        patch: UpdatePrincipalData,
        now: DateTime<Utc>,
    ) -> Result<Principal, StoreError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            UPDATE principals
            SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                role = COALESCE($4, role),
                is_active = COALESCE($5, is_active),
                updated_at = $6
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(patch.name)
        .bind(patch.email)
        .bind(patch.role.map(|role| role.as_str()))
        .bind(patch.active)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::PrincipalNotFound(id))?;

        row.try_into()
    }

    async fn set_default_location(
        &self,
        id: Uuid,
        point: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Principal, StoreError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            UPDATE principals
            SET default_latitude = $2, default_longitude = $3, updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(point.latitude)
        .bind(point.longitude)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::PrincipalNotFound(id))?;

        row.try_into()
    }

    async fn remove_principal(&self, id: Uuid) -> Result<Option<u64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Locking the principal row first makes concurrent assignments to it
        // wait, then fail their FK check once the delete commits.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM principals WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        if locked.is_none() {
            return Ok(None);
        }

        let released = sqlx::query(
            r#"
            UPDATE qr_tokens
            SET owner_id = NULL, is_tracking = FALSE, version = version + 1, updated_at = NOW()
            WHERE owner_id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM principals WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(released))
    }

    async fn stats(&self, registered_since: DateTime<Utc>) -> Result<SystemStats, StoreError> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM principals) AS total_users,
                (SELECT COUNT(*) FROM principals WHERE role = 'admin') AS total_admins,
                (SELECT COUNT(*) FROM principals WHERE role = 'user') AS total_regular_users,
                (SELECT COUNT(*) FROM qr_tokens) AS total_tokens,
                (SELECT COUNT(*) FROM qr_tokens WHERE is_active) AS active_tokens,
                (SELECT COUNT(*) FROM qr_tokens WHERE owner_id IS NOT NULL) AS assigned_tokens,
                (SELECT COUNT(*) FROM qr_tokens WHERE is_tracking) AS tracking_tokens,
                (SELECT COUNT(*) FROM principals WHERE created_at >= $1) AS recent_registrations
            "#,
        )
        .bind(registered_since)
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStats {
            total_users: row.total_users,
            total_admins: row.total_admins,
            total_regular_users: row.total_regular_users,
            total_tokens: row.total_tokens,
            active_tokens: row.active_tokens,
            assigned_tokens: row.assigned_tokens,
            tracking_tokens: row.tracking_tokens,
            recent_registrations: row.recent_registrations,
        })
    }
}
