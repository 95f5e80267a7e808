use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::{GeoPoint, HistoryEntry};

/// Number of characters in every issued token.
pub const TOKEN_LENGTH: usize = 16;

/// Characters a token may contain, in the order the generator indexes them.
pub const TOKEN_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("token must be 16 uppercase alphanumeric characters")]
pub struct InvalidToken;

/// The 16-character identifier encoded into a QR image (`[A-Z0-9]{16}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// Parses an exact token string.
    pub fn parse(value: &str) -> Result<Self, InvalidToken> {
        let valid = value.len() == TOKEN_LENGTH
            && value
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());

        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidToken)
        }
    }

    /// Parses user-entered text: surrounding whitespace is dropped and
    /// letters are upper-cased before validation.
    pub fn normalize(input: &str) -> Result<Self, InvalidToken> {
        Self::parse(&input.trim().to_ascii_uppercase())
    }

    /// Builds a token from alphabet indices produced by a random source.
    pub(crate) fn from_alphabet_indices(indices: [u8; TOKEN_LENGTH]) -> Self {
        let value = indices
            .iter()
            .map(|&i| TOKEN_ALPHABET[usize::from(i) % TOKEN_ALPHABET.len()] as char)
            .collect();
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Token {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Token {
    type Error = InvalidToken;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

/// Who holds a token. Tracking only exists while a token is owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Assignment {
    Unowned,
    Owned { owner: Uuid, tracking: bool },
}

impl Assignment {
    pub fn from_columns(owner: Option<Uuid>, tracking: bool) -> Self {
        match owner {
            Some(owner) => Assignment::Owned { owner, tracking },
            None => Assignment::Unowned,
        }
    }
}

/// Why a transition was refused for the record's current state.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("token is not active")]
    InactiveToken,

    #[error("token is already assigned to another principal")]
    AlreadyOwned,

    #[error("token is not assigned to the requesting principal")]
    NotOwned,
}

/// Fields needed to persist a freshly issued token.
#[derive(Debug, Clone)]
pub struct NewTokenRecord {
    pub token: Token,
    pub image_artifact: String,
    pub issuer: Uuid,
}

/// One issued token and its tracking state.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub id: Uuid,
    pub token: Token,
    /// PNG data URL of the rendered QR code.
    pub image_artifact: String,
    pub active: bool,
    pub assignment: Assignment,
    pub issuer: Uuid,
    pub current_location: Option<GeoPoint>,
    pub last_tracked_at: Option<DateTime<Utc>>,
    /// Append-only, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Optimistic concurrency counter, bumped by the store on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn owner(&self) -> Option<Uuid> {
        match self.assignment {
            Assignment::Owned { owner, .. } => Some(owner),
            Assignment::Unowned => None,
        }
    }

    pub fn is_owned_by(&self, principal: Uuid) -> bool {
        self.owner() == Some(principal)
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.assignment, Assignment::Owned { tracking: true, .. })
    }

    /// Flips the active flag and returns the new value.
    pub fn toggle_active(&mut self, now: DateTime<Utc>) -> bool {
        self.active = !self.active;
        self.updated_at = now;
        self.active
    }

    /// Assigns the token to `owner`. Re-assigning to the current owner is a
    /// no-op; assigning to anyone else while owned is refused.
    pub fn assign(&mut self, owner: Uuid, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.active {
            return Err(TransitionError::InactiveToken);
        }

        match self.assignment {
            Assignment::Owned { owner: current, .. } if current == owner => Ok(()),
            Assignment::Owned { .. } => Err(TransitionError::AlreadyOwned),
            Assignment::Unowned => {
                self.assignment = Assignment::Owned {
                    owner,
                    tracking: false,
                };
                self.updated_at = now;
                Ok(())
            }
        }
    }

    /// Scan-path assignment: takes ownership only when nobody holds the
    /// token. Returns whether ownership changed.
    pub fn claim(&mut self, scanner: Uuid, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        if !self.active {
            return Err(TransitionError::InactiveToken);
        }

        match self.assignment {
            Assignment::Owned { .. } => Ok(false),
            Assignment::Unowned => {
                self.assignment = Assignment::Owned {
                    owner: scanner,
                    tracking: false,
                };
                self.updated_at = now;
                Ok(true)
            }
        }
    }

    /// Moves the token to `point` and appends one history entry.
    ///
    /// The entry timestamp never precedes the previous one, so history stays
    /// ordered even if writers' clocks disagree.
    pub fn record_location(
        &mut self,
        requester: Uuid,
        point: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<HistoryEntry, TransitionError> {
        if !self.is_owned_by(requester) {
            return Err(TransitionError::NotOwned);
        }

        let recorded_at = match self.last_tracked_at {
            Some(last) if last > now => last,
            _ => now,
        };

        let entry = HistoryEntry {
            latitude: point.latitude,
            longitude: point.longitude,
            recorded_at,
        };

        self.current_location = Some(point);
        self.last_tracked_at = Some(recorded_at);
        self.history.push(entry);
        self.updated_at = now;

        Ok(entry)
    }

    /// Flips the owner's tracking flag and returns the new value.
    pub fn toggle_tracking(
        &mut self,
        requester: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        match &mut self.assignment {
            Assignment::Owned { owner, tracking } if *owner == requester => {
                *tracking = !*tracking;
                let tracking = *tracking;
                self.updated_at = now;
                Ok(tracking)
            }
            _ => Err(TransitionError::NotOwned),
        }
    }

    /// Clears the owner (and with it the tracking flag).
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.assignment = Assignment::Unowned;
        self.updated_at = now;
    }
}
