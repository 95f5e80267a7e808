use std::sync::Arc;

use ring::rand::{SecureRandom, SystemRandom};
use uuid::Uuid;

use crate::models::token::{NewTokenRecord, Token, TokenRecord, TOKEN_ALPHABET, TOKEN_LENGTH};
use crate::services::qr_generator::{self, QrGenerationError};
use crate::store::{StoreError, TrackingStore};

/// Default number of insert attempts before giving up on a unique token.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 32;

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are discarded so every character is equally likely.
const REJECTION_THRESHOLD: u8 = (256 / TOKEN_ALPHABET.len() * TOKEN_ALPHABET.len()) as u8;

#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("System randomness unavailable")]
    Entropy,

    #[error("No unique token found after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("QR rendering failed: {0}")]
    Render(#[from] QrGenerationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Source of candidate tokens.
pub trait TokenSource: Send + Sync {
    fn draw(&self) -> Result<Token, GenerationError>;
}

/// Draws tokens from the operating system CSPRNG.
pub struct SystemTokenSource {
    rng: SystemRandom,
}

impl SystemTokenSource {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SystemTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for SystemTokenSource {
    fn draw(&self) -> Result<Token, GenerationError> {
        let alphabet_len = TOKEN_ALPHABET.len() as u8;
        let mut indices = [0u8; TOKEN_LENGTH];
        let mut filled = 0;
        let mut buf = [0u8; 32];

        while filled < TOKEN_LENGTH {
            self.rng
                .fill(&mut buf)
                .map_err(|_| GenerationError::Entropy)?;

            for byte in buf.iter().copied().filter(|b| *b < REJECTION_THRESHOLD) {
                if filled == TOKEN_LENGTH {
                    break;
                }
                indices[filled] = byte % alphabet_len;
                filled += 1;
            }
        }

        Ok(Token::from_alphabet_indices(indices))
    }
}

/// Produces tokens and reserves them in the store.
#[derive(Clone)]
pub struct TokenGenerator {
    source: Arc<dyn TokenSource>,
    max_attempts: u32,
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemTokenSource::new()), DEFAULT_MAX_ATTEMPTS)
    }
}

impl TokenGenerator {
    pub fn new(source: Arc<dyn TokenSource>, max_attempts: u32) -> Self {
        Self {
            source,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Draws one candidate token. Uniqueness is not checked.
    pub fn generate(&self) -> Result<Token, GenerationError> {
        self.source.draw()
    }

    /// Issues a fresh record under a token nobody holds yet.
    ///
    /// Uniqueness comes from the store's unique constraint on insert, not
    /// from a lookup beforehand: a candidate that collides is discarded and
    /// a new one drawn, up to `max_attempts` times.
    #[tracing::instrument(skip(self, store))]
    pub async fn ensure_unique(
        &self,
        store: &dyn TrackingStore,
        issuer: Uuid,
    ) -> Result<TokenRecord, GenerationError> {
        for attempt in 1..=self.max_attempts {
            let token = self.generate()?;
            let image_artifact = qr_generator::generate_qr_data_url(&token)?;

            match store
                .insert_token(NewTokenRecord {
                    token,
                    image_artifact,
                    issuer,
                })
                .await
            {
                Ok(record) => return Ok(record),
                Err(StoreError::DuplicateToken(token)) => {
                    tracing::warn!(
                        attempt,
                        token = %token,
                        "Generated token already taken, redrawing"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::error!(
            attempts = self.max_attempts,
            "Token space exhausted while generating"
        );
        Err(GenerationError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}
