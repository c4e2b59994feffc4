//! Access gate
//!
//! Admission control at the relay: session JWTs gate the WebSocket
//! upgrade, and single-use invite codes gate account provisioning. Codes
//! are issued by an admin bearer token and consumed exactly once.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Display name chosen at invite redemption
    pub name: String,
    /// Household (room) this session may join
    pub household: String,
    /// Expiry, Unix seconds
    pub exp: u64,
}

/// Issued session: the bearer token plus the household it belongs to.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub household: String,
}

pub struct AccessGate {
    admin_token: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    session_ttl: Duration,
    /// invite code -> household
    invites: Mutex<HashMap<String, String>>,
}

impl AccessGate {
    pub fn new(secret: &str, admin_token: &str, session_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            admin_token: admin_token.to_string(),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            session_ttl,
            invites: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a single-use invite code for a household. Requires the admin
    /// bearer token; an unset admin token disables issuance entirely.
    pub fn issue_invite(&self, bearer: &str, household: &str) -> Result<String> {
        if self.admin_token.is_empty() || bearer != self.admin_token {
            return Err(Error::AuthRejected("admin token required".to_string()));
        }
        let code = Uuid::new_v4().simple().to_string();
        self.invites_mut().insert(code.clone(), household.to_string());
        info!(household, "issued invite code");
        Ok(code)
    }

    /// Redeem an invite code for a session token. Consumes the code; a
    /// second redemption fails.
    pub fn redeem_invite(&self, code: &str, name: &str) -> Result<Session> {
        let household = self
            .invites_mut()
            .remove(code)
            .ok_or(Error::InvalidInvite)?;
        let token = self.issue_session(name, &household)?;
        info!(household, name, "invite redeemed");
        Ok(Session { token, household })
    }

    /// Mint a session token directly (login exchange after redemption).
    pub fn issue_session(&self, name: &str, household: &str) -> Result<String> {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + self.session_ttl.as_secs();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            name: name.to_string(),
            household: household.to_string(),
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::AuthRejected(e.to_string()))
    }

    /// Validate a bearer credential; expired or forged tokens are
    /// rejected, never admitted with a warning.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| Error::AuthRejected(e.to_string()))
    }

    fn invites_mut(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.invites.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
