//! Signed-session authentication with replay protection.
//!
//! Flow:
//! ```text
//! client ── signed hello ──► verify_signature ──► create_or_reuse_session
//!        ── signed action ─► validate_action (session + nonce + staleness)
//! ```
//!
//! `verify_signature` never returns an error: every failure mode — empty
//! input, malformed base64, undecodable key material, signature mismatch —
//! resolves to `false`. Sessions live 24 hours and are reused while active,
//! so a client re-handshaking cannot grow the session table. Each
//! `(session_id, nonce)` pair is consumed at most once; the check and the
//! record are a single atomic set-insert.
//!
//! The staleness bound only rejects timestamps too far in the past; a
//! timestamp ahead of the validator's clock passes.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::pss::Pss;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Session lifetime: 24 hours.
const SESSION_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Oldest acceptable action timestamp: 5 minutes.
const ACTION_MAX_AGE_MS: u64 = 5 * 60 * 1000;

/// RSA-PSS salt length in bytes.
const RSA_PSS_SALT_LEN: usize = 32;

/// Supported signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    /// Ed25519 over the raw message bytes (default).
    #[default]
    Ed25519,
    /// RSA-PSS with SHA-256 digest and 32-byte salt.
    RsaPss,
}

impl SignatureAlgorithm {
    /// Parse an algorithm name; `None` or unknown names mean Ed25519.
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("RSA-PSS") => SignatureAlgorithm::RsaPss,
            _ => SignatureAlgorithm::Ed25519,
        }
    }
}

/// A time-boxed authorization record for one public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub public_key: String,
    pub domain: String,
    /// Milliseconds since epoch.
    pub established_at: u64,
    /// Milliseconds since epoch.
    pub expires_at: u64,
}

/// A signed intent to mutate one document entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAction {
    pub session_id: String,
    pub action: String,
    pub element_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Milliseconds since epoch.
    pub timestamp: u64,
    pub nonce: String,
}

/// Verify `signature_b64` over the UTF-8 bytes of `message` with
/// `public_key_b64`. Never panics, never errors — all failures are `false`.
pub fn verify_signature(
    message: &str,
    signature_b64: &str,
    public_key_b64: &str,
    algorithm: SignatureAlgorithm,
) -> bool {
    if signature_b64.is_empty() || public_key_b64.is_empty() {
        return false;
    }
    // Reject junk before attempting to decode.
    if !is_base64(signature_b64) || !is_base64(public_key_b64) {
        return false;
    }
    let signature = match general_purpose::STANDARD.decode(signature_b64) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let public_key = match general_purpose::STANDARD.decode(public_key_b64) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    match algorithm {
        SignatureAlgorithm::Ed25519 => verify_ed25519(message.as_bytes(), &signature, &public_key),
        SignatureAlgorithm::RsaPss => verify_rsa_pss(message.as_bytes(), &signature, &public_key),
    }
}

fn is_base64(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

fn verify_ed25519(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let key_bytes: [u8; 32] = match public_key.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let verifying_key = match VerifyingKey::from_bytes(&key_bytes) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let signature = match Signature::from_slice(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    verifying_key.verify(message, &signature).is_ok()
}

fn verify_rsa_pss(message: &[u8], signature: &[u8], public_key_der: &[u8]) -> bool {
    let key = match RsaPublicKey::from_public_key_der(public_key_der) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let hashed = Sha256::digest(message);
    key.verify(Pss::new_with_salt::<Sha256>(RSA_PSS_SALT_LEN), &hashed, signature)
        .is_ok()
}

/// Session table plus consumed-nonce set.
pub struct SessionAuthenticator {
    sessions: RwLock<HashMap<String, Session>>,
    /// `(session_id, nonce)` pairs that have been consumed. Insert-if-absent
    /// under one lock is the atomicity guarantee for replay protection.
    used_nonces: Mutex<HashSet<(String, String)>>,
}

impl SessionAuthenticator {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            used_nonces: Mutex::new(HashSet::new()),
        }
    }

    /// Return the active session for `public_key`, or mint a new one.
    ///
    /// Reuse-on-lookup keeps the table at one active session per actor no
    /// matter how often a client re-handshakes.
    pub fn create_or_reuse_session(&self, public_key: &str, domain: &str) -> Session {
        let now = now_ms();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = sessions
            .values()
            .find(|s| s.public_key == public_key && s.expires_at > now)
        {
            return existing.clone();
        }

        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            public_key: public_key.to_string(),
            domain: domain.to_string(),
            established_at: now,
            expires_at: now + SESSION_TTL_MS,
        };
        log::info!(
            "Established session {} for domain {domain} (expires {})",
            session.session_id,
            session.expires_at
        );
        sessions.insert(session.session_id.clone(), session.clone());
        session
    }

    /// Look up a session by id.
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Validate a signed action against its session, consuming its nonce.
    ///
    /// Returns `true` exactly once per `(session_id, nonce)` pair. The
    /// nonce is only consumed when every other check passes.
    pub fn validate_action(&self, action: &SignedAction) -> bool {
        let now = now_ms();

        if action.session_id.is_empty()
            || action.action.is_empty()
            || action.element_id.is_empty()
            || action.nonce.is_empty()
            || action.timestamp == 0
        {
            return false;
        }

        let session_ok = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            match sessions.get(&action.session_id) {
                Some(session) => session.expires_at > now,
                None => false,
            }
        };
        if !session_ok {
            return false;
        }

        // Past-staleness bound only: a timestamp ahead of `now` saturates
        // to age 0 and passes.
        if now.saturating_sub(action.timestamp) >= ACTION_MAX_AGE_MS {
            return false;
        }

        // Atomic check-and-record: two concurrent validations of the same
        // nonce cannot both observe "unused".
        let nonce_key = (action.session_id.clone(), action.nonce.clone());
        self.used_nonces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(nonce_key)
    }

    /// Remove all expired sessions and their consumed nonces.
    ///
    /// Not scheduled by this subsystem — deployments invoke it explicitly.
    pub fn cleanup_expired_sessions(&self) -> usize {
        let now = now_ms();
        let removed_ids: Vec<String> = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            let expired: Vec<String> = sessions
                .values()
                .filter(|s| s.expires_at < now)
                .map(|s| s.session_id.clone())
                .collect();
            for id in &expired {
                sessions.remove(id);
            }
            expired
        };

        if !removed_ids.is_empty() {
            let mut nonces = self.used_nonces.lock().unwrap_or_else(|e| e.into_inner());
            nonces.retain(|(session_id, _)| !removed_ids.contains(session_id));
        }

        log::info!("Session cleanup removed {} expired sessions", removed_ids.len());
        removed_ids.len()
    }

    /// Number of sessions currently in the table (active and expired).
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for SessionAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
