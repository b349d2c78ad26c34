//! Session key minting and validation.
//!
//! Keys are opaque to the pool, but they also name a directory on disk, so
//! only a conservative character set is accepted.  Keys minted for an owner
//! follow `user_<ownerId>_<unixMillis>`, which lets the owner be recovered
//! from a persisted directory name after a restart.

use chrono::Utc;

use crate::error::SessionError;

const OWNER_PREFIX: &str = "user_";
const MAX_KEY_LEN: usize = 128;

/// Mint a fresh session key for `owner_id`.
pub fn mint_session_key(owner_id: &str) -> Result<String, SessionError> {
    let key = format!("{OWNER_PREFIX}{owner_id}_{}", Utc::now().timestamp_millis());
    validate_session_key(&key)?;
    Ok(key)
}

/// Recover the owner id from a key produced by [`mint_session_key`].
///
/// Returns `None` for keys that do not follow the owner template.
pub fn owner_of(session_key: &str) -> Option<&str> {
    let rest = session_key.strip_prefix(OWNER_PREFIX)?;
    let (owner, stamp) = rest.rsplit_once('_')?;
    if owner.is_empty() || stamp.is_empty() || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(owner)
}

/// Reject keys that cannot safely name a session directory.
pub fn validate_session_key(session_key: &str) -> Result<(), SessionError> {
    let invalid = |reason| SessionError::InvalidKey {
        key: session_key.to_owned(),
        reason,
    };

    if session_key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if session_key.len() > MAX_KEY_LEN {
        return Err(invalid("key is longer than 128 bytes"));
    }
    if session_key.starts_with('.') {
        return Err(invalid("key must not start with '.'"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '@');
    if !session_key.chars().all(allowed) {
        return Err(invalid("key may only contain ASCII letters, digits and _-.:@"));
    }
    Ok(())
}
