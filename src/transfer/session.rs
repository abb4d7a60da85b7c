//! Session tokens
//!
//! Every request between machines carries `time` and `session` fields,
//! where `session = sha256(time ++ secret)`. Tokens are recomputed with a
//! fresh timestamp on every retry attempt, so a token captured during a
//! long retry window is useless outside its drift allowance.

use sha2::{Digest, Sha256};

/// Seconds a presented timestamp may differ from the server clock
const MAX_CLOCK_DRIFT: u64 = 600;

/// Computes the session token for a given timestamp and shared secret
pub fn session_token(time: u64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(time.to_string().as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verifies a presented `(time, session)` pair against the shared secret
///
/// Rejects tokens whose timestamp is more than [`MAX_CLOCK_DRIFT`] seconds
/// away from `now`, in either direction.
pub fn verify_session(time: u64, session: &str, secret: &str, now: u64) -> bool {
    let drift = now.abs_diff(time);
    if drift > MAX_CLOCK_DRIFT {
        return false;
    }
    // Hex strings are constant length, so plain comparison is fine here
    session_token(time, secret) == session
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_token_accepted() {
        let token = session_token(1_700_000_000, "swordfish");
        assert!(verify_session(1_700_000_000, &token, "swordfish", 1_700_000_030));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = session_token(1_700_000_000, "swordfish");
        assert!(!verify_session(1_700_000_000, &token, "tuna", 1_700_000_030));
    }

    #[test]
    fn test_stale_token_rejected() {
        let token = session_token(1_700_000_000, "swordfish");
        assert!(!verify_session(
            1_700_000_000,
            &token,
            "swordfish",
            1_700_000_000 + MAX_CLOCK_DRIFT + 1
        ));
    }

    #[test]
    fn test_future_token_rejected() {
        let token = session_token(1_700_001_000, "swordfish");
        assert!(!verify_session(1_700_001_000, &token, "swordfish", 1_700_000_000));
    }

    #[test]
    fn test_token_changes_with_time() {
        assert_ne!(
            session_token(1, "swordfish"),
            session_token(2, "swordfish")
        );
    }
}
