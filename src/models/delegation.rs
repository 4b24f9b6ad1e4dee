//! Bookkeeping for capabilities issued by the content store.

use chrono::{DateTime, Utc};

/// A capability the content store has issued and may later revoke.
///
/// Stored alongside share links so revocation keeps working across
/// restarts. `revoked` only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationRecord {
    pub id: String,
    pub audience: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl DelegationRecord {
    /// Past its expiry at `now`; the capability is dead whatever its
    /// revocation state.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
