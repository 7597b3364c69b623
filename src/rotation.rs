//! Round-robin credential rotation.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered set of API credentials for one provider.
///
/// The cursor is shared by every lookup that goes through the pool, so
/// overlapping calls spread their requests across keys. Two concurrent
/// callers may occasionally observe the same credential; that is harmless.
#[derive(Debug, Default)]
pub struct CredentialPool {
    credentials: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    /// Create a pool that hands out `credentials` in insertion order.
    pub fn new(credentials: Vec<String>) -> Self {
        Self {
            credentials,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Return the credential under the cursor and advance it.
    ///
    /// Returns `None` for an empty pool.
    pub fn next(&self) -> Option<&str> {
        let len = self.credentials.len();
        if len == 0 {
            return None;
        }

        // The closure never declines, so both arms carry the previous value.
        let index = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);

        self.credentials.get(index % len).map(String::as_str)
    }

    /// Number of configured credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether the pool holds no credentials.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl From<Vec<String>> for CredentialPool {
    fn from(credentials: Vec<String>) -> Self {
        Self::new(credentials)
    }
}
