//! Mutable session provider for tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use wavelink_realtime_client::SessionProvider;

/// A session whose token and expiry flip mid-test
pub struct ToggleSession {
    token: Mutex<Option<String>>,
    expired: AtomicBool,
}

impl ToggleSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
            expired: AtomicBool::new(false),
        }
    }

    /// Replace the held token
    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token.into());
        }
    }

    /// Drop the token entirely (no session held)
    pub fn clear_token(&self) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = None;
        }
    }

    /// Mark the held token expired or valid
    pub fn set_expired(&self, expired: bool) {
        self.expired.store(expired, Ordering::SeqCst);
    }
}

impl SessionProvider for ToggleSession {
    fn current_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}
