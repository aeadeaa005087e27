//! Cooperative cancellation shared by the executor, runners and transactions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable cancellation flag.
///
/// A token can optionally be linked to a process-wide static flag (set from a
/// signal handler), in which case it reports cancelled when either is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    linked: Option<&'static AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that also observes a static flag.
    pub fn linked_to(flag: &'static AtomicBool) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            linked: Some(flag),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.linked.is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_linked_flag() {
        static FLAG: AtomicBool = AtomicBool::new(false);
        let token = CancelToken::linked_to(&FLAG);
        assert!(!token.is_cancelled());
        FLAG.store(true, Ordering::SeqCst);
        assert!(token.is_cancelled());
        FLAG.store(false, Ordering::SeqCst);
    }
}
