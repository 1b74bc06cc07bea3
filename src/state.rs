use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-invocation state shared between the review loop, the pipeline stages
/// and the Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    cancel_flag: Arc<AtomicBool>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel_flag.clone()
    }

    pub fn mark_cancelled(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Clears a cancel request, e.g. after the reviewer declined to abort.
    pub fn reset_cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel_flag.store(false, Ordering::Relaxed);
        self.cancel_flag.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_through_shared_flag() {
        let state = SessionState::new();
        let flag = state.cancel_flag();

        state.mark_cancelled();

        assert!(flag.load(Ordering::Relaxed));
        assert!(state.is_cancelled());
    }

    #[test]
    fn reset_clears_cancel_and_sessions_are_distinct() {
        let a = SessionState::new();
        let b = SessionState::new();
        a.mark_cancelled();

        let flag = a.reset_cancel_flag();

        assert!(!flag.load(Ordering::Relaxed));
        assert!(!b.is_cancelled());
        assert_ne!(a.session_id, b.session_id);
    }
}
