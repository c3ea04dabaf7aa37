//! Cooperative cancellation handle (spec §3, §5).
//!
//! Checked between endpoints during a pull and between tar entries during
//! extraction — never inside a single blocking syscall. Cloning shares the
//! same flag; there is exactly one flag per logical operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}
