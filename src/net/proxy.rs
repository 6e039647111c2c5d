//! Round-robin proxy selection.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out proxies from a fixed pool in order, wrapping around.
///
/// The cursor is a single atomic counter, so concurrent callers each get a
/// distinct slot in the sequence. An empty pool means direct connections.
#[derive(Debug, Default)]
pub struct ProxyRotator {
    pool: Vec<String>,
    cursor: AtomicUsize,
}

impl ProxyRotator {
    pub fn new(pool: Vec<String>) -> Self {
        Self {
            pool,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next(&self) -> Option<&str> {
        if self.pool.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        Some(self.pool[i].as_str())
    }
}
