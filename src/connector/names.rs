//! Display names for newly deployed instances.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default display-name prefix.
pub const DEFAULT_DISPLAY_NAME_PREFIX: &str = "AD_";

/// Generates `<prefix><epoch millis><counter>` names.
///
/// Build one per process and hand every connector an `Arc` of it: the
/// counter is what keeps names unique within a millisecond, so connectors
/// holding separate generators can collide.
#[derive(Debug, Default)]
pub struct DisplayNames {
    counter: AtomicU64,
}

impl DisplayNames {
    /// Creates a generator whose counter starts at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the next name carrying `prefix`.
    #[must_use]
    pub fn next_name(&self, prefix: &str) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        format!("{prefix}{millis}{count}")
    }
}
