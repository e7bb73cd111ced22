//! Per-device cancellation registry.
//!
//! Every device operation runs under a token owned by this registry, so
//! deleting a device can cancel its in-flight I/O before the row delete
//! commits. Late replies after cancellation are discarded by the callers.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Registry handing out one cancellation token per device.
pub struct DeviceTokens {
    root: CancellationToken,
    tokens: Mutex<HashMap<i64, CancellationToken>>,
}

impl DeviceTokens {
    /// Registry whose tokens are all children of `root` (typically the
    /// process shutdown token).
    #[must_use]
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Token for a device, created on first use.
    #[must_use]
    pub fn token_for(&self, device_id: i64) -> CancellationToken {
        let mut tokens = match self.tokens.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tokens
            .entry(device_id)
            .or_insert_with(|| self.root.child_token())
            .clone()
    }

    /// Cancel and drop a device's token; subsequent operations get a fresh
    /// one.
    pub fn cancel(&self, device_id: i64) {
        let mut tokens = match self.tokens.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(token) = tokens.remove(&device_id) {
            token.cancel();
        }
    }
}
