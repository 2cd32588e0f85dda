use std::sync::Arc;
use tokio::sync::watch;

/// Shared "address acquired" bit.
///
/// Set by the address handler, cleared by the station handler on disconnect,
/// readable and awaitable from any thread. Cloning shares the same bit.
///
/// Outside the crate the flag can only be read or awaited:
///
/// ```compile_fail
/// let flag = staweave::ConnectivityFlag::new();
/// flag.set();
/// ```
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
    state: Arc<watch::Sender<bool>>,
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    pub(crate) fn set(&self) {
        self.update(true);
    }

    pub(crate) fn clear(&self) {
        self.update(false);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the flag is set (immediately if it already is)
    pub async fn wait_set(&self) {
        self.wait_for(true).await;
    }

    /// Resolve once the flag is cleared (immediately if it already is)
    pub async fn wait_cleared(&self) {
        self.wait_for(false).await;
    }

    fn update(&self, value: bool) {
        self.state.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    async fn wait_for(&self, value: bool) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|current| *current == value).await;
    }
}
