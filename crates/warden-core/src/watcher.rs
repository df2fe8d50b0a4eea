//! Watcher/dispatcher hooks (spec.md §6.3): optional notification points an
//! [`crate::enforcer::Enforcer`] calls after a policy mutation it performed
//! itself, or after noticing another process changed policy out from
//! under it. Transports (Redis pub/sub, etcd, ...) are explicitly out of
//! scope (spec.md §1); only the trait boundary lives here.

use async_trait::async_trait;

/// Notified after a local mutation, and responsible for telling this
/// process to reload when some other process's mutation is observed.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Called after any local policy mutation completes successfully, so
    /// the watcher can propagate it (e.g. publish on a channel other
    /// enforcer instances subscribe to).
    async fn update(&self);

    /// A finer-grained hook for add-policy specifically; the default
    /// forwards to [`Watcher::update`]. Implementations that can describe
    /// exactly what was added (for a more efficient remote update) may
    /// override it.
    async fn update_for_add_policy(&self, _ptype: &str, _rule: &[String]) {
        self.update().await;
    }
}

/// Notified with the specific mutation that occurred, for callers that
/// want to replicate the mutation itself rather than trigger a full
/// reload (spec.md §6.3's distinction from `Watcher`).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn add_policies(&self, ptype: &str, rules: &[Vec<String>]);
    async fn remove_policies(&self, ptype: &str, rules: &[Vec<String>]);
    async fn update_policies(&self, ptype: &str, old: &[Vec<String>], new: &[Vec<String>]);
    async fn clear_policy(&self);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWatcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Watcher for CountingWatcher {
        async fn update(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn default_update_for_add_policy_forwards_to_update() {
        let watcher = CountingWatcher::default();
        watcher.update_for_add_policy("p", &["alice".to_owned()]).await;
        assert_eq!(watcher.calls.load(Ordering::SeqCst), 1);
    }
}
