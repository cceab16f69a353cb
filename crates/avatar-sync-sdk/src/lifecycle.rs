//! SDK lifecycle management
//!
//! Login and logout of the local player are first-level lifecycle events;
//! every registered hook is notified in registration order.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle callback hook
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// The local player logged in
    async fn on_login(&self) -> Result<()>;

    /// The local player logged out
    async fn on_logout(&self) -> Result<()>;
}

/// Lifecycle manager
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ lifecycle hook registered: {} total", self.hooks.len());
    }

    /// Runs every hook even if one fails; returns the first error.
    pub async fn notify_login(&self) -> Result<()> {
        info!("notifying all modules: login");

        let mut errors = Vec::new();
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_login().await {
                warn!("hook #{} failed on login: {}", index, e);
                errors.push(e);
            }
        }
        Self::first_error(errors, "login")
    }

    /// Runs every hook even if one fails; returns the first error.
    pub async fn notify_logout(&self) -> Result<()> {
        info!("notifying all modules: logout");

        let mut errors = Vec::new();
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_logout().await {
                warn!("hook #{} failed on logout: {}", index, e);
                errors.push(e);
            }
        }
        Self::first_error(errors, "logout")
    }

    fn first_error(errors: Vec<crate::error::SyncError>, phase: &str) -> Result<()> {
        let failed = errors.len();
        match errors.into_iter().next() {
            Some(first) => {
                warn!("{} hooks failed on {}, all hooks were run", failed, phase);
                Err(first)
            }
            None => {
                info!("✅ all modules handled {}", phase);
                Ok(())
            }
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use parking_lot::Mutex;

    struct RecordingHook {
        name: &'static str,
        fail: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LifecycleHook for RecordingHook {
        async fn on_login(&self) -> Result<()> {
            self.calls.lock().push(format!("{}:login", self.name));
            if self.fail {
                return Err(SyncError::Other(self.name.to_string()));
            }
            Ok(())
        }

        async fn on_logout(&self) -> Result<()> {
            self.calls.lock().push(format!("{}:logout", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_first_error_wins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut manager = LifecycleManager::new();
        for (name, fail) in [("a", true), ("b", true), ("c", false)] {
            manager.register_hook(Arc::new(RecordingHook {
                name,
                fail,
                calls: calls.clone(),
            }));
        }
        assert_eq!(manager.hook_count(), 3);

        match manager.notify_login().await {
            Err(SyncError::Other(name)) => assert_eq!(name, "a"),
            other => panic!("unexpected result: {:?}", other),
        }
        manager.notify_logout().await.unwrap();
        assert_eq!(
            *calls.lock(),
            vec!["a:login", "b:login", "c:login", "a:logout", "b:logout", "c:logout"]
        );
    }
}
