//! Foreground visibility of the host application
//!
//! Analysis is heavy, so it only starts while the host is in the foreground.
//! Hosts with a lifecycle feed a [`ForegroundSignal`]; headless services use
//! [`AlwaysForeground`].

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub type ForegroundCallback = Box<dyn Fn(bool) + Send + Sync>;

pub trait ForegroundState: Send + Sync {
    fn is_foreground(&self) -> bool;

    /// Register `callback`, called with the new state on every change.
    fn on_foreground_changed(&self, callback: ForegroundCallback);
}

/// Never backgrounded; callbacks are dropped since they can never fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysForeground;

impl ForegroundState for AlwaysForeground {
    fn is_foreground(&self) -> bool {
        true
    }

    fn on_foreground_changed(&self, _callback: ForegroundCallback) {}
}

/// In-memory visibility flag driven by the host's lifecycle hooks.
pub struct ForegroundSignal {
    foreground: AtomicBool,
    callbacks: Mutex<Vec<Arc<dyn Fn(bool) + Send + Sync>>>,
}

impl std::fmt::Debug for ForegroundSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundSignal")
            .field("foreground", &self.is_foreground())
            .finish_non_exhaustive()
    }
}

impl ForegroundSignal {
    #[must_use]
    pub fn new(foreground: bool) -> Self {
        Self { foreground: AtomicBool::new(foreground), callbacks: Mutex::new(Vec::new()) }
    }

    /// Record a visibility change. Callbacks run on the calling thread, and
    /// only when the state actually changes.
    pub fn set_foreground(&self, foreground: bool) {
        if self.foreground.swap(foreground, Ordering::SeqCst) == foreground {
            return;
        }
        debug!("Host moved to {}", if foreground { "foreground" } else { "background" });
        let callbacks =
            self.callbacks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        for callback in callbacks {
            callback(foreground);
        }
    }
}

impl ForegroundState for ForegroundSignal {
    fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    fn on_foreground_changed(&self, callback: ForegroundCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Arc::from(callback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callbacks_only_on_change() {
        let signal = ForegroundSignal::new(false);
        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        signal.on_foreground_changed(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        signal.set_foreground(false);
        assert_eq!(changes.load(Ordering::SeqCst), 0);
        signal.set_foreground(true);
        signal.set_foreground(true);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert!(signal.is_foreground());
        signal.set_foreground(false);
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_may_reenter() {
        let signal = Arc::new(ForegroundSignal::new(true));
        let inner = Arc::clone(&signal);
        let observed = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&observed);
        signal.on_foreground_changed(Box::new(move |_| {
            flag.store(inner.is_foreground(), Ordering::SeqCst);
        }));
        signal.set_foreground(false);
        assert!(!observed.load(Ordering::SeqCst));
    }
}
