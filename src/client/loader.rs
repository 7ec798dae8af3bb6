//! Global loading indicator state.
//!
//! In-flight calls are tracked in an arena keyed by call id; the indicator is
//! visible while the arena is non-empty or a manual [`show_loader`] is active.
//! Overlapping calls therefore collapse into one visible period: shown when the
//! first call starts, hidden when the last one ends.
//!
//! [`show_loader`]: LoadingCoordinator::show_loader

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::watch;

/// URL substrings that never drive the indicator: background session checks
/// and framework-internal traffic.
pub const DEFAULT_BYPASS: [&str; 3] = ["/api/auth/me", "/_next/", "/health"];

static GLOBAL: Lazy<Arc<LoadingCoordinator>> =
    Lazy::new(|| LoadingCoordinator::new(DEFAULT_BYPASS.iter().map(|s| s.to_string())));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(u64);

/// What the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderState {
    pub visible: bool,
    pub message: Option<String>,
}

#[derive(Default)]
struct Arena {
    next_id: u64,
    active: BTreeMap<CallId, Option<String>>,
    manual: Option<Option<String>>,
}

impl Arena {
    fn snapshot(&self) -> LoaderState {
        let visible = self.manual.is_some() || !self.active.is_empty();
        let message = match &self.manual {
            Some(Some(m)) => Some(m.clone()),
            _ => self.active.values().find_map(Clone::clone),
        };
        LoaderState { visible, message }
    }
}

pub struct LoadingCoordinator {
    arena: Mutex<Arena>,
    state: watch::Sender<LoaderState>,
    bypass: Vec<String>,
}

impl LoadingCoordinator {
    #[must_use]
    pub fn new(bypass: impl IntoIterator<Item = String>) -> Arc<Self> {
        let (state, _) = watch::channel(LoaderState::default());
        Arc::new(Self {
            arena: Mutex::new(Arena::default()),
            state,
            bypass: bypass.into_iter().collect(),
        })
    }

    /// Process-wide coordinator, created on first use with [`DEFAULT_BYPASS`].
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    /// Whether calls to `url` skip the coordinator.
    #[must_use]
    pub fn is_bypassed(&self, url: &str) -> bool {
        self.bypass.iter().any(|b| url.contains(b.as_str()))
    }

    /// Register one in-flight call. The indicator stays up until the guard drops.
    #[must_use]
    pub fn acquire(self: &Arc<Self>, message: Option<String>) -> LoaderGuard {
        let id = self.update(|arena| {
            let id = CallId(arena.next_id);
            arena.next_id += 1;
            arena.active.insert(id, message);
            id
        });
        LoaderGuard {
            id,
            coordinator: self.clone(),
        }
    }

    /// Acquire for `url` unless it is allow-listed.
    #[must_use]
    pub fn track(self: &Arc<Self>, url: &str) -> Option<LoaderGuard> {
        if self.is_bypassed(url) {
            return None;
        }
        Some(self.acquire(None))
    }

    /// Force the indicator on, independently of tracked calls.
    pub fn show_loader(&self, message: Option<String>) {
        self.update(|arena| arena.manual = Some(message));
    }

    /// Drop the manual show. Tracked calls still keep the indicator up.
    pub fn hide_loader(&self) {
        self.update(|arena| arena.manual = None);
    }

    #[must_use]
    pub fn state(&self) -> LoaderState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoaderState> {
        self.state.subscribe()
    }

    /// Number of tracked calls in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.arena.lock().active.len()
    }

    fn release(&self, id: CallId) {
        self.update(|arena| {
            arena.active.remove(&id);
        });
    }

    /// Mutate the arena and publish the new state only if it changed.
    fn update<R>(&self, f: impl FnOnce(&mut Arena) -> R) -> R {
        let mut arena = self.arena.lock();
        let out = f(&mut arena);
        let next = arena.snapshot();
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.visible != next.visible {
                tracing::trace!(visible = next.visible, "Loader visibility changed");
            }
            *current = next;
            true
        });
        out
    }
}

/// Releases its call slot on drop, whether the call succeeded or failed.
#[must_use = "dropping the guard ends the tracked call"]
pub struct LoaderGuard {
    id: CallId,
    coordinator: Arc<LoadingCoordinator>,
}

impl LoaderGuard {
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Drop for LoaderGuard {
    fn drop(&mut self) {
        self.coordinator.release(self.id);
    }
}

impl std::fmt::Debug for LoaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderGuard").field("id", &self.id).finish()
    }
}
