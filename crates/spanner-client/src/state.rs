//! Connection state and change notifications.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Lifecycle state of a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not open. Initial state, and the state after `close`.
    #[default]
    Closed,
    /// `open` is in progress.
    Connecting,
    /// Sessions can be acquired.
    Open,
    /// The last `open` failed.
    Broken,
}

impl ConnectionState {
    /// Whether sessions may be acquired in this state.
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Broken => "broken",
        };
        f.write_str(name)
    }
}

/// A state transition, as delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub current: ConnectionState,
}

type Listener = Arc<dyn Fn(StateChange) + Send + Sync>;

/// Registered state-change callbacks.
///
/// Callbacks run synchronously on the task that caused the transition,
/// after the state has been updated and with no connection lock held.
#[derive(Default)]
pub(crate) struct StateListeners {
    listeners: Mutex<Vec<Listener>>,
}

impl StateListeners {
    pub(crate) fn add(&self, listener: Listener) {
        self.listeners.lock().push(listener);
    }

    pub(crate) fn notify(&self, change: StateChange) {
        if change.previous == change.current {
            return;
        }
        tracing::debug!(from = %change.previous, to = %change.current, "connection state changed");
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(change);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl fmt::Debug for StateListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateListeners")
            .field("count", &self.len())
            .finish()
    }
}
