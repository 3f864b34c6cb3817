//! Cross-thread teardown for an exchange in flight.
//!
//! The worker thread owns the exchange and its connection, so the caller
//! cannot reach them directly. Instead both sides share an `AbortSignal`:
//! the transport registers teardown hooks (for a TCP socket, a `shutdown`)
//! and the caller fires them from any thread. A blocked read then returns
//! at once instead of waiting for the server or the read timeout.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type Hook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    aborted: bool,
    hooks: Vec<Hook>,
}

/// Fired at most once; hooks registered afterwards run immediately.
#[derive(Default)]
pub struct AbortSignal {
    state: Mutex<State>,
}

impl AbortSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark aborted and run every registered hook. Later calls do nothing.
    pub fn abort(&self) {
        let hooks = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.aborted {
                return;
            }
            state.aborted = true;
            std::mem::take(&mut state.hooks)
        };
        for hook in hooks {
            hook();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).aborted
    }

    /// Register `hook` to run on abort. If the signal already fired, the
    /// hook runs now and this returns false.
    pub fn on_abort(&self, hook: impl FnOnce() + Send + 'static) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.aborted {
            drop(state);
            hook();
            return false;
        }
        state.hooks.push(Box::new(hook));
        true
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("AbortSignal")
            .field("aborted", &state.aborted)
            .field("hooks", &state.hooks.len())
            .finish()
    }
}
