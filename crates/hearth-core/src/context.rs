//! Scoped execution context.
//!
//! Every call into module code runs inside a [`Frame`] naming the module and
//! the loader that owns its code. Entering a frame returns a [`ContextGuard`];
//! dropping the guard restores whatever frame was active before, on success,
//! error, or panic unwind alike.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type InterruptHook = Box<dyn Fn() + Send + Sync>;

/// Best-effort cancellation signal for one module invocation.
///
/// Module code may poll [`Interrupt::is_cancelled`]; code that cannot poll
/// (e.g. compiled WASM) registers a hook that forces it to stop.
#[derive(Clone, Default)]
pub struct Interrupt {
    token: CancellationToken,
    hooks: Arc<Mutex<Vec<InterruptHook>>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a hook run on cancellation. Runs immediately if already cancelled.
    pub fn on_interrupt(&self, hook: impl Fn() + Send + Sync + 'static) {
        if self.token.is_cancelled() {
            hook();
            return;
        }
        self.hooks.lock().push(Box::new(hook));
    }

    /// Cancel the invocation and fire every registered hook once.
    pub fn trigger(&self) {
        self.token.cancel();
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }
    }
}

/// The module/loader pair that module code is currently running under.
#[derive(Clone)]
pub struct Frame {
    pub module: String,
    pub loader_id: u64,
    pub interrupt: Interrupt,
}

thread_local! {
    static CURRENT: RefCell<Option<Frame>> = const { RefCell::new(None) };
}

/// Restores the previous frame when dropped.
#[must_use = "the frame is only active while the guard is alive"]
pub struct ContextGuard {
    previous: Option<Frame>,
}

impl ContextGuard {
    pub fn enter(frame: Frame) -> Self {
        let previous = CURRENT.with(|c| c.borrow_mut().replace(frame));
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

/// Snapshot of the active frame on this thread.
pub fn current() -> Option<Frame> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Name of the module whose code is running on this thread, if any.
pub fn current_module() -> Option<String> {
    CURRENT.with(|c| c.borrow().as_ref().map(|f| f.module.clone()))
}

/// Whether the active invocation on this thread has been cancelled.
pub fn is_cancelled() -> bool {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .is_some_and(|f| f.interrupt.is_cancelled())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(name: &str, id: u64) -> Frame {
        Frame {
            module: name.into(),
            loader_id: id,
            interrupt: Interrupt::new(),
        }
    }

    #[test]
    fn guard_restores_previous_frame() {
        assert!(current().is_none());
        {
            let _outer = ContextGuard::enter(frame("outer", 1));
            {
                let _inner = ContextGuard::enter(frame("inner", 2));
                assert_eq!(current_module().as_deref(), Some("inner"));
            }
            assert_eq!(current().map(|f| f.loader_id), Some(1));
        }
        assert!(current().is_none());
    }

    #[test]
    fn guard_restores_after_panic() {
        let result = std::panic::catch_unwind(|| {
            let _g = ContextGuard::enter(frame("boom", 7));
            panic!("module blew up");
        });
        assert!(result.is_err());
        assert!(current().is_none());
    }

    #[test]
    fn interrupt_runs_hooks_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let interrupt = Interrupt::new();
        let f = fired.clone();
        interrupt.on_interrupt(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        interrupt.trigger();
        interrupt.trigger();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(interrupt.is_cancelled());
    }

    #[test]
    fn late_hook_fires_immediately() {
        let fired = Arc::new(AtomicUsize::new(0));
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let f = fired.clone();
        interrupt.on_interrupt(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn is_cancelled_reads_active_frame() {
        let f = frame("m", 3);
        let interrupt = f.interrupt.clone();
        let _g = ContextGuard::enter(f);
        assert!(!is_cancelled());
        interrupt.trigger();
        assert!(is_cancelled());
    }
}
