//! The host's main execution context.
//!
//! External collaborators (command and permission tables, listener
//! callbacks) expect a single writer. Every mutation of them is queued onto
//! one dedicated `hearth-main` thread, whichever thread asked for it.

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread::{JoinHandle, ThreadId};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use hearth_core::{HearthError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct MainContext {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MainContext {
    pub fn start() -> Result<std::sync::Arc<Self>> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("hearth-main".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
                debug!("main context stopped");
            })?;
        Ok(std::sync::Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Whether the calling thread is the main context.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    fn submit(&self, job: Job) -> Result<()> {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| HearthError::Other(anyhow::anyhow!("main context has shut down")))?;
        sender
            .send(job)
            .map_err(|_| HearthError::Other(anyhow::anyhow!("main context has shut down")))
    }

    /// Run `f` on the main context and await its result. Runs inline when
    /// already there. A panic in `f` is returned as an error.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return guarded(f);
        }
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = tx.send(guarded(f));
        }))?;
        rx.await
            .map_err(|_| HearthError::Other(anyhow::anyhow!("main context dropped the job")))?
    }

    /// Blocking variant for synchronous callers outside the async runtime.
    pub fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return guarded(f);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit(Box::new(move || {
            let _ = tx.send(guarded(f));
        }))?;
        rx.recv()
            .map_err(|_| HearthError::Other(anyhow::anyhow!("main context dropped the job")))?
    }

    /// Stop accepting jobs and let the thread drain its queue.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if self.is_current() {
                return;
            }
            if handle.join().is_err() {
                warn!("main context thread panicked");
            }
        }
    }
}

fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        Err(HearthError::Other(anyhow::anyhow!(
            "main context job panicked: {}",
            crate::sandbox::panic_message(panic.as_ref())
        )))
    })
}
