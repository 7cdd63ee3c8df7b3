//! Execution contexts used by the capture pipeline.
//!
//! Three contexts cooperate: a dedicated timer runtime that owns tick
//! scheduling, a capture-worker thread owned by the device, and a
//! UI-affinity looper that is the only place sessions are bound/unbound.

use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, warn};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to spawn context thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build timer runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Runs every task immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// Named thread draining a FIFO task queue.
pub struct LooperThread {
    name: String,
    tx: Mutex<Option<Sender<Task>>>,
    handle: Option<JoinHandle<()>>,
}

impl LooperThread {
    pub fn spawn(name: &str) -> Result<Self, ContextError> {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in rx {
                    task();
                }
            })
            .map_err(|source| ContextError::Spawn {
                name: name.to_string(),
                source,
            })?;
        debug!(name, "Looper thread started");
        Ok(Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops accepting tasks. Already queued tasks still run.
    pub fn quit(&self) {
        let mut tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if tx.take().is_some() {
            debug!(name = %self.name, "Looper thread quitting");
        }
    }
}

impl Dispatcher for LooperThread {
    fn dispatch(&self, task: Task) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let delivered = match tx.as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        };
        if !delivered {
            warn!(name = %self.name, "Task dispatched to a stopped looper was dropped");
        }
    }
}

impl Drop for LooperThread {
    fn drop(&mut self) {
        self.quit();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Dedicated single-worker runtime that owns tick scheduling.
pub struct TimerContext {
    runtime: Runtime,
}

impl TimerContext {
    pub fn new(thread_name: &str) -> Result<Self, ContextError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(thread_name)
            .enable_all()
            .build()
            .map_err(ContextError::Runtime)?;
        Ok(Self { runtime })
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
