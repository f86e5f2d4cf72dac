//! Hands blocking driver work to a worker pool and delivers each outcome
//! back on the caller's thread.
//!
//! A [`Dispatcher`] belongs to one caller thread (it is `!Sync`). Work is
//! submitted as a [`WorkUnit`] whose closure owns copies of all its inputs
//! and a strong reference to the connection or statement it touches. The
//! worker never runs the continuation: outcomes are queued and delivered
//! when the caller drives the dispatcher with [`Dispatcher::run_pending`]
//! or [`Dispatcher::run_until_idle`].
//!
//! Callers must not submit a second unit against a connection or statement
//! whose previous unit has not completed. The dispatcher does not detect
//! this.

use crate::engine::config::DispatcherConfig;
use crate::error::{OdbcError, Result};
use log::{debug, error, warn};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Strong reference held until a unit's continuation has run.
pub type KeepAlive = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    Open,
    Close,
    Query,
    CreateStatement,
    BeginTransaction,
    EndTransaction,
    SetIsolationLevel,
    Tables,
    Columns,
    Prepare,
    Bind,
    Execute,
    ExecuteDirect,
}

/// One asynchronous operation: its kind, the closure that performs it on a
/// worker, and the objects it keeps alive.
pub struct WorkUnit<W> {
    kind: WorkKind,
    work: W,
    keep_alive: Vec<KeepAlive>,
}

impl<W> WorkUnit<W> {
    pub fn new(kind: WorkKind, work: W) -> Self {
        Self {
            kind,
            work,
            keep_alive: Vec::new(),
        }
    }

    pub fn keep_alive(mut self, owner: KeepAlive) -> Self {
        self.keep_alive.push(owner);
        self
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }
}

struct Completion {
    id: u64,
    outcome: Box<dyn Any + Send>,
}

struct Pending {
    kind: WorkKind,
    deliver: Box<dyn FnOnce(Box<dyn Any + Send>)>,
    _keep_alive: Vec<KeepAlive>,
}

pub struct Dispatcher {
    runtime: Runtime,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    pending: RefCell<HashMap<u64, Pending>>,
    next_id: Cell<u64>,
}

impl Dispatcher {
    pub fn new() -> Result<Self> {
        Self::with_config(&DispatcherConfig::default())
    }

    pub fn with_config(config: &DispatcherConfig) -> Result<Self> {
        let threads = config.worker_threads();
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("odbc-worker")
            .build()
            .map_err(|e| OdbcError::InternalError(format!("Failed to create worker pool: {}", e)))?;
        let (sender, receiver) = channel();
        debug!("dispatcher started with {} workers", threads);
        Ok(Self {
            runtime,
            sender,
            receiver,
            pending: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        })
    }

    /// Queues `unit` on the worker pool. `continuation` runs later, on this
    /// thread, with the unit's outcome. Driver failures arrive as `Err`
    /// values; a panic inside the unit arrives as an internal error.
    pub fn submit<T, W, C>(&self, unit: WorkUnit<W>, continuation: C)
    where
        T: Send + 'static,
        W: FnOnce() -> Result<T> + Send + 'static,
        C: FnOnce(Result<T>) + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let WorkUnit {
            kind,
            work,
            keep_alive,
        } = unit;

        let deliver = Box::new(move |outcome: Box<dyn Any + Send>| {
            let result = match outcome.downcast::<Result<T>>() {
                Ok(result) => *result,
                Err(_) => Err(OdbcError::InternalError(format!(
                    "{:?} produced an outcome of the wrong type",
                    kind
                ))),
            };
            continuation(result);
        });
        self.pending.borrow_mut().insert(
            id,
            Pending {
                kind,
                deliver,
                _keep_alive: keep_alive,
            },
        );

        let sender = self.sender.clone();
        self.runtime.spawn_blocking(move || {
            debug!("work unit {} ({:?}) started", id, kind);
            let outcome: Result<T> = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                error!("work unit {} ({:?}) panicked: {}", id, kind, message);
                Err(OdbcError::InternalError(format!(
                    "{:?} worker panicked: {}",
                    kind, message
                )))
            });
            debug!("work unit {} ({:?}) finished", id, kind);
            if sender
                .send(Completion {
                    id,
                    outcome: Box::new(outcome),
                })
                .is_err()
            {
                warn!("work unit {} ({:?}) completed after dispatcher shutdown", id, kind);
            }
        });
    }

    /// Units submitted whose continuation has not run yet.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Delivers every outcome that is already available, without blocking.
    /// Returns the number of continuations run.
    pub fn run_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            self.deliver(completion);
            delivered += 1;
        }
        delivered
    }

    /// Blocks until one outcome is available and delivers it. Returns
    /// `false` when nothing is pending.
    pub fn run_one(&self) -> bool {
        if self.pending() == 0 {
            return false;
        }
        match self.receiver.recv() {
            Ok(completion) => {
                self.deliver(completion);
                true
            }
            Err(_) => false,
        }
    }

    /// Runs continuations until no unit is pending, including units
    /// submitted by continuations. Returns the number delivered.
    pub fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        while self.run_one() {
            delivered += 1;
        }
        delivered
    }

    fn deliver(&self, completion: Completion) {
        // release the borrow before user code runs; it may submit more work
        let entry = self.pending.borrow_mut().remove(&completion.id);
        match entry {
            Some(pending) => {
                debug!("delivering work unit {} ({:?})", completion.id, pending.kind);
                (pending.deliver)(completion.outcome);
                // keep-alive references drop here, after the continuation
            }
            None => warn!("no continuation for work unit {}", completion.id),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let undelivered = self.pending.get_mut().len();
        if undelivered > 0 {
            warn!(
                "dispatcher dropped with {} undelivered continuations",
                undelivered
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
