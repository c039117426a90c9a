//! Single-thread background executor for load, search, select and outline

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, warn};

use super::error::EngineError;

type Task = Box<dyn FnOnce() + Send>;

enum Job {
    Run(Task),
    Shutdown,
}

/// Runs submitted closures one at a time, in submission order
pub struct TaskWorker {
    name: String,
    sender: Sender<Job>,
    thread: Option<JoinHandle<()>>,
    detached: AtomicBool,
}

impl TaskWorker {
    pub fn spawn(name: impl Into<String>) -> Result<Self, EngineError> {
        let name = name.into();
        let (sender, receiver) = flume::unbounded();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_tasks(receiver))
            .map_err(EngineError::Spawn)?;

        Ok(Self {
            name,
            sender,
            thread: Some(thread),
            detached: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `task`; its return value is delivered through the returned
    /// [`Pending`]. A panicking task resolves the reply as
    /// [`EngineError::WorkerGone`] and leaves the worker running.
    pub fn submit<T, F>(&self, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = flume::bounded(1);
        let name = self.name.clone();
        let job = Box::new(move || match catch_unwind(AssertUnwindSafe(task)) {
            Ok(value) => {
                let _ = reply_tx.send(value);
            }
            Err(_) => error!("{name}: task panicked"),
        });

        if self.sender.send(Job::Run(job)).is_err() {
            warn!("{}: worker is gone, dropping task", self.name);
        }
        Pending::waiting(reply_rx)
    }

    /// Stop accepting work once the queued tasks have run, without waiting
    /// for them. Dropping the worker afterwards does not join its thread.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
        let _ = self.sender.send(Job::Shutdown);
    }
}

fn run_tasks(jobs: Receiver<Job>) {
    for job in jobs {
        match job {
            Job::Run(task) => task(),
            Job::Shutdown => break,
        }
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Job::Shutdown);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        // The last owner may be a task on this very worker
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("{}: worker thread panicked", self.name);
        }
        debug!("{}: worker stopped", self.name);
    }
}

enum Slot<T> {
    Ready(Option<T>),
    Waiting(Receiver<T>),
}

/// Reply handle for a background operation
pub struct Pending<T> {
    slot: Slot<T>,
}

impl<T> Pending<T> {
    /// An already resolved reply
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self {
            slot: Slot::Ready(Some(value)),
        }
    }

    fn waiting(receiver: Receiver<T>) -> Self {
        Self {
            slot: Slot::Waiting(receiver),
        }
    }

    /// Block until the operation finishes
    pub fn wait(self) -> Result<T, EngineError> {
        match self.slot {
            Slot::Ready(value) => value.ok_or(EngineError::WorkerGone),
            Slot::Waiting(receiver) => receiver.recv().map_err(|_| EngineError::WorkerGone),
        }
    }

    /// Block for at most `timeout`; `None` if the result is not there yet
    /// or the operation was lost
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<T> {
        match &mut self.slot {
            Slot::Ready(value) => value.take(),
            Slot::Waiting(receiver) => match receiver.recv_timeout(timeout) {
                Ok(value) => Some(value),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
            },
        }
    }

    /// Take the result if it has arrived
    pub fn try_take(&mut self) -> Option<T> {
        match &mut self.slot {
            Slot::Ready(value) => value.take(),
            Slot::Waiting(receiver) => match receiver.try_recv() {
                Ok(value) => Some(value),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
            },
        }
    }
}

impl<T: Default> Pending<T> {
    /// Block until finished, degrading a lost operation to the empty result
    #[must_use]
    pub fn wait_or_default(self) -> T {
        self.wait().unwrap_or_default()
    }
}

impl<T> Pending<Result<T, EngineError>> {
    /// Block until finished and flatten the operation's own error
    pub fn resolve(self) -> Result<T, EngineError> {
        self.wait()?
    }
}
