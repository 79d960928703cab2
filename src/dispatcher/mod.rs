//! In-order task dispatcher.
//!
//! Every state-mutating operation of the SDK is launched on a [`Dispatcher`].
//! Commands live in a single queue drained by one consumer loop running on
//! the tokio runtime, so at most one task executes at a time and tasks run in
//! the order they were launched. `Stop` and `Clear` may jump the queue.

mod command;

pub use command::Task;

use command::{Command, TaskCommand};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_PRE_INIT_QUEUE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// `flush_init` has not been called. At most `max_pre_init_queue_size`
    /// tasks are buffered.
    Uninitialized,
    /// No commands are being processed.
    Idle,
    /// The consumer loop is draining the queue.
    Processing,
    /// Tasks are still accepted but not executed until `resume`.
    Stopped,
    /// Irreversible. Launching is a no-op.
    Shutdown,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatcherError {
    #[error("Task was not enqueued, dispatcher is {state:?}")]
    NotLaunched { state: DispatcherState },
}

struct Shared {
    queue: VecDeque<Command>,
    state: DispatcherState,
    // A Shutdown command is in the queue.
    shutting_down: bool,
}

impl Shared {
    /// No drain pass is running and nothing runnable is queued.
    fn is_quiescent(&self) -> bool {
        match self.state {
            DispatcherState::Processing => false,
            DispatcherState::Idle => self.queue.is_empty(),
            DispatcherState::Uninitialized | DispatcherState::Stopped | DispatcherState::Shutdown => {
                true
            }
        }
    }
}

struct Inner {
    shared: Mutex<Shared>,
    // Wakes the consumer loop.
    wake: Notify,
    // Signalled every time a drain pass ends.
    drained: Notify,
    closed: AtomicBool,
    max_pre_init_queue_size: usize,
}

impl Inner {
    fn next_command(&self) -> Option<Command> {
        let mut shared = self.shared.lock();
        match shared.state {
            DispatcherState::Idle | DispatcherState::Processing => {
                if let Some(command) = shared.queue.pop_front() {
                    shared.state = DispatcherState::Processing;
                    return Some(command);
                }
                if shared.state == DispatcherState::Processing {
                    shared.state = DispatcherState::Idle;
                    drop(shared);
                    debug!("Done executing tasks, the dispatcher is now Idle");
                    self.drained.notify_waiters();
                }
                None
            }
            DispatcherState::Uninitialized
            | DispatcherState::Stopped
            | DispatcherState::Shutdown => None,
        }
    }

    async fn execute(&self, command: Command) {
        debug!(
            command = command.name(),
            tag = command.tag(),
            "Executing dispatched command"
        );

        match command {
            Command::Stop => {
                self.shared.lock().state = DispatcherState::Stopped;
                self.drained.notify_waiters();
            }
            Command::Shutdown => {
                {
                    let mut shared = self.shared.lock();
                    // Dropping queued test senders releases their waiters.
                    shared.queue.clear();
                    shared.state = DispatcherState::Shutdown;
                    shared.shutting_down = false;
                }
                info!("Dispatcher is shut down");
                self.drained.notify_waiters();
            }
            Command::Clear => {
                let mut shared = self.shared.lock();
                let before = shared.queue.len();
                shared.queue.retain(Command::survives_clear);
                debug!(removed = before - shared.queue.len(), "Cleared dispatcher queue");
            }
            Command::Task(task) | Command::PersistentTask(task) => {
                run_task(task).await;
            }
            Command::InitTask(task) => {
                if !run_task(task).await {
                    error!("Initialization task failed, shutting the dispatcher down");
                    {
                        let mut shared = self.shared.lock();
                        shared.queue.clear();
                        shared.state = DispatcherState::Shutdown;
                        shared.shutting_down = false;
                    }
                    self.drained.notify_waiters();
                }
            }
            Command::TestTask(task, done) => {
                run_task(task).await;
                let _ = done.send(());
            }
        }
    }
}

/// Runs a task, catching errors and panics. Returns whether it succeeded.
async fn run_task(command: TaskCommand) -> bool {
    let tag = command.tag.as_deref().unwrap_or("unidentified");
    match AssertUnwindSafe(command.task).catch_unwind().await {
        Ok(Ok(())) => {
            debug!(tag, "Done executing task");
            true
        }
        Ok(Err(e)) => {
            error!(tag, error = %e, "Error executing task");
            false
        }
        Err(panic) => {
            error!(tag, panic = panic_message(panic.as_ref()), "Task panicked");
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

async fn consumer_loop(inner: Arc<Inner>) {
    loop {
        match inner.next_command() {
            Some(command) => inner.execute(command).await,
            None => {
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                inner.wake.notified().await;
            }
        }
    }
    debug!("Dispatcher consumer loop exited");
}

// Stops the consumer loop once the last handle is dropped.
struct LoopGuard {
    inner: Arc<Inner>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.wake.notify_one();
    }
}

/// A handle to an in-order task dispatcher. Clones share the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
    _guard: Arc<LoopGuard>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("Dispatcher")
            .field("state", &shared.state)
            .field("queued", &shared.queue.len())
            .field("max_pre_init_queue_size", &self.inner.max_pre_init_queue_size)
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PRE_INIT_QUEUE_SIZE)
    }
}

impl Dispatcher {
    /// Creates a dispatcher in the `Uninitialized` state.
    ///
    /// Spawns the consumer loop, so this must be called from within a tokio runtime.
    pub fn new(max_pre_init_queue_size: usize) -> Self {
        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                queue: VecDeque::new(),
                state: DispatcherState::Uninitialized,
                shutting_down: false,
            }),
            wake: Notify::new(),
            drained: Notify::new(),
            closed: AtomicBool::new(false),
            max_pre_init_queue_size,
        });

        tokio::spawn(consumer_loop(inner.clone()));

        Self {
            _guard: Arc::new(LoopGuard {
                inner: inner.clone(),
            }),
            inner,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.inner.shared.lock().state
    }

    /// Number of commands currently queued.
    pub fn queued(&self) -> usize {
        self.inner.shared.lock().queue.len()
    }

    fn launch_internal(&self, command: Command, priority: bool) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.state == DispatcherState::Shutdown {
            warn!(
                command = command.name(),
                "Attempted to enqueue a new task but the dispatcher is shutdown. Ignoring."
            );
            return false;
        }

        if !priority
            && shared.state == DispatcherState::Uninitialized
            && shared.queue.len() >= self.inner.max_pre_init_queue_size
        {
            warn!(
                max = self.inner.max_pre_init_queue_size,
                "Unable to enqueue task, pre init queue is full."
            );
            return false;
        }

        if priority {
            shared.queue.push_front(command);
        } else {
            shared.queue.push_back(command);
        }

        let runnable = shared.state == DispatcherState::Idle;
        drop(shared);
        if runnable {
            self.inner.wake.notify_one();
        }
        true
    }

    /// Adds a task to the end of the queue. Returns whether it was enqueued.
    pub fn launch<F>(&self, task: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.launch_internal(Command::Task(TaskCommand::new(Box::pin(task), None)), false)
    }

    /// Same as [`Dispatcher::launch`], with a tag used when logging the execution.
    pub fn launch_tagged<F>(&self, tag: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.launch_internal(
            Command::Task(TaskCommand::new(Box::pin(task), Some(tag.into()))),
            false,
        )
    }

    /// Enqueues a task that is not removed by [`Dispatcher::clear`].
    ///
    /// [`Dispatcher::shutdown`] still discards it if it was launched after the shutdown.
    pub fn launch_persistent<F>(&self, task: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.launch_internal(
            Command::PersistentTask(TaskCommand::new(Box::pin(task), None)),
            false,
        )
    }

    /// Moves from `Uninitialized` to `Idle` and starts executing buffered tasks.
    pub fn flush_init(&self) {
        self.flush_init_internal(None);
    }

    /// Like [`Dispatcher::flush_init`], running `task` before any buffered task.
    ///
    /// If `task` fails the dispatcher is shut down and the buffered tasks are discarded.
    pub fn flush_init_with<F>(&self, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.flush_init_internal(Some(Box::pin(task)));
    }

    fn flush_init_internal(&self, task: Option<Task>) {
        let mut shared = self.inner.shared.lock();
        if shared.state != DispatcherState::Uninitialized {
            warn!("Attempted to initialize the Dispatcher, but it is already initialized. Ignoring.");
            return;
        }

        if let Some(task) = task {
            shared.queue.push_front(Command::InitTask(TaskCommand::new(
                task,
                Some("init".to_string()),
            )));
        }

        shared.state = DispatcherState::Idle;
        drop(shared);
        self.inner.wake.notify_one();
    }

    /// Enqueues a `Clear` command, which removes every non-persistent task.
    ///
    /// Runs even if the dispatcher is stopped.
    pub fn clear(&self, priority: bool) {
        self.launch_internal(Command::Clear, priority);
        self.resume();
    }

    /// Enqueues a `Stop` command. Queued tasks are kept until [`Dispatcher::resume`].
    ///
    /// If a shutdown is pending this clears the queue instead.
    pub fn stop(&self, priority: bool) {
        let shutting_down = self.inner.shared.lock().shutting_down;
        if shutting_down {
            self.clear(priority);
        } else {
            self.launch_internal(Command::Stop, priority);
        }
    }

    /// Resumes execution. No-op unless the dispatcher is `Stopped`.
    pub fn resume(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.state == DispatcherState::Stopped {
            shared.state = DispatcherState::Idle;
            drop(shared);
            self.inner.wake.notify_one();
        }
    }

    /// Executes every task launched before this call, discards everything
    /// launched after it and moves to `Shutdown`.
    ///
    /// Resolves once the current drain pass is finished.
    pub async fn shutdown(&self) {
        self.inner.shared.lock().shutting_down = true;
        self.launch_internal(Command::Shutdown, false);
        self.resume();
        self.block_on_queue().await;
    }

    /// **Test-only API.**
    ///
    /// Resolves once no drain pass is running and nothing runnable is queued.
    /// Calling this from inside a dispatched task deadlocks.
    pub async fn block_on_queue(&self) {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.inner.shared.lock().is_quiescent() {
                return;
            }

            drained.await;
        }
    }

    /// **Test-only API.**
    ///
    /// Launches `task` and resolves once it was executed or discarded.
    /// Resumes a stopped dispatcher first so this cannot hang.
    pub async fn test_launch<F>(&self, task: F) -> Result<(), DispatcherError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.resume();
        let (done_tx, done_rx) = oneshot::channel();
        let command = Command::TestTask(TaskCommand::new(Box::pin(task), None), done_tx);
        if !self.launch_internal(command, false) {
            return Err(DispatcherError::NotLaunched {
                state: self.state(),
            });
        }

        // A receive error means the task was cleared from the queue.
        let _ = done_rx.await;
        Ok(())
    }

    /// **Test-only API.**
    ///
    /// Clears the queue, waits for ongoing work and returns to `Uninitialized`.
    pub async fn test_uninitialize(&self) {
        if self.state() == DispatcherState::Uninitialized {
            return;
        }

        self.clear(true);
        self.shutdown().await;

        let mut shared = self.inner.shared.lock();
        shared.queue.clear();
        shared.state = DispatcherState::Uninitialized;
        shared.shutting_down = false;
    }
}
