use futures::future::BoxFuture;
use tokio::sync::oneshot;

/// A unit of work the dispatcher knows how to execute.
pub type Task = BoxFuture<'static, anyhow::Result<()>>;

pub(crate) struct TaskCommand {
    pub task: Task,
    pub tag: Option<String>,
}

impl TaskCommand {
    pub fn new(task: Task, tag: Option<String>) -> Self {
        Self { task, tag }
    }
}

/// Entries of the dispatcher queue.
pub(crate) enum Command {
    Task(TaskCommand),
    /// Like `Task`, but not removed by `Clear`. `Shutdown` still removes it.
    PersistentTask(TaskCommand),
    /// The task passed to `flush_init`. A failure shuts the dispatcher down.
    InitTask(TaskCommand),
    /// A task launched from tests. The sender fires once the task ran;
    /// dropping it (queue cleared) also releases the waiter.
    TestTask(TaskCommand, oneshot::Sender<()>),
    Stop,
    Clear,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Task(_) => "Task",
            Command::PersistentTask(_) => "PersistentTask",
            Command::InitTask(_) => "InitTask",
            Command::TestTask(..) => "TestTask",
            Command::Stop => "Stop",
            Command::Clear => "Clear",
            Command::Shutdown => "Shutdown",
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Command::Task(c) | Command::PersistentTask(c) | Command::InitTask(c) => {
                c.tag.as_deref().unwrap_or("unidentified")
            }
            Command::TestTask(c, _) => c.tag.as_deref().unwrap_or("test"),
            Command::Stop | Command::Clear | Command::Shutdown => "internal",
        }
    }

    /// Whether this command survives a `Clear`.
    pub fn survives_clear(&self) -> bool {
        matches!(self, Command::PersistentTask(_) | Command::Shutdown)
    }
}
