//! Command vocabulary and queue for asynchronous task control.
//!
//! External clients (planners, teleoperation, test harnesses) do not touch
//! tasks directly: they enqueue [`Command`]s through a cloneable
//! [`CommandSender`], and the controller drains the queue at the start of
//! each cycle, applying every command before the tasks are updated. Commands
//! are therefore applied atomically with respect to the QP: a cycle sees
//! either none or all of a batch enqueued before it started.
//!
//! The vocabulary is serde-serializable so commands can cross process
//! boundaries in whatever encoding the transport prefers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// One request against a named task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "request", content = "value")]
pub enum TaskRequest {
    /// Register the task as a weighted objective.
    ActivateAsObjective,
    /// Register the task as a hard equality constraint.
    ActivateAsConstraint,
    /// Remove the task from the optimization.
    Deactivate,
    /// Uniform proportional gain.
    SetStiffness(f64),
    /// Per-axis proportional gains (diagonal).
    SetStiffnessDiag(Vec<f64>),
    /// Uniform derivative gain.
    SetDamping(f64),
    /// Per-axis derivative gains (diagonal).
    SetDampingDiag(Vec<f64>),
    /// Uniform objective weight.
    SetWeight(f64),
    /// Per-axis objective weights.
    SetWeightPerAxis(Vec<f64>),
    /// New desired state for the task's feature.
    SetDesiredState(Vec<f64>),
    /// Switch a force task's contact side to the friction cone.
    ActivateContactMode,
    /// Switch a force task's contact side back to the zero-force equality.
    DeactivateContactMode,
    /// Friction coefficient of the task's cone.
    SetFrictionCoefficient(f64),
    /// Safety margin of the task's cone.
    SetMargin(f64),
}

/// A request addressed to a task by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Target task name.
    pub task: String,
    /// What to do with it.
    #[serde(flatten)]
    pub request: TaskRequest,
}

impl Command {
    /// Address `request` to the task named `task`.
    #[must_use]
    pub fn new(task: impl Into<String>, request: TaskRequest) -> Self {
        Self {
            task: task.into(),
            request,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// The controller-side end of the command channel.
///
/// Owned by the controller; [`CommandQueue::sender`] hands out as many
/// cloneable sending ends as needed.
#[derive(Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<Command>>>,
}

impl CommandQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A new sending end for this queue.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Take every pending command, in enqueue order.
    #[must_use]
    pub fn drain(&self) -> Vec<Command> {
        match self.inner.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            // A sender panicked mid-push; the poisoned batch is dropped.
            Err(_) => Vec::new(),
        }
    }

    /// Pending command count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Whether no commands are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cloneable sending end of a [`CommandQueue`].
#[derive(Clone)]
pub struct CommandSender {
    inner: Arc<Mutex<VecDeque<Command>>>,
}

impl CommandSender {
    /// Enqueue one command. Silently dropped if the queue is poisoned.
    pub fn send(&self, command: Command) {
        if let Ok(mut queue) = self.inner.lock() {
            queue.push_back(command);
        }
    }

    /// Enqueue a request addressed to `task`.
    pub fn request(&self, task: impl Into<String>, request: TaskRequest) {
        self.send(Command::new(task, request));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
