//! Runs node actions, potentially in parallel.
//! Unaware of the build graph; the scheduler hands over an owned
//! `Invocation` and gets a `FinishedTask` back.

use crate::builder::{Actions, Invocation};
use crate::graph::NodeId;
use std::sync::mpsc;
use std::time::Instant;

/// How a build step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    /// The step failed, with its exit code if it has one.
    Failure(Option<i32>),
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Success => f.write_str("success"),
            Termination::Interrupted => f.write_str("interrupted"),
            Termination::Failure(Some(code)) => write!(f, "Error {}", code),
            Termination::Failure(None) => f.write_str("Error"),
        }
    }
}

/// The result of executing a build step.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub termination: Termination,
    /// Console output.
    pub output: Vec<u8>,
}

impl TaskResult {
    pub fn success() -> Self {
        TaskResult {
            termination: Termination::Success,
            output: Vec::new(),
        }
    }

    pub fn failure(code: i32) -> Self {
        TaskResult {
            termination: Termination::Failure(Some(code)),
            output: Vec::new(),
        }
    }
}

/// Runs actions in order, stopping at the first one that doesn't succeed.
/// An action's internal error becomes a failed result carrying its message.
pub fn run_actions(actions: &Actions, inv: &Invocation) -> TaskResult {
    let mut output = Vec::new();
    for action in actions.as_slice() {
        let result = action.execute(inv).unwrap_or_else(|err| TaskResult {
            termination: Termination::Failure(None),
            output: err.to_string().into_bytes(),
        });
        output.extend(result.output);
        if result.termination != Termination::Success {
            return TaskResult {
                termination: result.termination,
                output,
            };
        }
    }
    TaskResult {
        termination: Termination::Success,
        output,
    }
}

pub struct FinishedTask {
    /// A (faked) "thread id", used to put different finished tasks in
    /// different tracks in a performance trace.
    pub tid: usize,
    pub id: NodeId,
    pub span: (Instant, Instant),
    pub result: TaskResult,
}

/// Tracks faked "thread ids" -- integers assigned to build tasks to track
/// parallelism in perf trace output.
#[derive(Default)]
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        if let Some(used) = self.slots.get_mut(slot) {
            *used = false;
        }
    }
}

pub struct Runner {
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    running: usize,
    tids: ThreadIds,
    parallelism: usize,
}

impl Runner {
    pub fn new(parallelism: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            finished_send: tx,
            finished_recv: rx,
            running: 0,
            tids: ThreadIds::default(),
            parallelism: parallelism.max(1),
        }
    }

    pub fn can_start_more(&self) -> bool {
        self.running < self.parallelism
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn start(&mut self, id: NodeId, actions: Actions, inv: Invocation) {
        let tid = self.tids.claim();
        let tx = self.finished_send.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let result = run_actions(&actions, &inv);
            let finish = Instant::now();

            let task = FinishedTask {
                tid,
                id,
                span: (start, finish),
                result,
            };
            // The send will only fail if the receiver disappeared, e.g. due to shutting down.
            let _ = tx.send(task);
        });
        self.running += 1;
    }

    /// Wait for a task to complete.  Returns None if nothing is running.
    pub fn wait(&mut self) -> Option<FinishedTask> {
        if self.running == 0 {
            return None;
        }
        // We hold a sender ourselves, so recv() can't see a disconnect.
        let task = self.finished_recv.recv().ok()?;
        self.tids.release(task.tid);
        self.running -= 1;
        Some(task)
    }
}
