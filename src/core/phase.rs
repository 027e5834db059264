// This module implements the cooperative task model used by compilation phases. A Phase
// runs its independent units of work (one function's lowering, for instance) either inline
// or on worker threads, controlled by a single multithread flag. Every unit reports a Status;
// a unit that returns an error or panics is converted to Status::Error at its own boundary,
// so one failing unit never brings down its siblings or the caller. sync() blocks until all
// outstanding units have finished, and failed() reports whether any unit is unfinished or
// ended with a problematic status. There is no cancellation; abort() terminates the process.

//! Phase-level task execution.

use crate::core::error::CompileResult;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

/// Outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error(String),
}

impl Status {
    pub fn error(message: impl Into<String>) -> Self {
        Status::Error(message.into())
    }

    pub fn is_problematic(&self) -> bool {
        matches!(self, Status::Error(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Status::Ok => None,
            Status::Error(message) => Some(message),
        }
    }
}

impl<T> From<CompileResult<T>> for Status {
    fn from(result: CompileResult<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(error) => Status::Error(error.to_string()),
        }
    }
}

enum Task {
    Running(JoinHandle<Status>),
    Completed(Status),
}

impl Task {
    fn is_completed(&self) -> bool {
        match self {
            Task::Running(handle) => handle.is_finished(),
            Task::Completed(_) => true,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

/// One phase of compilation.
pub struct Phase {
    name: &'static str,
    multithread: bool,
    tasks: Vec<Task>,
}

impl Phase {
    pub fn new(name: &'static str, multithread: bool) -> Self {
        Self {
            name,
            multithread,
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_multithreaded(&self) -> bool {
        self.multithread
    }

    /// Executes the task on a worker thread if multithreading is enabled, otherwise inline.
    pub fn run<F>(&mut self, task: F)
    where
        F: FnOnce() -> Status + Send + 'static,
    {
        if self.multithread {
            let name = self.name;
            let handle = std::thread::spawn(move || {
                match panic::catch_unwind(AssertUnwindSafe(task)) {
                    Ok(status) => status,
                    Err(payload) => {
                        let message = panic_message(payload);
                        log::warn!("Task in phase '{}' panicked: {}", name, message);
                        Status::Error(message)
                    }
                }
            });
            self.tasks.push(Task::Running(handle));
            return;
        }

        let status = match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(status) => status,
            Err(payload) => {
                let message = panic_message(payload);
                log::warn!("Task in phase '{}' panicked: {}", self.name, message);
                Status::Error(message)
            }
        };
        self.tasks.push(Task::Completed(status));
    }

    /// Waits for all tasks to finish.
    pub fn sync(&mut self) {
        for task in self.tasks.iter_mut() {
            let finished = match std::mem::replace(task, Task::Completed(Status::Ok)) {
                Task::Running(handle) => match handle.join() {
                    Ok(status) => status,
                    Err(payload) => Status::Error(panic_message(payload)),
                },
                Task::Completed(status) => status,
            };
            *task = Task::Completed(finished);
        }
    }

    /// True if any task is incomplete or ended with a problematic status.
    pub fn failed(&self) -> bool {
        self.tasks.iter().any(|task| match task {
            Task::Running(_) => true,
            Task::Completed(status) => status.is_problematic(),
        })
    }

    /// Number of tasks that have finished.
    pub fn completed(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_completed()).count()
    }

    /// Messages of all failed tasks that have been synced.
    pub fn errors(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter_map(|task| match task {
                Task::Completed(Status::Error(message)) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Aborts the execution.
    pub fn abort(&self) -> ! {
        log::error!("Phase '{}' aborted", self.name);
        std::process::exit(1)
    }
}
