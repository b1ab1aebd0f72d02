//! Run named asynchronous operations against a shared context, one at a time.
//!
//! # Overview
//!
//! The core of the crate is the [Engine]. It owns a context (typically a filesystem decoder that
//! cannot be re-entered), a FIFO queue of pending tasks and a single active-task slot. Tasks are
//! submitted through a cloneable [Mailbox] and run strictly in submission order: a task starts
//! only after the previous one has settled, whether it succeeded, returned an error, or panicked.
//!
//! Each task is given exclusive (`&mut`) access to the context for its whole duration. Any reads
//! the context performs while a task runs therefore happen inside that task, and no lock is
//! needed around the context.
//!
//! [Mailbox::submit] returns a [Handle] that resolves to the task's output once it settles. A
//! task that panics (either when its action is invoked or while its future is polled) resolves
//! its handle to [Error::Canceled] and does not prevent later tasks from running.
//!
//! # Example
//!
//! ```rust
//! use futures::{executor::block_on, join, FutureExt};
//! use lfsview_scheduler::Engine;
//!
//! let (engine, mailbox) = Engine::new(Vec::new());
//! let first = mailbox.submit("first", |log: &mut Vec<u32>| async move { log.push(1) }.boxed());
//! let second = mailbox.submit("second", |log: &mut Vec<u32>| async move { log.push(2) }.boxed());
//! drop(mailbox);
//!
//! let (log, _, _) = block_on(async { join!(engine.run(), first, second) });
//! assert_eq!(log.unwrap(), vec![1, 2]);
//! ```

use thiserror::Error;

mod engine;
pub use engine::Engine;
mod ingress;
pub use ingress::{Handle, Mailbox};

/// Errors that can occur when scheduling tasks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("busy: cannot start {requested} while {active} is active")]
    Busy { active: String, requested: String },
    #[error("idle: no active task to complete")]
    Idle,
    #[error("task canceled: {0}")]
    Canceled(String),
}
