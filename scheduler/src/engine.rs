use crate::{ingress::Task, Error, Mailbox};
use futures::{channel::mpsc, select, FutureExt, StreamExt};
use std::{
    any::Any,
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, error, trace};

fn extract_panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{err:?}")
    }
}

/// The pending queue and the active-task slot.
///
/// # Invariants
///
/// A task is only started when no task is active, and only finished when one is. The slot is
/// cleared immediately before the next pending task (if any) is promoted.
struct State<C> {
    /// Tasks waiting to run, in submission order.
    pending: VecDeque<Task<C>>,

    /// Name of the task currently running.
    active: Option<String>,
}

impl<C> State<C> {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            active: None,
        }
    }

    fn enqueue(&mut self, task: Task<C>) {
        trace!(name = %task.name, pending = self.pending.len() + 1, "queued task");
        self.pending.push_back(task);
    }

    fn begin(&mut self, name: &str) -> Result<(), Error> {
        if let Some(active) = &self.active {
            return Err(Error::Busy {
                active: active.clone(),
                requested: name.to_string(),
            });
        }
        debug!(name, pending = self.pending.len(), "starting task");
        self.active = Some(name.to_string());
        Ok(())
    }

    fn finish(&mut self) -> Result<String, Error> {
        let name = self.active.take().ok_or(Error::Idle)?;
        debug!(name = %name, "task ended");
        Ok(name)
    }
}

/// Runs submitted tasks against a context, one at a time, in submission order.
pub struct Engine<C> {
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    context: C,

    ////////////////////////////////////////
    // Messaging
    ////////////////////////////////////////
    /// The mailbox for receiving tasks.
    mailbox_receiver: mpsc::UnboundedReceiver<Task<C>>,

    /// Number of submitted tasks that have not settled (shared with every [Mailbox]).
    outstanding: Arc<AtomicUsize>,

    ////////////////////////////////////////
    // Scheduling
    ////////////////////////////////////////
    state: State<C>,
}

impl<C: Send + 'static> Engine<C> {
    /// Creates a new engine around `context`.
    /// Returns the engine and a mailbox for submitting tasks to it.
    pub fn new(context: C) -> (Self, Mailbox<C>) {
        let (mailbox_sender, mailbox_receiver) = mpsc::unbounded();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let mailbox = Mailbox::new(mailbox_sender, outstanding.clone());

        let engine = Self {
            context,
            mailbox_receiver,
            outstanding,
            state: State::new(),
        };

        (engine, mailbox)
    }

    /// Spawns [Engine::run] on the current tokio runtime.
    pub fn start(self) -> tokio::task::JoinHandle<Result<C, Error>> {
        tokio::spawn(self.run())
    }

    /// Run tasks until every [Mailbox] has been dropped and the queue is drained, then return
    /// the context.
    pub async fn run(self) -> Result<C, Error> {
        let Self {
            mut context,
            mut mailbox_receiver,
            outstanding,
            mut state,
        } = self;

        loop {
            // Promote the head of the queue, or wait for the next submission
            let task = match state.pending.pop_front() {
                Some(task) => task,
                None => match mailbox_receiver.next().await {
                    Some(task) => task,
                    None => break,
                },
            };
            state.begin(&task.name)?;
            let Task { name, action } = task;

            // Invoke the action (which may panic before returning a future) and drive it to
            // completion, queueing any submissions that arrive in the meantime
            let borrowed = &mut context;
            let outcome = match panic::catch_unwind(AssertUnwindSafe(move || action(borrowed))) {
                Ok(future) => {
                    let mut execution = AssertUnwindSafe(future).catch_unwind().fuse();
                    loop {
                        select! {
                            outcome = execution => break outcome,
                            task = mailbox_receiver.next() => {
                                if let Some(task) = task {
                                    state.enqueue(task);
                                }
                            },
                        }
                    }
                }
                Err(err) => Err(err),
            };

            // Clear the active slot before notifying the submitter
            state.finish()?;
            match outcome {
                Ok(settle) => settle(),
                Err(err) => {
                    // The task's handle observes the dropped sender
                    let err = extract_panic_message(&*err);
                    error!(name = %name, err = %err, "task panicked");
                }
            }
            outstanding.fetch_sub(1, Ordering::SeqCst);
        }

        debug!("mailbox closed, stopping");
        Ok(context)
    }
}
