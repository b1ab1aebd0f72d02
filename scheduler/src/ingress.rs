use crate::Error;
use futures::{
    channel::{mpsc, oneshot},
    future::BoxFuture,
    FutureExt,
};
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tracing::warn;

/// Delivers a settled task's output to its [Handle].
pub(crate) type Settle = Box<dyn FnOnce() + Send>;

/// A type-erased task body: borrows the context, runs to completion, and yields the [Settle]
/// that delivers its output.
pub(crate) type Action<C> = Box<dyn for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Settle> + Send>;

/// A named unit of work waiting to be run by the [Engine](super::Engine).
pub(crate) struct Task<C> {
    pub(crate) name: String,
    pub(crate) action: Action<C>,
}

pub(crate) fn erase<C, F>(action: F) -> Action<C>
where
    F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Settle> + Send + 'static,
{
    Box::new(action)
}

/// Ingress mailbox for [Engine](super::Engine).
pub struct Mailbox<C> {
    sender: mpsc::UnboundedSender<Task<C>>,

    /// Number of submitted tasks that have not yet settled.
    outstanding: Arc<AtomicUsize>,
}

impl<C> Clone for Mailbox<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            outstanding: self.outstanding.clone(),
        }
    }
}

impl<C: Send + 'static> Mailbox<C> {
    pub(super) fn new(
        sender: mpsc::UnboundedSender<Task<C>>,
        outstanding: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            sender,
            outstanding,
        }
    }

    /// Submit `action` to run once every previously submitted task has settled.
    ///
    /// The task is queued when this is called (not when the returned [Handle] is first polled),
    /// so handles may be awaited in any order without affecting execution order.
    pub fn submit<T, F>(&self, name: impl Into<String>, action: F) -> Handle<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, T> + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = oneshot::channel();
        let action = erase::<C, _>(move |context| {
            let future = action(context);
            async move {
                let output = future.await;
                let settle: Settle = Box::new(move || {
                    // The submitter may have dropped its handle
                    let _ = sender.send(output);
                });
                settle
            }
            .boxed()
        });

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let task = Task {
            name: name.clone(),
            action,
        };
        if self.sender.unbounded_send(task).is_err() {
            // Dropping the task drops its sender, so the handle resolves as canceled
            warn!(name = %name, "engine stopped, task dropped");
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
        Handle { name, receiver }
    }

    /// Number of submitted tasks (queued or active) that have not yet settled.
    pub fn pending(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

/// Resolves to the output of a submitted task once it settles.
pub struct Handle<T> {
    name: String,
    receiver: oneshot::Receiver<T>,
}

impl<T> Handle<T> {
    /// Name the task was submitted with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Future for Handle<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(output)) => Poll::Ready(Ok(output)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Canceled(self.name.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
