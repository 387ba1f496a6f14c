use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::engine::errors::WorkerGone;

/// Result of an asynchronous engine operation.
///
/// Resolves once the background work has finished and its outcome has been queued for the
/// engine. The face set itself is updated by the owning thread on the next
/// [`render_frame`](crate::MosaicEngine::render_frame) or
/// [`settle`](crate::MosaicEngine::settle).
#[must_use = "the operation reports its outcome through this future"]
pub struct Pending<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Pending<T, E> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, E>>) -> Self {
        Self { rx }
    }

    /// An operation that already has its outcome.
    pub(crate) fn ready(result: Result<T, E>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl<T, E> Future for Pending<T, E>
where
    E: From<WorkerGone>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(WorkerGone))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> std::fmt::Debug for Pending<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}
