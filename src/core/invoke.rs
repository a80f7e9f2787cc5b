//! Continuation-or-future delivery of operation outcomes

use crate::core::error::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::warn;

/// Receives the outcome of an operation exactly once.
pub type Continuation<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

pub fn continuation<T, F>(f: F) -> Continuation<T>
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    Box::new(f)
}

/// Handle returned by every `*_with` operation.
///
/// Without a continuation it settles with the outcome. With one, the outcome
/// is handed to the continuation and the handle settles with `None` once it
/// has run. A panic inside the continuation resumes in whoever awaits the
/// handle.
pub enum Dispatch<T> {
    Pending(BoxFuture<'static, Result<T>>),
    Delivered(JoinHandle<()>),
}

/// Runs `operation` and routes its outcome to exactly one receiver.
///
/// Must be called from within a tokio runtime when a continuation is given.
pub fn dispatch<T, Fut>(operation: Fut, done: Option<Continuation<T>>) -> Dispatch<T>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    match done {
        Some(done) => Dispatch::Delivered(tokio::spawn(async move {
            done(operation.await);
        })),
        None => Dispatch::Pending(Box::pin(operation)),
    }
}

impl<T> Dispatch<T> {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Dispatch::Delivered(_))
    }
}

impl<T> Future for Dispatch<T> {
    type Output = Option<Result<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut() {
            Dispatch::Pending(operation) => operation.as_mut().poll(cx).map(Some),
            Dispatch::Delivered(handle) => Pin::new(handle).poll(cx).map(|joined| match joined {
                Ok(()) => None,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    warn!("Continuation task did not complete: {}", e);
                    None
                }
            }),
        }
    }
}
