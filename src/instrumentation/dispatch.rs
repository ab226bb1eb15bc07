use std::future::Future;
use std::marker::PhantomData;

use crate::sanitizer::Capture;

/// The server seam: anything that answers named operations.
///
/// `InstrumentedServer` wraps one of these and is one itself, so wrapping is
/// transparent to whoever drives the server.
pub trait Dispatch: Send + Sync {
    type Args: Capture + Send;
    type Output: Capture + Send;
    type Error: Capture + Send;

    fn invoke(
        &self,
        operation: &str,
        args: Self::Args,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

/// Adapts a closure `Fn(operation, args) -> Future` into a `Dispatch`.
pub struct FnDispatch<F, A, O, E> {
    f: F,
    _marker: PhantomData<fn(A) -> Result<O, E>>,
}

impl<F, A, O, E> FnDispatch<F, A, O, E> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

pub fn dispatch_fn<F, Fut, A, O, E>(f: F) -> FnDispatch<F, A, O, E>
where
    F: Fn(String, A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, E>> + Send,
{
    FnDispatch::new(f)
}

impl<F, Fut, A, O, E> Dispatch for FnDispatch<F, A, O, E>
where
    F: Fn(String, A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, E>> + Send,
    A: Capture + Send,
    O: Capture + Send,
    E: Capture + Send,
{
    type Args = A;
    type Output = O;
    type Error = E;

    fn invoke(&self, operation: &str, args: A) -> impl Future<Output = Result<O, E>> + Send {
        (self.f)(operation.to_string(), args)
    }
}
