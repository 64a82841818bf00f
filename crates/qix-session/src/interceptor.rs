//! Interceptor chain: user-supplied middleware wrapped around the terminal
//! invoker. Grounded on `interceptors.go`'s `buildInterceptorChain` /
//! `createContinuationFunction`, rendered with boxed futures since Rust has
//! no free function-value equivalent of a Go closure capturing `nextInvoker`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::protocol::{IncomingFrame, Invocation};

/// A boxed, type-erased async call continuation.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The rest of the call chain, invoked by an interceptor to continue past
/// itself.
pub type Continuation = Arc<dyn Fn(Context, Invocation) -> BoxFuture<'static, Result<IncomingFrame, Error>> + Send + Sync>;

/// A single interceptor: observes or rewrites the invocation and/or its
/// response around a call to `next`.
pub type Interceptor = Arc<dyn Fn(Context, Invocation, Continuation) -> BoxFuture<'static, Result<IncomingFrame, Error>> + Send + Sync>;

/// Composes a list of interceptors around a terminal invoker, outermost
/// first. Built once at session construction time.
pub fn build_chain(interceptors: &[Interceptor], terminal: Continuation) -> Continuation {
    interceptors.iter().rev().fold(terminal, |next, interceptor| {
        let interceptor = interceptor.clone();
        let next = next.clone();
        Arc::new(move |ctx, invocation| {
            let interceptor = interceptor.clone();
            let next = next.clone();
            interceptor(ctx, invocation, next)
        })
    })
}
