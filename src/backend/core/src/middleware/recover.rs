//! Panic recovery.
//!
//! A panic anywhere below this layer, whether while building the inner
//! future or while polling it, becomes a 500 with the generic error body.
//! The connection task survives and the server keeps serving.
//!
//! Building the layer chains a panic hook that keeps the panicking thread's
//! backtrace, so the recovery log carries the stack of the panic site. The
//! payload is caught on the same thread that panicked.

use axum::{
    body::Body,
    extract::Request,
    response::{IntoResponse, Response},
};
use futures::{future::BoxFuture, FutureExt};
use metrics::counter;
use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    panic::AssertUnwindSafe,
    sync::Once,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::error;

use super::request_id_of;
use crate::error::ApiError;

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static BACKTRACE_HOOK: Once = Once::new();

/// Chain a hook in front of the current one that records the backtrace.
fn install_backtrace_hook() {
    BACKTRACE_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

/// Backtrace of the last panic on this thread, if not already taken.
fn take_backtrace() -> Option<Backtrace> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

fn recovered(request_id: &str, payload: Box<dyn Any + Send>) -> Response {
    let message = panic_message(payload.as_ref());
    let backtrace = take_backtrace()
        .map(|bt| bt.to_string())
        .unwrap_or_else(|| "unavailable".to_string());
    error!(
        request_id = %request_id,
        panic = %message,
        backtrace = %backtrace,
        "Request handler panicked; returning 500"
    );
    counter!("http_panics_recovered_total").increment(1);

    ApiError::internal(format!("panic: {}", message)).into_response()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverLayer;

impl RecoverLayer {
    pub fn new() -> Self {
        install_backtrace_hook();
        Self
    }
}

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoverService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RecoverService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RecoverService<S>
where
    S: Service<Request<Body>, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let request_id = request_id_of(&request).unwrap_or_default();

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(request))) {
            Ok(future) => future,
            Err(payload) => {
                let response = recovered(&request_id, payload);
                return Box::pin(async move { Ok(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Ok(recovered(&request_id, payload)),
            }
        })
    }
}
