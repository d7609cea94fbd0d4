use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::warn;

use crate::request::RequestDescriptor;
use crate::response::{FailureKind, FailureReason, Response};

/// The outcome of one request-interceptor step: the (possibly mutated)
/// descriptor plus the step's abort vote.
#[derive(Clone, Debug)]
pub struct InterceptedRequest {
    pub request: RequestDescriptor,
    pub abort: bool,
}

impl InterceptedRequest {
    pub fn proceed(request: RequestDescriptor) -> Self {
        Self {
            request,
            abort: false,
        }
    }

    pub fn abort(request: RequestDescriptor) -> Self {
        Self {
            request,
            abort: true,
        }
    }
}

/// A failed interceptor step. Its fields merge into the running value and
/// the chain continues: `abort` feeds the request chain's abort flag,
/// `message` feeds a response's error field.
#[derive(Clone, Debug, Default)]
pub struct InterceptorFailure {
    pub abort: bool,
    pub message: String,
}

impl InterceptorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            abort: false,
            message: message.into(),
        }
    }

    pub fn aborting(message: impl Into<String>) -> Self {
        Self {
            abort: true,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for InterceptorFailure {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.message)
    }
}

impl std::error::Error for InterceptorFailure {}

pub type RequestInterceptor = Arc<
    dyn Fn(RequestDescriptor) -> BoxFuture<'static, Result<InterceptedRequest, InterceptorFailure>>
        + Send
        + Sync,
>;

pub type ResponseInterceptor =
    Arc<dyn Fn(Response) -> BoxFuture<'static, Result<Response, InterceptorFailure>> + Send + Sync>;

pub(crate) fn boxed_request_interceptor<F, Fut>(interceptor: F) -> RequestInterceptor
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<InterceptedRequest, InterceptorFailure>> + Send + 'static,
{
    Arc::new(move |request| Box::pin(interceptor(request)))
}

pub(crate) fn boxed_response_interceptor<F, Fut>(interceptor: F) -> ResponseInterceptor
where
    F: Fn(Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, InterceptorFailure>> + Send + 'static,
{
    Arc::new(move |response| Box::pin(interceptor(response)))
}

/// Folds the request chain in registration order. A failed step keeps the
/// current descriptor and contributes only its abort vote; the chain always
/// runs to completion, so the final step to run owns the flag.
pub(crate) async fn run_request_chain(
    mut request: RequestDescriptor,
    chain: &[RequestInterceptor],
) -> InterceptedRequest {
    let mut abort = false;
    for interceptor in chain {
        match interceptor(request.clone()).await {
            Ok(intercepted) => {
                request = intercepted.request;
                abort = intercepted.abort;
            }
            Err(failure) => {
                warn!(error = %failure, "request interceptor failed");
                abort = failure.abort;
            }
        }
    }
    InterceptedRequest { request, abort }
}

/// Folds a response chain in registration order. A failed step merges its
/// message into the running value's error field and the chain continues.
pub(crate) async fn run_response_chain(
    mut response: Response,
    chain: &[ResponseInterceptor],
) -> Response {
    for interceptor in chain {
        match interceptor(response.clone()).await {
            Ok(next) => response = next,
            Err(failure) => {
                warn!(error = %failure, "response interceptor failed");
                response.set_error(FailureReason {
                    kind: FailureKind::Interceptor,
                    message: failure.message,
                });
            }
        }
    }
    response
}
