//! Ordered client-side call interceptors.

use std::fmt;
use std::sync::Arc;

use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Behavior run before every outbound call (metadata injection, auth, tracing).
pub trait CallInterceptor: Send + Sync + 'static {
    /// Inspect or rewrite the call, or reject it with a `Status`.
    ///
    /// # Errors
    /// A `Status` aborts the call before it reaches the network.
    fn intercept(&self, request: Request<()>) -> Result<Request<()>, Status>;
}

impl<F> CallInterceptor for F
where
    F: Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static,
{
    fn intercept(&self, request: Request<()>) -> Result<Request<()>, Status> {
        self(request)
    }
}

/// Interceptors applied in insertion order; the first error wins.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    chain: Vec<Arc<dyn CallInterceptor>>,
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.chain.len())
            .finish()
    }
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, interceptor: impl CallInterceptor) -> Self {
        self.push(interceptor);
        self
    }

    pub fn push(&mut self, interceptor: impl CallInterceptor) {
        self.chain.push(Arc::new(interceptor));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl Interceptor for InterceptorChain {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.chain
            .iter()
            .try_fold(request, |req, interceptor| interceptor.intercept(req))
    }
}
