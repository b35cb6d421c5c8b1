//! Connection accept loop shared by every server variant.
//!
//! Each accepted connection runs in its own task inside a `JoinSet`, which is
//! what makes forced termination possible: aborting the set drops every
//! connection together with the request futures it is polling.

use std::future::{Future, poll_fn};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response};
use http_body_util::Limited;
use hyper::body::{Body, Incoming};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// Boxed error accepted by hyper for service and body failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request body handed to services: the raw body capped at `max_message_size`.
pub type RequestBody = Limited<Incoming>;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Tokens that end a serving loop.
#[derive(Debug, Clone, Default)]
pub struct ServeSignals {
    /// Stop accepting; let open connections finish in-flight requests.
    pub graceful: CancellationToken,
    /// Drop every open connection.
    pub force: CancellationToken,
}

/// Per-listener serving limits.
#[derive(Clone, Default)]
pub struct ServeConfig {
    pub tls: Option<TlsAcceptor>,
    pub max_connections: Option<usize>,
    pub max_body_size: Option<usize>,
}

impl std::fmt::Debug for ServeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeConfig")
            .field("tls", &self.tls.is_some())
            .field("max_connections", &self.max_connections)
            .field("max_body_size", &self.max_body_size)
            .finish()
    }
}

/// Serve `service` on `listener` until `signals` say otherwise.
///
/// Returns once the listener is closed and every connection is gone, either
/// drained after `graceful` or cut after `force`.
pub async fn serve<S, B>(listener: TcpListener, config: ServeConfig, service: S, signals: ServeSignals)
where
    S: tower::Service<Request<RequestBody>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let builder = auto::Builder::new(TokioExecutor::new());
    let limiter = config.max_connections.map(|n| Arc::new(Semaphore::new(n)));
    let service = LimitBody {
        inner: service,
        limit: config.max_body_size.unwrap_or(usize::MAX),
    };
    let mut conns = JoinSet::new();

    loop {
        let permit = match &limiter {
            Some(sem) => tokio::select! {
                () = signals.graceful.cancelled() => break,
                permit = Arc::clone(sem).acquire_owned() => match permit {
                    Ok(p) => Some(p),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let (stream, peer) = tokio::select! {
            biased;
            () = signals.graceful.cancelled() => break,
            Some(_) = conns.join_next(), if !conns.is_empty() => continue,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    continue;
                }
            },
        };

        let builder = builder.clone();
        let service = service.clone();
        let graceful = signals.graceful.clone();
        let tls = config.tls.clone();
        conns.spawn(async move {
            let _permit = permit;
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(&builder, stream, service, graceful, peer).await,
                    Err(e) => tracing::debug!(%peer, error = %e, "TLS handshake failed"),
                },
                None => serve_connection(&builder, stream, service, graceful, peer).await,
            }
        });
    }

    drop(listener);
    tracing::debug!(connections = conns.len(), "listener closed, draining");

    tokio::select! {
        () = drain(&mut conns) => {}
        () = signals.force.cancelled() => {
            tracing::debug!(connections = conns.len(), "aborting open connections");
            conns.abort_all();
            drain(&mut conns).await;
        }
    }
}

async fn drain(conns: &mut JoinSet<()>) {
    while conns.join_next().await.is_some() {}
}

async fn serve_connection<I, S, B>(
    builder: &auto::Builder<TokioExecutor>,
    io: I,
    service: LimitBody<S>,
    graceful: CancellationToken,
    peer: SocketAddr,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: tower::Service<Request<RequestBody>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(conn);

    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                tracing::debug!(%peer, error = %e, "connection ended with error");
            }
        }
        () = graceful.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                tracing::debug!(%peer, error = %e, "connection ended with error while draining");
            }
        }
    }
}

/// Adapts a tower service to hyper, capping request bodies on the way in.
#[derive(Clone)]
struct LimitBody<S> {
    inner: S,
    limit: usize,
}

impl<S, B> hyper::service::Service<Request<Incoming>> for LimitBody<S>
where
    S: tower::Service<Request<RequestBody>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: 'static,
{
    type Response = Response<B>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<B>, S::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let mut inner = self.inner.clone();
        let req = req.map(|body| Limited::new(body, self.limit));
        Box::pin(async move {
            poll_fn(|cx| inner.poll_ready(cx)).await?;
            inner.call(req).await
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn config_debug_reports_tls_as_flag() {
        let config = ServeConfig {
            tls: None,
            max_connections: Some(8),
            max_body_size: Some(1024),
        };
        assert_eq!(
            format!("{config:?}"),
            "ServeConfig { tls: false, max_connections: Some(8), max_body_size: Some(1024) }"
        );
    }
}
