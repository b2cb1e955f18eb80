use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Path, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::future::BoxFuture;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::transport::Transport;

/// A request routed to an actor's HTTP handler.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The endpoint below the actor name, e.g. `stats.json`.
    pub path: String,
    pub query: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl HttpResponse {
    pub fn json(body: String) -> Self {
        Self {
            status: 200,
            content_type: "application/json".to_string(),
            body,
        }
    }

    pub fn text(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/plain".to_string(),
            body,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain".to_string(),
            body: "not found\n".to_string(),
        }
    }
}

/// Handlers resolve on the owning actor, so they are async: the usual
/// implementation sends the actor a message carrying a reply channel.
pub type HttpHandler = Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, HttpResponse> + Send + Sync>;

pub type HttpHandlerMap = HashMap<String, HttpHandler>;

async fn dispatch(
    Path((actor, endpoint)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    State(transport): State<Arc<Transport>>,
) -> impl IntoResponse {
    let response = match transport.http_handler(&actor, &endpoint) {
        Some(handler) => {
            handler(HttpRequest {
                path: endpoint,
                query,
            })
            .await
        }
        None => HttpResponse::not_found(),
    };
    (
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
}

fn router(transport: Arc<Transport>) -> Router {
    Router::new()
        .route("/{actor}/{*endpoint}", get(dispatch))
        .with_state(transport)
}

/// Serve one already-accepted connection as HTTP/1.1.
pub(crate) async fn serve_http(transport: Arc<Transport>, io: PrefixedIo<TcpStream>) {
    let service = TowerToHyperService::new(router(transport));
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        debug!("http connection ended: {e}");
    }
}

/// A stream adapter that replays bytes already consumed from the stream
/// before handing reads over to the inner stream. Used to give back the
/// preamble bytes read while sniffing the protocol.
pub(crate) struct PrefixedIo<S> {
    prefix: Vec<u8>,
    offset: usize,
    inner: S,
}

impl<S> PrefixedIo<S> {
    pub(crate) fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedIo<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.offset < self.prefix.len() {
            let remaining = &self.prefix[self.offset..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            self.offset += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedIo<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_prefixed_io_replays_consumed_bytes() {
        let inner = std::io::Cursor::new(b"/master/stats.json".to_vec());
        let mut io = PrefixedIo::new(b"GET ".to_vec(), inner);
        let mut out = String::new();
        io.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "GET /master/stats.json");
    }
}
