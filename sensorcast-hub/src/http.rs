use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use sensorcast_link::wait_for_shutdown;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::registry::Registry;

pub type HttpResult<E = std::io::Error> = Result<HttpResponse, E>;

pub type HttpResponse =
    hyper::Response<http_body_util::combinators::UnsyncBoxBody<hyper::body::Bytes, std::io::Error>>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Directory served for every path except `/events`
    pub static_dir: PathBuf,
    /// Events queued per viewer before it is considered too slow
    pub subscriber_capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// What every request handler gets to see
pub struct Context {
    pub registry: Arc<Registry>,
    pub static_dir: PathBuf,
    pub subscriber_capacity: usize,
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<Context>,
}

impl Server {
    pub async fn bind(config: ServerConfig, registry: Arc<Registry>) -> Result<Self, ServeError> {
        let addr = config.listen;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;

        Ok(Self {
            listener,
            ctx: Arc::new(Context {
                registry,
                static_dir: config.static_dir,
                subscriber_capacity: config.subscriber_capacity,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires. Open event streams are not
    /// waited for.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.local_addr() {
            Ok(addr) => info!("Listening on http://{addr}"),
            Err(e) => warn!("listening on unknown address: {e}"),
        }

        loop {
            tokio::select! {
                val = self.listener.accept() => {
                    match val {
                        Ok((stream, addr)) => {
                            debug!("connection from {addr}");
                            tokio::task::spawn(handle_connection(stream, self.ctx.clone()));
                        },
                        Err(e) => {
                            warn!("failed to accept: {e:?}");
                            continue;
                        }
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("http server stopping");
                    return;
                }
            }
        }
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<Context>) {
    let io = hyper_util::rt::TokioIo::new(stream);

    let builder =
        hyper_util::server::conn::auto::Builder::new(hyper_util::rt::tokio::TokioExecutor::new());
    tokio::pin! {
        let conn = builder
            .serve_connection(
                io,
                hyper::service::service_fn(|r| {
                    let ctx = ctx.clone();
                    async move { handle_request(r, &ctx).await }
                }),
            );
    }

    if let Err(e) = conn.await {
        debug!("connection error: {e:?}");
    }
}

async fn handle_request(r: hyper::Request<hyper::body::Incoming>, ctx: &Context) -> HttpResult {
    let path = r.uri().path().to_string();
    let method = r.method().clone();
    // hyper leaves the body off HEAD responses
    let readable = method == hyper::Method::GET || method == hyper::Method::HEAD;

    match path.as_str() {
        "/events" if method == hyper::Method::GET => crate::sse::handle(ctx).await,
        "/events" => method_not_allowed(&method),
        t if readable => crate::assets::serve(&ctx.static_dir, t).await,
        _ => method_not_allowed(&method),
    }
}

fn method_not_allowed(m: &hyper::Method) -> HttpResult {
    bytes_to_resp(
        format!("method not allowed: {m}").into_bytes(),
        hyper::StatusCode::METHOD_NOT_ALLOWED,
    )
}

pub fn server_error_(s: String) -> HttpResult {
    bytes_to_resp(s.into_bytes(), hyper::StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn bytes_to_resp(bytes: Vec<u8>, status: hyper::StatusCode) -> HttpResult {
    use http_body_util::BodyExt;

    let mut r = hyper::Response::new(
        http_body_util::Full::new(hyper::body::Bytes::from(bytes))
            .map_err(|e| match e {})
            .boxed_unsync(),
    );
    *r.status_mut() = status;
    Ok(r)
}

pub fn not_found_(m: String) -> HttpResult {
    bytes_to_resp(m.into_bytes(), hyper::StatusCode::NOT_FOUND)
}

pub fn bad_request_(m: String) -> HttpResult {
    bytes_to_resp(m.into_bytes(), hyper::StatusCode::BAD_REQUEST)
}

#[macro_export]
macro_rules! server_error {
    ($($t:tt)*) => {{
        sensorcast_hub::http::server_error_(format!($($t)*))
    }};
}

#[macro_export]
macro_rules! not_found {
    ($($t:tt)*) => {{
        sensorcast_hub::http::not_found_(format!($($t)*))
    }};
}

#[macro_export]
macro_rules! bad_request {
    ($($t:tt)*) => {{
        sensorcast_hub::http::bad_request_(format!($($t)*))
    }};
}
