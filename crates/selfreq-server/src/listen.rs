use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::Router;
use axum_server::Handle;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinHandle;

use crate::app::App;
use crate::error::ServerError;
use crate::transport::Transport;

/// Outcome of a listen attempt, shared by every caller awaiting it.
pub type ListenOutcome = Result<SocketAddr, Arc<ServerError>>;

type StartFuture = Shared<BoxFuture<'static, ListenOutcome>>;

pub(crate) enum ListenState {
    Idle,
    Starting(StartFuture),
    Listening(SocketAddr),
}

pub(crate) struct RunningServer {
    pub(crate) handle: Handle,
    pub(crate) task: Option<JoinHandle<io::Result<()>>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn resolve_addr(host: &str, port: u16) -> SocketAddr {
    if host.eq_ignore_ascii_case("localhost") {
        return SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(e) => {
            tracing::warn!("invalid host '{host}': {e}, falling back to 127.0.0.1:{port}");
            SocketAddr::from((Ipv4Addr::LOCALHOST, port))
        }
    }
}

impl App {
    /// Start accepting connections on `host:port` and resolve with the bound address.
    ///
    /// Port `0` asks the OS for an ephemeral port; `host` is `localhost` or an IP
    /// literal. When the app was built with a pre-bound listener, that socket is used
    /// and `port`/`host` are ignored.
    ///
    /// Concurrent calls share a single attempt and all observe its outcome. Once
    /// listening, further calls return the bound address without starting anything.
    /// A failed attempt may be retried by a later call.
    ///
    /// # Errors
    ///
    /// Returns the shared error of the attempt if binding or TLS setup failed.
    pub async fn listen(&self, port: u16, host: &str) -> ListenOutcome {
        let start = {
            let mut state = lock(&self.inner.listen);
            match &*state {
                ListenState::Listening(addr) => return Ok(*addr),
                ListenState::Starting(start) => start.clone(),
                ListenState::Idle => {
                    let start = self.start(resolve_addr(host, port));
                    *state = ListenState::Starting(start.clone());
                    start
                }
            }
        };

        let outcome = start.clone().await;

        let mut state = lock(&self.inner.listen);
        if let ListenState::Starting(current) = &*state
            && current.ptr_eq(&start)
        {
            *state = match &outcome {
                Ok(addr) => ListenState::Listening(*addr),
                Err(_) => ListenState::Idle,
            };
        }
        outcome
    }

    fn start(&self, addr: SocketAddr) -> StartFuture {
        let router = self.inner.router.clone();
        let transport = self.inner.transport.clone();
        let listener = lock(&self.inner.listener).take();
        let slot = Arc::clone(&self.inner.server);

        async move {
            start_server(router, transport, listener, addr, slot)
                .await
                .map_err(Arc::new)
        }
        .boxed()
        .shared()
    }
}

async fn start_server(
    router: Router,
    transport: Transport,
    listener: Option<std::net::TcpListener>,
    addr: SocketAddr,
    slot: Arc<Mutex<Option<RunningServer>>>,
) -> Result<SocketAddr, ServerError> {
    let addr = listener
        .as_ref()
        .and_then(|l| l.local_addr().ok())
        .unwrap_or(addr);
    if let Some(listener) = &listener {
        listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Bind(addr.to_string(), e))?;
    }

    let handle = Handle::new();
    let service = router.into_make_service();
    let task = match (transport.tls(), listener) {
        (None, Some(listener)) => tokio::spawn(
            axum_server::from_tcp(listener)
                .handle(handle.clone())
                .serve(service),
        ),
        (None, None) => tokio::spawn(
            axum_server::bind(addr)
                .handle(handle.clone())
                .serve(service),
        ),
        (Some(tls), listener) => {
            let config = tls.rustls_config().await?;
            match listener {
                Some(listener) => tokio::spawn(
                    axum_server::from_tcp_rustls(listener, config)
                        .handle(handle.clone())
                        .serve(service),
                ),
                None => tokio::spawn(
                    axum_server::bind_rustls(addr, config)
                        .handle(handle.clone())
                        .serve(service),
                ),
            }
        }
    };

    *lock(&slot) = Some(RunningServer {
        handle: handle.clone(),
        task: Some(task),
    });

    if let Some(bound) = handle.listening().await {
        tracing::info!("app listening on {}//{bound}", transport.protocol());
        return Ok(bound);
    }

    let task = lock(&slot).take().and_then(|server| server.task);
    let err = match task {
        Some(task) => match task.await {
            Ok(Err(e)) => ServerError::Bind(addr.to_string(), e),
            Ok(Ok(())) => ServerError::Server(format!("server on {addr} stopped before listening")),
            Err(e) => ServerError::Server(format!("server task failed: {e}")),
        },
        None => ServerError::Server(format!("server on {addr} stopped before listening")),
    };
    tracing::warn!("failed to listen on {addr}: {err}");
    Err(err)
}
