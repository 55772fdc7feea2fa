use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use axum::Router;
use axum::handler::Handler;
use axum::routing::MethodRouter;
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::listen::{ListenState, RunningServer, lock};
use crate::transport::Transport;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Decorations = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

pub(crate) struct AppInner {
    pub(crate) router: Router,
    pub(crate) base_path: String,
    pub(crate) transport: Transport,
    pub(crate) listener: Mutex<Option<std::net::TcpListener>>,
    pub(crate) listen: Mutex<ListenState>,
    pub(crate) server: Arc<Mutex<Option<RunningServer>>>,
    unref: AtomicBool,
    decorations: RwLock<Decorations>,
}

impl Drop for AppInner {
    fn drop(&mut self) {
        let server = lock(&self.server);
        if let Some(server) = server.as_ref() {
            server.handle.shutdown();
        }
    }
}

/// Shared handle to an application and the server that serves it.
///
/// Cloning is cheap; the server shuts down when the last handle is dropped.
#[derive(Clone)]
pub struct App {
    pub(crate) inner: Arc<AppInner>,
}

/// Non-owning handle, for values stored on the app that need to reach back to it.
#[derive(Clone)]
pub struct WeakApp {
    inner: Weak<AppInner>,
}

impl WeakApp {
    #[must_use]
    pub fn upgrade(&self) -> Option<App> {
        self.inner.upgrade().map(|inner| App { inner })
    }
}

pub struct AppBuilder {
    router: Router,
    routes: Vec<(String, MethodRouter)>,
    base_path: String,
    transport: Transport,
    listener: Option<std::net::TcpListener>,
}

impl AppBuilder {
    /// Prefix every route registered through [`AppBuilder::route`].
    #[must_use]
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    #[must_use]
    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.routes.push((path.to_owned(), method_router));
        self
    }

    #[must_use]
    pub fn fallback<H, T>(mut self, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.router = self.router.fallback(handler);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Serve on an already bound socket instead of binding on `listen`.
    #[must_use]
    pub fn listener(mut self, listener: std::net::TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    #[must_use]
    pub fn build(self) -> App {
        let mut router = self.router;
        for (path, method_router) in self.routes {
            router = router.route(&route_path(&self.base_path, &path), method_router);
        }

        App {
            inner: Arc::new(AppInner {
                router: router.layer(TraceLayer::new_for_http()),
                base_path: self.base_path,
                transport: self.transport,
                listener: Mutex::new(self.listener),
                listen: Mutex::new(ListenState::Idle),
                server: Arc::new(Mutex::new(None)),
                unref: AtomicBool::new(false),
                decorations: RwLock::new(HashMap::new()),
            }),
        }
    }
}

fn route_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        }
    } else if path.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{}", path.strip_prefix('/').unwrap_or(path))
    }
}

impl App {
    #[must_use]
    pub fn builder() -> AppBuilder {
        AppBuilder {
            router: Router::new(),
            routes: Vec::new(),
            base_path: String::new(),
            transport: Transport::Plain,
            listener: None,
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakApp {
        WeakApp {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.inner.base_path
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    /// The routed service, for driving requests in-process without a socket.
    #[must_use]
    pub fn router(&self) -> Router {
        self.inner.router.clone()
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        matches!(*lock(&self.inner.listen), ListenState::Listening(_))
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *lock(&self.inner.listen) {
            ListenState::Listening(addr) => Some(addr),
            ListenState::Idle | ListenState::Starting(_) => None,
        }
    }

    /// Stop the server from keeping [`App::wait`] pending.
    pub fn unref(&self) {
        self.inner.unref.store(true, Ordering::Release);
    }

    /// Undo [`App::unref`].
    pub fn keep_alive(&self) {
        self.inner.unref.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_unref(&self) -> bool {
        self.inner.unref.load(Ordering::Acquire)
    }

    /// Wait for the server to stop. Returns immediately when the server is unref'd
    /// or was never started.
    ///
    /// # Errors
    ///
    /// Returns an error if the server terminated with an I/O error.
    pub async fn wait(&self) -> Result<(), ServerError> {
        if self.is_unref() {
            return Ok(());
        }
        let task = lock(&self.inner.server)
            .as_mut()
            .and_then(|server| server.task.take());
        let Some(task) = task else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result.map_err(|e| ServerError::Server(e.to_string())),
            Err(e) => Err(ServerError::Server(format!("server task failed: {e}"))),
        }
    }

    /// Begin a graceful shutdown of the server, if it is running.
    pub fn shutdown(&self) {
        if let Some(server) = lock(&self.inner.server).as_ref() {
            tracing::info!("app shutting down");
            server.handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    }

    /// Attach a value to the app, one per type.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyDecorated`] if a value of this type is already attached.
    pub fn decorate<T: Any + Send + Sync>(&self, value: T) -> Result<Arc<T>, ServerError> {
        let mut decorations = self
            .inner
            .decorations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match decorations.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(ServerError::AlreadyDecorated(std::any::type_name::<T>())),
            Entry::Vacant(slot) => {
                let value = Arc::new(value);
                slot.insert(Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
                Ok(value)
            }
        }
    }

    #[must_use]
    pub fn decoration<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let decorations = self
            .inner
            .decorations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        decorations
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }
}
