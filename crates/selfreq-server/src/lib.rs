//! Application handle for selfreq: an axum router with a base path, a transport,
//! lazily started listening and a typed decoration mechanism.

mod app;
mod error;
mod listen;
mod transport;

pub use app::{App, AppBuilder, WeakApp};
pub use error::ServerError;
pub use listen::ListenOutcome;
pub use transport::{TlsConfig, Transport};
