use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("failed to load TLS configuration: {0}")]
    Tls(std::io::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("app is already decorated with `{0}`")]
    AlreadyDecorated(&'static str),
}
