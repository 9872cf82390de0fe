//! Startup-time failure modes that never reach a request. Per-request errors
//! are carried by [`core_engine::error::CoreError`] and turned into a JSON
//! body by [`crate::dispatch`]'s single catch.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to bind the listening socket to the configured address.
    #[error("failed to bind to address: {0}")]
    Bind(#[source] std::io::Error),

    /// The HTTP server returned an I/O error while serving connections.
    #[error("server error: {0}")]
    Server(#[source] std::io::Error),
}
