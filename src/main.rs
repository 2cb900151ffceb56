//! Binary entry point for the echo server.
//!
//! The runtime logic lives in `eio_websocket::server`, so this binary only
//! delegates to the shared library code.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> { eio_websocket::server::run().await }
