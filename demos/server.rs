//! Demo server - registers `WriteCall` and serves clients until Ctrl-C.
//!
//! This demo shows:
//! - Building a server with a typed synchronous handler
//! - Routing the crate's log output through `tracing-subscriber`
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=pipe_rpc=debug cargo run --example server
//! # in another terminal
//! cargo run --example client
//! ```

use std::convert::Infallible;

use pipe_rpc::{CancellationToken, PipeServer};
use tracing_subscriber::EnvFilter;

/// Print the call and report that it was handled.
fn write_call(call: String) -> Result<i32, Infallible> {
    println!("{}", call);
    Ok(1)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pipe_rpc=info")),
        )
        .init();

    let server = PipeServer::builder("listener")
        .method_fn("WriteCall", write_call)
        .build()?;

    let cancel = CancellationToken::new();
    server.start(&cancel)?;

    tokio::signal::ctrl_c().await?;
    server.stop();
    Ok(())
}
