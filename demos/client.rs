//! Demo client - calls `WriteCall` on the demo server once.
//!
//! Start `cargo run --example server` first.

use pipe_rpc::{CancellationToken, PipeClient, Request, DEFAULT_CONNECT_TIMEOUT};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pipe_rpc=info")),
        )
        .init();

    let cancel = CancellationToken::new();
    let mut client = PipeClient::new("listener");
    client.start(DEFAULT_CONNECT_TIMEOUT, &cancel).await?;

    let result = client
        .send_message::<i32, _>(&Request::new("WriteCall", "Kabooom!"), &cancel)
        .await?;

    println!("Result:");
    println!("\tsuccess: {}", result.success);
    println!("\tmessage: {}", result.error_message);
    println!("\tdata: {:?}", result.data);

    client.stop();
    Ok(())
}
