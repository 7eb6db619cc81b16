//! Tail a server push stream.
//!
//! Demonstrates:
//! - Building a client over the HTTP transport
//! - Subscribing to named events and unnamed messages
//! - Observing status transitions and error records
//!
//! Usage:
//!   cargo run --example 001_tail_stream -- http://localhost:8080/events
//!   cargo run --example 001_tail_stream -- http://localhost:8080/events update --debug
//!   cargo run --example 001_tail_stream -- --no-wait

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use push_stream::{EventClient, MESSAGE_EVENT, Result, SseTransport};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== 001: Tail Stream ===\n");

    // ========================================================================
    // Create Client
    // ========================================================================

    println!("[1] Creating client...");
    let client = EventClient::builder()
        .transport(SseTransport::new())
        .debug(args.debug)
        .build()?;
    println!("    ✓ Client ready\n");

    // ========================================================================
    // Subscribe
    // ========================================================================

    println!("[2] Subscribing...");
    client.on_status_change(|status| println!("    [status] {status}"));
    client.on_error(|record| println!("    [error]  {record}"));
    client.on(MESSAGE_EVENT, |payload| println!("    [message] {payload}"));

    for event in &args.events {
        let name = event.clone();
        client.on(event, move |payload| println!("    [{name}] {payload}"));
        println!("    ✓ {event}");
    }
    println!();

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[3] Connecting to {}...", args.url);
    client.connect(args.url.as_str());

    common::wait_for_exit(args.no_wait).await;

    client.disconnect();
    println!("\n=== Done ===");
    Ok(())
}
