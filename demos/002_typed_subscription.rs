//! Typed single-event subscription.
//!
//! Demonstrates:
//! - Decoding one event's payload into a struct
//! - Watching the subscription state reactively
//! - Switching endpoints at runtime
//!
//! Usage:
//!   cargo run --example 002_typed_subscription -- http://localhost:8080/events
//!   cargo run --example 002_typed_subscription -- http://localhost:8080/events --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use common::Args;
use push_stream::{EventSubscription, SseTransport, SubscriptionOptions};
use serde::Deserialize;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct WaitingMembers {
    #[serde(rename = "participantCount")]
    participant_count: u32,
    members: Vec<String>,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    println!("=== 002: Typed Subscription ===\n");

    let event = args
        .events
        .first()
        .cloned()
        .unwrap_or_else(|| "waiting-members-updated".to_string());

    println!("[1] Subscribing to '{event}' on {}...", args.url);
    let subscription: EventSubscription<WaitingMembers> = EventSubscription::new(
        Arc::new(SseTransport::new()),
        SubscriptionOptions::new(args.url.as_str(), event),
    );

    let mut view = subscription.watch();
    let printer = tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let state = view.borrow_and_update().clone();
            match (&state.data, &state.error) {
                (_, Some(error)) => println!("    [{}] error: {error}", state.status),
                (Some(data), None) => println!(
                    "    [{}] {} waiting: {:?}",
                    state.status, data.participant_count, data.members
                ),
                (None, None) => println!("    [{}]", state.status),
            }
        }
    });

    common::wait_for_exit(args.no_wait).await;

    drop(subscription);
    printer.await.ok();
    println!("\n=== Done ===");
}
