//! Watch a shardwatchd server and print a status summary on every change.
//!
//! ```bash
//! cargo run --example watch -- http://localhost:8080
//! ```

use shardwatch_client::{FleetMirror, ObserverEvent, WatchClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080".into());

    let mut watch = WatchClient::spawn(&endpoint);
    let mut mirror = FleetMirror::default();

    while let Some(event) = watch.next_event().await {
        if let ObserverEvent::Hello(hello) = &event {
            println!(
                "connected: {} shards, {} patron bots x {} shards",
                hello.total_shards, hello.total_patrons, hello.patron_shards
            );
        }
        if event == ObserverEvent::Disconnected {
            println!("disconnected, reconnecting...");
        }
        if mirror.apply(&event) {
            println!("status counts: {:?}", mirror.summary());
        }
    }
}
