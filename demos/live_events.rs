//! Live events example
//!
//! Connects to Constellation, follows a user's updates and a channel's
//! updates (subscribed through the streaming alias), and prints lifecycle
//! signals.
//!
//! Configuration comes from the environment (`CONSTELLATION_ADDRESS`,
//! `CONSTELLATION_AUTHORIZATION`, `CONSTELLATION_COOKIE`,
//! `CONSTELLATION_RECONNECT_MS`).
//!
//! Run with: cargo run --example live_events -- <user id> <channel id>

use constellation::{ClientBuilder, ClientConfig, LifecycleEvent};
use std::env;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let user_id = args.next().unwrap_or_else(|| "1".to_string());
    let channel_id = args.next().unwrap_or_else(|| "1".to_string());

    let config = ClientConfig::from_env()?;
    let client = ClientBuilder::from_config(config).build()?;
    let mut lifecycle = client.lifecycle();

    client.subscribe(format!("user:{}:update", user_id), |payload| async move {
        println!("user update: {}", payload);
    })?;

    // The alias only selects the wire channel; its pushes arrive under
    // `channel:<id>:update`, so the listener goes there
    client.subscribe(format!("chat:{}:StartStreaming", channel_id), |_| async {})?;
    client.subscribe(format!("channel:{}:update", channel_id), |payload| async move {
        println!("channel update: {}", payload);
    })?;

    println!("Subscribed channels: {:?}", client.subscriptions());

    loop {
        tokio::select! {
            event = lifecycle.recv() => match event {
                Ok(LifecycleEvent::Connected(hello)) => println!("Connected: {}", hello),
                Ok(LifecycleEvent::Disconnected) => println!("Disconnected"),
                Ok(LifecycleEvent::Reconnecting) => println!("Reconnecting..."),
                Ok(LifecycleEvent::Error(e)) => eprintln!("Subscription error: {}", e),
                Err(RecvError::Lagged(skipped)) => eprintln!("Missed {} lifecycle signals", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down");
                client.disconnect();
                break;
            }
        }
    }

    Ok(())
}
