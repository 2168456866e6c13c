//! DailZero console client
//!
//! Starts a realtime voice call against the configured backend, prints
//! state transitions, transcript lines, and diagnostics as they arrive,
//! and hangs up on Enter or when the agent ends the call.

use anyhow::Result;
use dailzero_client::call::{CallConfig, CallEvent, CallManager, CallOptions};
use dailzero_client::state::Settings;
use dailzero_media::{list_input_devices, list_output_devices};
use dailzero_protocol::CallState;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dailzero=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DailZero client...");

    let mut settings = Settings::load();
    // Write the file back before env overrides so a fresh install gets a
    // settings file to edit and overrides never persist
    settings.save();
    settings.apply_env_overrides();

    log_devices();

    let config = CallConfig {
        backend_url: settings.backend_url.clone(),
        realtime_url: settings.realtime_url.clone(),
        model: settings.model.clone(),
        business_id: settings.business_id.clone(),
        input_device: settings.input_device.clone(),
        output_device: settings.output_device.clone(),
        ice_servers: settings.ice_servers.clone(),
    };
    let (manager, mut events) = CallManager::new(config);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                CallEvent::StateChanged(state) => println!("[state] {}", state),
                CallEvent::VadHint(hint) => tracing::debug!("VAD hint: {}", hint),
                CallEvent::TranscriptUpdated(entry) => {
                    println!("[{}] {}", entry.role, entry.text);
                }
                CallEvent::Log(entry) => match entry.duration_ms {
                    Some(ms) => println!("[{}] {} ({} ms)", entry.category, entry.message, ms),
                    None => println!("[{}] {}", entry.category, entry.message),
                },
            }
        }
    });

    if let Err(e) = manager.start_call(CallOptions::default()).await {
        eprintln!("Call failed: {}", e);
        manager.end_call().await;
        return Err(e.into());
    }
    println!("Call connected. Press Enter to hang up.");

    // Detached thread so a parked read_line never blocks shutdown
    let (stdin_tx, mut stdin_rx) = tokio::sync::mpsc::channel::<()>(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = stdin_tx.blocking_send(());
    });

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = stdin_rx.recv() => break,
            _ = poll.tick() => {
                tracing::trace!("Mic level: {:.3}", manager.input_level());
                if matches!(manager.state(), CallState::Idle | CallState::Error) {
                    break;
                }
            }
        }
    }

    manager.end_call().await;

    let conversation = manager.conversation();
    if conversation.is_empty() {
        println!("No transcript recorded.");
    } else {
        println!();
        println!("Conversation:");
        for entry in conversation {
            println!("  [{}] {}", entry.role, entry.text);
        }
    }

    printer.abort();
    Ok(())
}

fn log_devices() {
    match list_input_devices() {
        Ok(devices) => {
            for device in devices {
                let marker = if device.is_default { " (default)" } else { "" };
                tracing::debug!("Input device: {}{}", device.name, marker);
            }
        }
        Err(e) => tracing::warn!("Could not enumerate input devices: {}", e),
    }
    match list_output_devices() {
        Ok(devices) => {
            for device in devices {
                let marker = if device.is_default { " (default)" } else { "" };
                tracing::debug!("Output device: {}{}", device.name, marker);
            }
        }
        Err(e) => tracing::warn!("Could not enumerate output devices: {}", e),
    }
}
