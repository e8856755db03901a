// Plays the configured stream for a while and walks the volume range.
// Handy for checking a device and a relay without the console UI.

use radiodesk::audio::{AudioConfig, PlayerEvent, StreamPlayer};
use radiodesk::config::Config;
use radiodesk::context::RadioContext;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,radiodesk=debug")),
        )
        .init();

    println!("📻 radiodesk stream check");
    println!("=========================");

    let mut config = Config::load()?;
    if let Some(url) = std::env::args().nth(1) {
        config.stream_url = url;
    }
    println!("Stream: {}", config.stream_url);

    let context = RadioContext::new(Handle::current(), &config.network)?;
    let audio = AudioConfig::from(&config);
    let unwind = audio.unwind_timeout;

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut player = StreamPlayer::new(context, audio);
    player.set_event_sender(tx);

    println!("\n▶️  Starting stream...");
    player.start(&config.stream_url)?;

    // Wait for the session to reach the device or fail
    let started = timeout(Duration::from_secs(15), async {
        while let Some(event) = events.recv().await {
            println!("   {:?}", event);
            match event {
                PlayerEvent::Playing(_) => return true,
                PlayerEvent::Error(_) => return false,
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !started {
        println!("❌ Stream never started");
        player.shutdown(unwind).await;
        return Ok(());
    }

    println!("🎶 Playing for 10 seconds...");
    sleep(Duration::from_secs(10)).await;

    println!("🔊 Testing volume control...");
    for volume in [0.0, 0.25, 0.5, 0.75, 1.0, 0.5] {
        player.set_volume(volume);
        let gain = player
            .gain_db()
            .map(|db| format!("{:.1} dB", db))
            .unwrap_or_else(|| "-".to_string());
        println!("   Volume {:>3.0}% -> gain {}", volume * 100.0, gain);
        sleep(Duration::from_secs(3)).await;
    }

    println!("⏹️  Stopping stream...");
    player.stop();
    println!("   playing after stop: {}", player.is_playing());

    println!("▶️  Restarting once to check reuse...");
    player.start(&config.stream_url)?;
    sleep(Duration::from_secs(5)).await;

    let clean = player.shutdown(unwind).await;
    while let Ok(event) = events.try_recv() {
        println!("   {:?}", event);
    }

    if clean {
        println!("✅ Stream check completed");
    } else {
        println!("⚠️  Session tasks did not unwind within {:?}", unwind);
    }
    Ok(())
}
