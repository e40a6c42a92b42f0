//! Command-line client for exercising `/ws/audio` by hand.
//!
//! Streams a 16 kHz mono 16-bit WAV file to the server at roughly real-time
//! pace and prints every frame that comes back. Speech audio can be written to
//! a file for listening afterwards.
//!
//! ```text
//! ws-probe --file answer.wav --voice alloy --save-audio reply.mp3
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{interval, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXPECTED_SAMPLE_RATE: u32 = 16_000;

#[derive(Parser, Debug)]
#[command(name = "ws-probe", about = "Stream a WAV file to a mock interview server")]
struct Args {
    /// Websocket endpoint
    #[arg(long, env = "PROBE_URL", default_value = "ws://127.0.0.1:8080/ws/audio")]
    url: String,

    /// 16 kHz mono 16-bit PCM WAV file to send
    #[arg(long)]
    file: PathBuf,

    /// Interviewer voice requested in the init message
    #[arg(long)]
    voice: Option<String>,

    /// Bytes per binary frame (3200 = 100 ms of audio)
    #[arg(long, default_value_t = 3200)]
    chunk_bytes: usize,

    /// Delay between frames in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Send a flush after the last frame so a partial window is processed
    #[arg(long)]
    flush: bool,

    /// Stop once nothing has arrived for this many seconds
    #[arg(long, default_value_t = 10)]
    idle_secs: u64,

    /// Append received speech audio to this file
    #[arg(long)]
    save_audio: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ws_probe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    let args = Args::parse();
    if args.chunk_bytes == 0 || args.chunk_bytes % 2 != 0 {
        bail!("--chunk-bytes must be a positive even number");
    }

    let pcm = read_pcm(&args.file)?;
    info!(
        file = %args.file.display(),
        bytes = pcm.len(),
        seconds = pcm.len() as f64 / (EXPECTED_SAMPLE_RATE as f64 * 2.0),
        "Loaded audio"
    );

    let (ws, _response) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.url))?;
    info!(url = %args.url, "Connected");
    let (mut write, mut read) = ws.split();

    let mut init = json!({ "type": "init" });
    if let Some(voice) = &args.voice {
        init["voice"] = json!(voice);
    }
    write.send(Message::Text(init.to_string())).await?;

    let chunks: Vec<Vec<u8>> = pcm.chunks(args.chunk_bytes).map(<[u8]>::to_vec).collect();
    let pace = Duration::from_millis(args.interval_ms.max(1));
    let flush = args.flush;

    let sender = tokio::spawn(async move {
        let mut ticker = interval(pace);
        for chunk in chunks {
            ticker.tick().await;
            write.send(Message::Binary(chunk)).await?;
        }
        if flush {
            write.send(Message::Text(json!({ "type": "flush" }).to_string())).await?;
        }
        debug!("All audio sent");
        Ok::<_, anyhow::Error>(write)
    });

    let mut audio_out = match &args.save_audio {
        Some(path) => Some(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => None,
    };
    let mut audio_bytes = 0usize;
    let idle = Duration::from_secs(args.idle_secs);

    loop {
        let frame = match timeout(idle, read.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => {
                info!("Server closed the stream");
                break;
            }
            Err(_) if sender.is_finished() => {
                info!(idle_secs = args.idle_secs, "No frames received, finishing");
                break;
            }
            Err(_) => continue,
        };

        match frame {
            Message::Text(text) => print_message(&text),
            Message::Binary(audio) => {
                audio_bytes += audio.len();
                println!("[audio] {} bytes", audio.len());
                if let Some(file) = audio_out.as_mut() {
                    file.write_all(&audio)?;
                }
            }
            Message::Close(frame) => {
                info!(?frame, "Server sent close");
                break;
            }
            _ => {}
        }
    }

    match sender.await? {
        Ok(mut write) => {
            if let Err(e) = write.send(Message::Close(None)).await {
                warn!(error = %e, "Failed to send close frame");
            }
        }
        Err(e) => warn!(error = %e, "Sending audio stopped early"),
    }

    info!(audio_bytes, "Done");
    Ok(())
}

/// Read a WAV file and return its samples as little-endian PCM bytes.
fn read_pcm(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let (header, data) = wav::read(&mut BufReader::new(file))?;

    if header.sampling_rate != EXPECTED_SAMPLE_RATE || header.channel_count != 1 {
        bail!(
            "expected {} Hz mono audio, got {} Hz with {} channels",
            EXPECTED_SAMPLE_RATE,
            header.sampling_rate,
            header.channel_count
        );
    }

    let samples = match data {
        wav::BitDepth::Sixteen(samples) => samples,
        _ => bail!("expected 16-bit samples, got {} bits", header.bits_per_sample),
    };

    Ok(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
}

fn print_message(text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            let kind = value["type"].as_str().unwrap_or("?");
            match value.get("data") {
                Some(Value::String(data)) => println!("[{}] {}", kind, data),
                Some(data) => println!("[{}] {}", kind, data),
                None => println!("[{}]", kind),
            }
        }
        Err(_) => println!("[raw] {}", text),
    }
}
