//! lmstream binary.
//!
//! Loads a GGUF model and streams a completion to stdout. Ctrl-C cancels the
//! in-flight generation cooperatively and unloads before exiting.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lmstream_core::{
    runtime::LlamaCppRuntime, InferenceSession, LoadConfig, SamplingConfig, StreamEvent,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a GGUF model file
    #[arg(short, long)]
    model: PathBuf,

    /// Prompt to complete
    prompt: String,

    /// Maximum tokens to generate
    #[arg(long, default_value_t = 256)]
    max_tokens: usize,

    #[arg(long, default_value_t = 0.7)]
    temperature: f32,

    #[arg(long)]
    top_k: Option<usize>,

    #[arg(long, default_value_t = 1.0)]
    top_p: f32,

    /// Stop sequences; may be given multiple times
    #[arg(long = "stop")]
    stop_sequences: Vec<String>,

    /// Context window size in tokens
    #[arg(long, default_value_t = 2048)]
    context_length: usize,

    /// Layers to offload to the GPU
    #[arg(long)]
    gpu_layers: Option<usize>,

    /// Log filter, e.g. `lmstream_core=debug`
    #[arg(long, env = "LMSTREAM_LOG")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(cli.log_filter.as_deref().unwrap_or("lmstream_core=info"))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let session = InferenceSession::new(LlamaCppRuntime::new());
    let load = LoadConfig {
        context_length: cli.context_length,
        gpu_layers: cli.gpu_layers,
        ..Default::default()
    };
    session
        .load_model(&cli.model, load)
        .await
        .with_context(|| format!("loading {}", cli.model.display()))?;

    let sampling = SamplingConfig {
        temperature: cli.temperature,
        top_k: cli.top_k,
        top_p: cli.top_p,
        max_tokens: cli.max_tokens,
        stop_sequences: cli.stop_sequences,
        seed: None,
    };
    let mut stream = session.generate(cli.prompt, sampling).await?;

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            event = stream.next_event() => match event? {
                StreamEvent::Fragment(fragment) => {
                    stdout.write_all(fragment.text.as_bytes())?;
                    stdout.flush()?;
                }
                StreamEvent::Terminal(signal) => {
                    println!();
                    info!(%signal, "generation finished");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }
    }

    session.unload().await?;
    Ok(())
}
