use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use audioid_relay::{
    Config, IdentifySession, IdentifyStatus, NatsChannel, NatsDispatchServer,
    ProxySessionFactory, ScriptedSessionFactory, SessionClient, Subjects,
};
use clap::Parser;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "audioid-relay")]
#[command(about = "Serve audio identification sessions over NATS")]
struct Args {
    /// Config file (without extension)
    #[arg(short, long, default_value = "config/audioid-relay")]
    config: String,

    /// Override the NATS server URL from the config
    #[arg(long)]
    nats_url: Option<String>,

    /// Frames a scripted session needs before it completes
    #[arg(long, default_value = "20")]
    frames_needed: usize,

    /// Tracks a completed scripted session reports
    #[arg(long, default_value = "1")]
    track_count: usize,

    /// Act as a client: stream silence to a running relay and print the result
    #[arg(long)]
    identify: bool,

    /// Number of 4096-byte frames sent in client mode
    #[arg(long, default_value = "130")]
    frames: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args = Args::parse();

    let mut cfg = Config::load(&args.config)?;
    if let Some(url) = args.nats_url.clone() {
        cfg.transport.nats_url = url;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("NATS server: {}", cfg.transport.nats_url);
    info!("Subject prefix: {}", cfg.transport.subject_prefix);

    if args.identify {
        identify(&cfg, args.frames).await
    } else {
        serve(&cfg, &args).await
    }
}

async fn serve(cfg: &Config, args: &Args) -> Result<()> {
    let factory = Arc::new(
        ScriptedSessionFactory::new(args.frames_needed).with_track_count(args.track_count),
    );

    let server = NatsDispatchServer::connect(
        &cfg.transport.nats_url,
        Subjects::new(&cfg.transport.subject_prefix),
        factory,
    )
    .await?;
    let dispatcher = server.dispatcher();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    let stats = dispatcher.stats();
    info!(
        "Handled {} commands ({} failed), {} sessions still active",
        stats.commands_handled, stats.commands_failed, stats.active_sessions
    );

    Ok(())
}

async fn identify(cfg: &Config, frames: usize) -> Result<()> {
    let channel = Arc::new(NatsChannel::from_config(&cfg.transport));
    let client = SessionClient::from_config(channel, &cfg.transport);
    let factory = ProxySessionFactory::new(client);

    let session = factory.create_proxy(cfg.audio.session_options());
    let mut status = session.watch_status();

    info!("Streaming {} frames of silence", frames);
    for _ in 0..frames {
        session.add_audio_sample(Some(vec![0u8; 4096])).await;
    }
    session.add_audio_sample(None).await;
    session.flush().await?;

    let finished = matches!(
        tokio::time::timeout(
            Duration::from_secs(10),
            status.wait_for(|status| status.is_terminal()),
        )
        .await,
        Ok(Ok(_))
    );
    if !finished {
        warn!("No result from the relay");
    }

    match session.status() {
        IdentifyStatus::Complete => {
            for track in session.tracks().await {
                info!("Matched \"{}\" by {}", track.title, track.artist);
            }
        }
        other => {
            session.end().await;
            bail!("identification ended as {}", other);
        }
    }

    session.end().await;
    Ok(())
}
