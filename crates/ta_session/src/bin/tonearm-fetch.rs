use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ta_proto::login::Credentials;
use ta_proto::{FileId, ItemGid};
use ta_session::{open_audio_stream, Session, SessionConfig, StaticAccessPoints};
use ta_store::{spawn_sweeper, DiskCache};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch one file from a Tonearm access point", long_about = None)]
struct Cli {
    /// JSON session configuration; defaults apply to missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    username: String,

    #[arg(long, env = "TONEARM_PASSWORD")]
    password: String,

    /// `host:port`, may be repeated; tried in order
    #[arg(long = "access-point")]
    access_points: Vec<String>,

    /// 40 hex characters
    #[arg(long)]
    file_id: FileId,

    /// 32 hex characters
    #[arg(long)]
    gid: String,

    #[arg(long)]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    let gid = ItemGid::from_slice(&hex::decode(&cli.gid).context("gid is not hex")?)?;

    let cache = if config.cache.enabled {
        let cache = DiskCache::open(&config.cache, config.stream.chunk_size)?;
        if config.cache.sweep_interval_secs > 0 {
            spawn_sweeper(cache.clone(), Duration::from_secs(config.cache.sweep_interval_secs));
        }
        Some(cache)
    } else {
        None
    };

    let source = Arc::new(StaticAccessPoints(cli.access_points.clone()));
    let credentials = Credentials::with_password(&cli.username, &cli.password);
    let session = Session::connect(config, source, credentials)
        .await
        .map_err(|err| match err.auth_reason() {
            Some(reason) => anyhow!("login rejected: {reason}"),
            None => anyhow!(err),
        })?;
    info!(user = ?session.username(), country = ?session.country_code(), "logged in");

    let mut stream = open_audio_stream(&session, cli.file_id, gid, cache.as_ref()).await?;
    let out = cli.out.clone();
    let written = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut file = std::fs::File::create(&out)
            .with_context(|| format!("create {}", out.display()))?;
        Ok(std::io::copy(&mut stream, &mut file)?)
    })
    .await??;

    println!("Wrote {written} bytes to {}", cli.out.display());
    session.close();
    Ok(())
}
