use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::{Client, Response};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "wisp", about = "wisp: one-time secret sharing", version)]
struct Cli {
    /// wisp server URL (default: http://localhost:8080 or $WISP_SERVER)
    #[arg(long, env = "WISP_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a secret and print its one-time id
    Create {
        /// File holding the (already encrypted) payload; stdin when omitted
        #[arg(name = "FILE")]
        file: Option<PathBuf>,
        /// TTL duration e.g. 1h, 30m, 5m
        #[arg(long, default_value = "1h")]
        ttl: String,
        /// Client encryption scheme tag
        #[arg(long, default_value = "1")]
        version: u8,
        /// Nonce to store alongside the payload (random when omitted)
        #[arg(long)]
        nonce: Option<String>,
    },
    /// Retrieve a secret exactly once by id
    Consume {
        /// Secret id (32 lowercase hex chars)
        id: String,
        /// Write the payload here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Check server health
    Health,
}

// ── Request context ───────────────────────────────────────────────────────────

/// Shared HTTP client + normalized server URL.
struct Ctx {
    client: Client,
    server: String,
}

impl Ctx {
    fn new(server: String) -> Self {
        Self {
            client: Client::new(),
            server: server.trim_end_matches('/').to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.server, path)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("WISP_LOG_LEVEL").unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&log_level))
        .init();

    let cli = Cli::parse();
    let ctx = Ctx::new(cli.server);

    match cli.command {
        Commands::Create {
            file,
            ttl,
            version,
            nonce,
        } => cmd_create(&ctx, file.as_deref(), &ttl, version, nonce).await,

        Commands::Consume { id, output } => cmd_consume(&ctx, &id, output.as_deref()).await,

        Commands::Health => cmd_health(&ctx).await,
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn cmd_create(
    ctx: &Ctx,
    file: Option<&std::path::Path>,
    ttl: &str,
    version: u8,
    nonce: Option<String>,
) -> Result<()> {
    let payload = match file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("read stdin")?;
            buf
        }
    };
    if payload.is_empty() {
        anyhow::bail!("refusing to upload an empty payload");
    }

    let ttl_secs = parse_duration(ttl)?;
    let nonce = match nonce {
        Some(n) => n,
        None => random_nonce(),
    };

    let resp = ctx
        .client
        .post(ctx.url("api/secrets"))
        .header("x-wisp-version", version.to_string())
        .header("x-wisp-nonce", &nonce)
        .header("x-wisp-ttl", ttl_secs.to_string())
        .body(payload)
        .send()
        .await
        .context("send create request")?;
    let resp = require_success(resp).await?;

    let body: Value = resp.json().await.context("parse create response")?;
    let id = body["id"].as_str().unwrap_or_default();
    println!("{id}");
    eprintln!(
        "expires at {}; share the id, it works exactly once",
        body["expires_at"]
    );
    Ok(())
}

async fn cmd_consume(ctx: &Ctx, id: &str, output: Option<&std::path::Path>) -> Result<()> {
    let resp = ctx
        .client
        .get(ctx.url(&format!("api/secrets/{id}")))
        .send()
        .await
        .context("send consume request")?;
    let resp = require_success(resp).await?;

    let version = header_str(&resp, "x-wisp-version");
    let nonce = header_str(&resp, "x-wisp-nonce");
    let payload = resp.bytes().await.context("read payload")?;

    eprintln!("version={version} nonce={nonce}");
    match output {
        Some(path) => {
            std::fs::write(path, &payload)
                .with_context(|| format!("write {}", path.display()))?;
            eprintln!("wrote {} bytes to {}", payload.len(), path.display());
        }
        None => {
            std::io::stdout()
                .write_all(&payload)
                .context("write payload to stdout")?;
        }
    }
    Ok(())
}

async fn cmd_health(ctx: &Ctx) -> Result<()> {
    let resp = ctx
        .client
        .get(ctx.url("health"))
        .send()
        .await
        .context("send health request")?;
    let resp = require_success(resp).await?;
    let body: Value = resp.json().await.context("parse health response")?;
    println!("{}", body["status"].as_str().unwrap_or("unknown"));
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Checks the response status and returns it on success, or bails with the
/// server's status code and body text on failure.
async fn require_success(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    anyhow::bail!("server returned {status}: {text}")
}

fn header_str(resp: &Response, name: &str) -> String {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

/// Parse human duration strings like "1h", "30m", "5s" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

/// 12 random bytes, hex-encoded. Stand-in nonce for callers that do their
/// encryption out of band.
fn random_nonce() -> String {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
