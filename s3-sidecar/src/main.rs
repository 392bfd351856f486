//! Sidecar for the scanner server's Job pod. Waits for the scanner to
//! write its startup JSON onto the shared `common-space` volume, then
//! uploads it to S3 and exits, matching
//! `original_source/s3_sidecar/__main__.py`'s contract. Uses `object_store`
//! for the upload rather than a presigned POST URL, since presigned posts
//! aren't something `object_store` exposes — a direct authenticated PUT
//! achieves the same "land this file in the bucket" outcome.

use anyhow::{Context, Result};
use clap::Parser;
use object_store::aws::AmazonS3Builder;
use object_store::{ObjectStore, PutPayload};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(about = "Post the file to the S3 bucket")]
struct Cli {
    /// The file to post
    fpath: PathBuf,

    /// Whether to wait indefinitely for the file to exist
    #[arg(long, default_value_t = false)]
    wait_indefinitely: bool,
}

struct S3Env {
    url: String,
    access_key_id: String,
    secret_key: String,
    bucket: String,
    object_key: String,
    lifetime_secs: u64,
}

impl S3Env {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: std::env::var("S3_URL").context("S3_URL required")?,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID").context("S3_ACCESS_KEY_ID required")?,
            secret_key: std::env::var("S3_SECRET_KEY").context("S3_SECRET_KEY required")?,
            bucket: std::env::var("S3_BUCKET").context("S3_BUCKET required")?,
            object_key: std::env::var("S3_OBJECT_KEY").context("S3_OBJECT_KEY required")?,
            lifetime_secs: std::env::var("K8S_SCANNER_SIDECAR_S3_LIFETIME_SECONDS")
                .context("K8S_SCANNER_SIDECAR_S3_LIFETIME_SECONDS required")?
                .parse()
                .context("invalid K8S_SCANNER_SIDECAR_S3_LIFETIME_SECONDS")?,
        })
    }
}

async fn wait_for_file(fpath: &PathBuf, lifetime: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + lifetime;
    let mut last_log = tokio::time::Instant::now();
    info!("Waiting for file to exist...");
    while !fpath.exists() {
        if last_log.elapsed() >= Duration::from_secs(5) {
            info!("still waiting...");
            last_log = tokio::time::Instant::now();
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("lifetime timer has expired: {} seconds", lifetime.as_secs());
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}

async fn post(fpath: &PathBuf, env: &S3Env) -> Result<()> {
    if !fpath.exists() {
        anyhow::bail!("file not found: {}", fpath.display());
    }
    let contents = std::fs::read(fpath).with_context(|| format!("reading {}", fpath.display()))?;
    if let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&contents) {
        tracing::debug!("{}", serde_json::to_string_pretty(&parsed)?);
    }

    info!("file exists, waiting a bit longer just in case");
    tokio::time::sleep(Duration::from_secs(5)).await;

    info!("connecting to s3...");
    let store = AmazonS3Builder::new()
        .with_endpoint(&env.url)
        .with_bucket_name(&env.bucket)
        .with_access_key_id(&env.access_key_id)
        .with_secret_access_key(&env.secret_key)
        .with_allow_http(true)
        .build()
        .context("failed to build S3 object store")?;

    info!("posting file to s3...");
    let path = object_store::path::Path::from(env.object_key.as_str());
    store
        .put(&path, PutPayload::from_bytes(contents.into()))
        .await
        .context("failed to upload file to s3")?;

    info!("Upload complete: {}", env.object_key);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let env = S3Env::from_env()?;

    if cli.wait_indefinitely {
        wait_for_file(&cli.fpath, Duration::from_secs(env.lifetime_secs)).await?;
    }

    post(&cli.fpath, &env).await?;
    info!("Done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_file_returns_once_file_is_created() {
        let dir = std::env::temp_dir().join(format!("s3-sidecar-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let fpath = dir.join("startup.json");

        let waiter = tokio::spawn({
            let fpath = fpath.clone();
            async move { wait_for_file(&fpath, Duration::from_secs(30)).await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&fpath, b"{}").unwrap();

        waiter.await.unwrap().unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_file_errors_once_lifetime_expires() {
        let fpath = PathBuf::from("/nonexistent/startup.json");
        let result = wait_for_file(&fpath, Duration::from_secs(10)).await;
        assert!(result.is_err());
    }
}
