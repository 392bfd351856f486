//! Init container for the scanner server's Job pod. Requests an EWMS
//! workflow for this scan and writes the attributes the scanner server's
//! startup sequence needs onto the shared `common-space` volume, matching
//! `original_source/ewms_init_container/__main__.py`'s contract.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use skydriver_ewms::{EwmsClient, HttpEwmsClient};

#[derive(Parser)]
#[command(about = "Retrieve EWMS attributes for use by a Skymap Scanner instance")]
struct Cli {
    /// The scan id
    scan_id: String,

    /// The JSON file to write the map of EWMS attributes to
    #[arg(long = "json-out", value_name = "PATH")]
    json_out: PathBuf,
}

fn require_json_suffix(path: &PathBuf) -> Result<()> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        anyhow::bail!("{} is not a JSON file", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    require_json_suffix(&cli.json_out)?;

    let ewms_address = std::env::var("EWMS_ADDRESS").context("EWMS_ADDRESS required")?;
    let clusters = std::env::var("EWMS_CLUSTERS").unwrap_or_default();
    let n_workers: u32 = std::env::var("EWMS_N_WORKERS")
        .unwrap_or_else(|_| "0".to_string())
        .parse()
        .context("invalid EWMS_N_WORKERS")?;
    let max_worker_runtime: u64 = std::env::var("EWMS_MAX_WORKER_RUNTIME")
        .unwrap_or_else(|_| "0".to_string())
        .parse()
        .context("invalid EWMS_MAX_WORKER_RUNTIME")?;

    let client = HttpEwmsClient::new(ewms_address);

    info!("getting workflow id for scan {}...", cli.scan_id);
    let workflow_id = client
        .request_workflow(&cli.scan_id)
        .await
        .map_err(anyhow::Error::msg)
        .context("failed to request EWMS workflow")?;

    info!("getting EWMS attributes for workflow {}...", workflow_id);
    let ewms_attrs = serde_json::json!({
        "workflow_id": workflow_id,
        "clusters": clusters.split_whitespace().collect::<Vec<_>>(),
        "n_workers": n_workers,
        "max_worker_runtime": max_worker_runtime,
    });

    info!("dumping EWMS attributes to '{}'...", cli.json_out.display());
    let contents = serde_json::to_string(&ewms_attrs)?;
    std::fs::write(&cli.json_out, contents)
        .with_context(|| format!("failed to write {}", cli.json_out.display()))?;

    info!("Done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_out_must_have_json_extension() {
        assert!(require_json_suffix(&PathBuf::from("out.json")).is_ok());
        assert!(require_json_suffix(&PathBuf::from("out.txt")).is_err());
    }
}
