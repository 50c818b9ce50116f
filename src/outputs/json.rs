//! JSON run summary output.
//!
//! The summary is written to a temp file first and renamed into place, so a
//! reader polling the path never sees a half-written document.

use crate::coordinator::RunSummary;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Serialize `summary` to `path`, creating parent directories as needed.
///
/// # Arguments
/// * `summary` - Finalized run record and tallies.
/// * `path` - Destination file; replaced if it exists.
///
/// # Returns
/// `Ok(())` once the file is in place, otherwise the I/O or serialization error.
#[instrument(
    level = "info",
    skip_all,
    fields(path = %path.display(), run_id = summary.run.id)
)]
pub async fn write_summary(summary: &RunSummary, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(summary)?;

    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create summary dir");
            return Err(e.into());
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;
    info!("Wrote run summary");

    Ok(())
}
