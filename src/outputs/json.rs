//! JSON output of batch results.
//!
//! Results are written as one pretty-printed JSON array, in input order, to a
//! file or to stdout. Each element is a serialized
//! [`ProcessingResult`](crate::models::ProcessingResult).

use crate::models::ProcessingResult;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument};

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then probes it by creating and removing
/// a small file. Called before a batch starts so an unwritable output path
/// fails fast instead of after every URL has been processed.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Err(e) = fs::create_dir_all(path).await {
        return Err(Box::new(e));
    }
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Directory that will hold `output`; `.` for a bare file name.
pub fn output_dir(output: &Path) -> &Path {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Write `results` to `output`, or to stdout when `output` is `None`.
#[instrument(level = "info", skip_all, fields(count = results.len()))]
pub async fn write_results(
    results: &[ProcessingResult],
    output: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(results)?;

    let Some(path) = output else {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        return Ok(());
    };

    let dir = output_dir(path);
    if let Err(e) = fs::create_dir_all(dir).await {
        error!(dir = %dir.display(), error = %e, "Failed to create output dir");
        return Err(e.into());
    }

    info!(path = %path.display(), "Writing JSON");
    fs::write(path, json).await?;
    info!(path = %path.display(), "Wrote results");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArticleRecord, Status};

    fn results() -> Vec<ProcessingResult> {
        vec![
            ProcessingResult::success(
                "https://example.com/a",
                ArticleRecord {
                    title: "A".into(),
                    ..Default::default()
                },
                "full_scrape",
            ),
            ProcessingResult::failure("", Status::ErrorInvalidUrl, "none", "empty URL"),
        ]
    }

    #[tokio::test]
    async fn test_write_results_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.json");
        write_results(&results(), Some(&path)).await.unwrap();

        let written: Vec<ProcessingResult> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, results());
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        ensure_writable_dir(&target).await.unwrap();
        assert!(target.is_dir());
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_output_dir() {
        assert_eq!(output_dir(Path::new("results.json")), Path::new("."));
        assert_eq!(output_dir(Path::new("out/results.json")), Path::new("out"));
    }
}
