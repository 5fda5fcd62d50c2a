use crate::error::{HarvestError, Result};
use crate::types::RawMovieData;
use flate2::bufread::MultiGzDecoder;
use futures::StreamExt;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Download the daily export to `dest` unless it is already on disk, so a
/// rerun after a crash resumes from the saved artifact instead of
/// re-downloading. Returns whether a download happened.
pub async fn download_export(url: &str, dest: &Path) -> Result<bool> {
    if dest.exists() {
        info!("Export {} already present, skipping download", dest.display());
        return Ok(false);
    }

    info!("Downloading export from {}", url);
    let client = reqwest::Client::new();
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(HarvestError::Export {
            message: format!("export download failed: status {}", resp.status()),
        });
    }

    // Stream to a .part file; a partial download must never be mistaken
    // for the finished artifact on the next run.
    let tmp = partial_path(dest);
    let mut file = tokio::fs::File::create(&tmp).await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(HarvestError::Http)?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    tokio::fs::rename(&tmp, dest).await?;

    info!("Saved export to {}", dest.display());
    Ok(true)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Lazy reader over the gunzipped newline-delimited export.
///
/// The export holds millions of lines, so the file is decompressed and
/// parsed one line at a time. A malformed line is skipped and counted; an
/// I/O failure mid-stream surfaces as an error item.
pub struct ExportReader {
    lines: Lines<BufReader<MultiGzDecoder<BufReader<File>>>>,
    line_no: u64,
    skipped: u64,
}

impl ExportReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let decoder = MultiGzDecoder::new(BufReader::new(file));
        Ok(Self {
            lines: BufReader::new(decoder).lines(),
            line_no: 0,
            skipped: 0,
        })
    }

    /// Malformed lines skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Iterator for ExportReader {
    type Item = Result<RawMovieData>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawMovieData>(&line) {
                Ok(doc) => return Some(Ok(doc)),
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping malformed export line {}: {}", self.line_no, e);
                }
            }
        }
    }
}
