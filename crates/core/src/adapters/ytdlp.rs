use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    adapters::{Downloader, tools::run_tool},
    error::AdapterError,
};

pub const YT_DLP: &str = "yt-dlp";

/// Media download through `yt-dlp`.
pub struct YtDlp {
    timeout: Duration,
}

impl YtDlp {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Downloader for YtDlp {
    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, AdapterError> {
        let output_template = dest_dir.join(format!("{stem}.%(ext)s"));
        let output = run_tool(
            YT_DLP,
            [
                OsStr::new(url),
                OsStr::new("--no-playlist"),
                OsStr::new("--no-warnings"),
                OsStr::new("--quiet"),
                OsStr::new("-f"),
                OsStr::new("best"),
                OsStr::new("--print"),
                OsStr::new("after_move:filepath"),
                OsStr::new("-o"),
                output_template.as_os_str(),
            ],
            self.timeout,
        )
        .await?;

        let stdout_str = String::from_utf8_lossy(output.stdout.as_slice());
        let filepath = PathBuf::from(stdout_str.trim());

        // `--print` is empty when yt-dlp skipped the download.
        if filepath.as_os_str().is_empty() || !filepath.is_file() {
            return Err(AdapterError::Rejected(format!(
                "{YT_DLP} reported success but produced no file for {url}"
            )));
        }

        Ok(filepath)
    }
}
