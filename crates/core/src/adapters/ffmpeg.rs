use std::{ffi::OsStr, path::Path, time::Duration};

use async_trait::async_trait;

use crate::{
    adapters::{AudioExtractor, tools::run_tool},
    error::AdapterError,
};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Audio extraction through `ffmpeg`, duration through `ffprobe`.
pub struct Ffmpeg {
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AudioExtractor for Ffmpeg {
    async fn extract(&self, video: &Path, audio: &Path) -> Result<(), AdapterError> {
        // Mono 16 kHz is what the transcription model consumes anyway.
        run_tool(
            FFMPEG,
            [
                OsStr::new("-y"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                OsStr::new("-i"),
                video.as_os_str(),
                OsStr::new("-vn"),
                OsStr::new("-acodec"),
                OsStr::new("libmp3lame"),
                OsStr::new("-ar"),
                OsStr::new("16000"),
                OsStr::new("-ac"),
                OsStr::new("1"),
                OsStr::new("-b:a"),
                OsStr::new("64k"),
                OsStr::new("-f"),
                OsStr::new("mp3"),
                audio.as_os_str(),
            ],
            self.timeout,
        )
        .await?;
        Ok(())
    }

    async fn probe_duration(&self, audio: &Path) -> Result<f64, AdapterError> {
        let output = run_tool(
            FFPROBE,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                audio.as_os_str(),
            ],
            PROBE_TIMEOUT,
        )
        .await?;

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_duration(stdout: &str) -> Result<f64, AdapterError> {
    let raw = stdout.trim();
    raw.parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AdapterError::InvalidResponse(format!("{FFPROBE} duration `{raw}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_duration_output() {
        assert_eq!(parse_duration("31.066000\n").unwrap(), 31.066);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("").is_err());
    }
}
