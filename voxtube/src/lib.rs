//! # VoxMusic YouTube Resolver
//!
//! [`MediaResolver`] implementation driving the `yt-dlp` command-line tool.
//! Free-text queries go through YouTube search, URLs are resolved directly;
//! downloads land in the media cache directory, named after the video id so
//! repeated fetches of the same id reuse the existing file.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use voxcontrol::{ControlError, MediaDescriptor, MediaResolver};

/// Audio extensions yt-dlp may produce, probed when looking for a
/// previously downloaded file.
const AUDIO_EXTENSIONS: &[&str] = &["m4a", "webm", "opus", "mp3"];

/// Metadata yt-dlp prints with `-j` for one video.
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: String,
    title: Option<String>,
    webpage_url: Option<String>,
    /// Absent for live streams
    duration: Option<f64>,
}

/// Resolver shelling out to yt-dlp.
pub struct YtDlpResolver {
    bin: String,
    download_dir: PathBuf,
}

impl YtDlpResolver {
    /// `bin` is the yt-dlp executable (name or path); downloads are written
    /// into `download_dir`.
    pub fn new(bin: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            download_dir: download_dir.into(),
        }
    }

    /// Finds an already-downloaded file for `external_id`, any known
    /// audio extension.
    fn existing_file(&self, external_id: &str) -> Option<PathBuf> {
        AUDIO_EXTENSIONS
            .iter()
            .map(|ext| self.download_dir.join(format!("{external_id}.{ext}")))
            .find(|candidate| candidate.exists())
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, ControlError> {
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| ControlError::resolution(format!("Cannot run {}: {e}", self.bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ControlError::resolution(format!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Maps a user query onto a yt-dlp target: URLs pass through, anything else
/// becomes a single-result YouTube search.
fn search_target(query: &str) -> String {
    if query.starts_with("http://") || query.starts_with("https://") {
        query.to_string()
    } else {
        format!("ytsearch1:{query}")
    }
}

/// Parses `-j` output into a descriptor. Search results arrive wrapped in a
/// playlist object whose `entries` array holds the actual hit.
fn descriptor_from_json(raw: &[u8]) -> Result<MediaDescriptor, ControlError> {
    let mut value: Value = serde_json::from_slice(raw)
        .map_err(|e| ControlError::resolution(format!("Unparseable yt-dlp output: {e}")))?;

    if let Some(entries) = value.get_mut("entries").and_then(Value::as_array_mut) {
        if entries.is_empty() {
            return Err(ControlError::resolution("No search result"));
        }
        value = entries.remove(0);
    }

    let entry: YtDlpEntry = serde_json::from_value(value)
        .map_err(|e| ControlError::resolution(format!("Unexpected yt-dlp metadata: {e}")))?;

    let source_url = entry
        .webpage_url
        .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", entry.id));
    Ok(MediaDescriptor {
        title: entry.title.unwrap_or_else(|| entry.id.clone()),
        source_url,
        duration_secs: entry.duration.map(|d| d.round() as u64).unwrap_or(0),
        external_id: entry.id,
    })
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn search(&self, query: &str) -> Result<MediaDescriptor, ControlError> {
        let target = search_target(query);
        debug!(%target, "Resolving query");
        let stdout = self
            .run(&["-j", "--no-warnings", "--no-playlist", &target])
            .await?;
        let descriptor = descriptor_from_json(&stdout)?;
        info!(title = %descriptor.title, id = %descriptor.external_id, "Resolved");
        Ok(descriptor)
    }

    async fn fetch(&self, descriptor: &MediaDescriptor) -> Result<PathBuf, ControlError> {
        if let Some(existing) = self.existing_file(&descriptor.external_id) {
            debug!(path = %existing.display(), "Reusing downloaded file");
            return Ok(existing);
        }

        let template = self.download_dir.join("%(id)s.%(ext)s");
        let template = template.to_string_lossy();
        info!(id = %descriptor.external_id, "Downloading audio");
        self.run(&[
            "-x",
            "--audio-format",
            "m4a",
            "--no-warnings",
            "--no-playlist",
            "-o",
            &template,
            &descriptor.source_url,
        ])
        .await?;

        self.existing_file(&descriptor.external_id).ok_or_else(|| {
            ControlError::resolution(format!(
                "Download produced no file for {}",
                descriptor.external_id
            ))
        })
    }
}

/// Probes `bin` once; used as the startup health check.
pub async fn check_available(bin: &str) -> Result<String, ControlError> {
    let output = Command::new(bin)
        .arg("--version")
        .output()
        .await
        .map_err(|e| ControlError::resolution(format!("{bin} is not available: {e}")))?;
    if !output.status.success() {
        return Err(ControlError::resolution(format!(
            "{bin} --version exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn plain_text_becomes_a_search() {
        assert_eq!(search_target("never gonna"), "ytsearch1:never gonna");
    }

    #[test]
    fn urls_pass_through() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        assert_eq!(search_target(url), url);
    }

    #[test]
    fn parses_single_video_metadata() {
        let raw = br#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "duration": 212.5
        }"#;

        let descriptor = descriptor_from_json(raw).unwrap();
        assert_eq!(descriptor.external_id, "dQw4w9WgXcQ");
        assert_eq!(descriptor.title, "Never Gonna Give You Up");
        assert_eq!(descriptor.duration_secs, 213);
    }

    #[test]
    fn parses_search_playlist_wrapper() {
        let raw = br#"{
            "id": "ytsearch1",
            "entries": [
                {"id": "abc", "title": "Hit", "duration": 10}
            ]
        }"#;

        let descriptor = descriptor_from_json(raw).unwrap();
        assert_eq!(descriptor.external_id, "abc");
        assert_eq!(descriptor.title, "Hit");
    }

    #[test]
    fn empty_search_is_an_error() {
        let raw = br#"{"id": "ytsearch1", "entries": []}"#;
        assert!(descriptor_from_json(raw).is_err());
    }

    #[test]
    fn missing_optional_fields_get_defaults() {
        let raw = br#"{"id": "abc"}"#;
        let descriptor = descriptor_from_json(raw).unwrap();
        assert_eq!(descriptor.title, "abc");
        assert_eq!(descriptor.duration_secs, 0);
        assert_eq!(descriptor.source_url, "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn existing_file_probes_known_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = YtDlpResolver::new("yt-dlp", tmp.path());

        assert!(resolver.existing_file("abc").is_none());

        fs::write(tmp.path().join("abc.webm"), b"x").unwrap();
        let found = resolver.existing_file("abc").unwrap();
        assert_eq!(found, tmp.path().join("abc.webm"));
    }
}
