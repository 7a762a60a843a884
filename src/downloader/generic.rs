use super::{FetchError, Fetcher, FormatChoice, MediaKind, MediaPayload, BROWSER_USER_AGENT};
use crate::extractor::{ClassifiedRequest, Platform};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Downloads through an external yt-dlp compatible binary.
///
/// Serves YouTube, TikTok, Facebook and Instagram posts.
pub struct GenericExtractor {
    binary: PathBuf,
    cookies_file: Option<PathBuf>,
}

impl GenericExtractor {
    pub fn new(binary: impl Into<PathBuf>, cookies_file: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies_file,
        }
    }

    fn command(&self, request: &ClassifiedRequest, format: &FormatChoice, template: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--quiet", "--no-warnings", "--no-playlist", "--no-progress"])
            .arg("-f")
            .arg(format_spec(format))
            .arg("-o")
            .arg(template);

        if let FormatChoice::Audio { bitrate_kbps } = format {
            cmd.args(["-x", "--audio-format", "mp3", "--audio-quality"])
                .arg(format!("{}K", bitrate_kbps));
        }

        // Only pass the cookie file when it is actually there.
        if let Some(cookies) = self.cookies_file.as_ref().filter(|p| p.is_file()) {
            cmd.arg("--cookies").arg(cookies);
        }

        for (key, value) in platform_headers(request.platform()) {
            cmd.arg("--add-header").arg(format!("{}:{}", key, value));
        }

        cmd.arg(request.url())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Fetcher for GenericExtractor {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn fetch(
        &self,
        request: &ClassifiedRequest,
        format: &FormatChoice,
    ) -> Result<MediaPayload, FetchError> {
        // Removed when dropped, on every exit path.
        let staging = tempfile::Builder::new().prefix("media-relay-").tempdir()?;
        let template = staging.path().join("vid.%(ext)s");

        debug!(url = request.url(), dir = %staging.path().display(), "running extractor");
        let output = self
            .command(request, format, &template)
            .output()
            .await
            .map_err(|e| {
                FetchError::Backend(format!(
                    "Failed to execute {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url = request.url(), status = %output.status, stderr = %stderr.trim(), "extractor failed");
            return Err(FetchError::Backend(last_line(&stderr, &output.status.to_string())));
        }

        let path = first_file(staging.path()).await?.ok_or_else(|| {
            FetchError::Backend("Extractor produced no output file".to_string())
        })?;
        let bytes = tokio::fs::read(&path).await?;

        let kind = match format {
            FormatChoice::Audio { .. } => MediaKind::Audio,
            _ => MediaKind::from_path(&path).unwrap_or(MediaKind::Video),
        };
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("vid.mp4")
            .to_string();

        Ok(MediaPayload::new(bytes, kind, filename))
    }
}

fn format_spec(format: &FormatChoice) -> String {
    match format {
        FormatChoice::Best => "best".to_string(),
        FormatChoice::Video { max_height } => format!(
            "best[height<={h}][ext=mp4]/best[height<={h}]/best",
            h = max_height
        ),
        FormatChoice::Audio { .. } => "bestaudio/best".to_string(),
    }
}

/// Extra request headers a platform needs to serve media.
pub fn platform_headers(platform: Platform) -> Vec<(&'static str, &'static str)> {
    match platform {
        Platform::TikTok => vec![
            ("User-Agent", BROWSER_USER_AGENT),
            ("Referer", "https://www.tiktok.com/"),
        ],
        _ => Vec::new(),
    }
}

// Partial downloads are never a finished artifact.
async fn first_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if !matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("part" | "ytdl" | "temp")
        ) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files.into_iter().next())
}

fn last_line(stderr: &str, fallback: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| fallback.to_string())
}
