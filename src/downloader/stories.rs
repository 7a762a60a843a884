use super::{FetchError, Fetcher, FormatChoice, MediaKind, MediaPayload, SimpleDownloader};
use crate::config::Credentials;
use crate::extractor::{ClassifiedRequest, Variant};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Extensions a story item may be returned as.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["mp4", "jpg", "png"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryTarget {
    Stories { user: String },
    Highlight { id: String },
}

impl StoryTarget {
    pub fn from_variant(variant: &Variant) -> Option<Self> {
        match variant {
            Variant::Story { user } => Some(StoryTarget::Stories { user: user.clone() }),
            Variant::Highlight { id } => Some(StoryTarget::Highlight { id: id.clone() }),
            _ => None,
        }
    }

    /// Profile-level URL listing every item of the target.
    pub fn url(&self) -> String {
        match self {
            StoryTarget::Stories { user } => format!("https://www.instagram.com/stories/{}/", user),
            StoryTarget::Highlight { id } => {
                format!("https://www.instagram.com/stories/highlights/{}/", id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryItem {
    pub id: String,
    pub media_url: String,
    pub filename: String,
}

/// Profile/story scraper the extractor drives.
#[async_trait]
pub trait StorySource: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<(), FetchError>;

    async fn items(&self, target: &StoryTarget) -> Result<Vec<StoryItem>, FetchError>;

    /// Write the item (and any sidecar files) into `dir`.
    async fn download_item(&self, item: &StoryItem, dir: &Path) -> Result<(), FetchError>;
}

/// Instagram stories and highlights.
///
/// Items are downloaded in order and the first one that lands as an
/// accepted media file is returned; later items are never fetched.
pub struct StoryHighlightExtractor {
    source: Arc<dyn StorySource>,
    credentials: Option<Credentials>,
}

impl StoryHighlightExtractor {
    pub fn new(source: Arc<dyn StorySource>, credentials: Option<Credentials>) -> Self {
        Self {
            source,
            credentials,
        }
    }
}

#[async_trait]
impl Fetcher for StoryHighlightExtractor {
    fn name(&self) -> &'static str {
        "stories"
    }

    async fn fetch(
        &self,
        request: &ClassifiedRequest,
        _format: &FormatChoice,
    ) -> Result<MediaPayload, FetchError> {
        let target = StoryTarget::from_variant(request.variant()).ok_or_else(|| {
            FetchError::Backend(format!("Not a story or highlight link: {}", request.url()))
        })?;

        if let Some(credentials) = &self.credentials {
            self.source.login(credentials).await?;
        }

        let items = self.source.items(&target).await?;
        debug!(story = ?target, count = items.len(), "listed story items");

        let staging = tempfile::Builder::new().prefix("media-relay-story-").tempdir()?;

        for item in &items {
            self.source.download_item(item, staging.path()).await?;

            if let Some(path) = first_accepted(staging.path()).await? {
                let bytes = tokio::fs::read(&path).await?;
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("story.mp4")
                    .to_string();
                let kind = MediaKind::from_path(&path).unwrap_or(MediaKind::Video);
                info!(item = %item.id, file = %filename, "story item selected");
                return Ok(MediaPayload::new(bytes, kind, filename));
            }
        }

        Err(FetchError::NotFound(target.url()))
    }
}

async fn first_accepted(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let accepted = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| ACCEPTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if accepted {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}

// ============ GALLERY-DL ============

/// [`StorySource`] backed by the gallery-dl CLI.
pub struct GalleryDlSource {
    binary: PathBuf,
    cookies_file: Option<PathBuf>,
    credentials: tokio::sync::RwLock<Option<Credentials>>,
    http: SimpleDownloader,
}

impl GalleryDlSource {
    fn command(&self, target: &StoryTarget, login_config: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--get-urls");

        if let Some(cookies) = self.cookies_file.as_ref().filter(|p| p.is_file()) {
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some(config) = login_config {
            cmd.arg("--config").arg(config);
        }

        cmd.arg(target.url())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn new(binary: impl Into<PathBuf>, cookies_file: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies_file,
            credentials: tokio::sync::RwLock::new(None),
            http: SimpleDownloader::new(),
        }
    }
}

#[async_trait]
impl StorySource for GalleryDlSource {
    // gallery-dl authenticates per invocation, so login only records the
    // credentials for later calls.
    async fn login(&self, credentials: &Credentials) -> Result<(), FetchError> {
        *self.credentials.write().await = Some(credentials.clone());
        Ok(())
    }

    async fn items(&self, target: &StoryTarget) -> Result<Vec<StoryItem>, FetchError> {
        // Held until the process exits; the file is removed on drop.
        let login = match self.credentials.read().await.as_ref() {
            Some(credentials) => Some(write_login_config(credentials).await?),
            None => None,
        };

        let output = self
            .command(target, login.as_ref().map(|file| file.path()))
            .output()
            .await
            .map_err(|e| {
                FetchError::Backend(format!(
                    "Failed to execute {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;
        drop(login);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(story = ?target, stderr = %stderr.trim(), "gallery-dl failed");
            return Err(FetchError::Backend(format!(
                "gallery-dl exited with {}",
                output.status
            )));
        }

        Ok(parse_item_urls(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn download_item(&self, item: &StoryItem, dir: &Path) -> Result<(), FetchError> {
        self.http
            .download(&item.media_url, &dir.join(&item.filename), None)
            .await?;
        Ok(())
    }
}

/// Credentials reach gallery-dl through a private config file, not argv.
async fn write_login_config(credentials: &Credentials) -> Result<NamedTempFile, FetchError> {
    let config = login_config(credentials);
    let file = tempfile::Builder::new()
        .prefix("gallery-dl-")
        .suffix(".json")
        .tempfile()?;
    tokio::fs::write(file.path(), config.to_string()).await?;
    Ok(file)
}

fn login_config(credentials: &Credentials) -> serde_json::Value {
    json!({
        "extractor": {
            "instagram": {
                "username": credentials.username,
                "password": credentials.password,
            }
        }
    })
}

/// One item per line; `| ` lines are fallback URLs for the previous item.
pub fn parse_item_urls(stdout: &str) -> Vec<StoryItem> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .enumerate()
        .map(|(index, line)| StoryItem {
            id: index.to_string(),
            media_url: line.to_string(),
            filename: item_filename(index, line),
        })
        .collect()
}

fn item_filename(index: usize, media_url: &str) -> String {
    let name = url::Url::parse(media_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty());

    match name {
        Some(name) => format!("{:03}_{}", index, name),
        None => format!("{:03}_item", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Platform;
    use std::sync::Mutex;

    /// Each item writes the listed files into the staging directory.
    struct ScriptedSource {
        files: Vec<Vec<(&'static str, &'static str)>>,
        downloaded: Mutex<Vec<String>>,
        logins: Mutex<Vec<String>>,
        staging: Mutex<Option<PathBuf>>,
    }

    impl ScriptedSource {
        fn new(files: Vec<Vec<(&'static str, &'static str)>>) -> Arc<Self> {
            Arc::new(Self {
                files,
                downloaded: Mutex::new(Vec::new()),
                logins: Mutex::new(Vec::new()),
                staging: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl StorySource for ScriptedSource {
        async fn login(&self, credentials: &Credentials) -> Result<(), FetchError> {
            self.logins.lock().unwrap().push(credentials.username.clone());
            Ok(())
        }

        async fn items(&self, _target: &StoryTarget) -> Result<Vec<StoryItem>, FetchError> {
            Ok((0..self.files.len())
                .map(|i| StoryItem {
                    id: i.to_string(),
                    media_url: format!("https://cdn.example/{}", i),
                    filename: String::new(),
                })
                .collect())
        }

        async fn download_item(&self, item: &StoryItem, dir: &Path) -> Result<(), FetchError> {
            *self.staging.lock().unwrap() = Some(dir.to_path_buf());
            self.downloaded.lock().unwrap().push(item.id.clone());
            let index: usize = item.id.parse().unwrap();
            for (name, body) in &self.files[index] {
                std::fs::write(dir.join(name), body)?;
            }
            Ok(())
        }
    }

    fn story_request() -> ClassifiedRequest {
        ClassifiedRequest::new(
            Platform::Instagram,
            Variant::Story {
                user: "nasa".to_string(),
            },
            "https://instagram.com/stories/nasa/1/",
        )
    }

    #[tokio::test]
    async fn first_matching_item_wins() {
        let source = ScriptedSource::new(vec![
            vec![("a_first.json.xz", "meta"), ("a_first.txt", "caption")],
            vec![("b_second.mp4", "second-item")],
            vec![("c_third.jpg", "third-item")],
        ]);
        let extractor = StoryHighlightExtractor::new(source.clone(), None);

        let payload = extractor
            .fetch(&story_request(), &FormatChoice::Best)
            .await
            .unwrap();

        assert_eq!(&payload.bytes()[..], b"second-item");
        assert_eq!(payload.kind(), MediaKind::Video);
        assert_eq!(*source.downloaded.lock().unwrap(), vec!["0", "1"]);

        let staging = source.staging.lock().unwrap().clone().unwrap();
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn no_matching_items_is_not_found() {
        let source = ScriptedSource::new(vec![vec![("only.webp", "x")]]);
        let extractor = StoryHighlightExtractor::new(source, None);

        let err = extractor
            .fetch(&story_request(), &FormatChoice::Best)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(url) if url.contains("/stories/nasa/")));
    }

    #[tokio::test]
    async fn empty_profile_is_not_found() {
        let extractor = StoryHighlightExtractor::new(ScriptedSource::new(Vec::new()), None);
        let err = extractor
            .fetch(&story_request(), &FormatChoice::Best)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn stored_credentials_are_used() {
        let source = ScriptedSource::new(vec![vec![("a.png", "png")]]);
        let credentials = Credentials {
            username: "bot_account".to_string(),
            password: "secret".to_string(),
        };
        let extractor = StoryHighlightExtractor::new(source.clone(), Some(credentials));

        let payload = extractor
            .fetch(&story_request(), &FormatChoice::Best)
            .await
            .unwrap();
        assert_eq!(payload.kind(), MediaKind::Image);
        assert_eq!(*source.logins.lock().unwrap(), vec!["bot_account"]);
    }

    #[tokio::test]
    async fn non_story_variant_is_rejected() {
        let extractor = StoryHighlightExtractor::new(ScriptedSource::new(Vec::new()), None);
        let request =
            ClassifiedRequest::new(Platform::Instagram, Variant::Post, "https://instagram.com/p/x/");
        let err = extractor
            .fetch(&request, &FormatChoice::Best)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Backend(_)));
    }

    #[tokio::test]
    async fn password_stays_out_of_argv() {
        let credentials = Credentials {
            username: "bot_account".to_string(),
            password: "hunter2".to_string(),
        };
        let file = write_login_config(&credentials).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(written["extractor"]["instagram"]["username"], "bot_account");
        assert_eq!(written["extractor"]["instagram"]["password"], "hunter2");

        let source = GalleryDlSource::new("gallery-dl", None);
        let target = StoryTarget::Stories {
            user: "nasa".to_string(),
        };
        let cmd = source.command(&target, Some(file.path()));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.iter().all(|a| !a.contains("hunter2")));
        assert!(!args.contains(&"--password".to_string()));
        assert_eq!(args[1], "--config");
        assert_eq!(args[2], file.path().to_string_lossy());
        assert_eq!(args.last().unwrap(), "https://www.instagram.com/stories/nasa/");

        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn sidecars_and_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a_nested.mp4")).unwrap();
        std::fs::write(dir.path().join("b_meta.json"), "{}").unwrap();
        std::fs::write(dir.path().join("d_late.jpg"), "x").unwrap();
        std::fs::write(dir.path().join("c_clip.MP4"), "x").unwrap();

        let found = first_accepted(dir.path()).await.unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "c_clip.MP4");
    }

    #[test]
    fn highlight_target_url() {
        let target = StoryTarget::from_variant(&Variant::Highlight {
            id: "17890".to_string(),
        })
        .unwrap();
        assert_eq!(
            target.url(),
            "https://www.instagram.com/stories/highlights/17890/"
        );
    }

    #[test]
    fn parses_gallery_dl_url_listing() {
        let stdout = "https://scontent.cdninstagram.com/v/t66/abc.mp4?efg=1\n\
                      | https://fallback.cdninstagram.com/abc.mp4\n\
                      \n\
                      https://scontent.cdninstagram.com/v/t51/def.jpg\n";
        let items = parse_item_urls(stdout);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].filename, "000_abc.mp4");
        assert_eq!(items[1].filename, "001_def.jpg");
        assert_eq!(items[1].id, "1");
    }
}
