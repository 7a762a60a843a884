use super::client::{Message, TelegramClient, Update};
use crate::delivery::{ChatDestination, DeliveryFanOut, MessagingClient};
use crate::downloader::{DownloadJob, DownloadManager, DownloadStatus, FormatChoice};
use crate::error::{DownloadError, ErrorKind, Locale};
use crate::orchestrator::DownloadOrchestrator;
use crate::ratelimit::Identity;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// How long running downloads get to wind down after a shutdown.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What an incoming text asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
    Download(String),
    Ignore,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Command::Ignore;
        }
        if let Some(command) = text.strip_prefix('/') {
            // "/start@my_bot payload" -> "start"
            let name = command
                .split(|c: char| c == '@' || c.is_whitespace())
                .next()
                .unwrap_or("");
            return match name {
                "start" | "help" => Command::Start,
                "cancel" => Command::Cancel,
                _ => Command::Ignore,
            };
        }
        Command::Download(text.to_string())
    }
}

pub fn welcome_text(locale: Locale, max_mib: u64) -> String {
    match locale {
        Locale::En => format!(
            "Welcome! Send me a link from Instagram (posts, reels, stories, highlights), \
             YouTube, TikTok, Facebook or Pinterest and I will send the media back.\n\
             Files up to {} MB are supported. Send /cancel to stop your running downloads.",
            max_mib
        ),
        Locale::Ar => format!(
            "مرحبًا! أرسل رابطًا من Instagram أو YouTube أو TikTok أو Facebook أو Pinterest \
             وسأرسل لك الوسائط.\nالحد الأقصى لحجم الملف {} ميجابايت. أرسل /cancel لإيقاف التحميلات الجارية.",
            max_mib
        ),
    }
}

fn cancelled_text(locale: Locale, count: usize) -> String {
    match (locale, count) {
        (Locale::En, 0) => "Nothing to cancel.".to_string(),
        (Locale::En, n) => format!("Cancelled {} download(s).", n),
        (Locale::Ar, 0) => "لا توجد تحميلات لإلغائها.".to_string(),
        (Locale::Ar, n) => format!("تم إلغاء {} من التحميلات.", n),
    }
}

/// Long-polling chat front end.
pub struct Bot {
    client: Arc<TelegramClient>,
    orchestrator: Arc<DownloadOrchestrator>,
    jobs: Arc<DownloadManager>,
    fanout: DeliveryFanOut,
    locale: Locale,
    tasks: Mutex<JoinSet<()>>,
}

impl Bot {
    pub fn new(
        client: Arc<TelegramClient>,
        orchestrator: Arc<DownloadOrchestrator>,
        fanout: DeliveryFanOut,
        locale: Locale,
    ) -> Self {
        Self {
            client,
            orchestrator,
            jobs: Arc::new(DownloadManager::new()),
            fanout,
            locale,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Download tasks not yet reaped.
    pub async fn in_flight(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Cancel running downloads and wait up to `grace` for them to finish.
    pub async fn drain(&self, grace: Duration) {
        let cancelled = self.jobs.cancel_all().await;
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return;
        }
        info!(running = tasks.len(), cancelled, "waiting for downloads to finish");

        let finished = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "download task ended abnormally");
                }
            }
        })
        .await;
        if finished.is_err() {
            warn!(remaining = tasks.len(), "aborting downloads after grace period");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("bot polling started");
        let mut offset: Option<i64> = None;

        loop {
            let updates = tokio::select! {
                updates = self.client.get_updates(offset, POLL_TIMEOUT_SECS) => updates,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };

            let swept = self.orchestrator.limiter().sweep(Instant::now());
            if swept > 0 {
                debug!(swept, "dropped idle rate-limit windows");
            }

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        self.clone().dispatch(update).await;
                    }
                    self.reap().await;
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
        self.drain(DRAIN_TIMEOUT).await;
        info!("bot polling stopped");
    }

    async fn reap(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "download task ended abnormally");
            }
        }
    }

    /// Route one update. Downloads run on their own task.
    pub async fn dispatch(self: Arc<Self>, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let identity = identity_of(&message);

        match Command::parse(text) {
            Command::Start => {
                let max_mib = self.orchestrator.size_gate().max_mib();
                self.reply(message.chat.id, &welcome_text(self.locale, max_mib))
                    .await;
            }
            Command::Cancel => {
                let count = self.jobs.cancel_for(&identity).await;
                info!(%identity, count, "cancel requested");
                self.reply(message.chat.id, &cancelled_text(self.locale, count))
                    .await;
            }
            // Links are only taken from private chats.
            Command::Download(url) if message.chat.kind == "private" => {
                let chat_id = message.chat.id;
                let bot = self.clone();
                self.tasks.lock().await.spawn(async move {
                    bot.process(chat_id, identity, url).await;
                });
            }
            Command::Download(_) | Command::Ignore => {}
        }
    }

    /// Orchestrate one link and deliver or report the outcome.
    pub async fn process(&self, chat_id: i64, identity: Identity, url: String) {
        let job = DownloadJob::new(&url, &identity);
        let job_id = job.id.clone();
        let cancel = self.jobs.add_job(job).await;
        self.jobs
            .update_job(&job_id, DownloadStatus::Downloading)
            .await;

        let outcome = match self
            .orchestrator
            .handle(&url, &identity, &FormatChoice::Best, cancel)
            .await
        {
            Ok(download) => {
                let primary = ChatDestination::new(
                    self.client.clone() as Arc<dyn MessagingClient>,
                    chat_id,
                );
                self.fanout
                    .deliver(&primary, &download)
                    .await
                    .into_result()
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.jobs
                    .update_job(&job_id, DownloadStatus::Completed)
                    .await;
            }
            Err(e) => {
                let status = if e.kind() == ErrorKind::Cancelled {
                    DownloadStatus::Cancelled
                } else {
                    DownloadStatus::Failed
                };
                self.jobs.update_job(&job_id, status).await;
                self.report(chat_id, &e).await;
            }
        }
        self.jobs.remove_job(&job_id).await;
    }

    async fn report(&self, chat_id: i64, e: &DownloadError) {
        self.reply(chat_id, &e.user_message(self.locale)).await;
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.client.send_message(chat_id, text).await {
            error!(chat_id, error = %e, "failed to send reply");
        }
    }
}

/// Sender's user id, falling back to the chat id for anonymous posts.
fn identity_of(message: &Message) -> Identity {
    let id = message
        .from
        .as_ref()
        .map(|user| user.id)
        .unwrap_or(message.chat.id);
    Identity::from(id)
}
