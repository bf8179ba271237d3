//! Command table and dispatcher.
//!
//! Every command runs on the cooperative scheduler; the only suspension point
//! that can take long is the offloaded download.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::Config,
    domain::{ChatKind, UserId},
    download::{AudioDownloader, DownloadError},
    failure::{
        report_failure, CheckFailure, CommandError, Failure, REACTION_OK, REACTION_PARTIAL,
    },
    formatting::escape_html,
    messaging::{port::MessagingPort, types::IncomingCommand},
    offload::OffloadBridge,
    security::{is_chat_allowed, is_owner, Cooldown},
    status::{status, Level},
};

pub const DOWNLOADING_REPLY: &str = "Downloading files...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Download,
    Invite,
    Logout,
    Help,
}

impl Command {
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "download" | "dl" | "ytdl" | "mp3" => Some(Command::Download),
            "invite" => Some(Command::Invite),
            "logout" | "exit" => Some(Command::Logout),
            "start" | "help" => Some(Command::Help),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Download => "download",
            Command::Invite => "invite",
            Command::Logout => "logout",
            Command::Help => "help",
        }
    }

    fn owner_only(self) -> bool {
        matches!(self, Command::Download | Command::Logout)
    }
}

/// Everything a handler needs, built once at startup.
pub struct AppContext {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub downloader: Arc<dyn AudioDownloader>,
    pub offload: Arc<OffloadBridge>,
    pub cooldown: Mutex<Cooldown>,
    /// Cancelled by `logout`; the platform adapter stops polling on it.
    pub shutdown: CancellationToken,
    pub bot_username: Option<String>,
}

impl AppContext {
    pub fn new(
        cfg: Arc<Config>,
        messenger: Arc<dyn MessagingPort>,
        downloader: Arc<dyn AudioDownloader>,
        offload: Arc<OffloadBridge>,
        bot_username: Option<String>,
    ) -> Self {
        let cooldown = Mutex::new(Cooldown::new(cfg.cooldown_requests, cfg.cooldown_window));
        Self {
            cfg,
            messenger,
            downloader,
            offload,
            cooldown,
            shutdown: CancellationToken::new(),
            bot_username,
        }
    }
}

pub struct CommandDispatcher {
    ctx: Arc<AppContext>,
}

impl CommandDispatcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Run one command. Failures are reported to the chat here and returned
    /// for the caller's benefit; nothing propagates further.
    pub async fn dispatch(&self, cmd: IncomingCommand) -> Option<Failure> {
        tracing::debug!(command = %cmd.name, user = cmd.user_id.0, "dispatching");

        match self.execute(&cmd).await {
            Ok(()) => None,
            Err(err) => Some(report_failure(self.ctx.messenger.as_ref(), &cmd, &err).await),
        }
    }

    async fn execute(&self, cmd: &IncomingCommand) -> Result<(), CommandError> {
        let command = Command::resolve(&cmd.name).ok_or(CommandError::NotFound)?;

        let disabled = &self.ctx.cfg.disabled_commands;
        if disabled.iter().any(|d| d == command.name() || d == &cmd.name) {
            return Err(CommandError::Disabled);
        }

        self.run_checks(command, cmd)?;

        match command {
            Command::Download => self.download(cmd).await,
            Command::Invite => self.invite(cmd).await,
            Command::Logout => self.logout(cmd).await,
            Command::Help => self.help(cmd).await,
        }
    }

    fn run_checks(&self, command: Command, cmd: &IncomingCommand) -> Result<(), CommandError> {
        let cfg = &self.ctx.cfg;

        if command.owner_only() && !is_owner(cmd.user_id, &cfg.owner_ids) {
            return Err(CommandError::NotOwner);
        }

        match command {
            Command::Download if !is_chat_allowed(cmd.chat_id(), &cfg.allowed_chats) => Err(
                CommandError::CheckFailed(CheckFailure::RestrictedContext),
            ),
            Command::Logout if cmd.chat_kind != ChatKind::Private => Err(
                CommandError::CheckFailed(CheckFailure::Other("private chat only".into())),
            ),
            _ => Ok(()),
        }
    }

    async fn check_cooldown(&self, user_id: UserId) -> Result<(), CommandError> {
        let mut cooldown = self.ctx.cooldown.lock().await;
        cooldown
            .check(user_id)
            .map_err(|retry_after| CommandError::OnCooldown { retry_after })
    }

    async fn download(&self, cmd: &IncomingCommand) -> Result<(), CommandError> {
        let url = parse_download_url(&cmd.args)?;
        self.check_cooldown(cmd.user_id).await?;

        let messenger = &self.ctx.messenger;
        let reply = messenger.send_text(cmd.chat_id(), DOWNLOADING_REPLY).await?;

        let downloader = Arc::clone(&self.ctx.downloader);
        let out_dir = self.ctx.cfg.download_dir.clone();
        tracing::info!(url = %url, dir = %out_dir.display(), "offloading download");

        let report = self
            .ctx
            .offload
            .try_run(move || downloader.download(&url, &out_dir))
            .await?;

        if report.files.is_empty() {
            return Err(CommandError::Unexpected(anyhow::Error::new(
                DownloadError::NothingDownloaded {
                    failures: report.failures,
                },
            )));
        }

        if !report.is_partial() {
            tracing::info!(files = report.files.len(), "download finished");
            if let Err(e) = messenger.set_reaction(reply, REACTION_OK).await {
                tracing::warn!("failed to add success reaction: {e}");
            }
            return Ok(());
        }

        for f in &report.failures {
            tracing::warn!("playlist entry failed: {}", f.message);
        }
        let summary = format!(
            "Downloaded {} of {} entries.",
            report.files.len(),
            report.total()
        );
        messenger.edit_text(reply, &summary).await?;
        if let Err(e) = messenger.set_reaction(reply, REACTION_PARTIAL).await {
            tracing::warn!("failed to add partial reaction: {e}");
        }
        Ok(())
    }

    async fn invite(&self, cmd: &IncomingCommand) -> Result<(), CommandError> {
        let username = self
            .ctx
            .bot_username
            .as_deref()
            .ok_or_else(|| CommandError::Assertion("bot username is unknown".into()))?;

        let url = format!("https://t.me/{username}?startgroup=true");
        let html = format!("<a href=\"{}\">Invite</a>", escape_html(&url));
        self.ctx.messenger.send_html(cmd.chat_id(), &html).await?;
        Ok(())
    }

    async fn logout(&self, cmd: &IncomingCommand) -> Result<(), CommandError> {
        status("Logging out...", Level::Warn);
        self.ctx
            .messenger
            .send_text(cmd.chat_id(), "Logging out...")
            .await?;
        self.ctx.shutdown.cancel();
        Ok(())
    }

    async fn help(&self, cmd: &IncomingCommand) -> Result<(), CommandError> {
        let prefix = escape_html(self.ctx.cfg.command_prefix.trim_end());
        let body = format!(
            "<b>ArchiveGlider</b>\n\
Automating tasks remotely from chat.\n\n\
/download &lt;url&gt; - Download audio as mp3 (owner only; aliases: dl, ytdl, mp3)\n\
/invite - Link for adding the bot to a group\n\
/logout - Stop the bot (owner only, private chat)\n\
/help - Show this message\n\n\
Commands also work with the <code>{prefix}</code> prefix, e.g. <code>{prefix} dl &lt;url&gt;</code>"
        );
        self.ctx.messenger.send_html(cmd.chat_id(), &body).await?;
        Ok(())
    }
}

fn parse_download_url(args: &str) -> Result<Url, CommandError> {
    let raw = args.split_whitespace().next().ok_or_else(|| {
        CommandError::BadArgument("url is a required argument that is missing.".into())
    })?;

    let url = Url::parse(raw).map_err(|e| {
        CommandError::BadArgument(format!(
            "Converting to \"url\" failed for parameter \"url\": {e}."
        ))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CommandError::Assertion(format!(
            "unsupported url scheme `{}`",
            url.scheme()
        )));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        path::{Path, PathBuf},
        sync::Mutex as StdMutex,
        time::Duration,
    };

    use crate::{
        domain::{ChatId, MessageId, MessageRef},
        download::{DownloadReport, EntryFailure},
        failure::{FailureCategory, REACTION_FAILED},
        Result,
    };

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Event {
        Text(ChatId, String),
        Html(ChatId, String),
        Edit(MessageRef, String),
        Reaction(MessageRef, String),
        Presence(String),
    }

    #[derive(Default)]
    struct RecordingMessenger {
        events: StdMutex<Vec<Event>>,
        next_id: StdMutex<i32>,
    }

    impl RecordingMessenger {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, e: Event) {
            self.events.lock().unwrap().push(e);
        }

        fn new_ref(&self, chat_id: ChatId) -> MessageRef {
            let mut id = self.next_id.lock().unwrap();
            *id += 1;
            MessageRef {
                chat_id,
                message_id: MessageId(1000 + *id),
            }
        }
    }

    #[async_trait::async_trait]
    impl MessagingPort for RecordingMessenger {
        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            self.record(Event::Text(chat_id, text.to_string()));
            Ok(self.new_ref(chat_id))
        }

        async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
            self.record(Event::Html(chat_id, html.to_string()));
            Ok(self.new_ref(chat_id))
        }

        async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
            self.record(Event::Edit(msg, text.to_string()));
            Ok(())
        }

        async fn set_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
            self.record(Event::Reaction(msg, emoji.to_string()));
            Ok(())
        }

        async fn set_presence(&self, text: &str) -> Result<()> {
            self.record(Event::Presence(text.to_string()));
            Ok(())
        }
    }

    type Respond = Box<dyn Fn() -> std::result::Result<DownloadReport, DownloadError> + Send + Sync>;

    struct RecordingDownloader {
        calls: StdMutex<Vec<(String, PathBuf)>>,
        respond: Respond,
    }

    impl RecordingDownloader {
        fn new(respond: Respond) -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                respond,
            }
        }

        fn ok() -> Self {
            Self::new(Box::new(|| {
                Ok(DownloadReport {
                    files: vec![PathBuf::from("/tmp/out/a.mp3")],
                    failures: vec![],
                })
            }))
        }

        fn calls(&self) -> Vec<(String, PathBuf)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AudioDownloader for RecordingDownloader {
        fn download(
            &self,
            url: &Url,
            out_dir: &Path,
        ) -> std::result::Result<DownloadReport, DownloadError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.as_str().to_string(), out_dir.to_path_buf()));
            (self.respond)()
        }
    }

    const OWNER: i64 = 1;
    const CHAT: ChatId = ChatId(42);
    const CMD_MSG: MessageRef = MessageRef {
        chat_id: CHAT,
        message_id: MessageId(7),
    };

    struct Harness {
        dispatcher: CommandDispatcher,
        messenger: Arc<RecordingMessenger>,
        downloader: Arc<RecordingDownloader>,
    }

    fn harness_with(
        downloader: RecordingDownloader,
        tweak: impl FnOnce(&mut Config),
        bridge: OffloadBridge,
    ) -> Harness {
        let mut cfg = Config::with_defaults("t", vec![OWNER], PathBuf::from("/tmp/out"));
        tweak(&mut cfg);

        let messenger = Arc::new(RecordingMessenger::default());
        let downloader = Arc::new(downloader);
        let ctx = AppContext::new(
            Arc::new(cfg),
            messenger.clone(),
            downloader.clone(),
            Arc::new(bridge),
            Some("glider_bot".to_string()),
        );

        Harness {
            dispatcher: CommandDispatcher::new(Arc::new(ctx)),
            messenger,
            downloader,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingDownloader::ok(), |_| {}, OffloadBridge::new(2).unwrap())
    }

    fn command(user: i64, kind: ChatKind, name: &str, args: &str) -> IncomingCommand {
        IncomingCommand {
            message: CMD_MSG,
            user_id: UserId(user),
            chat_kind: kind,
            name: name.to_string(),
            args: args.to_string(),
        }
    }

    fn failure_events(text: &str) -> Vec<Event> {
        vec![
            Event::Reaction(CMD_MSG, REACTION_FAILED.to_string()),
            Event::Text(CHAT, text.to_string()),
        ]
    }

    #[tokio::test]
    async fn download_replies_offloads_and_reacts_once() {
        let h = harness();
        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "https://example.com/a"))
            .await;
        assert!(out.is_none());

        let reply = MessageRef {
            chat_id: CHAT,
            message_id: MessageId(1001),
        };
        assert_eq!(
            h.messenger.events(),
            vec![
                Event::Text(CHAT, DOWNLOADING_REPLY.to_string()),
                Event::Reaction(reply, REACTION_OK.to_string()),
            ]
        );
        assert_eq!(
            h.downloader.calls(),
            vec![(
                "https://example.com/a".to_string(),
                PathBuf::from("/tmp/out")
            )]
        );
    }

    #[tokio::test]
    async fn aliases_reach_download() {
        let h = harness();
        h.dispatcher
            .dispatch(command(OWNER, ChatKind::Group, "dl", "https://example.com/b"))
            .await;
        assert_eq!(h.downloader.calls().len(), 1);
    }

    #[tokio::test]
    async fn non_owner_is_rejected_before_download() {
        let h = harness();
        let out = h
            .dispatcher
            .dispatch(command(2, ChatKind::Private, "download", "https://example.com/a"))
            .await
            .unwrap();

        assert_eq!(out.category, FailureCategory::NotAuthorized);
        assert_eq!(
            h.messenger.events(),
            failure_events("You do not have enough permissions for this command.")
        );
        assert!(h.downloader.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_url_is_bad_argument_and_nothing_is_offloaded() {
        let h = harness();
        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "   "))
            .await
            .unwrap();

        assert_eq!(out.category, FailureCategory::BadUserInput);
        assert_eq!(
            h.messenger.events(),
            failure_events("Command raised bad argument: url is a required argument that is missing.")
        );
        assert!(h.downloader.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_url_and_bad_scheme() {
        let h = harness();
        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "not a url"))
            .await
            .unwrap();
        assert_eq!(out.category, FailureCategory::BadUserInput);
        assert!(out
            .message
            .starts_with("Command raised bad argument: Converting to \"url\" failed"));

        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "ftp://example.com/a"))
            .await
            .unwrap();
        assert_eq!(out.category, FailureCategory::AssertionFailed);
        assert_eq!(out.message, "Command failed: unsupported url scheme `ftp`");
        assert!(h.downloader.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_and_disabled_commands() {
        let h = harness_with(
            RecordingDownloader::ok(),
            |cfg| cfg.disabled_commands = vec!["invite".to_string()],
            OffloadBridge::new(1).unwrap(),
        );

        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "frobnicate", ""))
            .await
            .unwrap();
        assert_eq!(out.message, "Command not found.");

        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "invite", ""))
            .await
            .unwrap();
        assert_eq!(out.message, "Command not available.");

        let reactions = h
            .messenger
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Reaction(..)))
            .count();
        assert_eq!(reactions, 2);
    }

    #[tokio::test]
    async fn download_outside_allowed_chats_is_restricted() {
        let h = harness_with(
            RecordingDownloader::ok(),
            |cfg| cfg.allowed_chats = vec![-100],
            OffloadBridge::new(1).unwrap(),
        );
        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Group, "download", "https://example.com/a"))
            .await
            .unwrap();

        assert_eq!(out.category, FailureCategory::RestrictedContext);
        assert_eq!(
            h.messenger.events(),
            failure_events("Restricted content not allowed here.")
        );
        assert!(h.downloader.calls().is_empty());
    }

    #[tokio::test]
    async fn second_download_hits_cooldown() {
        let h = harness_with(
            RecordingDownloader::ok(),
            |cfg| {
                cfg.cooldown_requests = 1;
                cfg.cooldown_window = Duration::from_secs(60);
            },
            OffloadBridge::new(1).unwrap(),
        );

        let first = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "https://example.com/a"))
            .await;
        assert!(first.is_none());

        let second = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "https://example.com/a"))
            .await
            .unwrap();
        assert_eq!(second.category, FailureCategory::RateLimited);
        assert!(second.message.starts_with("You are on cooldown. Try again in "));
        assert_eq!(h.downloader.calls().len(), 1);
    }

    #[tokio::test]
    async fn downloader_error_is_unclassified() {
        let h = harness_with(
            RecordingDownloader::new(Box::new(|| {
                Err(DownloadError::ExitStatus {
                    code: Some(1),
                    stderr: "ERROR: Unsupported URL".into(),
                })
            })),
            |_| {},
            OffloadBridge::new(1).unwrap(),
        );

        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "https://example.com/a"))
            .await
            .unwrap();
        assert_eq!(out.category, FailureCategory::Unclassified);

        let events = h.messenger.events();
        assert_eq!(events[0], Event::Text(CHAT, DOWNLOADING_REPLY.to_string()));
        assert_eq!(&events[1..], failure_events(&out.message).as_slice());
    }

    #[tokio::test]
    async fn partial_playlist_edits_reply_and_warns() {
        let h = harness_with(
            RecordingDownloader::new(Box::new(|| {
                Ok(DownloadReport {
                    files: vec![PathBuf::from("/tmp/out/a.mp3"), PathBuf::from("/tmp/out/b.mp3")],
                    failures: vec![EntryFailure {
                        message: "ERROR: Video unavailable".into(),
                    }],
                })
            })),
            |_| {},
            OffloadBridge::new(1).unwrap(),
        );

        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "https://example.com/list"))
            .await;
        assert!(out.is_none());

        let reply = MessageRef {
            chat_id: CHAT,
            message_id: MessageId(1001),
        };
        assert_eq!(
            h.messenger.events(),
            vec![
                Event::Text(CHAT, DOWNLOADING_REPLY.to_string()),
                Event::Edit(reply, "Downloaded 2 of 3 entries.".to_string()),
                Event::Reaction(reply, REACTION_PARTIAL.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn empty_report_is_a_failure() {
        let h = harness_with(
            RecordingDownloader::new(Box::new(|| Ok(DownloadReport::default()))),
            |_| {},
            OffloadBridge::new(1).unwrap(),
        );
        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "https://example.com/a"))
            .await
            .unwrap();
        assert_eq!(out.category, FailureCategory::Unclassified);
    }

    #[tokio::test]
    async fn slow_download_times_out() {
        let h = harness_with(
            RecordingDownloader::new(Box::new(|| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(DownloadReport::default())
            })),
            |_| {},
            OffloadBridge::new(1)
                .unwrap()
                .with_deadline(Duration::from_millis(20)),
        );
        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "download", "https://example.com/a"))
            .await
            .unwrap();
        assert_eq!(out.category, FailureCategory::TimedOut);
        assert_eq!(out.message, "Command timed out after 20ms.");
    }

    #[tokio::test]
    async fn logout_requires_private_chat_and_cancels_shutdown() {
        let h = harness();

        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Group, "exit", ""))
            .await
            .unwrap();
        assert_eq!(out.category, FailureCategory::CheckFailed);
        assert!(!h.dispatcher.context().shutdown.is_cancelled());

        let out = h
            .dispatcher
            .dispatch(command(OWNER, ChatKind::Private, "logout", ""))
            .await;
        assert!(out.is_none());
        assert!(h.dispatcher.context().shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn invite_and_help_reply_with_html() {
        let h = harness();
        h.dispatcher
            .dispatch(command(5, ChatKind::Group, "invite", ""))
            .await;
        h.dispatcher
            .dispatch(command(5, ChatKind::Group, "help", ""))
            .await;

        let events = h.messenger.events();
        assert_eq!(
            events[0],
            Event::Html(
                CHAT,
                "<a href=\"https://t.me/glider_bot?startgroup=true\">Invite</a>".to_string()
            )
        );
        assert!(matches!(&events[1], Event::Html(_, body) if body.contains("/download")));
        assert_eq!(events.len(), 2);
    }
}
