//! Interactive operator shell
//!
//! Input is read asynchronously so `stop`, `detail`, and `stats` stay
//! available while a poller runs. Poller events are printed by a separate
//! task subscribed to the pipeline's broadcast channel.

use crate::config::{ProfileStore, TalonConfig, DEFAULT_BASE_URL};
use crate::error::{Result, TalonError};
use crate::export;
use crate::filter::{FilterConfig, FilterField};
use crate::pipeline::{IngestPipeline, PollState, PollerEvent, PollerHandle};
use crate::profiles::Selection;
use crate::render::{self, AlertLog};
use crate::secret::SecretProvider;
use crate::session::{Session, SessionManager};
use crate::source::AlertSource;
use crate::stats;
use crate::store::AlertStore;
use crate::types::{AlertQuery, DateRange, ExportFormat, OutputFormat};
use chrono::{NaiveDate, Utc};
use colored::Colorize;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Rows shown by `detections` when no count is given
const DEFAULT_DETECTIONS: usize = 20;

/// How long the printer may take to drain after its poller exited
const PRINTER_DRAIN: Duration = Duration::from_secs(2);

const HELP_TOPICS: &[(&str, &str)] = &[
    ("create", "create a new Falcon API connection"),
    ("list", "list saved Falcon API connection profiles"),
    ("select", "make a saved profile the active one (usage: select <id>)"),
    ("remove", "delete an existing Falcon API connection profile"),
    ("detail", "show a stored alert in detail (usage: detail <alert_id>)"),
    ("stats", "alert statistics (usage: stats, stats <YYYY-MM-DD>, stats all)"),
    ("run", "start monitoring alerts without re-authenticating"),
    ("stop", "stop monitoring and return to the root menu"),
    ("config", "configure settings like polling interval and filters"),
    ("keys", "set up a connection to the Falcon API or pick a saved profile"),
    ("connect", "authenticate with the active profile and start monitoring"),
    ("db", "database management for stored alerts"),
    ("detections", "view recently stored alerts (usage: detections [count])"),
    ("purge", "clear all stored alerts from the database"),
    ("export", "export stored alerts (usage: export csv|json <path>)"),
    ("polling", "set the polling interval in seconds (default: 15)"),
    ("lookback", "set how far the first fetch reaches back in minutes (default: 10)"),
    ("filter", "filter set <field> <value> | filter show | filter clear [field]"),
    ("output", "print alerts as console lines or raw json (usage: output console|json)"),
    ("logfile", "append displayed alerts to a file (usage: logfile <path>|off)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Menu {
    Root,
    Keys,
    Config,
    Db,
}

impl Menu {
    fn commands(self, connected: bool) -> &'static str {
        match self {
            Menu::Root if connected => "exit  help  keys  config  run  stop  stats  detail  db",
            Menu::Root => "exit  help  keys  config  connect  stats  detail  db",
            Menu::Keys => "back  create  help  list  select  remove",
            Menu::Config => "back  help  polling  lookback  filter  output  logfile",
            Menu::Db => "back  help  detections  purge  export",
        }
    }

    fn prompt(self) -> &'static str {
        match self {
            Menu::Root => "",
            Menu::Keys => "keys> ",
            Menu::Config => "config> ",
            Menu::Db => "db> ",
        }
    }
}

/// Whether the shell keeps reading input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Line reader over any async buffered input
pub struct Input<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> Input<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next line, or `None` at end of input
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }

    /// Print `prompt` and read one trimmed answer
    async fn ask(&mut self, prompt: &str) -> Result<String> {
        show_prompt(prompt);
        match self.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(TalonError::validation("input", "end of input")),
        }
    }
}

fn show_prompt(prompt: &str) {
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
}

/// A running poller and the task printing its events
struct Watching {
    poller: PollerHandle,
    printer: JoinHandle<()>,
}

/// Services the shell drives
pub struct ReplDeps {
    pub config: TalonConfig,
    pub profile_store: Arc<dyn ProfileStore>,
    pub secrets: Arc<dyn SecretProvider>,
    pub sessions: Arc<SessionManager>,
    pub source: Arc<dyn AlertSource>,
    pub pipeline: Arc<IngestPipeline>,
}

/// Interactive shell state
pub struct Repl {
    config: TalonConfig,
    profile_store: Arc<dyn ProfileStore>,
    secrets: Arc<dyn SecretProvider>,
    sessions: Arc<SessionManager>,
    source: Arc<dyn AlertSource>,
    pipeline: Arc<IngestPipeline>,
    session: Option<Session>,
    watching: Option<Watching>,
    output: watch::Sender<OutputFormat>,
    menu: Menu,
}

impl Repl {
    pub fn new(deps: ReplDeps) -> Self {
        let (output, _) = watch::channel(deps.config.settings.output);
        Self {
            config: deps.config,
            profile_store: deps.profile_store,
            secrets: deps.secrets,
            sessions: deps.sessions,
            source: deps.source,
            pipeline: deps.pipeline,
            session: None,
            watching: None,
            output,
            menu: Menu::Root,
        }
    }

    pub fn config(&self) -> &TalonConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_watching(&self) -> bool {
        self.watching.is_some()
    }

    fn prompt(&self) -> String {
        match self.menu {
            Menu::Root if self.is_connected() => {
                format!("{} ", "talon [connected] >".yellow())
            }
            Menu::Root => "> ".to_string(),
            other => other.prompt().to_string(),
        }
    }

    /// Read and execute commands until `exit` or end of input
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, reader: R) -> Result<()> {
        let mut input = Input::new(reader);
        print!("{}", render::banner());
        println!("[*] Starting interactive mode. Use CTRL+d to exit.");

        loop {
            self.reap_poller().await;
            show_prompt(&self.prompt());

            let line = tokio::select! {
                line = input.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    if self.is_watching() {
                        self.stop_watching().await;
                        println!("{}", "Returned to root menu".cyan());
                    }
                    continue;
                }
            };
            let Some(line) = line else {
                println!();
                break;
            };

            match self.execute(&line, &mut input).await {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => eprintln!("{} {}", "[-]".red(), e),
            }
        }

        self.stop_watching().await;
        Ok(())
    }

    /// Execute one command line in the current menu
    pub async fn execute<R: AsyncBufRead + Unpin>(
        &mut self,
        line: &str,
        input: &mut Input<R>,
    ) -> Result<Flow> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(Flow::Continue);
        };
        let cmd = cmd.to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        match (cmd.as_str(), &args[..]) {
            ("exit" | "quit", _) => return Ok(Flow::Exit),
            ("help", []) => self.print_help(),
            ("help", [topic, ..]) => print_topic(topic),
            ("back", _) if self.menu != Menu::Root => self.menu = Menu::Root,
            _ => match self.menu {
                Menu::Root => self.root_command(&cmd, &args).await?,
                Menu::Keys => self.keys_command(&cmd, &args, input).await?,
                Menu::Config => self.config_command(&cmd, &args, input).await?,
                Menu::Db => self.db_command(&cmd, &args, input).await?,
            },
        }
        Ok(Flow::Continue)
    }

    fn print_help(&self) {
        println!("Available commands (type help <topic>):");
        println!("========================================");
        println!("{}", self.menu.commands(self.is_connected()));
    }

    async fn root_command(&mut self, cmd: &str, args: &[&str]) -> Result<()> {
        match (cmd, args) {
            ("keys", _) => self.menu = Menu::Keys,
            ("config", _) => self.menu = Menu::Config,
            ("db", _) => self.menu = Menu::Db,
            ("connect", _) => {
                self.connect().await?;
                self.start_watching().await?;
            }
            ("run", _) => {
                if self.session.is_none() {
                    return Err(TalonError::Auth(
                        "not connected (use 'connect' first)".into(),
                    ));
                }
                self.start_watching().await?;
            }
            ("stop", _) => {
                if self.is_watching() {
                    self.stop_watching().await;
                    println!("{}", "Returned to root menu".cyan());
                } else {
                    println!("Not watching.");
                }
            }
            ("detail", [id, ..]) => self.show_detail(id).await?,
            ("detail", []) => println!("usage: detail <alert_id>"),
            ("stats", []) => self.show_day(Utc::now().date_naive()).await?,
            ("stats", ["all", ..]) => {
                let summary = stats::overall_summary(self.pipeline.store().as_ref()).await?;
                print!("{}", render::summary_view("Alert Statistics (all stored)", &summary));
            }
            ("stats", [day, ..]) => {
                let day = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| {
                    TalonError::validation("date", format!("'{}' (expected YYYY-MM-DD)", day))
                })?;
                self.show_day(day).await?;
            }
            _ => unknown(cmd),
        }
        Ok(())
    }

    async fn keys_command<R: AsyncBufRead + Unpin>(
        &mut self,
        cmd: &str,
        args: &[&str],
        input: &mut Input<R>,
    ) -> Result<()> {
        match (cmd, args) {
            ("create", _) => {
                let client_id = input.ask("Client ID: ").await?;
                let secret = input.ask("Client Secret: ").await?;
                let base_url = input
                    .ask(&format!("Base URL [{}]: ", DEFAULT_BASE_URL))
                    .await?;
                let base_url = if base_url.is_empty() {
                    DEFAULT_BASE_URL
                } else {
                    base_url.as_str()
                };

                let previous = self.config.active.clone();
                let profile = self.config.create_profile(
                    &client_id,
                    &secret,
                    base_url,
                    self.secrets.as_ref(),
                )?;
                self.save()?;
                self.invalidate(Selection::Changed { previous }).await;
                println!(
                    "{} Connection [{}] saved and selected.",
                    "[+]".green(),
                    profile.id
                );
            }
            ("list", _) => self.list_profiles(),
            ("select", [id, ..]) => {
                let selection = self.config.select_profile(id)?;
                self.save()?;
                self.invalidate(selection).await;
                if let Some(profile) = self.config.active_profile() {
                    let secret = self.secrets.reveal(&profile.sealed_secret).ok();
                    println!("{}", render::profile_view(profile, secret.as_deref()));
                }
            }
            ("select", []) => println!("usage: select <id>"),
            ("remove", _) => {
                let id = match args.first() {
                    Some(id) => id.to_string(),
                    None => input.ask("Profile id to remove: ").await?,
                };
                let (removed, selection) = self.config.remove_profile(&id)?;
                self.save()?;
                self.sessions.forget(&removed.id);
                self.invalidate(selection).await;
                println!("{} Connection [{}] removed.", "[+]".green(), removed.id);
            }
            _ => unknown(cmd),
        }
        Ok(())
    }

    async fn config_command<R: AsyncBufRead + Unpin>(
        &mut self,
        cmd: &str,
        args: &[&str],
        input: &mut Input<R>,
    ) -> Result<()> {
        match (cmd, args) {
            ("polling", _) => {
                let value = match args.first() {
                    Some(v) => v.to_string(),
                    None => input.ask("Polling interval in seconds [15]: ").await?,
                };
                let secs = self.config.settings.set_poll_interval(&value)?;
                self.save()?;
                if let Some(w) = &self.watching {
                    w.poller.set_interval(self.config.settings.poll_interval()).await?;
                }
                println!("{} Polling interval set to {}s", "[+]".green(), secs);
            }
            ("lookback", _) => {
                let value = match args.first() {
                    Some(v) => v.to_string(),
                    None => input.ask("Lookback in minutes [10]: ").await?,
                };
                let minutes = self.config.settings.set_lookback(&value)?;
                self.save()?;
                println!(
                    "{} Lookback set to {} minutes (applies to the next run)",
                    "[+]".green(),
                    minutes
                );
            }
            ("filter", ["show", ..]) | ("filter", []) => {
                println!("Current filter: {}", self.config.settings.filter);
            }
            ("filter", ["set", field, rest @ ..]) if !rest.is_empty() => {
                let field: FilterField = field.parse()?;
                let mut filter = self.config.settings.filter.clone();
                filter.set(field, &rest.join(" "))?;
                self.apply_filter(filter).await?;
            }
            ("filter", ["clear"]) => {
                self.apply_filter(FilterConfig::default()).await?;
            }
            ("filter", ["clear", field, ..]) => {
                let field: FilterField = field.parse()?;
                let mut filter = self.config.settings.filter.clone();
                filter.clear(field);
                self.apply_filter(filter).await?;
            }
            ("filter", _) => print_topic("filter"),
            ("output", [format, ..]) => {
                let format: OutputFormat = format.parse()?;
                self.config.settings.output = format;
                self.save()?;
                self.output.send_replace(format);
                println!("{} Output set to {:?}", "[+]".green(), format);
            }
            ("output", []) => println!("Output: {:?}", self.config.settings.output),
            ("logfile", ["off", ..]) => {
                self.config.settings.log_file = None;
                self.save()?;
                println!("{} Alert log disabled (applies to the next run)", "[+]".green());
            }
            ("logfile", [path, ..]) => {
                self.config.settings.log_file = Some(PathBuf::from(path));
                self.save()?;
                println!(
                    "{} Alerts will be appended to {} (applies to the next run)",
                    "[+]".green(),
                    path
                );
            }
            ("logfile", []) => match &self.config.settings.log_file {
                Some(path) => println!("Alert log: {}", path.display()),
                None => println!("Alert log: off"),
            },
            _ => unknown(cmd),
        }
        Ok(())
    }

    async fn db_command<R: AsyncBufRead + Unpin>(
        &mut self,
        cmd: &str,
        args: &[&str],
        input: &mut Input<R>,
    ) -> Result<()> {
        let store = self.pipeline.store().clone();
        match (cmd, args) {
            ("detections", _) => {
                let limit = match args.first() {
                    Some(n) => n.parse::<usize>().map_err(|_| {
                        TalonError::validation("count", format!("'{}' is not a number", n))
                    })?,
                    None => DEFAULT_DETECTIONS,
                };
                let alerts = store.query(&AlertQuery::all().with_limit(limit)).await?;
                if alerts.is_empty() {
                    println!("No stored alerts.");
                }
                for alert in alerts.iter().rev() {
                    println!("{}", render::alert_line(alert));
                }
                println!("({} of {} stored)", alerts.len(), store.count().await?);
            }
            ("purge", _) => {
                let answer = input
                    .ask("This deletes every stored alert. Type 'purge' to confirm: ")
                    .await?;
                if answer != "purge" {
                    println!("Purge cancelled.");
                    return Ok(());
                }
                let removed = store.purge().await?;
                println!("{} Purged {} alerts.", "[+]".green(), removed);
            }
            ("export", [format, path, ..]) => {
                let format: ExportFormat = format.parse()?;
                let query = AlertQuery::all().oldest_first();
                let written =
                    export::export_to_file(store.as_ref(), &query, format, Path::new(path)).await?;
                println!("{} Exported {} alerts to {}", "[+]".green(), written, path);
            }
            ("export", _) => print_topic("export"),
            _ => unknown(cmd),
        }
        Ok(())
    }

    async fn apply_filter(&mut self, filter: FilterConfig) -> Result<()> {
        filter.validate()?;
        if let Some(w) = &self.watching {
            w.poller.set_filter(filter.clone()).await?;
        }
        self.config.settings.filter = filter;
        self.save()?;
        println!("{} Filter: {}", "[+]".green(), self.config.settings.filter);
        Ok(())
    }

    fn list_profiles(&self) {
        let profiles = self.config.list_profiles();
        if profiles.is_empty() {
            println!("No saved connections (use 'create').");
            return;
        }
        for profile in profiles {
            let marker = if self.config.active.as_deref() == Some(profile.id.as_str()) {
                "*".green().bold().to_string()
            } else {
                " ".to_string()
            };
            println!(
                "{} {}  {}  {}  {}",
                marker,
                profile.id.yellow(),
                profile.client_id,
                profile.base_url,
                render::fmt_ts(profile.created_at)
            );
        }
    }

    fn save(&self) -> Result<()> {
        self.profile_store.save(&self.config)
    }

    /// Drop the session and poller after the active profile changed
    async fn invalidate(&mut self, selection: Selection) {
        let Selection::Changed { previous } = selection else {
            return;
        };
        if let Some(previous) = previous {
            self.sessions.forget(&previous);
        }
        if self.is_watching() {
            self.stop_watching().await;
            println!("{}", "Watching stopped: active connection changed".yellow());
        }
        self.session = None;
    }

    async fn connect(&mut self) -> Result<()> {
        let profile = self
            .config
            .active_profile()
            .cloned()
            .ok_or_else(|| TalonError::Config("no active connection (use 'keys')".into()))?;
        if self.is_watching() {
            self.stop_watching().await;
        }
        println!("[*] Authenticating [{}]...", profile.id);
        self.session = Some(self.sessions.authenticate(&profile).await?);
        println!("{} Connected.", "[+]".green());
        Ok(())
    }

    async fn start_watching(&mut self) -> Result<()> {
        if self.is_watching() {
            println!("Already watching (use 'stop').");
            return Ok(());
        }
        let Some(session) = self.session.clone() else {
            return Err(TalonError::Auth("not connected".into()));
        };

        let settings = self.config.settings.poller_settings();
        let events = self.pipeline.subscribe();
        let poller = self.pipeline.spawn(session, settings)?;
        let log = self.config.settings.log_file.clone().map(AlertLog::new);
        let printer = tokio::spawn(print_events(events, self.output.subscribe(), log));

        println!(
            "{} (poll {}s, filter: {})",
            "[+] Watching alerts".green(),
            self.config.settings.poll_interval_secs,
            self.config.settings.filter
        );
        println!("(Press CTRL+C to stop watching and return to the menu)");
        self.watching = Some(Watching { poller, printer });
        Ok(())
    }

    async fn stop_watching(&mut self) {
        let Some(Watching { poller, printer }) = self.watching.take() else {
            return;
        };
        poller.stop().await;
        let state = poller.join().await;
        drain_printer(printer).await;
        tracing::debug!(%state, "Watching stopped");
    }

    /// Clean up a poller that exited on its own
    async fn reap_poller(&mut self) {
        let finished = self
            .watching
            .as_ref()
            .is_some_and(|w| w.poller.is_finished());
        if !finished {
            return;
        }
        if let Some(Watching { poller, printer }) = self.watching.take() {
            let state = poller.join().await;
            drain_printer(printer).await;
            if state == PollState::Idle {
                self.session = None;
            }
        }
    }

    async fn show_detail(&self, id: &str) -> Result<()> {
        let store = self.pipeline.store();
        if let Some(alert) = store.get(id).await? {
            print!("{}", render::detail_view(&alert));
            return Ok(());
        }

        let Some(session) = self.session.clone() else {
            return Err(TalonError::NotFound(format!("alert '{}' in local store", id)));
        };
        let session = self.sessions.ensure_valid(session).await?;
        let alerts = self
            .source
            .fetch_by_ids(&session, &[id.to_string()])
            .await?;
        match alerts.first() {
            Some(alert) => {
                print!("{}", render::detail_view(alert));
                Ok(())
            }
            None => Err(TalonError::NotFound(format!("alert '{}'", id))),
        }
    }

    async fn show_day(&self, day: NaiveDate) -> Result<()> {
        let days = stats::daily_summary(self.pipeline.store().as_ref(), DateRange::single(day)).await?;
        print!("{}", render::daily_view(&days));
        Ok(())
    }
}

fn unknown(cmd: &str) {
    println!("Unknown command: {} (type 'help')", cmd);
}

fn print_topic(topic: &str) {
    match HELP_TOPICS.iter().find(|(name, _)| *name == topic) {
        Some((_, text)) => println!("{}", text),
        None => println!("No help for '{}'", topic),
    }
}

/// Wait for the printer to see `Finished`, aborting it if that never comes
///
/// Returns whether the printer finished on its own.
async fn drain_printer(mut printer: JoinHandle<()>) -> bool {
    if tokio::time::timeout(PRINTER_DRAIN, &mut printer).await.is_err() {
        tracing::warn!("Event printer did not finish, aborting it");
        printer.abort();
        return false;
    }
    true
}

/// Print poller events until the poller finishes
async fn print_events(
    mut events: broadcast::Receiver<PollerEvent>,
    output: watch::Receiver<OutputFormat>,
    log: Option<AlertLog>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Display fell behind, events skipped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            PollerEvent::Started { since, .. } => {
                println!("[+] Fetching alerts since {}", render::fmt_ts(since));
            }
            PollerEvent::Alerts(batch) => {
                let format = *output.borrow();
                for (alert, _) in batch {
                    let (shown, logged) = match render::render_alert(&alert, format) {
                        Ok(lines) => lines,
                        Err(e) => {
                            tracing::warn!(alert = %alert.id, error = %e, "Failed to render alert");
                            continue;
                        }
                    };
                    println!("{}", shown);
                    if let Some(log) = &log {
                        if let Err(e) = log.append(&logged).await {
                            tracing::warn!(path = %log.path().display(), error = %e, "Failed to append alert log");
                        }
                    }
                }
            }
            PollerEvent::CycleCompleted(report) => {
                tracing::debug!("{}", render::cycle_line(&report));
            }
            PollerEvent::Retrying { attempt, delay, error } => {
                eprintln!(
                    "{} {} (attempt {}, retrying in {:.1}s)",
                    "[!]".yellow(),
                    error,
                    attempt,
                    delay.as_secs_f64()
                );
            }
            PollerEvent::CycleFailed { error } => {
                eprintln!("{} {} (will retry next cycle)", "[!]".yellow(), error);
            }
            PollerEvent::AuthFailed { error } => {
                eprintln!("{} {} (use 'connect' to re-authenticate)", "[-]".red(), error);
            }
            PollerEvent::StorageFailed { error } => {
                eprintln!("{} {} (watching stopped)", "[-]".red().bold(), error);
            }
            PollerEvent::StateChanged { .. } => {}
            PollerEvent::Finished { .. } => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryProfileStore;
    use crate::retry::RetryPolicy;
    use crate::secret::PlainSecretProvider;
    use crate::source::memory::{MemorySource, StaticAuthenticator};
    use crate::store::{AlertStore, MemoryAlertStore};
    use crate::types::Alert;
    use chrono::TimeZone;

    struct Fixture {
        repl: Repl,
        store: Arc<MemoryAlertStore>,
        profiles: Arc<MemoryProfileStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryAlertStore::new());
        let profiles = Arc::new(MemoryProfileStore::default());
        let source = Arc::new(MemorySource::new(100));
        let secrets: Arc<dyn SecretProvider> = Arc::new(PlainSecretProvider);
        let sessions = Arc::new(
            SessionManager::new(Arc::new(StaticAuthenticator::new("s3cret")), secrets.clone())
                .with_retry(RetryPolicy::none()),
        );
        let pipeline = Arc::new(IngestPipeline::new(
            source.clone(),
            store.clone(),
            sessions.clone(),
        ));
        let repl = Repl::new(ReplDeps {
            config: TalonConfig::default(),
            profile_store: profiles.clone(),
            secrets,
            sessions,
            source,
            pipeline,
        });
        Fixture {
            repl,
            store,
            profiles,
        }
    }

    fn alert(id: &str) -> Alert {
        Alert {
            id: id.into(),
            timestamp: Utc.with_ymd_and_hms(2025, 8, 24, 10, 0, 0).unwrap(),
            severity: 50,
            product: "epp".into(),
            hostname: "h".into(),
            status: "new".into(),
            name: "n".into(),
            description: String::new(),
            raw_payload: serde_json::json!({"id": id}),
        }
    }

    async fn script(repl: &mut Repl, lines: &str) {
        let mut input = Input::new(lines.as_bytes());
        while let Some(line) = input.next_line().await.unwrap() {
            let _ = repl.execute(&line, &mut input).await;
        }
    }

    #[tokio::test]
    async fn test_keys_create_saves_profile() {
        let mut f = fixture();
        script(&mut f.repl, "keys\ncreate\nmy-client\ns3cret\n\nback\n").await;

        let saved = f.profiles.load().unwrap();
        let profile = saved.active_profile().unwrap();
        assert_eq!(profile.client_id, "my-client");
        assert_eq!(profile.base_url, DEFAULT_BASE_URL);
        assert_eq!(f.repl.menu, Menu::Root);
    }

    #[tokio::test]
    async fn test_config_commands_persist() {
        let mut f = fixture();
        script(
            &mut f.repl,
            "config\npolling 30\nlookback 5\nfilter set severity 40\nfilter set product epp,IDP\noutput json\n",
        )
        .await;

        let settings = f.profiles.load().unwrap().settings;
        assert_eq!(settings.poll_interval_secs, 30);
        assert_eq!(settings.lookback_minutes, 5);
        assert_eq!(settings.filter.min_severity, Some(40));
        assert!(settings.filter.products.contains("idp"));
        assert_eq!(settings.output, OutputFormat::Json);

        script(&mut f.repl, "filter clear severity\npolling 0\n").await;
        let settings = f.profiles.load().unwrap().settings;
        assert_eq!(settings.filter.min_severity, None);
        assert_eq!(settings.poll_interval_secs, 30);
    }

    #[tokio::test]
    async fn test_out_of_range_lookback_rejected() {
        let mut f = fixture();
        let mut input = Input::new(&b""[..]);
        f.repl.execute("config", &mut input).await.unwrap();
        assert!(matches!(
            f.repl.execute("lookback 1000000000000", &mut input).await,
            Err(TalonError::Validation { .. })
        ));
        assert_eq!(f.repl.config().settings.lookback_minutes, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_printer_without_finished_event_is_aborted() {
        let (tx, rx) = broadcast::channel(4);
        let (output_tx, output_rx) = watch::channel(OutputFormat::Console);
        let printer = tokio::spawn(print_events(rx, output_rx, None));
        assert!(!drain_printer(printer).await);

        let printer = tokio::spawn(print_events(tx.subscribe(), output_tx.subscribe(), None));
        tx.send(PollerEvent::Finished {
            state: PollState::Stopped,
        })
        .unwrap();
        assert!(drain_printer(printer).await);
    }

    #[tokio::test]
    async fn test_invalid_filter_rejected() {
        let mut f = fixture();
        let mut input = Input::new(&b""[..]);
        f.repl.execute("config", &mut input).await.unwrap();
        assert!(f.repl.execute("filter set severity 250", &mut input).await.is_err());
        assert!(f.repl.execute("filter set colour red", &mut input).await.is_err());
        assert!(f.repl.config().settings.filter.is_empty());
    }

    #[tokio::test]
    async fn test_purge_requires_confirmation() {
        let mut f = fixture();
        f.store.upsert(&alert("a")).await.unwrap();

        script(&mut f.repl, "db\npurge\nno\n").await;
        assert_eq!(f.store.count().await.unwrap(), 1);

        script(&mut f.repl, "purge\npurge\n").await;
        assert_eq!(f.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_db_export_writes_file() {
        let mut f = fixture();
        f.store.upsert(&alert("a")).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        script(&mut f.repl, &format!("db\nexport csv {}\n", path.display())).await;
        let csv = std::fs::read_to_string(&path).unwrap();
        assert!(csv.starts_with("id,timestamp,severity,product,hostname,status"));
        assert!(csv.contains("a,"));
    }

    #[tokio::test]
    async fn test_run_requires_connection() {
        let mut f = fixture();
        let mut input = Input::new(&b""[..]);
        assert!(matches!(
            f.repl.execute("run", &mut input).await,
            Err(TalonError::Auth(_))
        ));
        assert!(matches!(
            f.repl.execute("connect", &mut input).await,
            Err(TalonError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_then_remove_profile_stops_watching() {
        let mut f = fixture();
        script(&mut f.repl, "keys\ncreate\nclient\ns3cret\nhttps://example.test\nback\nconnect\n").await;
        assert!(f.repl.is_connected());
        assert!(f.repl.is_watching());

        let id = f.repl.config().active.clone().unwrap();
        script(&mut f.repl, &format!("keys\nremove {}\n", id)).await;
        assert!(!f.repl.is_connected());
        assert!(!f.repl.is_watching());
        assert!(f.profiles.load().unwrap().profiles.is_empty());
    }

    #[tokio::test]
    async fn test_exit_flow() {
        let mut f = fixture();
        let mut input = Input::new(&b""[..]);
        assert_eq!(f.repl.execute("exit", &mut input).await.unwrap(), Flow::Exit);
        assert_eq!(f.repl.execute("   ", &mut input).await.unwrap(), Flow::Continue);
    }
}
