use std::error::Error;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use atty::Stream;
use clap::{Args, Parser, Subcommand};
use suggestbox::render::{render_dropdown, render_markdown};
use suggestbox::{
    ClickTarget, HttpSearchClient, KeyUp, Query, ResultSet, ResultsView, SearchBackend,
    SearchResponse, SuggestBox, SuggestConfig,
};
use termimad::{FmtText, MadSkin, terminal_size};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CLICK_COMMAND: &str = ":click";
const SETTLE_POLL: Duration = Duration::from_millis(25);

#[derive(Parser, Debug)]
#[command(
    name = "suggestbox",
    about = "Query a search-suggestion endpoint and preview the dropdown",
    version
)]
pub struct Cli {
    /// Emit the result set as JSON instead of rendered output.
    #[arg(long, global = true, conflicts_with = "html")]
    json: bool,

    /// Emit the dropdown HTML markup instead of terminal text.
    #[arg(long, global = true)]
    html: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single search and print the suggestions.
    Query {
        /// Text typed into the search field.
        text: String,
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
    /// Render a saved search response (file or stdin).
    Render {
        /// JSON file holding `{"results": {...}}`. Reads stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Treat each stdin line as the field value after a key release.
    ///
    /// A line reading `:click` simulates a click outside the suggest box.
    Watch {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Quiet period before a search is sent.
        #[arg(long, default_value_t = 300)]
        debounce_ms: u64,
        /// Render responses even when a newer keystroke has superseded them.
        #[arg(long)]
        allow_stale: bool,
    },
}

#[derive(Args, Debug)]
struct EndpointArgs {
    /// Base URL of the site serving the search endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    endpoint: String,
    /// Path of the search endpoint.
    #[arg(long, default_value = "/search/")]
    path: String,
    /// Give up on a request after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl EndpointArgs {
    fn to_config(&self) -> SuggestConfig {
        SuggestConfig {
            endpoint: self.endpoint.clone(),
            search_path: self.path.clone(),
            request_timeout: self.timeout_ms.map(Duration::from_millis),
            ..SuggestConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Terminal,
    Html,
    Json,
}

impl OutputMode {
    fn from_flags(json: bool, html: bool) -> Self {
        if json {
            OutputMode::Json
        } else if html {
            OutputMode::Html
        } else {
            OutputMode::Terminal
        }
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();
    let mode = OutputMode::from_flags(cli.json, cli.html);
    match cli.command {
        Command::Query { text, endpoint } => {
            let runtime = build_runtime()?;
            runtime.block_on(handle_query(text, endpoint.to_config(), mode))
        }
        Command::Render { file } => handle_render(file, mode),
        Command::Watch {
            endpoint,
            debounce_ms,
            allow_stale,
        } => {
            let config = SuggestConfig {
                debounce: Duration::from_millis(debounce_ms),
                discard_stale: !allow_stale,
                ..endpoint.to_config()
            };
            let runtime = build_runtime()?;
            runtime.block_on(handle_watch(config, mode))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn build_runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn handle_query(
    text: String,
    config: SuggestConfig,
    mode: OutputMode,
) -> Result<(), Box<dyn Error>> {
    let query = Query::parse(&text).ok_or("Search query cannot be empty")?;
    let client = HttpSearchClient::new(&config)?;
    info!(url = %client.request_url(&query), "running one-shot search");
    let results = client.search(&query).await?;
    print_results(&results, mode)
}

fn handle_render(file: Option<PathBuf>, mode: OutputMode) -> Result<(), Box<dyn Error>> {
    let body = match file {
        Some(path) => fs::read_to_string(&path)
            .map_err(|err| format!("Failed to read {}: {err}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    print_results(&decode_response(&body)?, mode)
}

fn decode_response(body: &str) -> Result<ResultSet, Box<dyn Error>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|err| format!("Not a search response: {err}"))?;
    Ok(response.results)
}

async fn handle_watch(config: SuggestConfig, mode: OutputMode) -> Result<(), Box<dyn Error>> {
    let client = HttpSearchClient::new(&config)?;
    info!(
        url = client.search_url(),
        debounce_ms = config.debounce.as_millis() as u64,
        discard_stale = config.discard_stale,
        "watching stdin for keystrokes"
    );
    let view = TerminalView::new(mode, Box::new(io::stdout()), stdout_is_tty());
    let suggest = SuggestBox::new(client, view, &config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    apply_line(&suggest, &line);
                }
                None => break,
            },
            _ = &mut shutdown => {
                info!("interrupted");
                return Ok(());
            }
        }
    }

    // stdin closed: let the last keystroke's search play out before exiting.
    tokio::select! {
        _ = settle(&suggest) => {}
        _ = &mut shutdown => info!("interrupted"),
    }
    Ok(())
}

/// What one stdin line did to the suggest box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineAction {
    Click { hid: bool },
    Key(KeyUp),
}

fn apply_line<B, V>(suggest: &SuggestBox<B, V>, line: &str) -> LineAction
where
    B: SearchBackend,
    V: ResultsView,
{
    if line.trim() == CLICK_COMMAND {
        LineAction::Click {
            hid: suggest.on_document_click(ClickTarget::Elsewhere),
        }
    } else {
        LineAction::Key(suggest.on_key_up(line))
    }
}

async fn settle<B: SearchBackend, V: ResultsView>(suggest: &SuggestBox<B, V>) {
    while suggest.is_pending() || suggest.in_flight() > 0 {
        tokio::time::sleep(SETTLE_POLL).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Writes dropdown transitions to a terminal stream.
struct TerminalView {
    mode: OutputMode,
    out: Box<dyn Write + Send>,
    styled: bool,
    visible: bool,
}

impl TerminalView {
    fn new(mode: OutputMode, out: Box<dyn Write + Send>, styled: bool) -> Self {
        Self {
            mode,
            out,
            styled,
            visible: false,
        }
    }

    fn emit(&mut self, text: &str) {
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl ResultsView for TerminalView {
    fn show(&mut self, markup: &str) {
        self.visible = true;
        match self.mode {
            OutputMode::Json => {
                let event = serde_json::json!({ "event": "show", "markup": markup });
                self.emit(&event.to_string());
            }
            OutputMode::Html | OutputMode::Terminal => {
                self.emit("[shown]");
                self.emit(markup);
            }
        }
    }

    fn hide(&mut self) {
        if !self.visible {
            return;
        }
        self.visible = false;
        match self.mode {
            OutputMode::Json => self.emit(&serde_json::json!({ "event": "hide" }).to_string()),
            OutputMode::Html | OutputMode::Terminal => self.emit("[hidden]"),
        }
    }

    fn show_results(&mut self, results: &ResultSet) {
        match self.mode {
            OutputMode::Html => self.show(&render_dropdown(results)),
            OutputMode::Json => {
                self.visible = true;
                let event = serde_json::json!({ "event": "show", "results": results });
                self.emit(&event.to_string());
            }
            OutputMode::Terminal => {
                self.visible = true;
                let text = format_markdown(&render_markdown(results), self.styled);
                self.emit("[shown]");
                self.emit(&text);
            }
        }
    }
}

fn print_results(results: &ResultSet, mode: OutputMode) -> Result<(), Box<dyn Error>> {
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(results)?),
        OutputMode::Html => println!("{}", render_dropdown(results)),
        OutputMode::Terminal => print_markdown(&render_markdown(results)),
    }
    Ok(())
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(40) as usize
}

fn print_markdown(text: &str) {
    println!("{}", format_markdown(text, stdout_is_tty()));
}

fn format_markdown(text: &str, styled: bool) -> String {
    let trimmed = text.trim_end();
    if styled {
        let skin = MadSkin::default();
        FmtText::from(&skin, trimmed, Some(markdown_width())).to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "suggestbox",
            "watch",
            "--endpoint",
            "http://example.test",
            "--debounce-ms",
            "50",
            "--allow-stale",
        ])
        .unwrap();
        let Command::Watch {
            endpoint,
            debounce_ms,
            allow_stale,
        } = cli.command
        else {
            panic!("expected watch command");
        };
        assert_eq!(debounce_ms, 50);
        assert!(allow_stale);
        let config = endpoint.to_config();
        assert_eq!(config.endpoint, "http://example.test");
        assert_eq!(config.search_path, "/search/");
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn json_and_html_conflict() {
        let err = Cli::try_parse_from(["suggestbox", "--json", "--html", "render"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn output_mode_prefers_json() {
        assert_eq!(OutputMode::from_flags(true, false), OutputMode::Json);
        assert_eq!(OutputMode::from_flags(false, true), OutputMode::Html);
        assert_eq!(OutputMode::from_flags(false, false), OutputMode::Terminal);
    }

    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use suggestbox::{Category, Dropdown, Item, SuggestError};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn terms() -> ResultSet {
        [(
            "Terms",
            Category {
                url: "entries/".to_string(),
                list: vec![Item {
                    slug: "apple".to_string(),
                    text: "Apple".to_string(),
                }],
            },
        )]
        .into_iter()
        .collect()
    }

    struct Canned {
        calls: Arc<AtomicUsize>,
    }

    impl SearchBackend for Canned {
        async fn search(&self, _query: &Query) -> Result<ResultSet, SuggestError> {
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(terms())
        }
    }

    fn canned_box() -> (SuggestBox<Canned, Dropdown>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = SuggestConfig {
            debounce: Duration::from_millis(100),
            ..SuggestConfig::default()
        };
        let backend = Canned {
            calls: Arc::clone(&calls),
        };
        (SuggestBox::new(backend, Dropdown::new(), &config), calls)
    }

    #[test]
    fn terminal_view_tracks_visibility() {
        let mut view = TerminalView::new(OutputMode::Html, Box::new(io::sink()), false);
        view.hide();
        assert!(!view.visible);
        view.show("<span></span>");
        assert!(view.visible);
        view.hide();
        assert!(!view.visible);
    }

    #[test]
    fn terminal_mode_prints_markdown_not_markup() {
        let out = Captured::default();
        let mut view = TerminalView::new(OutputMode::Terminal, Box::new(out.clone()), false);
        view.show_results(&terms());
        assert!(view.visible);
        let text = out.text();
        assert!(text.starts_with("[shown]\n"), "got {text}");
        assert!(text.contains("## TERMS"), "got {text}");
        assert!(text.contains("[Apple](/entries/apple)"), "got {text}");
        assert!(!text.contains("<h6"), "got {text}");

        view.show_results(&ResultSet::new());
        assert!(out.text().contains("_No results found_"));
    }

    #[test]
    fn html_mode_prints_dropdown_markup() {
        let out = Captured::default();
        let mut view = TerminalView::new(OutputMode::Html, Box::new(out.clone()), false);
        view.show_results(&terms());
        let text = out.text();
        assert!(text.contains("<h6"), "got {text}");
        assert!(text.contains(r#"href="/entries/apple""#), "got {text}");
    }

    #[test]
    fn json_mode_emits_result_events() {
        let out = Captured::default();
        let mut view = TerminalView::new(OutputMode::Json, Box::new(out.clone()), false);
        view.show_results(&terms());
        view.hide();
        let events: Vec<serde_json::Value> = out
            .text()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "show");
        assert_eq!(events[0]["results"]["Terms"]["list"][0]["slug"], "apple");
        assert_eq!(events[1]["event"], "hide");
    }

    #[test]
    fn decodes_saved_responses_strictly() {
        let body = r#"{"results": {"Terms": {"url": "entries/", "list": [{"slug": "apple", "text": "Apple"}]}}}"#;
        assert_eq!(decode_response(body).unwrap(), terms());

        let err = decode_response("{}").unwrap_err();
        assert!(err.to_string().starts_with("Not a search response"), "got {err}");
        assert!(decode_response("not json").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn click_line_hides_and_other_lines_type() {
        let (suggest, calls) = canned_box();

        assert_eq!(
            apply_line(&suggest, "apple"),
            LineAction::Key(KeyUp::Scheduled { generation: 1 })
        );
        settle(&suggest).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(suggest.with_view(Dropdown::is_visible));

        assert_eq!(apply_line(&suggest, "  :click "), LineAction::Click { hid: true });
        assert!(!suggest.with_view(Dropdown::is_visible));

        assert_eq!(apply_line(&suggest, "   "), LineAction::Key(KeyUp::Hidden));
        assert!(!suggest.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn settle_waits_for_the_last_search() {
        let (suggest, calls) = canned_box();
        apply_line(&suggest, "a");
        apply_line(&suggest, "ap");
        assert!(suggest.is_pending());

        settle(&suggest).await;
        assert!(!suggest.is_pending());
        assert_eq!(suggest.in_flight(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        suggest.with_view(|view| {
            assert!(view.is_visible());
            assert!(view.markup().contains("/entries/apple"));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn settle_returns_at_once_when_idle() {
        let (suggest, calls) = canned_box();
        settle(&suggest).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
