use crate::SuggestConfig;
use crate::client::SearchBackend;
use crate::model::{Query, ResultSet};
use crate::render::render_dropdown;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The results container the controller drives.
pub trait ResultsView: Send + 'static {
    /// Replace the container contents and make it visible.
    fn show(&mut self, markup: &str);
    fn hide(&mut self);

    /// Receives a fresh result set. Views that present results some other way
    /// than HTML override this; the default renders the dropdown markup.
    fn show_results(&mut self, results: &ResultSet) {
        self.show(&render_dropdown(results));
    }
}

/// In-memory results container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dropdown {
    visible: bool,
    markup: String,
    renders: usize,
}

impl Dropdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Last markup shown. Hiding keeps the previous contents around.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn render_count(&self) -> usize {
        self.renders
    }
}

impl ResultsView for Dropdown {
    fn show(&mut self, markup: &str) {
        self.markup.clear();
        self.markup.push_str(markup);
        self.visible = true;
        self.renders += 1;
    }

    fn hide(&mut self) {
        self.visible = false;
    }
}

/// Where a document click landed, relative to the suggest box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    Input,
    Results,
    Elsewhere,
}

/// What a key-up did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUp {
    Hidden,
    Scheduled { generation: u64 },
}

/// Debounced suggestion controller.
///
/// Every key-up replaces the single pending timer. When the timer fires the
/// search runs in its own task, so later keystrokes never cancel a request
/// that was already issued. Each key-up bumps the generation; with
/// `discard_stale` set, responses from older generations are dropped.
pub struct SuggestBox<B, V> {
    shared: Arc<Shared<B, V>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<B, V> {
    backend: B,
    view: Mutex<V>,
    generation: AtomicU64,
    in_flight: AtomicUsize,
    debounce: Duration,
    discard_stale: bool,
}

impl<B, V> SuggestBox<B, V>
where
    B: SearchBackend,
    V: ResultsView,
{
    pub fn new(backend: B, view: V, config: &SuggestConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                view: Mutex::new(view),
                generation: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                debounce: config.debounce,
                discard_stale: config.discard_stale,
            }),
            pending: Mutex::new(None),
        }
    }

    /// Handles a key release with the field's current value.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_key_up(&self, value: &str) -> KeyUp {
        let mut pending = self.pending.lock();
        if let Some(timer) = pending.take() {
            timer.abort();
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(query) = Query::parse(value) else {
            self.shared.view.lock().hide();
            debug!(generation, "empty query, hiding results");
            return KeyUp::Hidden;
        };
        debug!(%query, generation, "scheduling search");
        let shared = Arc::clone(&self.shared);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.debounce).await;
            shared.in_flight.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(shared.run_search(query, generation));
        }));
        KeyUp::Scheduled { generation }
    }

    /// Outside-click dismissal. Returns `true` if the click hid the results.
    pub fn on_document_click(&self, target: ClickTarget) -> bool {
        match target {
            ClickTarget::Input | ClickTarget::Results => false,
            ClickTarget::Elsewhere => {
                self.shared.view.lock().hide();
                true
            }
        }
    }

    /// Drops the pending timer, if any. In-flight requests are unaffected.
    pub fn cancel_pending(&self) -> bool {
        match self.pending.lock().take() {
            Some(timer) => {
                let was_waiting = !timer.is_finished();
                timer.abort();
                was_waiting
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Requests issued but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    pub fn with_view<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.shared.view.lock())
    }
}

impl<B, V> Shared<B, V>
where
    B: SearchBackend,
    V: ResultsView,
{
    async fn run_search(self: Arc<Self>, query: Query, generation: u64) {
        self.search_and_show(&query, generation).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn search_and_show(&self, query: &Query, generation: u64) {
        debug!(%query, generation, "debounce elapsed, searching");
        let results = match self.backend.search(query).await {
            Ok(results) => results,
            Err(err) => {
                warn!(%query, generation, error = %err, "search request failed");
                return;
            }
        };
        let mut view = self.view.lock();
        let latest = self.generation.load(Ordering::SeqCst);
        if self.discard_stale && latest != generation {
            debug!(%query, generation, latest, "discarding stale search response");
            return;
        }
        view.show_results(&results);
    }
}

impl<B, V> Drop for SuggestBox<B, V> {
    fn drop(&mut self) {
        if let Some(timer) = self.pending.get_mut().take() {
            timer.abort();
        }
    }
}
