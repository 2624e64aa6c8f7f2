//! Event-driven reconstruction of a run graph.
//!
//! The recorder consumes the raw notification stream and maintains the
//! queryable `TestResult` graph: pages, their requests, console output, and
//! WebSocket traffic. Handlers are grouped by domain: `nav` covers page
//! lifecycle and console events, `network` covers request tracking.

mod nav;
mod network;
mod state;

pub use state::{RunState, SharedRun};

use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::mpsc;

use crate::error::{ConfigError, VerifyError};
use crate::model::{HttpRequest, Page, RequestState, TestError, TestResult};
use crate::observer::{NoopObserver, RunObserver};
use crate::protocol::{DecodeError, ProtocolEvent, RawEvent};
use crate::timing;
use crate::video::VideoRecorder;

/// URL patterns treated as browser-internal traffic by default.
pub const DEFAULT_INTERNAL_URLS: &[&str] = &["data:*", "chrome-extension:*"];

/// Recorder tuning knobs.
pub struct RecorderConfig {
    /// Requests whose URL matches one of these globs never enter the graph.
    pub internal_url_patterns: Vec<String>,
    /// Log every decoded event at debug level (high-frequency events are
    /// always excluded).
    pub verbose_events: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            internal_url_patterns: DEFAULT_INTERNAL_URLS
                .iter()
                .map(|&p| p.to_owned())
                .collect(),
            verbose_events: false,
        }
    }
}

/// Turns the raw event stream into a queryable [`TestResult`].
pub struct Recorder {
    shared: SharedRun,
    observer: Arc<dyn RunObserver>,
    video: Option<Arc<VideoRecorder>>,
    internal_urls: GlobSet,
    verbose_events: bool,
}

impl Recorder {
    /// Build a recorder with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidGlob`] when an internal-URL pattern
    /// does not compile.
    pub fn new(config: RecorderConfig) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.internal_url_patterns {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidGlob {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let internal_urls = builder.build().map_err(|source| ConfigError::InvalidGlob {
            pattern: config.internal_url_patterns.join(", "),
            source,
        })?;
        Ok(Self {
            shared: SharedRun::default(),
            observer: Arc::new(NoopObserver),
            video: None,
            internal_urls,
            verbose_events: config.verbose_events,
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_video(mut self, video: Arc<VideoRecorder>) -> Self {
        self.video = Some(video);
        self
    }

    // -------------------------------------------------------------------------
    // Event intake
    // -------------------------------------------------------------------------

    /// Decode and apply one raw event. Unknown names and malformed payloads
    /// are logged and dropped.
    pub fn handle_raw(&self, raw: &RawEvent) {
        if self.verbose_events && !ProtocolEvent::is_noisy(&raw.event) {
            tracing::debug!(event = %raw.event, "event");
        }
        match ProtocolEvent::decode(raw) {
            Ok(event) => self.handle_event(event),
            Err(DecodeError::UnknownEvent(name)) => {
                tracing::warn!("unhandled event: {name}");
            }
            Err(err @ DecodeError::Malformed { .. }) => {
                tracing::warn!("{err}");
            }
        }
    }

    /// Apply one decoded event.
    pub fn handle_event(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::NavigationBegin(ev) => self.on_navigation_begin(&ev),
            ProtocolEvent::NavigationCommitted(ev) => self.on_navigation_committed(&ev),
            ProtocolEvent::NavigationDomContentLoaded(ev) => self.on_dom_content_loaded(&ev),
            ProtocolEvent::NavigationCompleted(ev) => self.on_navigation_completed(&ev),
            ProtocolEvent::NavigationError(ev) => self.on_navigation_error(&ev),
            ProtocolEvent::NavigationLoadTimes(ev) => self.on_load_times(&ev),
            ProtocolEvent::HistoryStateUpdated(ev) => self.on_history_state_updated(&ev),
            ProtocolEvent::CalculatedPageStats(ev) => self.on_page_stats(&ev),
            ProtocolEvent::RequestWillBeSent(ev) => self.on_request_will_be_sent(&ev),
            ProtocolEvent::RequestWillBeSentExtraInfo(ev) => self.on_request_extra_info(&ev),
            ProtocolEvent::ResponseReceived(ev) => self.on_response_received(&ev),
            ProtocolEvent::ResponseReceivedExtraInfo(ev) => self.on_response_extra_info(&ev),
            ProtocolEvent::DataReceived(ev) => self.on_data_received(&ev),
            ProtocolEvent::LoadingFinished(ev) => self.on_loading_finished(&ev),
            ProtocolEvent::LoadingFailed(ev) => self.on_loading_failed(&ev),
            ProtocolEvent::RequestServedFromCache(ev) => self.on_served_from_cache(&ev),
            // Priority changes do not affect the reconstructed graph.
            ProtocolEvent::ResourceChangedPriority(_) => {}
            ProtocolEvent::WebSocketCreated(ev) => self.on_web_socket_created(&ev),
            ProtocolEvent::WebSocketWillSendHandshakeRequest(ev) => {
                self.on_web_socket_handshake_request(&ev);
            }
            ProtocolEvent::WebSocketHandshakeResponseReceived(ev) => {
                self.on_web_socket_handshake_response(&ev);
            }
            ProtocolEvent::WebSocketFrameSent(ev) => {
                self.on_web_socket_frame(&ev, crate::model::Flow::Sent);
            }
            ProtocolEvent::WebSocketFrameReceived(ev) => {
                self.on_web_socket_frame(&ev, crate::model::Flow::Received);
            }
            ProtocolEvent::WebSocketFrameError(ev) => self.on_web_socket_frame_error(&ev),
            ProtocolEvent::WebSocketClosed(ev) => self.on_web_socket_closed(&ev),
            ProtocolEvent::ConsoleMessageAdded(ev) => self.on_console_message(&ev),
            ProtocolEvent::ConsoleMessagesCleared(ev) => self.on_console_cleared(&ev),
            ProtocolEvent::ConsoleRepeatCountUpdated(ev) => self.on_console_repeated(&ev),
            ProtocolEvent::AuthRequired(ev) => self.on_auth_required(&ev),
            ProtocolEvent::TabCreated(ev) => {
                tracing::debug!(tab_id = ev.tab_id, "tab created");
            }
            ProtocolEvent::TabUpdated(ev) => {
                tracing::debug!(tab_id = ev.tab_id, "tab updated");
            }
            ProtocolEvent::TabRemoved(ev) => self.on_tab_removed(&ev),
            ProtocolEvent::DebuggerDetached(ev) => {
                tracing::warn!(tab_id = ev.tab_id, "debugger detached");
            }
            ProtocolEvent::TargetCrashed(_) => self.on_target_crashed(),
            ProtocolEvent::ScreencastFrame(ev) => {
                if let Some(video) = &self.video {
                    let timestamp = ev.metadata.as_ref().and_then(|m| m.timestamp);
                    video.on_frame(&ev.data, timestamp);
                }
            }
            ProtocolEvent::InspectElement(details) => {
                self.observer.on_inspect_element(&details);
            }
        }
    }

    /// Drain a channel of raw events until the sender closes.
    pub async fn pump(&self, mut events: mpsc::Receiver<RawEvent>) {
        while let Some(raw) = events.recv().await {
            self.handle_raw(&raw);
        }
    }

    fn on_target_crashed(&self) {
        tracing::error!("browser target crashed");
        self.shared.with(|state| {
            if state.result.error.is_none() {
                state.result.error = Some(TestError {
                    message: "Browser tab crashed".into(),
                });
            }
        });
    }

    // -------------------------------------------------------------------------
    // Run lifecycle
    // -------------------------------------------------------------------------

    /// Mark the start of the run.
    pub fn start_run(&self, test_name: &str) {
        self.shared.with(|state| {
            state.result.test_name = Some(test_name.to_owned());
            state.result.start_time = Some(timing::now_millis());
        });
    }

    /// Record the browser identity once it is known.
    pub fn set_browser(&self, name: &str, version: &str) {
        self.shared.with(|state| {
            state.result.browser_name = Some(name.to_owned());
            state.result.browser_version = Some(version.to_owned());
        });
    }

    /// Record how long browser setup took, in milliseconds.
    pub fn set_setup_time(&self, setup_time: i64) {
        self.shared.with(|state| state.result.setup_time = setup_time);
    }

    /// Append a line of script output.
    pub fn add_output(&self, msg: &str) {
        self.shared.with(|state| state.result.add_output(msg));
    }

    /// Record a run-level failure; the first failure wins.
    pub fn fail(&self, message: &str) {
        self.shared.with(|state| {
            if state.result.error.is_none() {
                state.result.error = Some(TestError {
                    message: message.to_owned(),
                });
            }
        });
    }

    /// Start a fresh page explicitly, ahead of any navigation event.
    /// Subsequent activity on the tab attaches to it. Returns its index.
    pub fn new_page(&self, name: Option<&str>) -> usize {
        self.shared.with(|state| {
            let tab_id = state.result.last_page().map_or(-1, |p| p.tab_id);
            let mut page = Page::new();
            page.tab_id = tab_id;
            page.name = name.map(str::to_owned);
            state.result.add_page(page)
        })
    }

    /// Finalize the run and return the completed graph. Stops video capture
    /// when a video recorder is attached.
    #[must_use]
    pub fn finish(&self) -> TestResult {
        if let Some(video) = &self.video {
            let had_video = video.is_capturing();
            video.stop();
            self.shared.with(|state| state.result.has_video = had_video);
        }
        self.shared.with(|state| {
            if let Some(start) = state.result.start_time {
                state.result.run_time = timing::now_millis() - start;
            }
            state.result.clone()
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// A point-in-time copy of the graph.
    #[must_use]
    pub fn snapshot(&self) -> TestResult {
        self.shared.with(|state| state.result.clone())
    }

    /// A copy of the most recent page, if any exists yet.
    #[must_use]
    pub fn current_page(&self) -> Option<Page> {
        self.shared.with(|state| state.result.last_page().cloned())
    }

    /// Whether any request on the current page is still in flight
    /// (established WebSockets do not count).
    #[must_use]
    pub fn check_pending_requests(&self) -> bool {
        self.shared.with(|state| state.has_pending_requests())
    }

    /// Epoch milliseconds of the most recent completed request on the
    /// current page, `-1` when nothing has completed there yet.
    #[must_use]
    pub fn last_request_time(&self) -> i64 {
        self.shared.with(|state| state.last_request_time())
    }

    /// Assert that the current page has a successfully completed request
    /// for exactly this URL.
    ///
    /// # Errors
    ///
    /// See [`VerifyError`].
    pub fn verify_request(&self, url: &str) -> Result<(), VerifyError> {
        self.shared.with(|state| {
            let page = state.result.last_page().ok_or(VerifyError::NoPage)?;
            let request = page
                .requests
                .iter()
                .find(|r| r.url.as_deref() == Some(url))
                .ok_or_else(|| VerifyError::NoMatch {
                    pattern: url.to_owned(),
                })?;
            check_request(request)
        })
    }

    /// Assert that every request on the current page whose URL matches the
    /// glob pattern completed successfully. One failed fetch of a matching
    /// resource fails the verification even when a later fetch succeeded.
    ///
    /// # Errors
    ///
    /// See [`VerifyError`].
    pub fn verify_request_matching(&self, pattern: &str) -> Result<(), VerifyError> {
        let glob = Glob::new(pattern)
            .map_err(|source| VerifyError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })?
            .compile_matcher();
        self.shared.with(|state| {
            let page = state.result.last_page().ok_or(VerifyError::NoPage)?;
            let mut found = false;
            for request in page
                .requests
                .iter()
                .filter(|r| r.url.as_deref().is_some_and(|u| glob.is_match(u)))
            {
                found = true;
                check_request(request)?;
            }
            if found {
                Ok(())
            } else {
                Err(VerifyError::NoMatch {
                    pattern: pattern.to_owned(),
                })
            }
        })
    }

    pub(crate) fn shared(&self) -> &SharedRun {
        &self.shared
    }

    pub(crate) fn observer(&self) -> &Arc<dyn RunObserver> {
        &self.observer
    }

    pub(crate) fn is_internal_url(&self, url: &str) -> bool {
        self.internal_urls.is_match(url)
    }
}

/// Health check for one request: no recorded error, a terminal state (open
/// WebSockets count as healthy), and a non-failure status.
fn check_request(request: &HttpRequest) -> Result<(), VerifyError> {
    let url = request.url.clone().unwrap_or_default();

    if let Some(error) = &request.error {
        return Err(VerifyError::RequestError {
            url,
            error: error.clone(),
        });
    }
    if request.is_web_socket() {
        if request.state != RequestState::Recv && request.state != RequestState::Complete {
            return Err(VerifyError::WebSocketNotReady {
                url,
                state: request.state,
            });
        }
    } else if request.state != RequestState::Complete {
        return Err(VerifyError::NotCompleted {
            url,
            state: request.state,
        });
    }
    if request.status_code >= 400 {
        return Err(VerifyError::HttpStatus {
            url,
            code: request.status_code,
            text: request.status_text.clone(),
        });
    }
    Ok(())
}
