//! Callbacks fired while the run graph is being built.
//!
//! Observers are invoked after the triggering mutation has been applied and
//! after the state lock has been released, so an observer may query the
//! recorder without deadlocking.

use crate::model::{ConsoleMessage, WebSocketMessage};

/// Receiver for run-level notifications.
///
/// All methods have empty default bodies; implement only what you need.
pub trait RunObserver: Send + Sync {
    /// A page began navigating. `name` is the page's best-known URL at the
    /// time navigation started.
    fn on_page_start(&self, page_index: usize, name: Option<&str>) {
        let _ = (page_index, name);
    }

    /// A page finished navigating, successfully or not.
    fn on_page_complete(&self, page_index: usize, name: Option<&str>) {
        let _ = (page_index, name);
    }

    /// A console message was attached to a page.
    fn on_console_message(&self, page_index: usize, message: &ConsoleMessage) {
        let _ = (page_index, message);
    }

    /// A WebSocket frame was recorded on the request at `request_index`
    /// within page `page_index`. The message payload is already truncated.
    fn on_web_socket_frame(&self, page_index: usize, request_index: usize, message: &WebSocketMessage) {
        let _ = (page_index, request_index, message);
    }

    /// The user picked an element in the browser's inspect overlay.
    fn on_inspect_element(&self, details: &serde_json::Value) {
        let _ = details;
    }
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
