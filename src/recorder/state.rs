//! Shared mutable state behind the recorder.
//!
//! The whole reconstructed graph lives under one exclusive lock, together
//! with the correlation maps the trackers need. Every event handler takes
//! the lock exactly once, applies its mutation, and releases it before any
//! observer callback fires.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::model::{Page, RequestState, TestResult};
use crate::protocol::{ExtraInfo, RequestKey};

/// The run graph plus tracker bookkeeping.
#[derive(Default)]
pub struct RunState {
    pub result: TestResult,

    /// In-flight requests, mapped to the index of the page that owns them.
    pub ongoing: HashMap<RequestKey, usize>,
    /// Request-header metadata that arrived before its request record existed.
    pub deferred_request_extra: HashMap<RequestKey, ExtraInfo>,
    /// Response-header metadata that arrived before its response did.
    pub deferred_response_extra: HashMap<RequestKey, ExtraInfo>,
    /// Requests filtered out as internal; all later events for them are dropped.
    pub internal: HashSet<RequestKey>,
    /// Request currently waiting on an auth challenge, if any.
    pub auth_request: Option<RequestKey>,
}

impl RunState {
    /// Index of the most recent page owned by `tab_id`.
    #[must_use]
    pub fn page_index_for_tab(&self, tab_id: i64) -> Option<usize> {
        self.result.pages.iter().rposition(|p| p.tab_id == tab_id)
    }

    /// Index of the most recent page owned by `tab_id`, falling back to the
    /// most recent page overall.
    #[must_use]
    pub fn current_page_index(&self, tab_id: i64) -> Option<usize> {
        self.page_index_for_tab(tab_id)
            .or_else(|| self.result.pages.len().checked_sub(1))
    }

    /// Index of the most recent page owned by `tab_id`, creating a fresh
    /// uninitialized page for the tab when none exists.
    pub fn current_page_index_or_create(&mut self, tab_id: i64) -> usize {
        if let Some(index) = self.current_page_index(tab_id) {
            return index;
        }
        let mut page = Page::new();
        page.tab_id = tab_id;
        self.result.add_page(page)
    }

    /// Position of the live record for an in-flight request:
    /// `(page index, request position)`.
    ///
    /// The live record is the last one on the page with a matching id.
    /// Redirects close the older hop before the next one is added, so the
    /// last match is always the hop still in flight.
    #[must_use]
    pub fn live_request(&self, key: &RequestKey) -> Option<(usize, usize)> {
        let page_index = *self.ongoing.get(key)?;
        let page = self.result.page(page_index)?;
        let pos = page.requests.iter().rposition(|r| {
            r.tab_id == key.tab_id && r.request_id.as_deref() == Some(key.request_id.as_str())
        })?;
        Some((page_index, pos))
    }

    /// Close every in-flight request owned by `tab_id` with the given error.
    /// Returns how many requests were closed.
    pub fn cancel_tab_requests(&mut self, tab_id: i64, error: &str) -> usize {
        let keys: Vec<RequestKey> = self
            .ongoing
            .keys()
            .filter(|key| key.tab_id == tab_id)
            .cloned()
            .collect();
        let mut closed = 0;
        for key in keys {
            if let Some((page_index, pos)) = self.live_request(&key) {
                let request = &mut self.result.pages[page_index].requests[pos];
                if request.state != RequestState::Complete {
                    request.error = Some(error.to_owned());
                    request.state = RequestState::Complete;
                    closed += 1;
                }
            }
            self.forget_request(&key);
        }
        self.internal.retain(|key| key.tab_id != tab_id);
        closed
    }

    /// Drop all tracker bookkeeping for a finished request.
    pub fn forget_request(&mut self, key: &RequestKey) {
        self.ongoing.remove(key);
        self.deferred_request_extra.remove(key);
        self.deferred_response_extra.remove(key);
        if self.auth_request.as_ref() == Some(key) {
            self.auth_request = None;
        }
    }

    /// Whether any request on the current page is still in flight.
    /// Established WebSockets sit in `Recv` for their whole lifetime and do
    /// not count, and neither do stragglers on pages already navigated away
    /// from.
    #[must_use]
    pub fn has_pending_requests(&self) -> bool {
        self.result.pages.last().is_some_and(|page| {
            page.requests.iter().any(|r| {
                r.state != RequestState::Complete
                    && !(r.is_web_socket() && r.state == RequestState::Recv)
            })
        })
    }

    /// Epoch milliseconds of the most recent completed request on the
    /// current page, `-1` when nothing has completed there.
    #[must_use]
    pub fn last_request_time(&self) -> i64 {
        self.result.pages.last().map_or(-1, |page| {
            page.requests
                .iter()
                .filter(|r| r.state == RequestState::Complete)
                .map(crate::model::HttpRequest::end_time)
                .max()
                .unwrap_or(-1)
        })
    }
}

/// Clonable handle to the run state.
#[derive(Clone, Default)]
pub struct SharedRun {
    inner: Arc<Mutex<RunState>>,
}

impl SharedRun {
    #[must_use]
    pub fn new(result: TestResult) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunState {
                result,
                ..RunState::default()
            })),
        }
    }

    /// Run a closure with exclusive access to the state. A poisoned lock is
    /// recovered; the graph stays usable after a panicking observer thread.
    pub fn with<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HttpRequest;

    fn key(tab_id: i64, request_id: &str) -> RequestKey {
        RequestKey {
            tab_id,
            request_id: request_id.into(),
        }
    }

    fn in_flight_request(tab_id: i64, request_id: &str, start: i64) -> HttpRequest {
        let mut request = HttpRequest::new();
        request.tab_id = tab_id;
        request.request_id = Some(request_id.into());
        request.start_time = start;
        request.state = RequestState::Send;
        request
    }

    #[test]
    fn live_request_is_last_matching_record() {
        let mut state = RunState::default();
        let page_index = state.current_page_index_or_create(1);

        // Two hops of the same request id: the first closed by a redirect.
        let mut first = in_flight_request(1, "r1", 100);
        first.state = RequestState::Complete;
        state.result.pages[page_index].add_request(first);
        state.result.pages[page_index].add_request(in_flight_request(1, "r1", 150));
        state.ongoing.insert(key(1, "r1"), page_index);

        let (_, pos) = state.live_request(&key(1, "r1")).unwrap();
        assert_eq!(state.result.pages[page_index].requests[pos].start_time, 150);
    }

    #[test]
    fn cancel_tab_closes_only_that_tab() {
        let mut state = RunState::default();
        let page_a = state.current_page_index_or_create(1);
        let page_b = state.current_page_index_or_create(2);
        state.result.pages[page_a].add_request(in_flight_request(1, "a", 10));
        state.result.pages[page_b].add_request(in_flight_request(2, "b", 10));
        state.ongoing.insert(key(1, "a"), page_a);
        state.ongoing.insert(key(2, "b"), page_b);

        assert_eq!(state.cancel_tab_requests(1, "Cancelled"), 1);
        assert_eq!(
            state.result.pages[page_a].requests[0].error.as_deref(),
            Some("Cancelled")
        );
        assert!(state.result.pages[page_b].requests[0].error.is_none());
        assert!(state.ongoing.contains_key(&key(2, "b")));
        assert!(state.has_pending_requests());
    }

    #[test]
    fn established_websockets_are_not_pending() {
        let mut state = RunState::default();
        let page_index = state.current_page_index_or_create(1);
        let mut ws = in_flight_request(1, "ws", 10);
        ws.mark_web_socket();
        ws.state = RequestState::Recv;
        state.result.pages[page_index].add_request(ws);
        state.ongoing.insert(key(1, "ws"), page_index);

        assert!(!state.has_pending_requests());
    }

    #[test]
    fn last_request_time_defaults_to_minus_one() {
        let state = RunState::default();
        assert_eq!(state.last_request_time(), -1);
    }

    #[test]
    fn pending_and_last_request_time_cover_only_the_current_page() {
        let mut state = RunState::default();
        let old = state.current_page_index_or_create(1);
        state.result.pages[old].add_request(in_flight_request(1, "stuck", 100));
        state.ongoing.insert(key(1, "stuck"), old);

        let mut done = in_flight_request(1, "done", 20);
        done.recv_end = 5;
        done.state = RequestState::Complete;
        state.result.pages[old].add_request(done);

        // The in-flight record does not move the completion clock.
        assert!(state.has_pending_requests());
        assert_eq!(state.last_request_time(), 25);

        // A later page supersedes the old one; its stragglers stop counting.
        let mut page = Page::new();
        page.tab_id = 1;
        state.result.add_page(page);
        assert!(!state.has_pending_requests());
        assert_eq!(state.last_request_time(), -1);
    }
}
