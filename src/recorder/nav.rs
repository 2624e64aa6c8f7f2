//! Page lifecycle and console tracking.
//!
//! Only main-frame navigations create or advance pages; subframe activity
//! shows up in the graph as requests, not as pages. Navigation events carry
//! epoch milliseconds directly, unlike the network domain's second-based
//! timestamps.

use crate::model::{ConsoleMessage, NavigationType, Page, PageError, PageState, RequestState, ResourceType};
use crate::protocol::{
    self, ConsoleAdded, FrameIds, HistoryState, LoadTimes, NavigationBegin, NavigationCommitted,
    NavigationFailed, NavigationStamp, PageStats, RequestKey, TabStub,
};
use crate::timing;

use super::Recorder;

fn is_main_frame(frame: &FrameIds) -> bool {
    frame.parent_frame_id == -1
}

#[allow(clippy::cast_possible_truncation)]
fn nav_millis(time_stamp: f64) -> i64 {
    if time_stamp > 0.0 {
        time_stamp as i64
    } else {
        timing::now_millis()
    }
}

/// Progress order of page states, for monotonic advancement.
fn rank(state: PageState) -> u8 {
    match state {
        PageState::Uninitialized => 0,
        PageState::NavigationBegin => 1,
        PageState::NavigationCommitted => 2,
        PageState::DomContentLoaded => 3,
        PageState::NavigationCompleted | PageState::NavigationError => 4,
    }
}

impl Recorder {
    pub(super) fn on_navigation_begin(&self, ev: &NavigationBegin) {
        if !is_main_frame(&ev.frame) || ev.url.starts_with("about:") {
            return;
        }
        let time = nav_millis(ev.time_stamp);
        let started = self.shared().with(|state| {
            if let Some(index) = state.page_index_for_tab(ev.frame.tab_id) {
                let page = &state.result.pages[index];
                // The browser can replay a begin for the same navigation.
                if page.state == PageState::NavigationBegin
                    && page.nav_start_time == Some(time)
                    && page.orig_url.as_deref() == Some(ev.url.as_str())
                {
                    return None;
                }
            }
            // A page created ahead of time adopts the first navigation. It
            // may not have a tab yet (scripts can open a page before any
            // navigation happens), so the newest uninitialized page wins
            // regardless of tab.
            if let Some(index) = state
                .result
                .pages
                .iter()
                .rposition(|p| p.state == PageState::Uninitialized)
            {
                let page = &mut state.result.pages[index];
                page.tab_id = ev.frame.tab_id;
                page.frame_id = ev.frame.frame_id;
                page.process_id = ev.frame.process_id;
                page.orig_url = Some(ev.url.clone());
                page.nav_start_time = Some(time);
                page.state = PageState::NavigationBegin;
                return Some((index, page.initial_name().map(str::to_owned)));
            }
            let mut page = Page::new();
            page.tab_id = ev.frame.tab_id;
            page.frame_id = ev.frame.frame_id;
            page.process_id = ev.frame.process_id;
            page.orig_url = Some(ev.url.clone());
            page.nav_start_time = Some(time);
            page.state = PageState::NavigationBegin;
            let index = state.result.add_page(page);
            let name = state.result.pages[index].initial_name().map(str::to_owned);
            Some((index, name))
        });
        if let Some((index, name)) = started {
            self.observer().on_page_start(index, name.as_deref());
        }
    }

    pub(super) fn on_navigation_committed(&self, ev: &NavigationCommitted) {
        if !is_main_frame(&ev.frame) || ev.url.starts_with("about:") {
            return;
        }
        let time = nav_millis(ev.time_stamp);
        self.shared().with(|state| {
            let index = state.current_page_index_or_create(ev.frame.tab_id);
            let page = &mut state.result.pages[index];
            page.url = Some(ev.url.clone());
            if page.orig_url.is_none() {
                page.orig_url = Some(ev.url.clone());
            }
            page.nav_commit_time = Some(time);
            if let Some(transition) = &ev.transition_type {
                page.navigation_type = Some(NavigationType::from_transition(transition));
            }
            if page.frame_id == -1 {
                page.frame_id = ev.frame.frame_id;
            }
            // Cross-origin navigations move the frame to a new process; the
            // commit is the first event that knows the final process id.
            if ev.frame.process_id != -1 {
                page.process_id = ev.frame.process_id;
            }
            if rank(page.state) < rank(PageState::NavigationCommitted) {
                page.state = PageState::NavigationCommitted;
            }
        });
    }

    pub(super) fn on_dom_content_loaded(&self, ev: &NavigationStamp) {
        if !is_main_frame(&ev.frame) {
            return;
        }
        let time = nav_millis(ev.time_stamp);
        self.shared().with(|state| {
            let Some(index) = state.page_index_for_tab(ev.frame.tab_id) else {
                return;
            };
            let page = &mut state.result.pages[index];
            page.dom_content_loaded_time = Some(time);
            if rank(page.state) < rank(PageState::DomContentLoaded) {
                page.state = PageState::DomContentLoaded;
            }

            // Over HTTP/2 the browser sometimes never reports loadingFinished
            // for the navigation document; by DOM-content-loaded the document
            // is certainly done, so close it out here.
            let page_url = page
                .url
                .clone()
                .or_else(|| page.orig_url.clone());
            let mut done: Vec<RequestKey> = Vec::new();
            for request in &mut page.requests {
                let navigated = request.protocol.as_deref() == Some("h2")
                    && request.resource_type == ResourceType::Document
                    && request.state != RequestState::Complete
                    && request.request_headers.iter().any(|h| {
                        h.name.eq_ignore_ascii_case("sec-fetch-mode") && h.value == "navigate"
                    })
                    && match (&request.url, &page_url) {
                        (Some(request_url), Some(page_url)) => {
                            protocol::strip_anchor(request_url) == protocol::strip_anchor(page_url)
                        }
                        _ => false,
                    };
                if navigated {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        request.recv_end = (time - request.start_time).max(0) as i32;
                    }
                    request.state = RequestState::Complete;
                    if let Some(request_id) = &request.request_id {
                        done.push(RequestKey {
                            tab_id: request.tab_id,
                            request_id: request_id.clone(),
                        });
                    }
                }
            }
            for key in done {
                state.forget_request(&key);
            }
        });
    }

    pub(super) fn on_navigation_completed(&self, ev: &NavigationStamp) {
        if !is_main_frame(&ev.frame) {
            return;
        }
        let time = nav_millis(ev.time_stamp);
        let completed = self.shared().with(|state| {
            // Prefer an exact URL match; concurrent tabs and late events can
            // otherwise complete the wrong page. Fall back to the most
            // recent page for the tab.
            let by_url = ev.url.as_deref().and_then(|url| {
                state.result.pages.iter().rposition(|p| {
                    p.tab_id == ev.frame.tab_id
                        && p.final_name()
                            .is_some_and(|n| protocol::strip_anchor(n) == protocol::strip_anchor(url))
                })
            });
            let index = by_url.or_else(|| state.page_index_for_tab(ev.frame.tab_id))?;
            let page = &mut state.result.pages[index];
            if page.state == PageState::NavigationCompleted
                || page.state == PageState::NavigationError
            {
                // Already settled and notified.
                return None;
            }
            page.nav_end_time = Some(time);
            page.state = PageState::NavigationCompleted;
            Some((index, page.final_name().map(str::to_owned)))
        });
        if let Some((index, name)) = completed {
            self.observer().on_page_complete(index, name.as_deref());
        }
    }

    pub(super) fn on_navigation_error(&self, ev: &NavigationFailed) {
        if !is_main_frame(&ev.frame) {
            return;
        }
        let time = nav_millis(ev.time_stamp);
        let failed = self.shared().with(|state| {
            let index = state.current_page_index_or_create(ev.frame.tab_id);
            let page = &mut state.result.pages[index];
            if page.state == PageState::NavigationError {
                return None;
            }
            page.error = Some(match ev.error.as_deref() {
                Some(code) => PageError::from_net_error(code).unwrap_or_else(|| {
                    tracing::warn!(code, "unrecognized navigation error");
                    PageError::Unclassified
                }),
                None => PageError::Unclassified,
            });
            page.nav_end_time = Some(time);
            page.state = PageState::NavigationError;
            if let Some(url) = &ev.url {
                if page.url.is_none() {
                    page.url = Some(url.clone());
                }
            }
            Some((index, page.final_name().map(str::to_owned)))
        });
        if let Some((index, name)) = failed {
            self.observer().on_page_complete(index, name.as_deref());
        }
    }

    pub(super) fn on_load_times(&self, ev: &LoadTimes) {
        if !is_main_frame(&ev.frame) {
            return;
        }
        self.shared().with(|state| {
            let Some(index) = state.page_index_for_tab(ev.frame.tab_id) else {
                return;
            };
            let page = &mut state.result.pages[index];
            if let Some(info) = &ev.connection_info {
                page.protocol = Some(info.clone());
            }
            // Paint times arrive as epoch seconds; zero means not painted yet.
            if let Some(paint) = ev.first_paint_time.filter(|&t| t > 0.0) {
                page.first_paint_time = Some(timing::millis_from_seconds(paint));
            }
            if let Some(paint) = ev.first_paint_after_load_time.filter(|&t| t > 0.0) {
                page.first_paint_after_load_time = Some(timing::millis_from_seconds(paint));
            }
        });
    }

    pub(super) fn on_history_state_updated(&self, ev: &HistoryState) {
        if !is_main_frame(&ev.frame) {
            return;
        }
        self.shared().with(|state| {
            if let Some(index) = state.page_index_for_tab(ev.frame.tab_id) {
                state.result.pages[index].url = Some(ev.url.clone());
            }
        });
    }

    pub(super) fn on_page_stats(&self, ev: &PageStats) {
        self.shared().with(|state| {
            if let Some(index) = state.page_index_for_tab(ev.frame.tab_id) {
                let page = &mut state.result.pages[index];
                page.num_dom_elements = ev.nodes;
                page.num_frames = ev.documents;
            }
        });
    }

    // -------------------------------------------------------------------------
    // Console
    // -------------------------------------------------------------------------

    pub(super) fn on_console_message(&self, ev: &ConsoleAdded) {
        let msg = &ev.message;
        let message = ConsoleMessage {
            level: msg.level.clone().unwrap_or_else(|| "log".to_owned()),
            timestamp: msg
                .timestamp
                .map_or_else(timing::now_millis, timing::millis_from_seconds),
            text: msg.text.clone().unwrap_or_default(),
            url: msg.url.clone().unwrap_or_default(),
            line: msg.line.unwrap_or(0),
            column: msg.column.unwrap_or(0),
        };
        let index = self.shared().with(|state| {
            let index = state.current_page_index_or_create(ev.tab_id);
            state.result.pages[index].add_console_message(message.clone());
            index
        });
        self.observer().on_console_message(index, &message);
    }

    pub(super) fn on_console_cleared(&self, ev: &TabStub) {
        self.shared().with(|state| {
            if let Some(index) = state.page_index_for_tab(ev.tab_id) {
                state.result.pages[index].clear_console_messages();
            }
        });
    }

    /// The browser collapses identical consecutive messages into a repeat
    /// counter; the graph records them as separate entries.
    pub(super) fn on_console_repeated(&self, ev: &TabStub) {
        let repeated = self.shared().with(|state| {
            let index = state.page_index_for_tab(ev.tab_id)?;
            let page = &mut state.result.pages[index];
            let last = page.last_console_message()?.clone();
            page.add_console_message(last.clone());
            Some((index, last))
        });
        if let Some((index, message)) = repeated {
            self.observer().on_console_message(index, &message);
        }
    }
}
