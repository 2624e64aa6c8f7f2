//! Request tracking: correlates the network event stream into per-page
//! [`HttpRequest`] records.
//!
//! Request ids are only unique per tab, so all lookups go through a
//! [`RequestKey`]. A redirect closes the current record and opens a fresh
//! one under the same key; the live record is always the last one on its
//! page with a matching id.

use crate::model::{
    Flow, HttpRequest, RequestState, ResourceType, WebSocketMessage, MAX_WS_PAYLOAD_LEN,
};
use crate::protocol::{
    self, AuthRequired, DataReceived, ExtraInfo, LoadingFailed, LoadingFinished, RequestInfo,
    RequestStub, RequestWillBeSent, ResponseReceived, TabStub, WebSocketClosed, WebSocketCreated,
    WebSocketFrame, WebSocketFrameError, WebSocketHandshakeRequest, WebSocketHandshakeResponse,
    WireResponse,
};
use crate::timing;

use super::Recorder;

impl Recorder {
    pub(super) fn on_request_will_be_sent(&self, ev: &RequestWillBeSent) {
        let info = RequestInfo::from_net(&ev.ids);
        let key = info.key();

        if self.is_internal_url(&ev.request.url) {
            self.shared().with(|state| {
                state.internal.insert(key.clone());
            });
            return;
        }

        self.shared().with(|state| {
            // A redirect can leave the internal set; from here on the
            // request is visible again.
            state.internal.remove(&key);

            let (start_time, wall_time_offset) = match ev.wall_time {
                Some(wall) => (
                    timing::millis_from_seconds(wall),
                    timing::wall_time_offset(wall, ev.timestamp),
                ),
                // No wall-clock sample: stay in the monotonic timebase so
                // later offsets still subtract consistently.
                None => (timing::millis_from_seconds(ev.timestamp), 0),
            };

            // An auth retry closes the provisional challenge record; its
            // observed lifetime runs from the real send to the moment the
            // challenge was raised.
            if state.auth_request.as_ref() == Some(&key) {
                if let Some((page_index, pos)) = state.live_request(&key) {
                    let page = &mut state.result.pages[page_index];
                    let challenge_time = page.requests[pos].start_time;
                    let request = &mut page.requests[pos];
                    request.start_time = start_time;
                    request.wall_time_offset = wall_time_offset;
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        request.recv_end = (challenge_time - start_time).max(0) as i32;
                    }
                    request.state = RequestState::Complete;
                    page.reposition_request(pos);
                }
                state.auth_request = None;
                state.ongoing.remove(&key);
            }

            // A redirect closes the previous hop before the new one opens.
            let mut page_index = None;
            if let Some(redirect) = &ev.redirect_response {
                if let Some((index, pos)) = state.live_request(&key) {
                    let request = &mut state.result.pages[index].requests[pos];
                    apply_response(request, redirect);
                    request.redirect_url = Some(ev.request.url.clone());
                    request.recv_end = if request.recv_headers_end >= 0 {
                        request.recv_headers_end
                    } else {
                        timing::offset_from_start(
                            ev.timestamp,
                            request.start_time,
                            request.wall_time_offset,
                        )
                    };
                    request.state = RequestState::Complete;
                    // The redirect response may have back-filled the start.
                    state.result.pages[index].reposition_request(pos);
                    page_index = Some(index);
                } else {
                    tracing::warn!(key = %key, "redirect for unknown request");
                }
            }
            let page_index =
                page_index.unwrap_or_else(|| state.current_page_index_or_create(info.tab_id));

            let mut request = HttpRequest::new();
            request.start_time = start_time;
            request.wall_time_offset = wall_time_offset;
            request.method = ev.request.method.clone();
            request.set_url(&ev.request.url);
            request.request_headers = protocol::headers_from_map(&ev.request.headers);
            request.request_headers_size = computed_request_headers_size(&request);
            if let Some(data) = &ev.request.post_data {
                request.set_post_data(data);
            }
            request.initiator_url = ev
                .initiator
                .as_ref()
                .and_then(|i| i.best_url())
                .map(str::to_owned);
            request.request_id = Some(info.request_id.clone());
            request.frame_id = info.frame_id.clone();
            request.tab_id = info.tab_id;
            request.state = RequestState::Send;

            if let Some(extra) = state.deferred_request_extra.remove(&key) {
                set_request_headers(&mut request, &extra.headers, extra.headers_text.as_deref());
            }

            state.result.pages[page_index].add_request(request);
            state.ongoing.insert(key, page_index);
        });
    }

    pub(super) fn on_request_extra_info(&self, ev: &ExtraInfo) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if state.internal.contains(&key) {
                return;
            }
            if let Some((page_index, pos)) = state.live_request(&key) {
                set_request_headers(
                    &mut state.result.pages[page_index].requests[pos],
                    &ev.headers,
                    ev.headers_text.as_deref(),
                );
            } else {
                state.deferred_request_extra.insert(key, ev.clone());
            }
        });
    }

    pub(super) fn on_response_received(&self, ev: &ResponseReceived) {
        let info = RequestInfo::from_net(&ev.ids);
        let key = info.key();
        self.shared().with(|state| {
            if state.internal.contains(&key) {
                return;
            }
            let (page_index, pos) = match state.live_request(&key) {
                Some(found) => found,
                None => {
                    // The send was missed (attach raced the navigation);
                    // reconstruct what we can from the response alone.
                    tracing::debug!(key = %key, "response for untracked request");
                    let page_index = state.current_page_index_or_create(info.tab_id);
                    let mut request = HttpRequest::new();
                    // Start stays at the monotonic epoch; the response
                    // timing back-fills the true start below.
                    if let Some(url) = &ev.response.url {
                        request.set_url(url);
                    }
                    request.request_id = Some(info.request_id.clone());
                    request.frame_id = info.frame_id.clone();
                    request.tab_id = info.tab_id;
                    let pos = state.result.pages[page_index].add_request(request);
                    state.ongoing.insert(key.clone(), page_index);
                    (page_index, pos)
                }
            };
            let extra = state.deferred_response_extra.remove(&key);
            let request = &mut state.result.pages[page_index].requests[pos];
            if let Some(kind) = &ev.resource_type {
                request.resource_type = ResourceType::from_devtools(kind);
            }
            apply_response(request, &ev.response);
            request.state = RequestState::Recv;
            if let Some(extra) = extra {
                apply_response_extra(request, &extra);
            }
            // The true start is only known once the response timing
            // arrives; restore the page's start-time ordering.
            state.result.pages[page_index].reposition_request(pos);
        });
    }

    pub(super) fn on_response_extra_info(&self, ev: &ExtraInfo) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if state.internal.contains(&key) {
                return;
            }
            let live = state.live_request(&key);
            // Only a record that has already seen its response can take the
            // raw headers; otherwise stash them until the response arrives.
            if let Some((page_index, pos)) = live {
                let request = &mut state.result.pages[page_index].requests[pos];
                if request.status_code != 0 {
                    apply_response_extra(request, ev);
                    return;
                }
            }
            state.deferred_response_extra.insert(key, ev.clone());
        });
    }

    pub(super) fn on_data_received(&self, ev: &DataReceived) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if state.internal.contains(&key) {
                return;
            }
            if let Some((page_index, pos)) = state.live_request(&key) {
                state.result.pages[page_index].requests[pos]
                    .add_bytes_recv(ev.data_length, ev.encoded_data_length);
            }
        });
    }

    pub(super) fn on_loading_finished(&self, ev: &LoadingFinished) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if state.internal.remove(&key) {
                return;
            }
            if let Some((page_index, pos)) = state.live_request(&key) {
                let request = &mut state.result.pages[page_index].requests[pos];
                request.recv_end = timing::offset_from_start(
                    ev.timestamp,
                    request.start_time,
                    request.wall_time_offset,
                );
                request.state = RequestState::Complete;
            }
            state.forget_request(&key);
        });
    }

    pub(super) fn on_loading_failed(&self, ev: &LoadingFailed) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if state.internal.remove(&key) {
                return;
            }
            if let Some((page_index, pos)) = state.live_request(&key) {
                let request = &mut state.result.pages[page_index].requests[pos];
                if ev.error_text.as_deref() == Some("net::ERR_BLOCKED_BY_CLIENT") {
                    // Blocked before anything went over the wire.
                    request.error = Some("Blocked".into());
                    request.recv_end = 0;
                } else {
                    request.recv_end = timing::offset_from_start(
                        ev.timestamp,
                        request.start_time,
                        request.wall_time_offset,
                    );
                    // The browser's error text is the most specific signal;
                    // a cancelled request usually carries one too.
                    request.error = Some(
                        if let Some(text) = ev.error_text.clone().filter(|t| !t.is_empty()) {
                            text
                        } else if let Some(reason) = &ev.blocked_reason {
                            format!("Blocked: {reason}")
                        } else if ev.canceled == Some(true) {
                            "Cancelled".into()
                        } else {
                            "Unknown".into()
                        },
                    );
                }
                request.state = RequestState::Complete;
            }
            state.forget_request(&key);
        });
    }

    pub(super) fn on_served_from_cache(&self, ev: &RequestStub) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if state.internal.contains(&key) {
                return;
            }
            if let Some((page_index, pos)) = state.live_request(&key) {
                state.result.pages[page_index].requests[pos].from_cache = true;
            }
        });
    }

    // -------------------------------------------------------------------------
    // WebSockets
    // -------------------------------------------------------------------------

    pub(super) fn on_web_socket_created(&self, ev: &WebSocketCreated) {
        let info = RequestInfo::from_net(&ev.ids);
        let key = info.key();
        if self.is_internal_url(&ev.url) {
            self.shared().with(|state| {
                state.internal.insert(key.clone());
            });
            return;
        }
        self.shared().with(|state| {
            let page_index = state.current_page_index_or_create(info.tab_id);
            let mut request = HttpRequest::new();
            request.set_url(&ev.url);
            request.mark_web_socket();
            request.resource_type = ResourceType::WebSocket;
            request.request_id = Some(info.request_id.clone());
            request.frame_id = info.frame_id.clone();
            request.tab_id = info.tab_id;
            // The created event carries no timestamp; the handshake
            // request back-fills the start and repositions the record.
            state.result.pages[page_index].add_request(request);
            state.ongoing.insert(key, page_index);
        });
    }

    pub(super) fn on_web_socket_handshake_request(&self, ev: &WebSocketHandshakeRequest) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if let Some((page_index, pos)) = state.live_request(&key) {
                {
                    let request = &mut state.result.pages[page_index].requests[pos];
                    if let Some(wall) = ev.wall_time {
                        request.start_time = timing::millis_from_seconds(wall);
                        request.wall_time_offset = timing::wall_time_offset(wall, ev.timestamp);
                    }
                    request.method = ev
                        .request
                        .method
                        .clone()
                        .or_else(|| Some("GET".to_owned()));
                    request.request_headers = protocol::headers_from_map(&ev.request.headers);
                    request.request_headers_size = computed_request_headers_size(request);
                    request.state = RequestState::Send;
                }
                // Start time was back-filled from the handshake.
                state.result.pages[page_index].reposition_request(pos);
            }
        });
    }

    pub(super) fn on_web_socket_handshake_response(&self, ev: &WebSocketHandshakeResponse) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if let Some((page_index, pos)) = state.live_request(&key) {
                let request = &mut state.result.pages[page_index].requests[pos];
                apply_response(request, &ev.response);
                request.recv_headers_end = timing::offset_from_start(
                    ev.timestamp,
                    request.start_time,
                    request.wall_time_offset,
                );
                // An open socket stays in Recv until it closes.
                request.state = RequestState::Recv;
            }
        });
    }

    pub(super) fn on_web_socket_frame(&self, ev: &WebSocketFrame, flow: Flow) {
        let key = RequestInfo::from_net(&ev.ids).key();
        let payload = ev.response.payload_data.as_str();
        let recorded = self.shared().with(|state| {
            let (page_index, pos) = state.live_request(&key)?;
            let request = &mut state.result.pages[page_index].requests[pos];
            #[allow(clippy::cast_possible_truncation)]
            let message = WebSocketMessage {
                time: timing::offset_from_start(
                    ev.timestamp,
                    request.start_time,
                    request.wall_time_offset,
                ),
                len: payload.len() as u32,
                flow,
                data: crate::model::truncate_utf8(payload, MAX_WS_PAYLOAD_LEN).to_owned(),
            };
            // Frames count toward the socket's byte totals, and each one
            // pushes the last-activity marker forward.
            match flow {
                Flow::Sent => request.add_bytes_sent(i64::from(message.len)),
                Flow::Received => request.add_bytes_recv(i64::from(message.len), 0),
            }
            request.recv_end = message.time;
            request.add_web_socket_message(message.clone());
            Some((page_index, pos, message))
        });
        if let Some((page_index, pos, message)) = recorded {
            self.observer().on_web_socket_frame(page_index, pos, &message);
        }
    }

    pub(super) fn on_web_socket_frame_error(&self, ev: &WebSocketFrameError) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if let Some((page_index, pos)) = state.live_request(&key) {
                let request = &mut state.result.pages[page_index].requests[pos];
                request.error = Some(
                    ev.error_message
                        .clone()
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "Unknown".into()),
                );
            }
        });
    }

    pub(super) fn on_web_socket_closed(&self, ev: &WebSocketClosed) {
        let key = RequestInfo::from_net(&ev.ids).key();
        self.shared().with(|state| {
            if let Some((page_index, pos)) = state.live_request(&key) {
                let request = &mut state.result.pages[page_index].requests[pos];
                request.recv_end = timing::offset_from_start(
                    ev.timestamp,
                    request.start_time,
                    request.wall_time_offset,
                );
                request.state = RequestState::Complete;
            }
            state.forget_request(&key);
        });
    }

    // -------------------------------------------------------------------------
    // Auth and tab teardown
    // -------------------------------------------------------------------------

    /// An auth challenge arrives before the network domain reports the
    /// request, so a provisional record is created here. The retry's
    /// `requestWillBeSent` later rewrites it into the closed challenge hop.
    pub(super) fn on_auth_required(&self, ev: &AuthRequired) {
        if self.is_internal_url(&ev.url) {
            return;
        }
        let key = protocol::RequestKey {
            tab_id: ev.tab_id,
            request_id: ev.request_id.clone(),
        };
        self.shared().with(|state| {
            let page_index = state.current_page_index_or_create(ev.tab_id);
            let mut request = HttpRequest::new();
            #[allow(clippy::cast_possible_truncation)]
            {
                // This event carries epoch milliseconds directly.
                request.start_time = if ev.time_stamp > 0.0 {
                    ev.time_stamp as i64
                } else {
                    timing::now_millis()
                };
            }
            request.method = ev.method.clone();
            request.set_url(&ev.url);
            if let Some(kind) = &ev.resource_type {
                request.resource_type = ResourceType::from_devtools(kind);
            }
            if let Some(line) = &ev.status_line {
                if let Some((proto, code, text)) = protocol::parse_status_line(line) {
                    request.protocol = Some(proto);
                    request.status_code = code;
                    request.status_text = Some(text).filter(|t| !t.is_empty());
                }
            }
            request.request_id = Some(ev.request_id.clone());
            request.tab_id = ev.tab_id;
            request.state = RequestState::Recv;
            state.result.pages[page_index].add_request(request);
            state.ongoing.insert(key.clone(), page_index);
            state.auth_request = Some(key);
        });
    }

    pub(super) fn on_tab_removed(&self, ev: &TabStub) {
        self.shared().with(|state| {
            let closed = state.cancel_tab_requests(ev.tab_id, "Cancelled");
            if closed > 0 {
                tracing::debug!(
                    tab_id = ev.tab_id,
                    closed,
                    "cancelled in-flight requests for removed tab"
                );
            }
        });
    }
}

// =============================================================================
// Response plumbing
// =============================================================================

/// Copy response fields onto a record. Raw header text wins over the
/// browser-parsed map when both are present.
fn apply_response(request: &mut HttpRequest, response: &WireResponse) {
    if let Some(status) = response.status {
        request.status_code = status;
    }
    if request.url.is_none() {
        if let Some(url) = &response.url {
            request.set_url(url);
        }
    }
    if let Some(text) = response.status_text.as_deref().filter(|t| !t.is_empty()) {
        request.status_text = Some(text.to_owned());
    }
    if let Some(mime) = &response.mime_type {
        request.mime_type = Some(mime.clone());
    }
    request.connection_reused = response.connection_reused;
    request.connection_id = response.connection_id;
    if let Some(ip) = &response.remote_ip_address {
        request.ip = Some(ip.clone());
    }
    if let Some(proto) = &response.protocol {
        request.protocol = Some(proto.clone());
    }
    if response.from_disk_cache {
        request.from_cache = true;
    }

    if let Some(text) = response.headers_text.as_deref() {
        let parsed = protocol::parse_response_text(text);
        request.response_headers = parsed.headers;
        request.response_headers_size = text.len() as i64;
        if request.protocol.is_none() {
            request.protocol = parsed.protocol;
        }
    } else {
        request.response_headers = protocol::headers_from_map(&response.headers);
        request.response_headers_size = computed_response_headers_size(request);
    }

    if let Some(text) = response.request_headers_text.as_deref() {
        let parsed = protocol::parse_request_text(text);
        request.request_headers = parsed.headers;
        request.request_headers_size = text.len() as i64;
        if request.method.is_none() {
            request.method = parsed.method;
        }
    } else if let Some(map) = &response.request_headers {
        request.request_headers = protocol::headers_from_map(map);
        request.request_headers_size = computed_request_headers_size(request);
    }

    // Cache hits report stale socket timings; leave those fields unknown.
    if let Some(t) = &response.timing {
        if !request.from_cache {
            if t.request_time > 0.0 {
                // The timing block's requestTime is the authoritative
                // monotonic start; the dispatch timestamp that seeded
                // start_time can lag it by the queueing delay.
                request.start_time =
                    timing::millis_from_seconds(t.request_time) + request.wall_time_offset;
            }
            request.dns_start = ms_offset(t.dns_start);
            request.dns_end = ms_offset(t.dns_end);
            request.connect_start = ms_offset(t.connect_start);
            request.connect_end = ms_offset(t.connect_end);
            request.ssl_start = ms_offset(t.ssl_start);
            request.ssl_end = ms_offset(t.ssl_end);
            request.send_start = ms_offset(t.send_start);
            request.send_end = ms_offset(t.send_end);
            request.recv_headers_end = ms_offset(t.receive_headers_end);
            request.blocked_time = timing::blocked_time(
                request.dns_start,
                request.connect_start,
                request.send_start,
            );
        }
    }
}

/// Apply deferred raw response headers to a record whose response already
/// arrived.
fn apply_response_extra(request: &mut HttpRequest, extra: &ExtraInfo) {
    if let Some(text) = extra.headers_text.as_deref() {
        let parsed = protocol::parse_response_text(text);
        if parsed.status_code != 0 {
            request.status_code = parsed.status_code;
            request.status_text = parsed.status_text;
        }
        request.response_headers = parsed.headers;
        request.response_headers_size = text.len() as i64;
    } else if !extra.headers.is_empty() {
        request.response_headers = protocol::headers_from_map(&extra.headers);
        request.response_headers_size = computed_response_headers_size(request);
    }
}

/// Install request headers from either raw text or the parsed map.
fn set_request_headers(
    request: &mut HttpRequest,
    headers: &serde_json::Map<String, serde_json::Value>,
    headers_text: Option<&str>,
) {
    if let Some(text) = headers_text {
        let parsed = protocol::parse_request_text(text);
        request.request_headers = parsed.headers;
        request.request_headers_size = text.len() as i64;
        if request.method.is_none() {
            request.method = parsed.method;
        }
    } else if !headers.is_empty() {
        request.request_headers = protocol::headers_from_map(headers);
        request.request_headers_size = computed_request_headers_size(request);
    }
}

/// Size in bytes the request head would occupy on the wire, reconstructed
/// when raw header text is unavailable.
fn computed_request_headers_size(request: &HttpRequest) -> i64 {
    // "METHOD url HTTP/1.1\r\n"
    let request_line = request.method.as_deref().map_or(0, str::len)
        + 1
        + request.url.as_deref().map_or(0, str::len)
        + 11;
    (request_line + header_lines_size(&request.request_headers)) as i64
}

/// Size in bytes the response head would occupy on the wire, reconstructed
/// when raw header text is unavailable.
fn computed_response_headers_size(request: &HttpRequest) -> i64 {
    // "HTTP/1.1 200 OK\r\n"
    let status_line = 9
        + request.status_code.to_string().len()
        + 1
        + request.status_text.as_deref().map_or(0, str::len)
        + 2;
    (status_line + header_lines_size(&request.response_headers)) as i64
}

/// `"name: value\r\n"` per header, plus the blank line.
fn header_lines_size(headers: &[crate::model::HttpHeader]) -> usize {
    headers
        .iter()
        .map(|h| h.name.len() + h.value.len() + 4)
        .sum::<usize>()
        + 2
}

#[allow(clippy::cast_possible_truncation)]
fn ms_offset(value: f64) -> i32 {
    if value < 0.0 { -1 } else { value as i32 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HttpHeader;

    #[test]
    fn reconstructed_sizes_match_wire_shape() {
        let mut request = HttpRequest::new();
        request.method = Some("GET".into());
        request.set_url("https://example.com/");
        request.request_headers = vec![HttpHeader::new("Accept", "*/*")];
        // "GET https://example.com/ HTTP/1.1\r\n" + "Accept: */*\r\n" + "\r\n"
        assert_eq!(computed_request_headers_size(&request), 35 + 13 + 2);

        request.status_code = 200;
        request.status_text = Some("OK".into());
        request.response_headers = vec![HttpHeader::new("Content-Length", "5")];
        // "HTTP/1.1 200 OK\r\n" + "Content-Length: 5\r\n" + "\r\n"
        assert_eq!(computed_response_headers_size(&request), 17 + 19 + 2);
    }

    #[test]
    fn negative_timing_offsets_stay_unobserved() {
        assert_eq!(ms_offset(-1.0), -1);
        assert_eq!(ms_offset(0.0), 0);
        assert_eq!(ms_offset(41.7), 41);
    }
}
