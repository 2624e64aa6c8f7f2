use serde::{Deserialize, Serialize};

/// Post data beyond this length is truncated before being stored.
pub const MAX_POST_DATA_LEN: usize = 2048;

/// WebSocket frame payloads beyond this length are truncated before being stored.
pub const MAX_WS_PAYLOAD_LEN: usize = 100;

/// A single HTTP header as observed on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

impl HttpHeader {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Lifecycle of a single HTTP or WebSocket exchange.
///
/// Transitions only move forward, with two exceptions handled by the
/// request tracker: a redirect closes the old record and opens a fresh one,
/// and removing a tab force-completes everything still in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    #[default]
    Init,
    Send,
    Recv,
    Complete,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Send => write!(f, "Send"),
            Self::Recv => write!(f, "Recv"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// What kind of resource a request fetched, as reported by the browser.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Image,
    Script,
    Font,
    Stylesheet,
    Object,
    XmlHttpRequest,
    WebSocket,
    #[default]
    Other,
}

impl ResourceType {
    /// Map the DevTools `type` string to a resource type.
    #[must_use]
    pub fn from_devtools(kind: &str) -> Self {
        match kind {
            "Document" => Self::Document,
            "Image" => Self::Image,
            "Script" => Self::Script,
            "Stylesheet" => Self::Stylesheet,
            "Object" => Self::Object,
            "Font" => Self::Font,
            "WebSocket" => Self::WebSocket,
            "XHR" => Self::XmlHttpRequest,
            _ => Self::Other,
        }
    }
}

/// Direction of a WebSocket frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flow {
    Received,
    Sent,
}

/// One WebSocket frame on an upgraded request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketMessage {
    /// Offset from the owning request's start time, in milliseconds.
    pub time: i32,
    /// Payload length before truncation.
    pub len: u32,
    pub flow: Flow,
    /// Payload, truncated to [`MAX_WS_PAYLOAD_LEN`] bytes.
    pub data: String,
}

/// One HTTP or WebSocket exchange with full timing and header detail.
///
/// Timing fields are millisecond offsets from `start_time`; `-1` means the
/// phase was not observed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpRequest {
    // Request side
    pub method: Option<String>,
    pub url: Option<String>,
    pub protocol: Option<String>,
    pub request_headers: Vec<HttpHeader>,
    pub request_body_size: i64,

    // Response side
    pub status_code: u16,
    pub status_text: Option<String>,
    pub response_headers: Vec<HttpHeader>,
    pub body_size: i64,
    pub bytes_recv_compressed: i64,

    /// WebSocket frames; `Some` (even if empty) exactly when this request is
    /// a websocket upgrade.
    pub ws_messages: Option<Vec<WebSocketMessage>>,

    /// Where a redirect response pointed; set on the record being closed.
    pub redirect_url: Option<String>,

    // Origin of the request within the browser
    pub request_id: Option<String>,
    pub frame_id: Option<String>,
    pub tab_id: i64,
    pub resource_type: ResourceType,

    pub from_cache: bool,

    pub ip: Option<String>,
    pub host: Option<String>,

    /// Free-text failure reason ("Blocked", "Cancelled", "Unknown" or a raw
    /// transport code).
    pub error: Option<String>,

    /// Epoch milliseconds.
    pub start_time: i64,
    pub dns_start: i32,
    pub dns_end: i32,
    pub connect_start: i32,
    pub ssl_start: i32,
    pub ssl_end: i32,
    pub connect_end: i32,
    pub send_start: i32,
    pub send_end: i32,
    pub recv_headers_end: i32,
    pub recv_end: i32,

    pub connection_reused: bool,
    pub connection_id: i64,
    pub response_headers_size: i64,
    pub request_headers_size: i64,
    pub blocked_time: i32,

    pub state: RequestState,
    pub post_data: Option<String>,
    pub mime_type: Option<String>,
    pub initiator_url: Option<String>,

    /// Milliseconds between the wall clock and the browser's monotonic clock,
    /// computed once near request start and fixed for the request's lifetime.
    pub wall_time_offset: i64,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            method: None,
            url: None,
            protocol: None,
            request_headers: Vec::new(),
            request_body_size: 0,
            status_code: 0,
            status_text: None,
            response_headers: Vec::new(),
            body_size: 0,
            bytes_recv_compressed: -1,
            ws_messages: None,
            redirect_url: None,
            request_id: None,
            frame_id: None,
            tab_id: -1,
            resource_type: ResourceType::Other,
            from_cache: false,
            ip: None,
            host: None,
            error: None,
            start_time: 0,
            dns_start: -1,
            dns_end: -1,
            connect_start: -1,
            ssl_start: -1,
            ssl_end: -1,
            connect_end: -1,
            send_start: -1,
            send_end: -1,
            recv_headers_end: -1,
            recv_end: -1,
            connection_reused: false,
            connection_id: 0,
            response_headers_size: 0,
            request_headers_size: 0,
            blocked_time: 0,
            state: RequestState::Init,
            post_data: None,
            mime_type: None,
            initiator_url: None,
            wall_time_offset: 0,
        }
    }
}

impl HttpRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the URL and derive the host from it.
    pub fn set_url(&mut self, url: &str) {
        self.url = Some(url.to_owned());
        self.host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned));
    }

    /// Store post data, truncating to [`MAX_POST_DATA_LEN`] bytes.
    pub fn set_post_data(&mut self, data: &str) {
        self.post_data = Some(truncate_utf8(data, MAX_POST_DATA_LEN).to_owned());
    }

    pub fn add_bytes_recv(&mut self, bytes: i64, bytes_compressed: i64) {
        if bytes_compressed > 0 {
            if self.bytes_recv_compressed == -1 {
                self.bytes_recv_compressed = bytes_compressed;
            } else {
                self.bytes_recv_compressed += bytes_compressed;
            }
        }
        self.body_size += bytes;
    }

    pub fn add_bytes_sent(&mut self, bytes: i64) {
        self.request_body_size += bytes;
    }

    /// Mark this request as a websocket upgrade. The message list becomes
    /// non-null (possibly empty) and stays that way.
    pub fn mark_web_socket(&mut self) {
        if self.ws_messages.is_none() {
            self.ws_messages = Some(Vec::new());
        }
    }

    #[must_use]
    pub fn is_web_socket(&self) -> bool {
        self.ws_messages.is_some()
    }

    pub fn add_web_socket_message(&mut self, message: WebSocketMessage) {
        self.mark_web_socket();
        if let Some(messages) = &mut self.ws_messages {
            messages.push(message);
        }
    }

    /// Epoch milliseconds of the observed end of the exchange, or the start
    /// time when the exchange never finished receiving.
    #[must_use]
    pub fn end_time(&self) -> i64 {
        if self.recv_end > 0 {
            self.start_time + i64::from(self.recv_end)
        } else {
            self.start_time
        }
    }

    /// Bytes that went over the wire upstream, zero for cache hits.
    #[must_use]
    pub fn total_bytes_uploaded(&self) -> i64 {
        if self.from_cache {
            0
        } else {
            self.request_body_size + self.request_headers_size
        }
    }

    /// Bytes that came over the wire downstream, zero for cache hits.
    #[must_use]
    pub fn total_bytes_downloaded(&self) -> i64 {
        if self.from_cache {
            return 0;
        }
        let body = if self.bytes_recv_compressed > 0 {
            self.bytes_recv_compressed
        } else {
            self.body_size
        };
        body + i64::from(self.recv_headers_end.max(0))
    }
}

/// Truncate a string to at most `max` bytes without splitting a character.
#[must_use]
pub(crate) fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_data_is_capped() {
        let mut request = HttpRequest::new();
        let big = "x".repeat(MAX_POST_DATA_LEN + 100);
        request.set_post_data(&big);
        assert_eq!(request.post_data.as_ref().map(String::len), Some(MAX_POST_DATA_LEN));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // Multi-byte character straddling the cut point is dropped whole.
        let s = "ab\u{00e9}";
        assert_eq!(truncate_utf8(s, 3), "ab");
        assert_eq!(truncate_utf8(s, 4), s);
    }

    #[test]
    fn host_derived_from_url() {
        let mut request = HttpRequest::new();
        request.set_url("https://example.com/a/b?q=1");
        assert_eq!(request.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn ws_messages_sentinel_is_sticky() {
        let mut request = HttpRequest::new();
        assert!(!request.is_web_socket());
        request.mark_web_socket();
        assert_eq!(request.ws_messages.as_deref(), Some(&[][..]));
        request.add_web_socket_message(WebSocketMessage {
            time: 5,
            len: 2,
            flow: Flow::Sent,
            data: "hi".into(),
        });
        assert!(request.is_web_socket());
        assert_eq!(request.ws_messages.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn compressed_bytes_start_at_minus_one() {
        let mut request = HttpRequest::new();
        request.add_bytes_recv(100, 0);
        assert_eq!(request.bytes_recv_compressed, -1);
        request.add_bytes_recv(100, 40);
        assert_eq!(request.bytes_recv_compressed, 40);
        request.add_bytes_recv(100, 40);
        assert_eq!(request.bytes_recv_compressed, 80);
        assert_eq!(request.body_size, 300);
    }

    #[test]
    fn end_time_falls_back_to_start() {
        let mut request = HttpRequest::new();
        request.start_time = 1000;
        assert_eq!(request.end_time(), 1000);
        request.recv_end = 250;
        assert_eq!(request.end_time(), 1250);
    }
}
