//! Protocol boundary: decodes raw `{event, details}` messages into a closed
//! enum of event kinds, exactly once, so the dispatcher can match
//! exhaustively. Unknown names and malformed payloads surface as
//! [`DecodeError`] and are logged and dropped by the caller; they are never
//! fatal, because the browser side evolves independently of this crate.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::model::HttpHeader;

/// One structured message as delivered by the connection channel.
#[derive(Clone, Debug, Deserialize)]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub details: Value,
}

impl RawEvent {
    #[must_use]
    pub fn new(event: impl Into<String>, details: Value) -> Self {
        Self {
            event: event.into(),
            details,
        }
    }
}

/// Why a raw message could not be decoded.
#[derive(Debug)]
pub enum DecodeError {
    /// The event name is not one this crate recognizes.
    UnknownEvent(String),
    /// The event name is known but the payload did not deserialize.
    Malformed {
        event: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEvent(name) => write!(f, "unhandled event: {name}"),
            Self::Malformed { event, source } => {
                write!(f, "malformed payload for {event}: {source}")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnknownEvent(_) => None,
            Self::Malformed { source, .. } => Some(source),
        }
    }
}

fn default_neg1_i64() -> i64 {
    -1
}

fn default_neg1_f64() -> f64 {
    -1.0
}

// =============================================================================
// Identifier plumbing
// =============================================================================

/// Frame identity carried on navigation-domain events.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameIds {
    #[serde(default = "default_neg1_i64")]
    pub tab_id: i64,
    #[serde(default = "default_neg1_i64")]
    pub process_id: i64,
    #[serde(default = "default_neg1_i64")]
    pub frame_id: i64,
    #[serde(default = "default_neg1_i64")]
    pub parent_frame_id: i64,
}

/// Raw identity fields carried on network-domain events.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetIds {
    #[serde(default = "default_neg1_i64")]
    pub tab_id: i64,
    pub request_id: String,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub process_id: Option<String>,
}

/// Key scoping a request id to its tab; request ids are only unique per tab.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub tab_id: i64,
    pub request_id: String,
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tab_id, self.request_id)
    }
}

/// Normalized request identity.
///
/// Older browsers encoded the process id into dotted `frameId`
/// (`"<process>.<frame>"`) and `requestId` (`"<process>.<n>"`) values;
/// newer ones send opaque strings with the process id in its own field.
/// Both forms are handled here so the trackers never see the difference.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub process_id: i64,
    pub tab_id: i64,
    pub frame_id: Option<String>,
    pub request_id: String,
}

impl RequestInfo {
    #[must_use]
    pub fn from_net(ids: &NetIds) -> Self {
        let mut process_id = -1;
        let frame_id = ids.frame_id.as_ref().map(|frame_id| {
            if let Some(dot) = frame_id.find('.').filter(|&d| d > 0) {
                if let Ok(process) = frame_id[..dot].parse::<i64>() {
                    process_id = process;
                }
                frame_id[dot + 1..].to_owned()
            } else {
                frame_id.clone()
            }
        });

        let request_id = ids.request_id.clone();
        if let Some(dot) = request_id.find('.').filter(|&d| d > 0) {
            if let Ok(process) = request_id[..dot].parse::<i64>() {
                process_id = process;
            }
        } else if let Some(process) = &ids.process_id {
            if let Ok(process) = process.parse::<i64>() {
                process_id = process;
            }
        }

        Self {
            process_id,
            tab_id: ids.tab_id,
            frame_id,
            request_id,
        }
    }

    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey {
            tab_id: self.tab_id,
            request_id: self.request_id.clone(),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub post_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTiming {
    #[serde(default)]
    pub request_time: f64,
    #[serde(default = "default_neg1_f64")]
    pub dns_start: f64,
    #[serde(default = "default_neg1_f64")]
    pub dns_end: f64,
    #[serde(default = "default_neg1_f64")]
    pub connect_start: f64,
    #[serde(default = "default_neg1_f64")]
    pub connect_end: f64,
    #[serde(default = "default_neg1_f64")]
    pub ssl_start: f64,
    #[serde(default = "default_neg1_f64")]
    pub ssl_end: f64,
    #[serde(default = "default_neg1_f64")]
    pub send_start: f64,
    #[serde(default = "default_neg1_f64")]
    pub send_end: f64,
    #[serde(default = "default_neg1_f64")]
    pub receive_headers_end: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub headers_text: Option<String>,
    #[serde(default)]
    pub request_headers: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub request_headers_text: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub connection_reused: bool,
    #[serde(default)]
    pub connection_id: i64,
    #[serde(default)]
    pub remote_ip_address: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub from_disk_cache: bool,
    #[serde(default)]
    pub timing: Option<WireTiming>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatorFrame {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<Vec<InitiatorFrame>>,
}

impl Initiator {
    /// The URL that triggered the request: the initiator's own URL, or the
    /// top stack frame's.
    #[must_use]
    pub fn best_url(&self) -> Option<&str> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return Some(url);
        }
        self.stack_trace
            .as_deref()?
            .first()?
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    #[serde(flatten)]
    pub ids: NetIds,
    pub request: WireRequest,
    #[serde(default)]
    pub redirect_response: Option<WireResponse>,
    #[serde(default)]
    pub wall_time: Option<f64>,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub initiator: Option<Initiator>,
}

/// Deferred header metadata that may arrive before the event that creates
/// the request record.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraInfo {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub headers_text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    pub response: WireResponse,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataReceived {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub data_length: i64,
    #[serde(default)]
    pub encoded_data_length: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub error_text: Option<String>,
    #[serde(default)]
    pub canceled: Option<bool>,
    #[serde(default)]
    pub blocked_reason: Option<String>,
}

/// Events that carry nothing but request identity.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStub {
    #[serde(flatten)]
    pub ids: NetIds,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketCreated {
    #[serde(flatten)]
    pub ids: NetIds,
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketHandshakeRequest {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub wall_time: Option<f64>,
    pub request: WireRequest,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketHandshakeResponse {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub timestamp: f64,
    pub response: WireResponse,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    #[serde(default)]
    pub payload_data: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketFrame {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub timestamp: f64,
    pub response: WireFrame,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketFrameError {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosed {
    #[serde(flatten)]
    pub ids: NetIds,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationBegin {
    #[serde(flatten)]
    pub frame: FrameIds,
    pub url: String,
    #[serde(default)]
    pub time_stamp: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationCommitted {
    #[serde(flatten)]
    pub frame: FrameIds,
    pub url: String,
    #[serde(default)]
    pub transition_type: Option<String>,
    #[serde(default)]
    pub time_stamp: f64,
}

/// Shared shape of DOM-content-loaded and navigation-completed payloads.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationStamp {
    #[serde(flatten)]
    pub frame: FrameIds,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub time_stamp: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationFailed {
    #[serde(flatten)]
    pub frame: FrameIds,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub time_stamp: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTimes {
    #[serde(flatten)]
    pub frame: FrameIds,
    #[serde(default)]
    pub connection_info: Option<String>,
    #[serde(default)]
    pub first_paint_time: Option<f64>,
    #[serde(default)]
    pub first_paint_after_load_time: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryState {
    #[serde(flatten)]
    pub frame: FrameIds,
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStats {
    #[serde(flatten)]
    pub frame: FrameIds,
    #[serde(default)]
    pub nodes: i64,
    #[serde(default)]
    pub documents: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConsoleMessage {
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub column: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleAdded {
    #[serde(default = "default_neg1_i64")]
    pub tab_id: i64,
    pub message: WireConsoleMessage,
}

/// Events that carry only a tab id (and things we ignore).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabStub {
    #[serde(default = "default_neg1_i64")]
    pub tab_id: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequired {
    #[serde(default = "default_neg1_i64")]
    pub tab_id: i64,
    pub request_id: String,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub status_line: Option<String>,
    /// Epoch milliseconds, unlike network-domain timestamps.
    #[serde(default)]
    pub time_stamp: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    #[serde(default)]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreencastFrame {
    /// Base64-encoded image data.
    pub data: String,
    #[serde(default)]
    pub session_id: i64,
    #[serde(default)]
    pub metadata: Option<FrameMetadata>,
}

// =============================================================================
// The closed event enum
// =============================================================================

/// Every event kind this crate understands, decoded once at the boundary.
#[derive(Clone, Debug)]
pub enum ProtocolEvent {
    NavigationBegin(NavigationBegin),
    NavigationCommitted(NavigationCommitted),
    NavigationDomContentLoaded(NavigationStamp),
    NavigationCompleted(NavigationStamp),
    NavigationError(NavigationFailed),
    NavigationLoadTimes(LoadTimes),
    HistoryStateUpdated(HistoryState),
    CalculatedPageStats(PageStats),
    RequestWillBeSent(RequestWillBeSent),
    RequestWillBeSentExtraInfo(ExtraInfo),
    ResponseReceived(ResponseReceived),
    ResponseReceivedExtraInfo(ExtraInfo),
    DataReceived(DataReceived),
    LoadingFinished(LoadingFinished),
    LoadingFailed(LoadingFailed),
    RequestServedFromCache(RequestStub),
    ResourceChangedPriority(RequestStub),
    WebSocketCreated(WebSocketCreated),
    WebSocketWillSendHandshakeRequest(WebSocketHandshakeRequest),
    WebSocketHandshakeResponseReceived(WebSocketHandshakeResponse),
    WebSocketFrameSent(WebSocketFrame),
    WebSocketFrameReceived(WebSocketFrame),
    WebSocketFrameError(WebSocketFrameError),
    WebSocketClosed(WebSocketClosed),
    ConsoleMessageAdded(ConsoleAdded),
    ConsoleMessagesCleared(TabStub),
    ConsoleRepeatCountUpdated(TabStub),
    AuthRequired(AuthRequired),
    TabCreated(TabStub),
    TabUpdated(TabStub),
    TabRemoved(TabStub),
    DebuggerDetached(TabStub),
    TargetCrashed(Value),
    ScreencastFrame(ScreencastFrame),
    InspectElement(Value),
}

impl ProtocolEvent {
    /// Decode a raw message into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownEvent`] for names outside the closed
    /// set and [`DecodeError::Malformed`] when a known payload fails to
    /// deserialize.
    pub fn decode(raw: &RawEvent) -> Result<Self, DecodeError> {
        fn parse<T: serde::de::DeserializeOwned>(
            event: &str,
            details: &Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(details.clone()).map_err(|source| DecodeError::Malformed {
                event: event.to_owned(),
                source,
            })
        }

        let event = raw.event.as_str();
        let details = &raw.details;
        let decoded = match event {
            "navigationBegin" => Self::NavigationBegin(parse(event, details)?),
            "navigationCommitted" => Self::NavigationCommitted(parse(event, details)?),
            "navigationDOMContentLoaded" => {
                Self::NavigationDomContentLoaded(parse(event, details)?)
            }
            "navigationCompleted" => Self::NavigationCompleted(parse(event, details)?),
            "navigationError" => Self::NavigationError(parse(event, details)?),
            "navigationLoadTimes" => Self::NavigationLoadTimes(parse(event, details)?),
            "historyStateUpdated" => Self::HistoryStateUpdated(parse(event, details)?),
            "calculatedPageStats" => Self::CalculatedPageStats(parse(event, details)?),
            "Network.requestWillBeSent" => Self::RequestWillBeSent(parse(event, details)?),
            "Network.requestWillBeSentExtraInfo" => {
                Self::RequestWillBeSentExtraInfo(parse(event, details)?)
            }
            "Network.responseReceived" => Self::ResponseReceived(parse(event, details)?),
            "Network.responseReceivedExtraInfo" => {
                Self::ResponseReceivedExtraInfo(parse(event, details)?)
            }
            "Network.dataReceived" => Self::DataReceived(parse(event, details)?),
            "Network.loadingFinished" => Self::LoadingFinished(parse(event, details)?),
            "Network.loadingFailed" => Self::LoadingFailed(parse(event, details)?),
            "Network.requestServedFromCache" => {
                Self::RequestServedFromCache(parse(event, details)?)
            }
            "Network.resourceChangedPriority" => {
                Self::ResourceChangedPriority(parse(event, details)?)
            }
            "Network.webSocketCreated" => Self::WebSocketCreated(parse(event, details)?),
            "Network.webSocketWillSendHandshakeRequest" => {
                Self::WebSocketWillSendHandshakeRequest(parse(event, details)?)
            }
            "Network.webSocketHandshakeResponseReceived" => {
                Self::WebSocketHandshakeResponseReceived(parse(event, details)?)
            }
            "Network.webSocketFrameSent" => Self::WebSocketFrameSent(parse(event, details)?),
            "Network.webSocketFrameReceived" => {
                Self::WebSocketFrameReceived(parse(event, details)?)
            }
            "Network.webSocketFrameError" => Self::WebSocketFrameError(parse(event, details)?),
            "Network.webSocketClosed" => Self::WebSocketClosed(parse(event, details)?),
            "Console.messageAdded" => Self::ConsoleMessageAdded(parse(event, details)?),
            "Console.messagesCleared" => Self::ConsoleMessagesCleared(parse(event, details)?),
            "Console.messageRepeatCountUpdated" => {
                Self::ConsoleRepeatCountUpdated(parse(event, details)?)
            }
            "onAuthRequired" => Self::AuthRequired(parse(event, details)?),
            "tabCreated" => Self::TabCreated(parse(event, details)?),
            "tabUpdated" => Self::TabUpdated(parse(event, details)?),
            "tabRemoved" => Self::TabRemoved(parse(event, details)?),
            "debuggerDetached" => Self::DebuggerDetached(parse(event, details)?),
            "Inspector.targetCrashed" => Self::TargetCrashed(details.clone()),
            "Page.screencastFrame" => Self::ScreencastFrame(parse(event, details)?),
            "inspectElement" => Self::InspectElement(details.clone()),
            _ => return Err(DecodeError::UnknownEvent(raw.event.clone())),
        };
        Ok(decoded)
    }

    /// High-frequency events excluded from verbose event logging.
    #[must_use]
    pub fn is_noisy(event: &str) -> bool {
        matches!(event, "Page.screencastFrame" | "Network.dataReceived")
    }
}

// =============================================================================
// HTTP header text parsing
// =============================================================================

/// Response line + headers recovered from raw `headersText`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedResponse {
    pub protocol: Option<String>,
    pub status_code: u16,
    pub status_text: Option<String>,
    pub headers: Vec<HttpHeader>,
}

/// Parse a raw HTTP response header block (status line plus header lines).
#[must_use]
pub fn parse_response_text(text: &str) -> ParsedResponse {
    let mut lines = text.split("\r\n");
    let mut parsed = ParsedResponse::default();
    if let Some(status_line) = lines.next() {
        if let Some((protocol, code, status_text)) = parse_status_line(status_line) {
            parsed.protocol = Some(protocol);
            parsed.status_code = code;
            parsed.status_text = Some(status_text);
        }
    }
    parsed.headers = parse_header_lines(lines);
    parsed
}

/// Request line + headers recovered from raw `requestHeadersText`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedRequest {
    pub method: Option<String>,
    pub headers: Vec<HttpHeader>,
}

/// Parse a raw HTTP request header block (request line plus header lines).
#[must_use]
pub fn parse_request_text(text: &str) -> ParsedRequest {
    let mut lines = text.split("\r\n");
    let mut parsed = ParsedRequest::default();
    if let Some(request_line) = lines.next() {
        if let Some(method) = request_line.split(' ').next().filter(|m| !m.is_empty()) {
            parsed.method = Some(method.to_owned());
        }
    }
    parsed.headers = parse_header_lines(lines);
    parsed
}

/// Parse a status line like `HTTP/1.1 401 Unauthorized`.
#[must_use]
pub fn parse_status_line(line: &str) -> Option<(String, u16, String)> {
    let mut parts = line.splitn(3, ' ');
    let protocol = parts.next()?.to_owned();
    let code = parts.next()?.parse().ok()?;
    let status_text = parts.next().unwrap_or("").to_owned();
    Some((protocol, code, status_text))
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<HttpHeader> {
    lines
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some(HttpHeader::new(name.trim(), value.trim()))
        })
        .collect()
}

/// Convert the browser-parsed header map to ordered header pairs.
#[must_use]
pub fn headers_from_map(map: &serde_json::Map<String, Value>) -> Vec<HttpHeader> {
    map.iter()
        .map(|(name, value)| {
            let value = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_owned);
            HttpHeader::new(name.clone(), value)
        })
        .collect()
}

/// Strip a `#fragment` from a URL for comparison purposes.
#[must_use]
pub fn strip_anchor(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_event_is_an_error_not_a_panic() {
        let raw = RawEvent::new("Network.somethingNew", json!({}));
        match ProtocolEvent::decode(&raw) {
            Err(DecodeError::UnknownEvent(name)) => {
                assert_eq!(name, "Network.somethingNew");
            }
            other => panic!("expected UnknownEvent, got {other:?}"),
        }
    }

    #[test]
    fn malformed_payload_reports_event_name() {
        let raw = RawEvent::new("Network.responseReceived", json!({"tabId": 1}));
        match ProtocolEvent::decode(&raw) {
            Err(DecodeError::Malformed { event, .. }) => {
                assert_eq!(event, "Network.responseReceived");
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn decodes_request_will_be_sent() {
        let raw = RawEvent::new(
            "Network.requestWillBeSent",
            json!({
                "tabId": 7,
                "requestId": "1000.1",
                "frameId": "1000.2",
                "timestamp": 10.5,
                "wallTime": 1_700_000_000.25,
                "request": {
                    "url": "https://example.com/",
                    "method": "GET",
                    "headers": {"Accept": "*/*"}
                }
            }),
        );
        let Ok(ProtocolEvent::RequestWillBeSent(ev)) = ProtocolEvent::decode(&raw) else {
            panic!("decode failed");
        };
        assert_eq!(ev.ids.tab_id, 7);
        assert_eq!(ev.request.url, "https://example.com/");
        assert_eq!(ev.wall_time, Some(1_700_000_000.25));
    }

    #[test]
    fn legacy_dotted_ids_carry_process_id() {
        let ids = NetIds {
            tab_id: 3,
            request_id: "1000.12".into(),
            frame_id: Some("1000.4".into()),
            process_id: None,
        };
        let info = RequestInfo::from_net(&ids);
        assert_eq!(info.process_id, 1000);
        assert_eq!(info.frame_id.as_deref(), Some("4"));
        assert_eq!(info.request_id, "1000.12");
        assert_eq!(info.key().to_string(), "3:1000.12");
    }

    #[test]
    fn modern_ids_take_process_from_field() {
        let ids = NetIds {
            tab_id: 3,
            request_id: "F0E1D2C3".into(),
            frame_id: Some("A1B2C3D4E5".into()),
            process_id: Some("42".into()),
        };
        let info = RequestInfo::from_net(&ids);
        assert_eq!(info.process_id, 42);
        assert_eq!(info.frame_id.as_deref(), Some("A1B2C3D4E5"));
    }

    #[test]
    fn parses_response_header_text() {
        let parsed =
            parse_response_text("HTTP/1.1 301 Moved Permanently\r\nLocation: /next\r\n\r\n");
        assert_eq!(parsed.status_code, 301);
        assert_eq!(parsed.status_text.as_deref(), Some("Moved Permanently"));
        assert_eq!(parsed.protocol.as_deref(), Some("HTTP/1.1"));
        assert_eq!(parsed.headers, vec![HttpHeader::new("Location", "/next")]);
    }

    #[test]
    fn strip_anchor_only_touches_fragment() {
        assert_eq!(strip_anchor("https://a/b#frag"), "https://a/b");
        assert_eq!(strip_anchor("https://a/b?q=1"), "https://a/b?q=1");
    }
}
