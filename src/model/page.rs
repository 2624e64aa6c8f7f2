use serde::{Deserialize, Serialize};

use super::request::HttpRequest;

/// Navigation lifecycle of a page. Monotonic except for an explicit reset
/// when the page object is reused for a fresh navigation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageState {
    #[default]
    Uninitialized,
    NavigationBegin,
    NavigationCommitted,
    DomContentLoaded,
    NavigationCompleted,
    NavigationError,
}

/// How the navigation was initiated, from the browser's transition type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationType {
    #[default]
    Unknown,
    Link,
    Typed,
    AutoBookmark,
    AutoSubFrame,
    ManualSubFrame,
    Generated,
    StartPage,
    FormSubmit,
    Reload,
    Keyword,
    KeywordGenerated,
}

impl NavigationType {
    #[must_use]
    pub fn from_transition(kind: &str) -> Self {
        match kind {
            "link" => Self::Link,
            "typed" => Self::Typed,
            "auto_bookmark" => Self::AutoBookmark,
            "auto_subframe" => Self::AutoSubFrame,
            "manual_subframe" => Self::ManualSubFrame,
            "generated" => Self::Generated,
            "start_page" => Self::StartPage,
            "form_submit" => Self::FormSubmit,
            "reload" => Self::Reload,
            "keyword" => Self::Keyword,
            "keyword_generated" => Self::KeywordGenerated,
            _ => Self::Unknown,
        }
    }
}

/// Closed enumeration of navigation/network failure reasons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageError {
    Aborted,
    AccessDenied,
    BadSslClientAuthCert,
    BlockedByClient,
    CacheMiss,
    CacheOperationNotSupported,
    CacheReadFailure,
    CertAuthorityInvalid,
    CertCommonNameInvalid,
    CertContainsErrors,
    CertDateInvalid,
    CertEnd,
    CertInvalid,
    CertNoRevocationMechanism,
    CertRevoked,
    CertUnableToCheckRevocation,
    CertWeakSignatureAlgorithm,
    ConnectionAborted,
    ConnectionClosed,
    ConnectionFailed,
    ConnectionRefused,
    ConnectionReset,
    ConnectionTimedOut,
    ContentDecodingFailed,
    DisallowedUrlScheme,
    EmptyResponse,
    EncodingConversionFailed,
    InsecureResponse,
    InsufficientResources,
    InternetDisconnected,
    InvalidArgument,
    InvalidChunkedEncoding,
    InvalidFlipStream,
    InvalidResponse,
    InvalidUrl,
    MalformedIdentity,
    MethodNotSupported,
    NetworkAddressInvalid,
    NetworkAddressUnreachable,
    NetworkChanged,
    NetworkIoSuspended,
    NoSslVersionsEnabled,
    OutOfMemory,
    PacScriptFailed,
    PacStatusNotOk,
    ResponseHeadersTooBig,
    SslCertErrorInSslRenegotiation,
    SslClientAuthCertNeeded,
    SslProtocolError,
    SslRenegotiationRequested,
    SslVersionOrCipherMismatch,
    SynReplyNotReceived,
    TimedOut,
    TooManyRedirects,
    TunnelConnectionFailed,
    Unclassified,
    UnexpectedProxyAuth,
    UnknownHostname,
    UnknownUrlScheme,
    UnrecognizedFtpDirectListingFormat,
    UnsafePort,
    UploadFileNotFound,
}

impl PageError {
    /// Map a `net::` error code string to a failure reason. Returns `None`
    /// for codes this taxonomy does not cover; callers log and fall back to
    /// [`PageError::Unclassified`].
    #[must_use]
    pub fn from_net_error(code: &str) -> Option<Self> {
        let error = match code {
            "net::ERR_EMPTY_RESPONSE" => Self::EmptyResponse,
            "net::ERR_ABORTED" => Self::Aborted,
            "net::ERR_TIMED_OUT" => Self::TimedOut,
            "net::ERR_ACCESS_DENIED" => Self::AccessDenied,
            "net::ERR_OUT_OF_MEMORY" => Self::OutOfMemory,
            "net::ERR_INSUFFICIENT_RESOURCES" => Self::InsufficientResources,
            "net::ERR_CONNECTION_CLOSED" => Self::ConnectionClosed,
            "net::ERR_CONNECTION_RESET" => Self::ConnectionReset,
            "net::ERR_CONNECTION_REFUSED" => Self::ConnectionRefused,
            "net::ERR_CONNECTION_ABORTED" => Self::ConnectionAborted,
            "net::ERR_CONNECTION_FAILED" => Self::ConnectionFailed,
            "net::ERR_NAME_NOT_RESOLVED" => Self::UnknownHostname,
            "net::ERR_INTERNET_DISCONNECTED" => Self::InternetDisconnected,
            "net::ERR_SSL_PROTOCOL_ERROR" => Self::SslProtocolError,
            "net::ERR_ADDRESS_INVALID" => Self::NetworkAddressInvalid,
            "net::ERR_ADDRESS_UNREACHABLE" => Self::NetworkAddressUnreachable,
            "net::ERR_SSL_CLIENT_AUTH_CERT_NEEDED" => Self::SslClientAuthCertNeeded,
            "net::ERR_TUNNEL_CONNECTION_FAILED" => Self::TunnelConnectionFailed,
            "net::ERR_NO_SSL_VERSIONS_ENABLED" => Self::NoSslVersionsEnabled,
            "net::ERR_SSL_VERSION_OR_CIPHER_MISMATCH" => Self::SslVersionOrCipherMismatch,
            "net::ERR_SSL_RENEGOTIATION_REQUESTED" => Self::SslRenegotiationRequested,
            "net::ERR_BAD_SSL_CLIENT_AUTH_CERT" => Self::BadSslClientAuthCert,
            "net::ERR_CERT_ERROR_IN_SSL_RENEGOTIATION" => Self::SslCertErrorInSslRenegotiation,
            "net::ERR_CONNECTION_TIMED_OUT" => Self::ConnectionTimedOut,
            "net::ERR_CERT_COMMON_NAME_INVALID" => Self::CertCommonNameInvalid,
            "net::ERR_CERT_DATE_INVALID" => Self::CertDateInvalid,
            "net::ERR_CERT_AUTHORITY_INVALID" => Self::CertAuthorityInvalid,
            "net::ERR_CERT_CONTAINS_ERRORS" => Self::CertContainsErrors,
            "net::ERR_CERT_NO_REVOCATION_MECHANISM" => Self::CertNoRevocationMechanism,
            "net::ERR_CERT_UNABLE_TO_CHECK_REVOCATION" => Self::CertUnableToCheckRevocation,
            "net::ERR_CERT_CERT_REVOKED" => Self::CertRevoked,
            "net::ERR_CERT_INVALID" => Self::CertInvalid,
            "net::ERR_CERT_WEAK_SIGNATURE_ALGORITHM" => Self::CertWeakSignatureAlgorithm,
            "net::ERR_CERT_END" => Self::CertEnd,
            "net::ERR_DISALLOWED_URL_SCHEME" => Self::DisallowedUrlScheme,
            "net::ERR_UNKNOWN_URL_SCHEME" => Self::UnknownUrlScheme,
            "net::ERR_INVALID_URL" => Self::InvalidUrl,
            "net::ERR_TOO_MANY_REDIRECTS" => Self::TooManyRedirects,
            "net::ERR_UNSAFE_PORT" => Self::UnsafePort,
            "net::ERR_INVALID_RESPONSE" | "net::ERR_INVALID_HTTP_RESPONSE" => Self::InvalidResponse,
            "net::ERR_INVALID_CHUNKED_ENCODING" => Self::InvalidChunkedEncoding,
            "net::ERR_METHOD_NOT_SUPPORTED" => Self::MethodNotSupported,
            "net::ERR_UNEXPECTED_PROXY_AUTH" => Self::UnexpectedProxyAuth,
            "net::ERR_RESPONSE_HEADERS_TOO_BIG" => Self::ResponseHeadersTooBig,
            "net::ERR_PAC_STATUS_NOT_OK" => Self::PacStatusNotOk,
            "net::ERR_PAC_SCRIPT_FAILED" => Self::PacScriptFailed,
            "net::ERR_MALFORMED_IDENTITY" => Self::MalformedIdentity,
            "net::ERR_CONTENT_DECODING_FAILED" => Self::ContentDecodingFailed,
            "net::ERR_NETWORK_IO_SUSPENDED" => Self::NetworkIoSuspended,
            "net::ERR_SYN_REPLY_NOT_RECEIVED" => Self::SynReplyNotReceived,
            "net::ERR_ENCODING_CONVERSION_FAILED" => Self::EncodingConversionFailed,
            "net::ERR_UNRECOGNIZED_FTP_DIRECTORY_LISTING_FORMAT" => {
                Self::UnrecognizedFtpDirectListingFormat
            }
            "net::ERR_INVALID_FLIP_STREAM" => Self::InvalidFlipStream,
            "net::ERR_CACHE_MISS" => Self::CacheMiss,
            "net::ERR_CACHE_READ_FAILURE" => Self::CacheReadFailure,
            "net::ERR_CACHE_OPERATION_NOT_SUPPORTED" => Self::CacheOperationNotSupported,
            "net::ERR_INSECURE_RESPONSE" => Self::InsecureResponse,
            "net::ERR_BLOCKED_BY_CLIENT" => Self::BlockedByClient,
            "net::ERR_NETWORK_CHANGED" => Self::NetworkChanged,
            "net::ERR_FILE_NOT_FOUND" => Self::UploadFileNotFound,
            "net::ERR_INVALID_ARGUMENT" => Self::InvalidArgument,
            _ => return None,
        };
        Some(error)
    }
}

/// One console entry attached to a page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    pub level: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub text: String,
    pub url: String,
    pub line: u64,
    pub column: u64,
}

/// One tab/frame navigation lifetime segment and its network activity.
///
/// `requests` is kept ascending by start time at all times; insertion and
/// repositioning preserve the invariant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Page {
    pub requests: Vec<HttpRequest>,

    /// Epoch milliseconds when this page object was created.
    pub created_time: i64,
    pub nav_start_time: Option<i64>,
    pub nav_commit_time: Option<i64>,
    pub dom_content_loaded_time: Option<i64>,
    pub nav_end_time: Option<i64>,
    pub first_paint_time: Option<i64>,
    pub first_paint_after_load_time: Option<i64>,

    pub frame_id: i64,
    pub process_id: i64,
    pub tab_id: i64,
    pub navigation_type: Option<NavigationType>,
    /// URL first requested, before any redirect or history update.
    pub orig_url: Option<String>,
    /// Current URL, updated on commit and history API changes.
    pub url: Option<String>,

    pub state: PageState,
    pub error: Option<PageError>,

    pub console_messages: Vec<ConsoleMessage>,
    pub page_id: u32,
    pub protocol: Option<String>,
    pub name: Option<String>,
    pub num_dom_elements: i64,
    pub num_frames: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            created_time: crate::timing::now_millis(),
            nav_start_time: None,
            nav_commit_time: None,
            dom_content_loaded_time: None,
            nav_end_time: None,
            first_paint_time: None,
            first_paint_after_load_time: None,
            frame_id: -1,
            process_id: -1,
            tab_id: -1,
            navigation_type: None,
            orig_url: None,
            url: None,
            state: PageState::Uninitialized,
            error: None,
            console_messages: Vec::new(),
            page_id: 0,
            protocol: None,
            name: None,
            num_dom_elements: 0,
            num_frames: 0,
        }
    }
}

impl Page {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request at the position that keeps the list ascending by
    /// start time. A page with no URL yet inherits the request's URL.
    pub fn add_request(&mut self, request: HttpRequest) -> usize {
        let mut i = self.requests.len();
        while i > 0 {
            if request.start_time >= self.requests[i - 1].start_time {
                break;
            }
            i -= 1;
        }
        if self.url.is_none() {
            self.url.clone_from(&request.url);
        }
        self.requests.insert(i, request);
        i
    }

    /// Restore the start-time ordering for the request at `pos` after its
    /// start time was back-filled. Returns the request's new position.
    pub fn reposition_request(&mut self, pos: usize) -> usize {
        if pos >= self.requests.len() {
            return pos;
        }
        let request = self.requests.remove(pos);
        let mut i = self.requests.len();
        while i > 0 {
            if request.start_time >= self.requests[i - 1].start_time {
                break;
            }
            i -= 1;
        }
        self.requests.insert(i, request);
        i
    }

    pub fn add_console_message(&mut self, message: ConsoleMessage) {
        self.console_messages.push(message);
    }

    pub fn clear_console_messages(&mut self) {
        self.console_messages.clear();
    }

    #[must_use]
    pub fn last_console_message(&self) -> Option<&ConsoleMessage> {
        self.console_messages.last()
    }

    /// Page load time in seconds, zero when the navigation never finished.
    #[must_use]
    pub fn load_time(&self) -> f64 {
        match (self.nav_start_time, self.nav_end_time) {
            (Some(start), Some(end)) if end > start => (end - start) as f64 / 1000.0,
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn bytes_downloaded(&self) -> i64 {
        self.requests
            .iter()
            .filter(|r| !r.from_cache)
            .map(|r| {
                if r.bytes_recv_compressed > 0 {
                    r.bytes_recv_compressed
                } else {
                    r.body_size
                }
            })
            .sum()
    }

    #[must_use]
    pub fn bytes_uploaded(&self) -> i64 {
        self.requests
            .iter()
            .filter(|r| !r.from_cache)
            .map(|r| r.request_body_size)
            .sum()
    }

    #[must_use]
    pub fn num_requests_not_cached(&self) -> usize {
        self.requests.iter().filter(|r| !r.from_cache).count()
    }

    /// The name to report for this page before navigation settles.
    #[must_use]
    pub fn initial_name(&self) -> Option<&str> {
        self.orig_url
            .as_deref()
            .or(self.url.as_deref())
            .or(self.name.as_deref())
    }

    /// The name to report for this page once navigation settled.
    #[must_use]
    pub fn final_name(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.orig_url.as_deref())
            .or(self.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_starting_at(start: i64) -> HttpRequest {
        let mut r = HttpRequest::new();
        r.start_time = start;
        r
    }

    fn start_times(page: &Page) -> Vec<i64> {
        page.requests.iter().map(|r| r.start_time).collect()
    }

    #[test]
    fn requests_insert_sorted_by_start_time() {
        let mut page = Page::new();
        page.add_request(request_starting_at(300));
        page.add_request(request_starting_at(100));
        page.add_request(request_starting_at(200));
        page.add_request(request_starting_at(200));
        assert_eq!(start_times(&page), vec![100, 200, 200, 300]);
    }

    #[test]
    fn reposition_restores_order_after_backfill() {
        let mut page = Page::new();
        page.add_request(request_starting_at(100));
        page.add_request(request_starting_at(200));
        page.add_request(request_starting_at(300));
        // Backfill: the last request actually started first.
        page.requests[2].start_time = 50;
        let new_pos = page.reposition_request(2);
        assert_eq!(new_pos, 0);
        assert_eq!(start_times(&page), vec![50, 100, 200]);
    }

    #[test]
    fn first_request_sets_page_url() {
        let mut page = Page::new();
        let mut request = request_starting_at(10);
        request.set_url("https://example.com/");
        page.add_request(request);
        assert_eq!(page.url.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn unknown_net_error_is_none() {
        assert_eq!(PageError::from_net_error("net::ERR_SOMETHING_NEW"), None);
        assert_eq!(
            PageError::from_net_error("net::ERR_ABORTED"),
            Some(PageError::Aborted)
        );
    }

    #[test]
    fn load_time_requires_both_ends() {
        let mut page = Page::new();
        assert_eq!(page.load_time(), 0.0);
        page.nav_start_time = Some(1_000);
        page.nav_end_time = Some(3_500);
        assert!((page.load_time() - 2.5).abs() < f64::EPSILON);
    }
}
