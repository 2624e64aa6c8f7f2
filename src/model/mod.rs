mod page;
mod request;
mod result;

pub use page::{ConsoleMessage, NavigationType, Page, PageError, PageState};
pub use request::{
    Flow, HttpHeader, HttpRequest, RequestState, ResourceType, WebSocketMessage,
    MAX_POST_DATA_LEN, MAX_WS_PAYLOAD_LEN,
};
pub use result::{OutputMessage, TestError, TestResult};

pub(crate) use request::truncate_utf8;
