// Reconstructs a queryable model of a browser run (pages, requests,
// console output, WebSocket traffic, video frames) from the raw
// remote-debugging event stream.

pub mod error;
pub mod model;
pub mod observer;
pub mod protocol;
pub mod recorder;
pub mod timing;
pub mod video;
