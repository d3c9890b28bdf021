pub mod adapter;
pub mod app;
pub mod channel;
pub mod error;
pub mod namespace;
pub mod options;
pub mod presence;
pub mod protocol;
pub mod quota;
pub mod websocket;
