pub mod config;
pub mod constants;
pub mod credentials;
pub mod dispatcher;
pub mod history;
pub mod message;
pub mod session;
pub mod stream_parser;
pub mod transport;
pub mod voice;
