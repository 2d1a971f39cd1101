//! Assistant integration for the idea board: mention detection, context
//! assembly, model invocation (subprocess or HTTP gateway), and parsing of
//! proposed board mutations.

pub mod actions;
pub mod board;
pub mod brainstorm;
pub mod config;
pub mod context;
pub mod database;
pub mod http_client;
pub mod invocation;
pub mod mention;
pub mod prompt;
pub mod server;
pub mod subprocess;
