//! Chat relay core: session bookkeeping, the slash-command protocol, and
//! fan-out of lines to connected sessions.

pub mod broadcast;
pub mod codec;
pub mod command;
pub mod config;
pub mod directory;
pub mod journal;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod server;
