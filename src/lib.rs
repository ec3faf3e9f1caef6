//! NetBots battle server
//!
//! Robots and spectators talk to the server over UDP with MessagePack
//! datagrams. The server owns the world and advances it one fixed step at
//! a time, answering requests between steps.

pub mod config;
pub mod game;
pub mod net;
pub mod server;
pub mod util;
