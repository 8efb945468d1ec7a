//! GATT peripheral core: service table, advertising, event decoding,
//! connection tracking, the attribute server and the command mailbox.

pub mod advertising;
pub mod command;
pub mod connections;
pub mod events;
pub mod server;
pub mod service;
