//! Remote control for an 8-pixel LED strip over a tiny JSON-over-TCP
//! protocol. One server process owns the hardware; clients perform one
//! command per connection and get a short textual status back.

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod strip;
