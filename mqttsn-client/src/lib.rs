#[macro_use]
extern crate log;

mod client;
mod topics;

pub use self::client::{Client, ClientState, GatewayInfo};
pub use self::topics::{PubTopic, SubTopic};
