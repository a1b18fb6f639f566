#[macro_use]
extern crate log;

mod broker;
mod gateway;
mod instance;
mod registry;

pub use self::broker::BrokerClient;
pub use self::gateway::Gateway;
pub use self::instance::{ClientInstance, InstanceStatus};
pub use self::registry::{TopicMapping, TopicRegistry};
