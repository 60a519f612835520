pub mod error;
pub mod models;

pub use error::MqError;
pub use models::{
    BrokerMessage, BroccoliError, MqConfig, MqQueue, init_mq, publish_message, publish_messages,
};

pub type Mq = MqQueue;
