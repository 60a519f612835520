pub use broccoli_queue::{brokers::broker::BrokerMessage, error::BroccoliError, queue::BroccoliQueue};
use common::mq::Message;
use tracing::debug;

use crate::error::MqError;

pub type MqQueue = BroccoliQueue;

pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
}

pub async fn init_mq(config: MqConfig) -> Result<MqQueue, MqError> {
    BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .build()
        .await
        .map_err(MqError::from)
}

/// Publish a single typed message. Returns once the broker has accepted it.
pub async fn publish_message<M: Message>(
    mq: &MqQueue,
    queue: &str,
    message: &M,
) -> Result<(), MqError> {
    mq.publish(queue, None, message, None)
        .await
        .map_err(|e| MqError::Publish {
            queue: queue.to_string(),
            message_type: M::message_type(),
            reason: e.to_string(),
        })?;
    debug!(
        queue,
        message_type = M::message_type(),
        message_id = message.message_id(),
        "Published message"
    );
    Ok(())
}

/// Publish several messages in one broker round trip.
///
/// An error means none of the messages should be considered delivered.
pub async fn publish_messages<M: Message>(
    mq: &MqQueue,
    queue: &str,
    messages: Vec<M>,
) -> Result<(), MqError> {
    let count = messages.len();
    if count == 0 {
        return Ok(());
    }
    mq.publish_batch(queue, None, messages, None)
        .await
        .map_err(|e| MqError::Publish {
            queue: queue.to_string(),
            message_type: M::message_type(),
            reason: e.to_string(),
        })?;
    debug!(queue, message_type = M::message_type(), count, "Published batch");
    Ok(())
}
