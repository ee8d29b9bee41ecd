//! External channel listener: Redis pub/sub → subscriber fan-out.
//!
//! Optional integration path for backends that publish bid updates to a
//! Redis topic instead of calling the HTTP control endpoint. Payloads
//! received here are relayed raw, without envelope unwrapping.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::broadcast::Broadcaster;

/// The one topic the relay subscribes to.
pub const CHANNEL_TOPIC: &str = "bid_updates";

const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Failures of the external channel subscription.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("subscription stream ended")]
    StreamEnded,
}

/// Spawn the supervised listener task.
///
/// Connect and subscribe failures do not crash the process: the task
/// retries with capped exponential backoff while the HTTP path keeps
/// serving. A successful subscription resets the backoff.
pub fn spawn_listener(
    redis_url: String,
    broadcaster: Arc<Broadcaster>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = BASE_RECONNECT_DELAY;
        loop {
            match open_subscription(&redis_url).await {
                Ok(pubsub) => {
                    tracing::info!(topic = CHANNEL_TOPIC, "Subscribed to external channel");
                    delay = BASE_RECONNECT_DELAY;
                    if let Err(err) = relay_messages(pubsub, &broadcaster).await {
                        tracing::warn!(error = %err, "External channel stream failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        retry_in_secs = delay.as_secs(),
                        "External channel connect failed"
                    );
                }
            }
            tokio::time::sleep(delay).await;
            delay = next_delay(delay);
        }
    })
}

async fn open_subscription(redis_url: &str) -> Result<redis::aio::PubSub, ChannelError> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(CHANNEL_TOPIC).await?;
    Ok(pubsub)
}

/// Forward every received payload to the broadcaster, verbatim.
async fn relay_messages(
    mut pubsub: redis::aio::PubSub,
    broadcaster: &Broadcaster,
) -> Result<(), ChannelError> {
    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = msg.get_payload()?;
        let delivered = broadcaster.broadcast_raw(&payload);
        tracing::debug!(delivered, "Relayed external channel message");
    }
    Err(ChannelError::StreamEnded)
}

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_RECONNECT_DELAY)
}
