//! Redis pub/sub listener for cross-process cache eviction.
//!
//! One channel per concern:
//!   cache:personality:<personalityId>
//!   cache:llm-config:<userId>            (admin as wildcard)
//!   cache:config-cascade:{user|channel|personality|admin}:<id>
//!   cache:api-key:<userId>

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::resolver::LlmConfigResolver;

/// Eviction surface shared by every resolver cache in this process.
pub trait CacheInvalidate: Send + Sync {
    fn invalidate_user(&self, user_id: &str);
    fn invalidate_channel(&self, channel_id: &str);
    fn invalidate_personality(&self, personality_id: &str);
    fn invalidate_all(&self);
}

impl CacheInvalidate for LlmConfigResolver {
    fn invalidate_user(&self, user_id: &str) {
        LlmConfigResolver::invalidate_user(self, user_id)
    }
    fn invalidate_channel(&self, channel_id: &str) {
        LlmConfigResolver::invalidate_channel(self, channel_id)
    }
    fn invalidate_personality(&self, personality_id: &str) {
        LlmConfigResolver::invalidate_personality(self, personality_id)
    }
    fn invalidate_all(&self) {
        LlmConfigResolver::invalidate_all(self)
    }
}

/// Parsed eviction target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eviction {
    User(String),
    Channel(String),
    Personality(String),
    All,
}

/// Map a pub/sub channel name to the eviction it requests.
/// Unknown channels evict nothing.
pub fn parse_channel(channel: &str) -> Option<Eviction> {
    let rest = channel.strip_prefix("cache:")?;
    let (concern, id) = rest.split_once(':')?;
    match concern {
        "personality" => Some(Eviction::Personality(id.to_string())),
        "llm-config" | "api-key" => {
            if id == "admin" {
                Some(Eviction::All)
            } else {
                Some(Eviction::User(id.to_string()))
            }
        }
        "config-cascade" => {
            let (tier, id) = id.split_once(':').unwrap_or((id, ""));
            match tier {
                "user" => Some(Eviction::User(id.to_string())),
                "channel" => Some(Eviction::Channel(id.to_string())),
                "personality" => Some(Eviction::Personality(id.to_string())),
                "admin" => Some(Eviction::All),
                _ => None,
            }
        }
        _ => None,
    }
}

fn apply(sinks: &[Arc<dyn CacheInvalidate>], eviction: &Eviction) {
    for sink in sinks {
        match eviction {
            Eviction::User(id) => sink.invalidate_user(id),
            Eviction::Channel(id) => sink.invalidate_channel(id),
            Eviction::Personality(id) => sink.invalidate_personality(id),
            Eviction::All => sink.invalidate_all(),
        }
    }
}

/// Subscribe to `cache:*` and evict from every registered cache until
/// shutdown.
pub async fn run_invalidation_listener(
    client: redis::Client,
    sinks: Vec<Arc<dyn CacheInvalidate>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pubsub = match client.get_async_pubsub().await {
        Ok(ps) => ps,
        Err(e) => {
            warn!(err = %e, "cache invalidation listener failed to connect");
            return;
        }
    };
    if let Err(e) = pubsub.psubscribe("cache:*").await {
        warn!(err = %e, "psubscribe failed");
        return;
    }
    info!("cache invalidation listener started");

    let mut stream = pubsub.on_message();
    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(msg) = msg else { break };
                let channel = msg.get_channel_name().to_string();
                match parse_channel(&channel) {
                    Some(eviction) => {
                        debug!(%channel, ?eviction, "cache invalidation received");
                        apply(&sinks, &eviction);
                    }
                    None => debug!(%channel, "unrecognized invalidation channel"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("cache invalidation listener shutting down");
                    break;
                }
            }
        }
    }
}
