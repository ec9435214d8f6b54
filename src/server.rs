use std::sync::Arc;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ChatError;
use crate::message_log::{parse_limit, MessageLog};
use crate::messages::{Message, MessageBody, Participant};
use crate::presence::PresenceRegistry;
use crate::store::{DocId, Store, Stored};

/// Every action a client can take, over one shared store.
#[derive(Clone)]
pub struct Server {
    registry: PresenceRegistry,
    log: MessageLog,
}

impl Server {
    pub fn new(store: Arc<Store>) -> Self {
        let log = MessageLog::new(Arc::clone(&store));
        let registry = PresenceRegistry::new(store, log.clone());
        Server { registry, log }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub async fn join(&self, name: &str) -> Result<(), ChatError> {
        report("join", self.registry.join(name).await)
    }

    pub async fn list_participants(&self) -> Result<Vec<Participant>, ChatError> {
        report("list participants", self.registry.list().await)
    }

    pub async fn heartbeat(&self, name: &str) -> Result<(), ChatError> {
        debug!("heartbeat from {}", name);
        report("heartbeat", self.registry.heartbeat(name).await)
    }

    pub async fn post_message(&self, from: &str, body: &MessageBody) -> Result<DocId, ChatError> {
        let id = report("post message", self.log.post(from, body).await)?;
        info!("{} posted message {}", from, id);
        Ok(id)
    }

    /// `limit` is the raw client value, if any.
    pub async fn list_messages(
        &self,
        viewer: &str,
        limit: Option<&str>,
    ) -> Result<Vec<Stored<Message>>, ChatError> {
        let limit = match limit {
            Some(raw) => Some(report("list messages", parse_limit(raw))?),
            None => None,
        };
        report("list messages", self.log.list(viewer, limit).await)
    }

    pub async fn edit_message(
        &self,
        id: &str,
        editor: &str,
        body: &MessageBody,
    ) -> Result<(), ChatError> {
        let id = report("edit message", parse_id(id))?;
        report("edit message", self.log.edit(id, editor, body).await)?;
        info!("{} edited message {}", editor, id);
        Ok(())
    }

    pub async fn delete_message(&self, id: &str, requester: &str) -> Result<(), ChatError> {
        let id = report("delete message", parse_id(id))?;
        report("delete message", self.log.delete(id, requester).await)?;
        info!("{} deleted message {}", requester, id);
        Ok(())
    }
}

/// Ids that do not parse cannot name a stored message.
fn parse_id(raw: &str) -> Result<DocId, ChatError> {
    Uuid::parse_str(raw).map_err(|_| ChatError::NotFound(format!("message {raw} does not exist")))
}

fn report<T>(action: &str, result: Result<T, ChatError>) -> Result<T, ChatError> {
    if let Err(e) = &result {
        match e {
            ChatError::Unavailable(cause) => error!("{} failed: {}", action, cause),
            other => warn!("{} rejected: {}", action, other),
        }
    }
    result
}
