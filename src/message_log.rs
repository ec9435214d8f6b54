use std::sync::Arc;

use log::debug;

use crate::error::ChatError;
use crate::messages::{clock_time, normalize_name, Message, MessageBody};
use crate::store::{DocId, Store, Stored};

/// Parses a raw `limit` value. Positivity is checked by [`MessageLog::list`].
pub fn parse_limit(raw: &str) -> Result<i64, ChatError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ChatError::InvalidArgument(format!("limit must be an integer, got '{raw}'")))
}

#[derive(Clone)]
pub struct MessageLog {
    store: Arc<Store>,
}

impl MessageLog {
    pub fn new(store: Arc<Store>) -> Self {
        MessageLog { store }
    }

    pub(crate) async fn append_status(&self, from: &str, text: &str) -> Result<DocId, ChatError> {
        let id = self.store.messages.insert(Message::status(from, text)).await?;
        debug!("status '{}' logged for {} as {}", text, from, id);
        Ok(id)
    }

    async fn ensure_active(&self, name: &str) -> Result<(), ChatError> {
        let found = self
            .store
            .participants
            .find_one(&|p| p.doc.name == name)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(ChatError::PreconditionFailed(format!(
                "'{name}' is not in the room"
            ))),
        }
    }

    pub async fn post(&self, from: &str, body: &MessageBody) -> Result<DocId, ChatError> {
        let from = normalize_name(from);
        self.ensure_active(from).await?;
        let content = body.validate()?;
        let id = self.store.messages.insert(Message::new(from, content)).await?;
        Ok(id)
    }

    /// Messages `viewer` may see in log order, keeping only the last `limit` of them.
    pub async fn list(
        &self,
        viewer: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Stored<Message>>, ChatError> {
        let viewer = normalize_name(viewer);
        let limit = match limit {
            Some(n) if n > 0 => Some(usize::try_from(n).unwrap_or(usize::MAX)),
            Some(n) => {
                return Err(ChatError::InvalidArgument(format!(
                    "limit must be positive, got {n}"
                )))
            }
            None => None,
        };

        let visible = self
            .store
            .messages
            .find_many(&|m| m.doc.is_visible_to(viewer))
            .await?;
        let skip = limit.map_or(0, |n| visible.len().saturating_sub(n));
        Ok(visible.into_iter().skip(skip).collect())
    }

    async fn find_owned(&self, id: DocId, owner: &str) -> Result<Stored<Message>, ChatError> {
        let message = self
            .store
            .messages
            .find_one(&|m| m.id == id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("message {id} does not exist")))?;
        if message.doc.from != owner {
            return Err(ChatError::Forbidden(format!(
                "message {id} does not belong to '{owner}'"
            )));
        }
        Ok(message)
    }

    pub async fn edit(&self, id: DocId, editor: &str, body: &MessageBody) -> Result<(), ChatError> {
        let editor = normalize_name(editor);
        self.find_owned(id, editor).await?;
        self.ensure_active(editor).await?;
        let content = body.validate()?;
        let time = clock_time();

        // the owner check is repeated inside the update so a concurrent delete cannot be overwritten
        let updated = self
            .store
            .messages
            .update_one(&|m| m.id == id && m.doc.from == editor, &|m| {
                m.to.clone_from(&content.to);
                m.text.clone_from(&content.text);
                m.kind = content.kind;
                m.time.clone_from(&time);
            })
            .await?;
        if !updated {
            return Err(ChatError::NotFound(format!("message {id} does not exist")));
        }
        Ok(())
    }

    pub async fn delete(&self, id: DocId, requester: &str) -> Result<(), ChatError> {
        let requester = normalize_name(requester);
        self.find_owned(id, requester).await?;
        let removed = self
            .store
            .messages
            .delete_one(&|m| m.id == id && m.doc.from == requester)
            .await?;
        if removed.is_none() {
            return Err(ChatError::NotFound(format!("message {id} does not exist")));
        }
        Ok(())
    }
}
