use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::ChatError;
use crate::message_log::MessageLog;
use crate::messages::{normalize_name, now_millis, Participant, ENTERED_TEXT, LEFT_TEXT};
use crate::store::{Store, Stored};

#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<Store>,
    log: MessageLog,
}

impl PresenceRegistry {
    pub fn new(store: Arc<Store>, log: MessageLog) -> Self {
        PresenceRegistry { store, log }
    }

    pub async fn join(&self, name: &str) -> Result<(), ChatError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(ChatError::InvalidArgument("name must not be empty".to_string()));
        }

        let inserted = self
            .store
            .participants
            .insert_unique(Participant::new(name, now_millis()), &|p| p.doc.name == name)
            .await?;
        if inserted.is_none() {
            return Err(ChatError::Conflict(format!("'{name}' is already in the room")));
        }

        if let Err(err) = self.log.append_status(name, ENTERED_TEXT).await {
            // a join without its announcement does not count
            let undo = self.store.participants.delete_one(&|p| p.doc.name == name).await;
            if let Err(undo_err) = undo {
                error!("could not undo join of {}: {}", name, undo_err);
            }
            return Err(err);
        }
        info!("{} entered the room", name);
        Ok(())
    }

    pub async fn heartbeat(&self, name: &str) -> Result<(), ChatError> {
        let name = normalize_name(name);
        let now = now_millis();
        let updated = self
            .store
            .participants
            .update_one(&|p| p.doc.name == name, &|p| p.last_seen = now)
            .await?;
        if !updated {
            return Err(ChatError::NotFound(format!("'{name}' is not in the room")));
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Participant>, ChatError> {
        let participants = self.store.participants.find_many(&|_| true).await?;
        Ok(participants.into_iter().map(|p| p.doc).collect())
    }

    /// Evicts everyone idle for at least `timeout` as of `now` (epoch ms) and
    /// logs one "left" status per eviction. Returns the evicted names.
    ///
    /// Each removal is conditional on the participant still being stale, so a
    /// heartbeat that lands before the removal keeps them in. If the status
    /// append fails the participant is put back and the error is returned;
    /// evictions already made in this pass stay in place.
    pub async fn sweep(&self, now: i64, timeout: Duration) -> Result<Vec<String>, ChatError> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let is_stale =
            |p: &Stored<Participant>| now.saturating_sub(p.doc.last_seen) >= timeout_ms;

        let stale = self.store.participants.find_many(&is_stale).await?;
        if stale.is_empty() {
            debug!("sweep found no idle participants");
            return Ok(Vec::new());
        }

        let mut evicted = Vec::with_capacity(stale.len());
        for candidate in stale {
            let name = candidate.doc.name;
            let removed = self
                .store
                .participants
                .delete_one(&|p| p.doc.name == name && is_stale(p))
                .await?;
            let Some(removed) = removed else {
                debug!("{} came back before eviction", name);
                continue;
            };

            if let Err(err) = self.log.append_status(&name, LEFT_TEXT).await {
                let restored = self
                    .store
                    .participants
                    .insert_unique(removed.doc, &|p| p.doc.name == name)
                    .await;
                match restored {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!(
                        "{} rejoined during a failed eviction, old entry not restored",
                        name
                    ),
                    Err(restore_err) => {
                        error!("could not restore {} after failed eviction: {}", name, restore_err);
                    }
                }
                return Err(err);
            }

            info!("{} timed out and left the room", name);
            evicted.push(name);
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures_util::future::join_all;

    use super::*;
    use crate::messages::{Message, MessageBody, MessageKind, BROADCAST};
    use crate::store::testing::FlakyCollection;
    use crate::store::{Collection, DocId, Filter, MemoryCollection, Patch, StoreError};

    /// What happens to a participant while the sweep is about to remove it.
    enum OnDelete {
        /// A heartbeat at this time lands just before the removal.
        Heartbeat(i64),
        /// The same name joins again, at this time, right after the removal.
        Rejoin(i64),
    }

    struct RacingParticipants {
        inner: MemoryCollection<Participant>,
        on_delete: OnDelete,
    }

    impl RacingParticipants {
        fn new(on_delete: OnDelete) -> Self {
            RacingParticipants {
                inner: MemoryCollection::new(),
                on_delete,
            }
        }
    }

    #[async_trait]
    impl Collection<Participant> for RacingParticipants {
        async fn insert(&self, doc: Participant) -> Result<DocId, StoreError> {
            self.inner.insert(doc).await
        }

        async fn insert_unique(
            &self,
            doc: Participant,
            conflict: Filter<'_, Participant>,
        ) -> Result<Option<DocId>, StoreError> {
            self.inner.insert_unique(doc, conflict).await
        }

        async fn find_one(
            &self,
            filter: Filter<'_, Participant>,
        ) -> Result<Option<Stored<Participant>>, StoreError> {
            self.inner.find_one(filter).await
        }

        async fn find_many(
            &self,
            filter: Filter<'_, Participant>,
        ) -> Result<Vec<Stored<Participant>>, StoreError> {
            self.inner.find_many(filter).await
        }

        async fn update_one(
            &self,
            filter: Filter<'_, Participant>,
            patch: Patch<'_, Participant>,
        ) -> Result<bool, StoreError> {
            self.inner.update_one(filter, patch).await
        }

        async fn delete_one(
            &self,
            filter: Filter<'_, Participant>,
        ) -> Result<Option<Stored<Participant>>, StoreError> {
            match self.on_delete {
                OnDelete::Heartbeat(at) => {
                    self.inner.update_one(&|_| true, &|p| p.last_seen = at).await?;
                    self.inner.delete_one(filter).await
                }
                OnDelete::Rejoin(at) => {
                    let removed = self.inner.delete_one(filter).await?;
                    if let Some(old) = &removed {
                        self.inner.insert(Participant::new(old.doc.name.clone(), at)).await?;
                    }
                    Ok(removed)
                }
            }
        }

        async fn delete_many(&self, filter: Filter<'_, Participant>) -> Result<usize, StoreError> {
            self.inner.delete_many(filter).await
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn registry_over(store: Arc<Store>) -> PresenceRegistry {
        PresenceRegistry::new(Arc::clone(&store), MessageLog::new(store))
    }

    fn registry() -> (PresenceRegistry, Arc<Store>) {
        let store = Arc::new(Store::in_memory());
        (registry_over(Arc::clone(&store)), store)
    }

    async fn statuses(store: &Store, text: &str) -> Vec<Message> {
        store
            .messages
            .find_many(&|m| m.doc.kind == MessageKind::Status && m.doc.text == text)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.doc)
            .collect()
    }

    async fn set_last_seen(store: &Store, name: &str, last_seen: i64) {
        store
            .participants
            .update_one(&|p| p.doc.name == name, &|p| p.last_seen = last_seen)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn join_registers_and_announces() {
        let (registry, store) = registry();
        registry.join("alice").await.unwrap();

        let names: Vec<String> = registry.list().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alice"]);
        let entered = statuses(&store, ENTERED_TEXT).await;
        assert_eq!(entered.len(), 1);
        assert_eq!(entered[0].from, "alice");
        assert_eq!(entered[0].to, "Todos");
    }

    #[tokio::test]
    async fn join_rejects_duplicates_and_blank_names() {
        let (registry, _) = registry();
        registry.join("alice").await.unwrap();
        assert!(matches!(registry.join("alice").await, Err(ChatError::Conflict(_))));
        assert!(matches!(registry.join("  ").await, Err(ChatError::InvalidArgument(_))));
        // names are case sensitive
        registry.join("Alice").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_joins_admit_exactly_one() {
        let (registry, store) = registry();
        let attempts = (0..20).map(|_| {
            let registry = registry.clone();
            async move { registry.join("alice").await }
        });
        let results = join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ChatError::Conflict(_))));
        assert_eq!(registry.list().await.unwrap().len(), 1);
        assert_eq!(statuses(&store, ENTERED_TEXT).await.len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_refreshes_last_seen() {
        let (registry, store) = registry();
        registry.join("alice").await.unwrap();
        set_last_seen(&store, "alice", 0).await;

        registry.heartbeat("alice").await.unwrap();
        registry.heartbeat("alice").await.unwrap();
        let participants = registry.list().await.unwrap();
        assert!(participants[0].last_seen > 0);

        assert!(matches!(registry.heartbeat("bob").await, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn sweep_evicts_idle_participants_once() {
        let (registry, store) = registry();
        registry.join("alice").await.unwrap();
        registry.join("bob").await.unwrap();
        let now = now_millis();
        let threshold = i64::try_from(TIMEOUT.as_millis()).unwrap();
        set_last_seen(&store, "alice", now - (threshold + 1)).await;
        set_last_seen(&store, "bob", now).await;

        let evicted = registry.sweep(now, TIMEOUT).await.unwrap();
        assert_eq!(evicted, vec!["alice"]);

        let names: Vec<String> = registry.list().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["bob"]);
        let left = statuses(&store, LEFT_TEXT).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].from, "alice");

        // a second pass has nothing more to do for alice
        assert!(registry.sweep(now, TIMEOUT).await.unwrap().is_empty());
        assert_eq!(statuses(&store, LEFT_TEXT).await.len(), 1);
    }

    #[tokio::test]
    async fn sweep_with_nobody_idle_changes_nothing() {
        let (busy, store) = registry();
        busy.join("alice").await.unwrap();
        let before = store.messages.find_many(&|_| true).await.unwrap().len();

        let evicted = busy.sweep(now_millis(), TIMEOUT).await.unwrap();
        assert!(evicted.is_empty());
        assert_eq!(store.messages.find_many(&|_| true).await.unwrap().len(), before);
        assert_eq!(busy.list().await.unwrap().len(), 1);

        let (empty, store) = registry();
        assert!(empty.sweep(now_millis(), TIMEOUT).await.unwrap().is_empty());
        assert!(store.messages.find_many(&|_| true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_status_append_keeps_the_participant() {
        let messages = Arc::new(FlakyCollection::<Message>::new());
        let store = Arc::new(Store::new(
            MemoryCollection::<Participant>::new(),
            Arc::clone(&messages),
        ));
        let registry = registry_over(Arc::clone(&store));
        registry.join("alice").await.unwrap();
        set_last_seen(&store, "alice", 0).await;

        messages.set_failing(true);
        assert!(matches!(
            registry.sweep(now_millis(), TIMEOUT).await,
            Err(ChatError::Unavailable(_))
        ));
        assert_eq!(registry.list().await.unwrap().len(), 1);
        assert!(statuses(&store, LEFT_TEXT).await.is_empty());

        messages.set_failing(false);
        assert_eq!(registry.sweep(now_millis(), TIMEOUT).await.unwrap(), vec!["alice"]);
        assert!(registry.list().await.unwrap().is_empty());
        assert_eq!(statuses(&store, LEFT_TEXT).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_announcement_undoes_the_join() {
        let messages = Arc::new(FlakyCollection::<Message>::new());
        let store = Arc::new(Store::new(
            MemoryCollection::<Participant>::new(),
            Arc::clone(&messages),
        ));
        let registry = registry_over(store);

        messages.set_failing(true);
        assert!(matches!(registry.join("alice").await, Err(ChatError::Unavailable(_))));
        assert!(registry.list().await.unwrap().is_empty());

        messages.set_failing(false);
        registry.join("alice").await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_just_before_removal_keeps_the_participant() {
        let now = now_millis();
        let store = Arc::new(Store::new(
            RacingParticipants::new(OnDelete::Heartbeat(now)),
            MemoryCollection::<Message>::new(),
        ));
        let registry = registry_over(Arc::clone(&store));
        registry.join("alice").await.unwrap();
        set_last_seen(&store, "alice", 0).await;

        let evicted = registry.sweep(now, TIMEOUT).await.unwrap();
        assert!(evicted.is_empty());
        let participants = registry.list().await.unwrap();
        assert_eq!(participants, vec![Participant::new("alice", now)]);
        assert!(statuses(&store, LEFT_TEXT).await.is_empty());
    }

    #[tokio::test]
    async fn rejoin_during_failed_eviction_is_not_overwritten() {
        let now = now_millis();
        let messages = Arc::new(FlakyCollection::<Message>::new());
        let store = Arc::new(Store::new(
            RacingParticipants::new(OnDelete::Rejoin(now)),
            Arc::clone(&messages),
        ));
        let registry = registry_over(Arc::clone(&store));
        registry.join("alice").await.unwrap();
        set_last_seen(&store, "alice", 0).await;

        messages.set_failing(true);
        assert!(matches!(
            registry.sweep(now, TIMEOUT).await,
            Err(ChatError::Unavailable(_))
        ));
        // only the fresh entry survives, never both
        assert_eq!(registry.list().await.unwrap(), vec![Participant::new("alice", now)]);
        assert!(statuses(&store, LEFT_TEXT).await.is_empty());
    }

    #[tokio::test]
    async fn names_are_trimmed_at_every_entry_point() {
        let (registry, store) = registry();
        registry.join(" alice ").await.unwrap();
        registry.heartbeat("alice  ").await.unwrap();

        let log = MessageLog::new(Arc::clone(&store));
        let id = log
            .post(" alice", &MessageBody::new(BROADCAST, "hi", "message"))
            .await
            .unwrap();
        log.edit(id, "alice ", &MessageBody::new(BROADCAST, "hello", "message"))
            .await
            .unwrap();
        log.delete(id, "\talice").await.unwrap();
        assert!(matches!(registry.join("alice").await, Err(ChatError::Conflict(_))));
    }
}
