//! NATS unread-alert subscription: folds key-value updates into snapshots

use crate::error::{AlertError, Result};
use crate::provider::{AlertSubscription, SubscriberGuard};
use crate::schema;
use crate::types::{AlertSnapshot, SecurityAlert};
use async_nats::jetstream::kv;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;

/// Key-value updates as delivered by the bucket watcher
pub(crate) type EntryStream = BoxStream<'static, std::result::Result<kv::Entry, String>>;

/// Live feed over a NATS key-value bucket
///
/// Keeps a local mirror of the bucket and emits the unread set whenever
/// an update changes it. Dropping the subscription drops the watcher,
/// which removes its consumer on the server.
pub struct NatsSubscription {
    updates: EntryStream,
    alerts: HashMap<String, SecurityAlert>,
    revisions: HashMap<String, u64>,
    revision: u64,
    primed: bool,
    done: bool,
    _guard: SubscriberGuard,
}

impl NatsSubscription {
    pub(crate) fn new(
        updates: EntryStream,
        initial: HashMap<String, (SecurityAlert, u64)>,
        guard: SubscriberGuard,
    ) -> Self {
        let mut alerts = HashMap::with_capacity(initial.len());
        let mut revisions = HashMap::with_capacity(initial.len());
        for (key, (alert, revision)) in initial {
            revisions.insert(key.clone(), revision);
            alerts.insert(key, alert);
        }

        Self {
            updates,
            alerts,
            revisions,
            revision: 0,
            primed: false,
            done: false,
            _guard: guard,
        }
    }

    fn snapshot(&mut self) -> AlertSnapshot {
        self.revision += 1;
        AlertSnapshot::from_alerts(self.revision, self.alerts.values())
    }

    /// Fold one update into the mirror; true if the unread set changed
    fn apply(&mut self, entry: kv::Entry) -> Result<bool> {
        if self
            .revisions
            .get(&entry.key)
            .is_some_and(|known| *known >= entry.revision)
        {
            return Ok(false);
        }
        self.revisions.insert(entry.key.clone(), entry.revision);

        let before = self.alerts.get(&entry.key).filter(|a| !a.read).cloned();

        match entry.operation {
            kv::Operation::Put => {
                let alert = schema::decode_alert_bytes(&entry.key, &entry.value)?;
                self.alerts.insert(entry.key.clone(), alert);
            }
            kv::Operation::Delete | kv::Operation::Purge => {
                tracing::warn!(alert_id = %entry.key, "Alert removed from store");
                self.alerts.remove(&entry.key);
            }
        }

        let after = self.alerts.get(&entry.key).filter(|a| !a.read);
        Ok(before.as_ref() != after)
    }
}

#[async_trait]
impl AlertSubscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<AlertSnapshot>> {
        if self.done {
            return Ok(None);
        }

        if !self.primed {
            self.primed = true;
            return Ok(Some(self.snapshot()));
        }

        loop {
            let entry = match self.updates.next().await {
                Some(Ok(entry)) => entry,
                Some(Err(reason)) => {
                    self.done = true;
                    return Err(super::client::classify("alert watch", reason));
                }
                None => {
                    self.done = true;
                    return Err(AlertError::Connection(
                        "alert watch closed by server".to_string(),
                    ));
                }
            };

            match self.apply(entry) {
                Ok(true) => return Ok(Some(self.snapshot())),
                Ok(false) => continue,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
    }
}
