//! Polling bot loop.
//!
//! Pulls one batch of updates at a time from a [`ChatPlatform`], groups
//! it by chat, and hands each chat's messages to the [`Orchestrator`] in
//! arrival order.  Distinct chats run concurrently.  The offset only
//! moves past an update once it has been fully handled, so a crash or
//! shutdown mid-batch redelivers the rest (at-least-once).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::Orchestrator;
use crate::comm::{ChatPlatform, Update};

/// Sent to a chat when its message could not be answered.
pub const FAILURE_NOTICE: &str = "Sorry, something went wrong while answering that message.";

/// Result of processing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Updates fully handled, in ascending id order.
    pub handled: Vec<i64>,
    /// Updates left for redelivery (not started before shutdown).
    pub deferred: Vec<i64>,
}

/// The long-poll loop for one platform and one agent.
pub struct BotLoop {
    platform: Arc<dyn ChatPlatform>,
    orchestrator: Arc<Orchestrator>,
    poll_timeout: Duration,
    retry_delay: Duration,
    offset: i64,
}

impl BotLoop {
    pub fn new(platform: Arc<dyn ChatPlatform>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            platform,
            orchestrator,
            poll_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
            offset: 0,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Next update id the loop will ask for.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Run until `cancel` fires.  In-flight messages finish; no new
    /// message starts after cancellation is observed.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(platform = self.platform.name(), "bot loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.platform.fetch_updates(self.offset, self.poll_timeout) => r,
            };
            match fetched {
                Ok(updates) => {
                    self.process_batch(updates, &cancel).await;
                }
                Err(e) => {
                    warn!(error = %e, delay_secs = self.retry_delay.as_secs_f64(), "fetching updates failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
        info!(offset = self.offset, "bot loop stopped");
    }

    /// Fetch and process a single batch.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> anyhow::Result<BatchOutcome> {
        let updates = self
            .platform
            .fetch_updates(self.offset, self.poll_timeout)
            .await?;
        Ok(self.process_batch(updates, cancel).await)
    }

    /// Handle `updates` and advance the offset.
    pub async fn process_batch(
        &mut self,
        updates: Vec<Update>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        if updates.is_empty() {
            return BatchOutcome::default();
        }
        let all: Vec<i64> = updates.iter().map(|u| u.update_id).collect();

        let mut tasks: Vec<(Vec<i64>, JoinHandle<Vec<i64>>)> = Vec::new();
        for group in group_by_chat(updates) {
            let ids = group.iter().map(|u| u.update_id).collect();
            let platform = Arc::clone(&self.platform);
            let orchestrator = Arc::clone(&self.orchestrator);
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                let mut handled = Vec::with_capacity(group.len());
                for update in group {
                    if cancel.is_cancelled() {
                        debug!(update_id = update.update_id, "shutdown observed, deferring update");
                        break;
                    }
                    handle_update(platform.as_ref(), &orchestrator, &update).await;
                    handled.push(update.update_id);
                }
                handled
            });
            tasks.push((ids, handle));
        }

        let mut handled = BTreeSet::new();
        for (ids, task) in tasks {
            match task.await {
                Ok(done) => handled.extend(done),
                Err(e) => {
                    // A panicking handler must not wedge the loop on
                    // redelivery of the same update.
                    error!(error = %e, updates = ?ids, "chat task panicked, skipping its updates");
                    handled.extend(ids);
                }
            }
        }

        self.offset = next_offset(self.offset, &all, &handled);
        let deferred: Vec<i64> = all.iter().copied().filter(|id| !handled.contains(id)).collect();
        debug!(offset = self.offset, handled = handled.len(), deferred = deferred.len(), "batch processed");
        BatchOutcome {
            handled: handled.into_iter().collect(),
            deferred,
        }
    }
}

/// Split a batch into per-chat groups, keeping arrival order inside each
/// group and ordering groups by first appearance.
pub fn group_by_chat(updates: Vec<Update>) -> Vec<Vec<Update>> {
    let mut groups: Vec<Vec<Update>> = Vec::new();
    for update in updates {
        match groups.iter_mut().find(|g| g[0].chat_id == update.chat_id) {
            Some(group) => group.push(update),
            None => groups.push(vec![update]),
        }
    }
    groups
}

/// Offset after a batch: the smallest unhandled id if any remain,
/// otherwise one past the largest id seen.
pub fn next_offset(current: i64, all: &[i64], handled: &BTreeSet<i64>) -> i64 {
    let unhandled = all.iter().copied().filter(|id| !handled.contains(id)).min();
    match (unhandled, all.iter().copied().max()) {
        (Some(first_pending), _) => first_pending.max(current),
        (None, Some(max)) => (max + 1).max(current),
        (None, None) => current,
    }
}

/// Answer one update.  Failures are reported to the chat, never retried.
async fn handle_update(platform: &dyn ChatPlatform, orchestrator: &Orchestrator, update: &Update) {
    let Some(text) = update.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        debug!(update_id = update.update_id, "skipping non-text update");
        return;
    };
    let conv = orchestrator.router().conversation(update.chat_id);

    if let Err(e) = platform.send_typing(update.chat_id).await {
        debug!(chat = update.chat_id, error = %e, "typing indicator failed");
    }

    let reply = match orchestrator.handle_input(&conv, text).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(chat = update.chat_id, error = %e, "failed to answer message");
            FAILURE_NOTICE.to_string()
        }
    };
    if let Err(e) = platform.send_message(update.chat_id, &reply).await {
        warn!(chat = update.chat_id, error = %e, "failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upd(update_id: i64, chat_id: i64) -> Update {
        Update {
            update_id,
            chat_id,
            text: Some(format!("m{update_id}")),
        }
    }

    #[test]
    fn groups_keep_arrival_order() {
        let groups = group_by_chat(vec![upd(1, 10), upd(2, 20), upd(3, 10), upd(4, 30)]);
        let ids: Vec<Vec<i64>> = groups
            .iter()
            .map(|g| g.iter().map(|u| u.update_id).collect())
            .collect();
        assert_eq!(ids, vec![vec![1, 3], vec![2], vec![4]]);
    }

    #[test]
    fn offset_advances_past_handled_batch() {
        let handled: BTreeSet<i64> = [5, 6, 7].into_iter().collect();
        assert_eq!(next_offset(5, &[5, 6, 7], &handled), 8);
    }

    #[test]
    fn offset_stops_at_first_unhandled() {
        let handled: BTreeSet<i64> = [5, 7].into_iter().collect();
        assert_eq!(next_offset(5, &[5, 6, 7], &handled), 6);
    }

    #[test]
    fn empty_batch_keeps_offset() {
        assert_eq!(next_offset(9, &[], &BTreeSet::new()), 9);
    }
}
