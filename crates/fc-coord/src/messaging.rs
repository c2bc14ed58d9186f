//! Multi-recipient chats with per-recipient read watermarks.
//!
//! Keys for chat `id`:
//!
//! | key             | kind        | contents                          |
//! |-----------------|-------------|-----------------------------------|
//! | `ids:chat:`     | counter     | last chat id handed out           |
//! | `chat:<id>`     | ordered set | participant → last-seen message id |
//! | `seen:<user>`   | ordered set | chat id → last-seen message id    |
//! | `msgs:<id>`     | ordered set | message JSON → message id         |
//! | `ids:<id>`      | counter     | last message id in the chat       |
//!
//! A message is pruned once every participant's watermark has reached it.

use std::collections::BTreeSet;

use fc_config::CoordConfig;
use fc_runtime::{Batch, Commands, Reply, ScoreBound, StoreAdapter, StoreError, unix_time_ms};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoordError, Result};
use crate::lock::{acquire_on, release_on};
use crate::optimistic::{RetryPolicy, TxnOutcome, exec_atomic, run_optimistic, take_reply};

pub type ChatId = i64;

const CHAT_IDS_KEY: &str = "ids:chat:";

#[must_use]
pub fn roster_key(chat_id: ChatId) -> String {
    format!("chat:{chat_id}")
}

#[must_use]
pub fn seen_key(user: &str) -> String {
    format!("seen:{user}")
}

#[must_use]
pub fn messages_key(chat_id: ChatId) -> String {
    format!("msgs:{chat_id}")
}

#[must_use]
pub fn message_ids_key(chat_id: ChatId) -> String {
    format!("ids:{chat_id}")
}

#[allow(clippy::cast_precision_loss)]
fn id_score(id: i64) -> f64 {
    id as f64
}

#[allow(clippy::cast_possible_truncation)]
fn score_id(score: f64) -> i64 {
    score as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    /// Send time, ms since the Unix epoch.
    pub timestamp: u64,
    pub sender: String,
    pub body: String,
}

/// New messages in one chat, ascending by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessages {
    pub chat_id: ChatId,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug)]
pub struct Messaging<A> {
    conn: A,
    config: CoordConfig,
}

impl<A: StoreAdapter> Messaging<A> {
    pub fn new(conn: A, config: CoordConfig) -> Self {
        Self { conn, config }
    }

    pub fn connection(&mut self) -> &mut A {
        &mut self.conn
    }

    fn release_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.release_max_wait(), self.config.txn_retry_backoff())
    }

    /// Open a chat between `sender` and `recipients` and post the first
    /// message. Every participant starts with watermark 0.
    pub fn create_chat(
        &mut self,
        sender: &str,
        recipients: &[&str],
        first_message: &str,
    ) -> Result<ChatId> {
        let chat_id = self.conn.incr_by(CHAT_IDS_KEY, 1)?;
        let roster = roster_key(chat_id);
        let chat_member = chat_id.to_string();

        let participants: BTreeSet<&str> = recipients.iter().copied().chain([sender]).collect();
        let mut batch = Batch::new();
        for participant in &participants {
            batch
                .zadd(&roster, participant, 0.0)
                .zadd(&seen_key(participant), &chat_member, 0.0);
        }
        exec_atomic(&mut self.conn, batch)?;
        debug!(chat_id, participants = participants.len(), "chat created");

        self.send_message(chat_id, sender, first_message)?;
        Ok(chat_id)
    }

    /// Append a message under the chat's lock and return its id.
    ///
    /// Fails with [`CoordError::LockUnavailable`] if the lock cannot be taken
    /// within `lock_acquire_timeout`.
    pub fn send_message(&mut self, chat_id: ChatId, sender: &str, body: &str) -> Result<i64> {
        let lock_name = roster_key(chat_id);
        let token = acquire_on(
            &mut self.conn,
            &lock_name,
            self.config.lock_acquire_timeout(),
            self.config.lock_retry_interval(),
            None,
        )?
        .ok_or_else(|| CoordError::LockUnavailable {
            name: lock_name.clone(),
        })?;

        let appended = self.append_message(chat_id, sender, body);
        let policy = self.release_policy();
        let released = release_on(&mut self.conn, &lock_name, &token, policy);
        let message_id = appended?;
        if !released? {
            warn!(chat_id, "chat lock was lost before release");
        }
        Ok(message_id)
    }

    fn append_message(&mut self, chat_id: ChatId, sender: &str, body: &str) -> Result<i64> {
        let id = self.conn.incr_by(&message_ids_key(chat_id), 1)?;
        let message = ChatMessage {
            id,
            timestamp: unix_time_ms(),
            sender: sender.to_owned(),
            body: body.to_owned(),
        };
        let payload = serde_json::to_string(&message)?;
        self.conn.zadd(&messages_key(chat_id), &payload, id_score(id))?;
        debug!(chat_id, id, sender, "message sent");
        Ok(id)
    }

    /// Everything `recipient` has not seen yet, one entry per chat with news.
    ///
    /// Advances the recipient's watermarks and prunes messages that every
    /// participant has now seen.
    pub fn fetch_pending(&mut self, recipient: &str) -> Result<Vec<ChatMessages>> {
        let seen = seen_key(recipient);
        let watermarks = self.conn.zrange_by_rank(&seen, 0, -1)?;

        let mut chats = Vec::with_capacity(watermarks.len());
        let mut read = Batch::new();
        for (member, watermark) in &watermarks {
            let Ok(chat_id) = member.parse::<ChatId>() else {
                warn!(recipient, member = %member, "ignoring malformed chat id in seen set");
                continue;
            };
            read.zrange_by_score(
                &messages_key(chat_id),
                ScoreBound::Exclusive(*watermark),
                ScoreBound::POS_INF,
            )
            .zrange_by_rank(&roster_key(chat_id), 0, -1);
            chats.push(chat_id);
        }
        if chats.is_empty() {
            return Ok(Vec::new());
        }
        let mut replies = exec_atomic(&mut self.conn, read)?;

        let mut pending = Vec::new();
        let mut writes = Batch::new();
        for (idx, chat_id) in chats.into_iter().enumerate() {
            let fresh = take_reply(&mut replies, 2 * idx).into_scored()?;
            let roster = take_reply(&mut replies, 2 * idx + 1).into_scored()?;
            let Some(&(_, newest)) = fresh.last() else {
                continue;
            };

            let messages = fresh
                .iter()
                .map(|(payload, _)| serde_json::from_str::<ChatMessage>(payload))
                .collect::<Result<Vec<_>, _>>()?;

            let floor = roster
                .iter()
                .filter(|(member, _)| member != recipient)
                .map(|(_, watermark)| *watermark)
                .fold(newest, f64::min);

            writes
                .zadd(&seen, &chat_id.to_string(), newest)
                .zadd(&roster_key(chat_id), recipient, newest)
                .zremrangebyscore(
                    &messages_key(chat_id),
                    ScoreBound::Inclusive(0.0),
                    ScoreBound::Inclusive(floor),
                );
            debug!(
                chat_id,
                recipient,
                watermark = score_id(newest),
                floor = score_id(floor),
                "chat read"
            );
            pending.push(ChatMessages { chat_id, messages });
        }

        if !writes.is_empty() {
            for reply in exec_atomic(&mut self.conn, writes)? {
                if let Reply::Error(err) = reply {
                    warn!(recipient, error = %err, "watermark update failed");
                    return Err(err.into());
                }
            }
        }
        Ok(pending)
    }

    /// Add `user` to an existing chat. The newcomer starts at the current
    /// last message id, so history is neither delivered nor held back.
    pub fn join_chat(&mut self, chat_id: ChatId, user: &str) -> Result<()> {
        let latest = match self.conn.get(&message_ids_key(chat_id))? {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::ValueNotInteger)?,
            None => 0,
        };
        let mut batch = Batch::new();
        batch
            .zadd(&roster_key(chat_id), user, id_score(latest))
            .zadd(&seen_key(user), &chat_id.to_string(), id_score(latest));
        exec_atomic(&mut self.conn, batch)?;
        debug!(chat_id, user, latest, "joined chat");
        Ok(())
    }

    /// Remove `user` from a chat. When the last participant leaves, the
    /// chat's messages and id counter are deleted; otherwise messages every
    /// remaining participant has seen are pruned.
    ///
    /// Returns `false` if `user` was not a participant.
    pub fn leave_chat(&mut self, chat_id: ChatId, user: &str) -> Result<bool> {
        let roster = roster_key(chat_id);
        let messages = messages_key(chat_id);
        let chat_member = chat_id.to_string();
        let seen = seen_key(user);
        let watched = [roster.clone()];
        let policy = self.release_policy();

        let outcome = run_optimistic(&mut self.conn, &watched, policy, |conn| {
            let entries = conn.zrange_by_rank(&roster, 0, -1)?;
            if !entries.iter().any(|(member, _)| member == user) {
                return Ok(None);
            }
            let floor = entries
                .iter()
                .filter(|(member, _)| member != user)
                .map(|(_, watermark)| *watermark)
                .reduce(f64::min);

            let mut batch = Batch::new();
            batch.zrem(&roster, user).zrem(&seen, &chat_member);
            match floor {
                Some(floor) => {
                    batch.zremrangebyscore(
                        &messages,
                        ScoreBound::Inclusive(0.0),
                        ScoreBound::Inclusive(floor),
                    );
                }
                None => {
                    batch.del(&[messages.as_str(), message_ids_key(chat_id).as_str()]);
                }
            }
            Ok(Some(batch))
        })?;

        match outcome {
            TxnOutcome::Committed(_) => {
                debug!(chat_id, user, "left chat");
                Ok(true)
            }
            TxnOutcome::Skipped => Ok(false),
            TxnOutcome::TimedOut => {
                warn!(chat_id, user, "leave_chat gave up under contention");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fc_config::CoordConfig;
    use fc_runtime::{
        AdapterError, CommandError, Commands, LocalConnection, SharedStore, StoreError,
    };

    use super::{ChatMessage, Messaging, message_ids_key, messages_key, roster_key, seen_key};
    use crate::error::CoordError;
    use crate::test_support::{HookedConnection, Phase};

    fn is_store_error(err: &CoordError, expected: StoreError) -> bool {
        let CoordError::Store(AdapterError::Command(CommandError::Store(found))) = err else {
            return false;
        };
        *found == expected
    }

    fn messaging(shared: &Arc<SharedStore>) -> Messaging<LocalConnection> {
        Messaging::new(shared.connect(), CoordConfig::default())
    }

    fn bodies(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn message_payload_field_names() {
        let message = ChatMessage {
            id: 1,
            timestamp: 5,
            sender: "joe".to_string(),
            body: "hi".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"id":1,"timestamp":5,"sender":"joe","body":"hi"}"#
        );
    }

    #[test]
    fn create_chat_registers_every_participant() {
        let shared = SharedStore::new();
        let mut chat = messaging(&shared);
        let id = chat.create_chat("joe", &["jeff", "jenny"], "hello").unwrap();
        assert_eq!(id, 1);
        let conn = chat.connection();
        assert_eq!(conn.zcard(&roster_key(id)).unwrap(), 3);
        for user in ["joe", "jeff", "jenny"] {
            assert_eq!(conn.zscore(&seen_key(user), "1").unwrap(), Some(0.0));
        }
        assert_eq!(conn.zcard(&messages_key(id)).unwrap(), 1);
    }

    #[test]
    fn fetch_advances_watermark_and_prunes_when_all_have_read() {
        let shared = SharedStore::new();
        let mut chat = messaging(&shared);
        let id = chat.create_chat("joe", &["jeff"], "m1").unwrap();
        chat.send_message(id, "joe", "m2").unwrap();

        let jeff = chat.fetch_pending("jeff").unwrap();
        assert_eq!(jeff.len(), 1);
        assert_eq!(bodies(&jeff[0].messages), vec!["m1", "m2"]);
        assert!(chat.fetch_pending("jeff").unwrap().is_empty());
        // joe has not read yet, so nothing is pruned.
        assert_eq!(chat.connection().zcard(&messages_key(id)).unwrap(), 2);

        let joe = chat.fetch_pending("joe").unwrap();
        assert_eq!(bodies(&joe[0].messages), vec!["m1", "m2"]);
        assert_eq!(chat.connection().zcard(&messages_key(id)).unwrap(), 0);

        chat.send_message(id, "jeff", "m3").unwrap();
        let joe = chat.fetch_pending("joe").unwrap();
        assert_eq!(joe[0].messages[0].id, 3);
        assert_eq!(chat.connection().zcard(&messages_key(id)).unwrap(), 1);
    }

    #[test]
    fn send_fails_when_chat_lock_is_held() {
        let shared = SharedStore::new();
        let config = CoordConfig {
            lock_acquire_timeout_ms: 5,
            ..CoordConfig::default()
        };
        let mut chat = Messaging::new(shared.connect(), config);
        let id = chat.create_chat("joe", &["jeff"], "m1").unwrap();
        shared
            .connect()
            .set(&format!("lock:{}", roster_key(id)), "held", None)
            .unwrap();
        let err = chat.send_message(id, "joe", "blocked").expect_err("lock held");
        assert!(matches!(err, CoordError::LockUnavailable { ref name } if name == "chat:1"));
        assert_eq!(chat.connection().zcard(&messages_key(id)).unwrap(), 1);
    }

    #[test]
    fn failed_watermark_write_is_reported_not_swallowed() {
        let shared = SharedStore::new();
        let id = messaging(&shared).create_chat("joe", &["jeff"], "m1").unwrap();

        let mut commits = 0;
        let conn = HookedConnection::new(shared.connect(), |phase, side| {
            if phase != Phase::Commit {
                return;
            }
            commits += 1;
            // Second commit is the watermark batch; make the roster unusable.
            if commits == 2 {
                side.set(&roster_key(id), "clobbered", None).unwrap();
            }
        });
        let err = Messaging::new(conn, CoordConfig::default())
            .fetch_pending("jeff")
            .expect_err("roster write fails");
        assert!(is_store_error(&err, StoreError::WrongType), "{err:?}");
    }

    #[test]
    fn join_rejects_corrupt_message_counter() {
        let shared = SharedStore::new();
        let mut chat = messaging(&shared);
        let id = chat.create_chat("joe", &["jeff"], "m1").unwrap();
        chat.connection().set(&message_ids_key(id), "garbage", None).unwrap();

        let err = chat.join_chat(id, "amy").expect_err("corrupt counter");
        assert!(is_store_error(&err, StoreError::ValueNotInteger), "{err:?}");
        assert_eq!(chat.connection().zscore(&roster_key(id), "amy").unwrap(), None);
    }

    #[test]
    fn joiner_skips_history_and_leaver_unblocks_pruning() {
        let shared = SharedStore::new();
        let mut chat = messaging(&shared);
        let id = chat.create_chat("joe", &["jeff"], "m1").unwrap();
        chat.join_chat(id, "amy").unwrap();
        chat.send_message(id, "joe", "m2").unwrap();

        let amy = chat.fetch_pending("amy").unwrap();
        assert_eq!(bodies(&amy[0].messages), vec!["m2"]);

        chat.fetch_pending("joe").unwrap();
        assert_eq!(chat.connection().zcard(&messages_key(id)).unwrap(), 2);
        assert!(chat.leave_chat(id, "jeff").unwrap());
        assert!(!chat.leave_chat(id, "jeff").unwrap());
        assert_eq!(chat.connection().zcard(&messages_key(id)).unwrap(), 0);
        assert_eq!(chat.connection().zscore(&seen_key("jeff"), "1").unwrap(), None);

        assert!(chat.leave_chat(id, "joe").unwrap());
        assert!(chat.leave_chat(id, "amy").unwrap());
        assert_eq!(chat.connection().get(&message_ids_key(id)).unwrap(), None);
        assert_eq!(chat.connection().zcard(&roster_key(id)).unwrap(), 0);
    }
}
