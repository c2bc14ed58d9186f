//! Prefix autocomplete over `members:<guild>`.
//!
//! Every member has score 0, so the set orders lexically. A query brackets
//! its prefix with two uniquely-suffixed sentinel members, reads their
//! ranks, and pulls the members in between.

use fc_config::CoordConfig;
use fc_runtime::{Batch, Commands, StoreAdapter};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::optimistic::{RetryPolicy, TxnOutcome, exec_atomic, run_optimistic, take_reply};

/// Candidates are lowercase ASCII; the ends are the code points just below
/// `a` and just above `z`.
pub const VALID_CHARACTERS: &str = "`abcdefghijklmnopqrstuvwxyz{";

/// Terminates sentinel bounds. Real members never contain it.
pub const DELIMITER: char = '{';

#[must_use]
pub fn guild_key(guild: &str) -> String {
    format!("members:{guild}")
}

/// The code point just below `c`. Across [`VALID_CHARACTERS`] this is the
/// previous alphabet entry.
fn predecessor(c: char) -> Option<char> {
    match c {
        '\0' => None,
        '\u{E000}' => Some('\u{D7FF}'),
        _ => char::from_u32(u32::from(c) - 1),
    }
}

/// Bounds that sort just before and just after every string starting with
/// `prefix`.
///
/// ```
/// use fc_coord::autocomplete::find_prefix_range;
///
/// assert_eq!(find_prefix_range("abc"), ("abb{".to_string(), "abc{".to_string()));
/// assert_eq!(find_prefix_range(""), ("`{".to_string(), "{".to_string()));
/// ```
#[must_use]
pub fn find_prefix_range(prefix: &str) -> (String, String) {
    let mut chars = prefix.chars();
    let Some(last) = chars.next_back() else {
        return (format!("`{DELIMITER}"), DELIMITER.to_string());
    };
    let head = chars.as_str();
    let start = match predecessor(last) {
        Some(prev) => format!("{head}{prev}{DELIMITER}"),
        None => head.to_owned(),
    };
    let end = format!("{prefix}{DELIMITER}");
    (start, end)
}

/// Guild membership plus sentinel-bounded prefix queries.
#[derive(Debug)]
pub struct AutocompleteIndex<A> {
    conn: A,
    config: CoordConfig,
}

impl<A: StoreAdapter> AutocompleteIndex<A> {
    pub fn new(conn: A, config: CoordConfig) -> Self {
        Self { conn, config }
    }

    pub fn connection(&mut self) -> &mut A {
        &mut self.conn
    }

    pub fn join_guild(&mut self, guild: &str, user: &str) -> Result<bool> {
        Ok(self.conn.zadd(&guild_key(guild), user, 0.0)? == 1)
    }

    pub fn leave_guild(&mut self, guild: &str, user: &str) -> Result<bool> {
        Ok(self.conn.zrem(&guild_key(guild), &[user])? == 1)
    }

    /// Up to `autocomplete_window` guild members starting with `prefix`, in
    /// lexical order. `None` if contention outlasted
    /// `autocomplete_max_wait`.
    pub fn query(&mut self, guild: &str, prefix: &str) -> Result<Option<Vec<String>>> {
        let key = guild_key(guild);
        let (start, end) = find_prefix_range(prefix);
        let suffix = Uuid::new_v4();
        let start = format!("{start}{suffix}");
        let end = format!("{end}{suffix}");

        let mut batch = Batch::new();
        batch.zadd(&key, &start, 0.0).zadd(&key, &end, 0.0);
        exec_atomic(&mut self.conn, batch)?;

        let window = i64::try_from(self.config.autocomplete_window).unwrap_or(i64::MAX);
        let policy = RetryPolicy::new(
            self.config.autocomplete_max_wait(),
            self.config.txn_retry_backoff(),
        );
        let watched = [key.clone()];
        let outcome = run_optimistic(&mut self.conn, &watched, policy, |conn| {
            let (Some(start_rank), Some(end_rank)) =
                (conn.zrank(&key, &start)?, conn.zrank(&key, &end)?)
            else {
                warn!(guild, "autocomplete sentinel vanished mid-query");
                let mut batch = Batch::new();
                batch.zrem(&key, &start).zrem(&key, &end);
                return Ok(Some(batch));
            };
            // Ranks as they will be once the start sentinel is gone.
            let stop = start_rank
                .saturating_add(window.saturating_sub(1))
                .min(end_rank - 2);
            let mut batch = Batch::new();
            batch.zrem(&key, &start).zrem(&key, &end);
            if stop >= start_rank {
                batch.zrange_by_rank(&key, start_rank, stop);
            }
            Ok(Some(batch))
        })?;

        match outcome {
            TxnOutcome::Committed(mut replies) => {
                let items = if replies.len() > 2 {
                    take_reply(&mut replies, 2).into_scored()?
                } else {
                    Vec::new()
                };
                let matches: Vec<String> = items
                    .into_iter()
                    .map(|(member, _)| member)
                    .filter(|member| !member.contains(DELIMITER))
                    .collect();
                debug!(guild, prefix, found = matches.len(), "autocomplete query");
                Ok(Some(matches))
            }
            TxnOutcome::Skipped => Ok(Some(Vec::new())),
            TxnOutcome::TimedOut => {
                if let Err(err) = self.conn.zrem(&key, &[start.as_str(), end.as_str()]) {
                    warn!(guild, error = %err, "failed to remove autocomplete sentinels");
                }
                trace!(guild, prefix, "autocomplete query timed out");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use fc_config::CoordConfig;
    use fc_runtime::{Commands, SharedStore};
    use proptest::prelude::*;

    use super::{
        AutocompleteIndex, DELIMITER, VALID_CHARACTERS, find_prefix_range, guild_key, predecessor,
    };
    use crate::test_support::{HookedConnection, Phase};

    #[test]
    fn prefix_range_replaces_last_character() {
        assert_eq!(find_prefix_range("abc"), ("abb{".to_string(), "abc{".to_string()));
        assert_eq!(find_prefix_range("a"), ("`{".to_string(), "a{".to_string()));
        assert_eq!(find_prefix_range("ja"), ("j`{".to_string(), "ja{".to_string()));
        assert_eq!(find_prefix_range("je-"), ("je,{".to_string(), "je-{".to_string()));
    }

    #[test]
    fn predecessor_walks_the_alphabet() {
        let letters: Vec<char> = VALID_CHARACTERS.chars().collect();
        for pair in letters.windows(2) {
            assert_eq!(predecessor(pair[1]), Some(pair[0]));
        }
        assert_eq!(predecessor('\0'), None);
        assert_eq!(find_prefix_range("x\0"), ("x".to_string(), "x\0{".to_string()));
    }

    #[test]
    fn empty_prefix_spans_all_lowercase_members() {
        let (start, end) = find_prefix_range("");
        assert!(start.as_str() < "a");
        assert!("zzzz" < end.as_str());
    }

    fn seeded_index(names: &[&str]) -> AutocompleteIndex<fc_runtime::LocalConnection> {
        let shared = SharedStore::new();
        let mut index = AutocompleteIndex::new(shared.connect(), CoordConfig::default());
        for name in names {
            index.join_guild("g", name).unwrap();
        }
        index
    }

    #[test]
    fn query_returns_prefix_matches_in_order() {
        let mut index = seeded_index(&["jeff", "jenny", "jack", "jean", "joe", "amy"]);
        let found = index.query("g", "je").unwrap().unwrap();
        assert_eq!(found, vec!["jean", "jeff", "jenny"]);
        assert_eq!(index.connection().zcard(&guild_key("g")).unwrap(), 6);
    }

    #[test]
    fn query_caps_results_at_window() {
        let names: Vec<String> = (0..15).map(|i| format!("ab{}", (b'a' + i) as char)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut index = seeded_index(&refs);
        let found = index.query("g", "ab").unwrap().unwrap();
        assert_eq!(found.len(), 10);
        assert_eq!(found[0], "aba");
        assert_eq!(found[9], "abj");
    }

    #[test]
    fn query_with_no_match_returns_empty_without_leaking_sentinels() {
        let mut index = seeded_index(&["amy", "bob"]);
        assert_eq!(index.query("g", "zz").unwrap(), Some(Vec::new()));
        assert_eq!(index.query("empty-guild", "a").unwrap(), Some(Vec::new()));
        assert_eq!(index.connection().zcard(&guild_key("g")).unwrap(), 2);
        assert_eq!(index.connection().zcard(&guild_key("empty-guild")).unwrap(), 0);
    }

    #[test]
    fn vanished_sentinel_leaves_no_partner_behind() {
        let shared = SharedStore::new();
        let mut setup = shared.connect();
        for name in ["jeff", "jenny"] {
            setup.zadd(&guild_key("g"), name, 0.0).unwrap();
        }
        let mut stolen = false;
        let conn = HookedConnection::new(shared.connect(), |phase, side| {
            if phase != Phase::Watch || stolen {
                return;
            }
            let members = side.zrange_by_rank(&guild_key("g"), 0, -1).unwrap();
            if let Some((sentinel, _)) = members.iter().find(|(m, _)| m.contains(DELIMITER)) {
                side.zrem(&guild_key("g"), &[sentinel.as_str()]).unwrap();
                stolen = true;
            }
        });
        let mut index = AutocompleteIndex::new(conn, CoordConfig::default());

        assert_eq!(index.query("g", "je").unwrap(), Some(Vec::new()));
        let left = setup.zrange_by_rank(&guild_key("g"), 0, -1).unwrap();
        let names: Vec<&str> = left.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(names, vec!["jeff", "jenny"]);
    }

    #[test]
    fn leave_guild_drops_member_from_results() {
        let mut index = seeded_index(&["jeff", "jenny"]);
        assert!(index.leave_guild("g", "jeff").unwrap());
        assert!(!index.leave_guild("g", "jeff").unwrap());
        assert_eq!(index.query("g", "je").unwrap().unwrap(), vec!["jenny"]);
    }

    proptest! {
        #[test]
        fn prefix_range_brackets_every_extension(
            prefix in "[a-z]{1,6}",
            tail in "[a-z]{0,6}",
        ) {
            let (start, end) = find_prefix_range(&prefix);
            let candidate = format!("{prefix}{tail}");
            prop_assert!(start.as_str() < candidate.as_str());
            prop_assert!(candidate.as_str() < end.as_str());
        }

        #[test]
        fn prefix_range_excludes_non_matching_words(
            prefix in "[a-z]{1,4}",
            word in "[a-z]{1,6}",
        ) {
            prop_assume!(!word.starts_with(&prefix));
            let (start, end) = find_prefix_range(&prefix);
            let inside = start.as_str() < word.as_str() && word.as_str() < end.as_str();
            prop_assert!(!inside);
        }
    }
}
