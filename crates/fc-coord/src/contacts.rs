//! Per-user recent contacts, most recent first, for client-side
//! autocomplete over a short list.

use fc_config::CoordConfig;
use fc_runtime::{Batch, Commands, StoreAdapter};
use tracing::debug;

use crate::error::Result;
use crate::optimistic::exec_atomic;

#[must_use]
pub fn recent_key(user: &str) -> String {
    format!("recent:{user}")
}

#[derive(Debug)]
pub struct RecentContacts<A> {
    conn: A,
    cap: usize,
}

impl<A: StoreAdapter> RecentContacts<A> {
    pub fn new(conn: A, config: &CoordConfig) -> Self {
        Self {
            conn,
            cap: config.recent_contacts_cap,
        }
    }

    pub fn connection(&mut self) -> &mut A {
        &mut self.conn
    }

    /// Move `contact` to the front, dropping whatever falls past the cap.
    pub fn add_update_contact(&mut self, user: &str, contact: &str) -> Result<()> {
        let key = recent_key(user);
        let last = i64::try_from(self.cap).unwrap_or(i64::MAX).saturating_sub(1);
        let mut batch = Batch::new();
        batch
            .lrem(&key, 0, contact)
            .lpush(&key, contact)
            .ltrim(&key, 0, last);
        exec_atomic(&mut self.conn, batch)?;
        debug!(user, contact, "recent contact updated");
        Ok(())
    }

    pub fn remove_contact(&mut self, user: &str, contact: &str) -> Result<bool> {
        Ok(self.conn.lrem(&recent_key(user), 0, contact)? > 0)
    }

    /// Contacts whose name starts with `prefix`, ignoring ASCII case, in
    /// recency order.
    pub fn fetch_autocomplete_list(&mut self, user: &str, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_lowercase();
        let candidates = self.conn.lrange(&recent_key(user), 0, -1)?;
        Ok(candidates
            .into_iter()
            .filter(|candidate| candidate.to_lowercase().starts_with(&prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use fc_config::CoordConfig;
    use fc_runtime::{Commands, SharedStore};

    use super::{RecentContacts, recent_key};

    #[test]
    fn most_recent_contact_moves_to_front() {
        let shared = SharedStore::new();
        let mut contacts = RecentContacts::new(shared.connect(), &CoordConfig::default());
        for name in ["Jeff", "Jenny", "Amy", "Jeff"] {
            contacts.add_update_contact("joe", name).unwrap();
        }
        assert_eq!(
            contacts.connection().lrange(&recent_key("joe"), 0, -1).unwrap(),
            vec!["Jeff", "Amy", "Jenny"]
        );
        assert_eq!(
            contacts.fetch_autocomplete_list("joe", "je").unwrap(),
            vec!["Jeff", "Jenny"]
        );
    }

    #[test]
    fn list_is_capped() {
        let shared = SharedStore::new();
        let config = CoordConfig {
            recent_contacts_cap: 3,
            ..CoordConfig::default()
        };
        let mut contacts = RecentContacts::new(shared.connect(), &config);
        for i in 0..5 {
            contacts.add_update_contact("joe", &format!("c{i}")).unwrap();
        }
        assert_eq!(
            contacts.fetch_autocomplete_list("joe", "").unwrap(),
            vec!["c4", "c3", "c2"]
        );
    }

    #[test]
    fn remove_contact_reports_presence() {
        let shared = SharedStore::new();
        let mut contacts = RecentContacts::new(shared.connect(), &CoordConfig::default());
        contacts.add_update_contact("joe", "amy").unwrap();
        assert!(contacts.remove_contact("joe", "amy").unwrap());
        assert!(!contacts.remove_contact("joe", "amy").unwrap());
        assert!(contacts.fetch_autocomplete_list("joe", "a").unwrap().is_empty());
    }
}
