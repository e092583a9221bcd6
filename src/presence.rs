use std::collections::BTreeSet;

/// Connection keys currently tracked on a poll's channel.
///
/// Keys are per browsing session, so two tabs of one user count twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    keys: BTreeSet<String>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the membership with a full state from the server.
    pub fn sync<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.keys = keys.into_iter().collect();
    }

    pub fn apply_diff(&mut self, joins: Vec<String>, leaves: &[String]) {
        self.keys.extend(joins);
        for key in leaves {
            self.keys.remove(key);
        }
    }

    pub fn active_viewers(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }
}
