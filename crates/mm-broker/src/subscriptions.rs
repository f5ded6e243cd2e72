use std::collections::{HashMap, HashSet};

use mio::Token;

/// `type_id -> set<client>` mapping, per `SPEC_FULL.md` §4.E. No ordering
/// guarantees among subscribers; capacity is bounded only by process memory.
#[derive(Default)]
pub struct SubscriptionTable {
    by_type: HashMap<i32, HashSet<Token>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        SubscriptionTable { by_type: HashMap::new() }
    }

    pub fn add(&mut self, type_id: i32, client: Token) {
        self.by_type.entry(type_id).or_default().insert(client);
    }

    pub fn remove(&mut self, type_id: i32, client: Token) {
        if let Some(set) = self.by_type.get_mut(&type_id) {
            set.remove(&client);
            if set.is_empty() {
                self.by_type.remove(&type_id);
            }
        }
    }

    /// Purges `client` from every subscription set, used on disconnect.
    pub fn remove_all(&mut self, client: Token) {
        self.by_type.retain(|_, set| {
            set.remove(&client);
            !set.is_empty()
        });
    }

    pub fn contains(&self, type_id: i32, client: Token) -> bool {
        self.by_type.get(&type_id).is_some_and(|set| set.contains(&client))
    }

    /// Subscribers of `type_id`, order unspecified.
    pub fn subscribers(&self, type_id: i32) -> impl Iterator<Item = Token> + '_ {
        self.by_type.get(&type_id).into_iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(n: usize) -> Token {
        Token(n)
    }

    #[test]
    fn add_and_contains() {
        let mut subs = SubscriptionTable::new();
        subs.add(1234, tok(1));
        assert!(subs.contains(1234, tok(1)));
        assert!(!subs.contains(1234, tok(2)));
    }

    #[test]
    fn remove_is_idempotent_when_not_subscribed() {
        let mut subs = SubscriptionTable::new();
        subs.remove(1234, tok(1));
        assert!(!subs.contains(1234, tok(1)));
    }

    #[test]
    fn remove_all_purges_every_type() {
        let mut subs = SubscriptionTable::new();
        subs.add(1, tok(1));
        subs.add(2, tok(1));
        subs.add(2, tok(2));
        subs.remove_all(tok(1));
        assert!(!subs.contains(1, tok(1)));
        assert!(!subs.contains(2, tok(1)));
        assert!(subs.contains(2, tok(2)));
    }

    #[test]
    fn subscribers_lists_every_member() {
        let mut subs = SubscriptionTable::new();
        subs.add(1234, tok(1));
        subs.add(1234, tok(2));
        let mut members: Vec<_> = subs.subscribers(1234).collect();
        members.sort_by_key(|t| t.0);
        assert_eq!(members, vec![tok(1), tok(2)]);
    }
}
