/// Peers with messages received while their conversation was not open
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct UnreadTracker {
    senders: BTreeSet<String>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered message. Returns true if the sender was newly marked.
    pub fn on_message(&mut self, sender_id: &str, active_peer: Option<&str>) -> bool {
        if active_peer == Some(sender_id) {
            return false;
        }
        self.senders.insert(sender_id.to_string())
    }

    /// The peer's conversation became active
    pub fn mark_read(&mut self, peer_id: &str) -> bool {
        self.senders.remove(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.senders.contains(peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.senders.iter()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from_inactive_peer_is_unread() {
        let mut unread = UnreadTracker::new();
        assert!(unread.on_message("B", Some("C")));
        assert!(!unread.on_message("B", Some("C")));
        assert!(!unread.on_message("C", Some("C")));
        assert_eq!(unread.iter().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_mark_read_removes_exactly_that_peer() {
        let mut unread = UnreadTracker::new();
        unread.on_message("B", None);
        unread.on_message("D", None);
        assert!(unread.mark_read("B"));
        assert!(!unread.mark_read("B"));
        assert!(!unread.mark_read("nobody"));
        assert!(unread.contains("D"));
        assert_eq!(unread.len(), 1);
    }

    #[test]
    fn test_active_peer_never_in_set_for_interleavings() {
        // Deterministic pseudo-random interleaving of selections and arrivals
        let peers = ["B", "C", "D"];
        let mut unread = UnreadTracker::new();
        let mut active: Option<&str> = None;
        let mut seed: u32 = 7;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let peer = peers[(seed >> 16) as usize % peers.len()];
            if (seed >> 8) & 1 == 0 {
                active = Some(peer);
                unread.mark_read(peer);
            } else {
                unread.on_message(peer, active);
            }
            if let Some(active) = active {
                assert!(!unread.contains(active));
            }
        }
    }
}
