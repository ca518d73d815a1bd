/// Online/offline flags per peer, as last reported by explicit events
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: HashMap<String, bool>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&mut self, user_id: &str) {
        self.online.insert(user_id.to_string(), true);
    }

    pub fn set_offline(&mut self, user_id: &str) {
        self.online.insert(user_id.to_string(), false);
    }

    /// Peers never heard from are reported offline
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.get(user_id).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_event_wins() {
        let mut presence = PresenceTracker::new();
        assert!(!presence.is_online("B"));

        presence.set_online("B");
        presence.set_online("C");
        presence.set_offline("B");
        assert!(!presence.is_online("B"));
        assert!(presence.is_online("C"));
    }
}
