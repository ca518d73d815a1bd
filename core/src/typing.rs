/// Typing indicator for the active peer with automatic expiry
use tracing::debug;

/// Identifies one scheduled expiry. Only the most recently issued ticket
/// can turn the indicator off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingTicket {
    pub peer: String,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct TypingIndicator {
    peer: Option<String>,
    showing: bool,
    generation: u64,
}

impl TypingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the active peer; any pending expiry becomes stale.
    pub fn open(&mut self, peer: Option<&str>) {
        self.peer = peer.map(str::to_string);
        self.showing = false;
        self.generation += 1;
    }

    /// A typing event arrived. Returns the ticket to schedule for expiry, or
    /// `None` when the sender is not the active peer.
    pub fn on_typing(&mut self, sender_id: &str) -> Option<TypingTicket> {
        let peer = self.peer.as_deref()?;
        if peer != sender_id {
            return None;
        }
        self.showing = true;
        self.generation += 1;
        Some(TypingTicket {
            peer: peer.to_string(),
            generation: self.generation,
        })
    }

    /// Expiry fired. Stale tickets (superseded or for another peer) are ignored.
    pub fn expire(&mut self, ticket: &TypingTicket) -> bool {
        let current = ticket.generation == self.generation
            && self.peer.as_deref() == Some(ticket.peer.as_str());
        if !current {
            debug!("Discarding stale typing expiry for {}", ticket.peer);
            return false;
        }
        self.showing = false;
        true
    }

    pub fn is_showing(&self) -> bool {
        self.showing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_then_expire() {
        let mut typing = TypingIndicator::new();
        typing.open(Some("B"));
        let ticket = typing.on_typing("B").unwrap();
        assert!(typing.is_showing());
        assert!(typing.expire(&ticket));
        assert!(!typing.is_showing());
    }

    #[test]
    fn test_retrigger_invalidates_earlier_expiry() {
        let mut typing = TypingIndicator::new();
        typing.open(Some("B"));
        let first = typing.on_typing("B").unwrap();
        let second = typing.on_typing("B").unwrap();
        assert!(!typing.expire(&first));
        assert!(typing.is_showing());
        assert!(typing.expire(&second));
    }

    #[test]
    fn test_peer_switch_abandons_timer() {
        let mut typing = TypingIndicator::new();
        typing.open(Some("B"));
        let ticket = typing.on_typing("B").unwrap();
        typing.open(Some("C"));
        assert!(!typing.is_showing());
        assert!(!typing.expire(&ticket));
        assert!(typing.on_typing("B").is_none());
        assert!(!typing.is_showing());
    }

    #[test]
    fn test_no_peer_ignores_typing() {
        let mut typing = TypingIndicator::new();
        assert!(typing.on_typing("B").is_none());
    }
}
