/// Debounced user search: query state with last-query-wins resolution
use crate::directory::Contact;
use crate::error::ChatError;
use tracing::{debug, warn};

/// A lookup scheduled for one query. Resolving with anything but the latest
/// ticket is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTicket {
    pub query: String,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStep {
    /// Blank input: results cleared synchronously, nothing scheduled
    Cleared,
    /// Run this lookup after the quiet period
    Scheduled(SearchTicket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Idle,
    Pending,
    Found(usize),
    NoResults,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    pub query: String,
    pub results: Vec<Contact>,
    pub has_searched: bool,
    pub failed: bool,
    pub pending: bool,
    generation: u64,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// New raw input from the search box
    pub fn input(&mut self, query: &str) -> SearchStep {
        self.query = query.to_string();
        self.generation += 1;

        if query.trim().is_empty() {
            self.results.clear();
            self.has_searched = false;
            self.failed = false;
            self.pending = false;
            return SearchStep::Cleared;
        }

        self.pending = true;
        SearchStep::Scheduled(SearchTicket {
            query: query.to_string(),
            generation: self.generation,
        })
    }

    /// Apply a lookup outcome. Returns false for superseded tickets.
    pub fn resolve(
        &mut self,
        ticket: &SearchTicket,
        outcome: std::result::Result<Vec<Contact>, ChatError>,
    ) -> bool {
        if ticket.generation != self.generation {
            debug!("Discarding stale search result for {:?}", ticket.query);
            return false;
        }

        self.pending = false;
        self.has_searched = true;
        match outcome {
            Ok(results) => {
                self.results = results;
                self.failed = false;
            }
            Err(e) => {
                warn!("Search for {:?} failed: {}", ticket.query, e);
                self.results.clear();
                self.failed = true;
            }
        }
        true
    }

    /// Clear the box (after a contact is picked). Pending lookups become stale.
    pub fn reset(&mut self) {
        self.input("");
    }

    pub fn status(&self) -> SearchStatus {
        if self.pending {
            SearchStatus::Pending
        } else if !self.has_searched {
            SearchStatus::Idle
        } else if self.failed {
            SearchStatus::Failed
        } else if self.results.is_empty() {
            SearchStatus::NoResults
        } else {
            SearchStatus::Found(self.results.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: &str) -> Contact {
        Contact {
            id: id.to_string(),
            name: format!("user {}", id),
        }
    }

    fn scheduled(step: SearchStep) -> SearchTicket {
        match step {
            SearchStep::Scheduled(ticket) => ticket,
            SearchStep::Cleared => panic!("expected a scheduled lookup"),
        }
    }

    #[test]
    fn test_last_query_wins() {
        let mut search = SearchState::new();
        let old = scheduled(search.input("al"));
        let new = scheduled(search.input("alice"));

        assert!(search.resolve(&new, Ok(vec![contact("1")])));
        assert!(!search.resolve(&old, Ok(vec![contact("2"), contact("3")])));
        assert_eq!(search.results, vec![contact("1")]);
        assert_eq!(search.status(), SearchStatus::Found(1));
    }

    #[test]
    fn test_blank_input_clears_synchronously() {
        let mut search = SearchState::new();
        let ticket = scheduled(search.input("bob"));
        search.resolve(&ticket, Ok(vec![contact("1")]));
        assert!(search.has_searched);

        assert_eq!(search.input("   "), SearchStep::Cleared);
        assert!(search.results.is_empty());
        assert!(!search.has_searched);
        assert_eq!(search.status(), SearchStatus::Idle);
    }

    #[test]
    fn test_blank_input_makes_pending_lookup_stale() {
        let mut search = SearchState::new();
        let ticket = scheduled(search.input("bob"));
        search.input("");
        assert!(!search.resolve(&ticket, Ok(vec![contact("1")])));
        assert!(search.results.is_empty());
    }

    #[test]
    fn test_failure_is_distinguishable_from_empty() {
        let mut search = SearchState::new();
        let ticket = scheduled(search.input("zed"));
        assert_eq!(search.status(), SearchStatus::Pending);
        search.resolve(&ticket, Err(ChatError::Remote("503".to_string())));
        assert!(search.has_searched);
        assert!(search.results.is_empty());
        assert_eq!(search.status(), SearchStatus::Failed);

        let ticket = scheduled(search.input("zed"));
        search.resolve(&ticket, Ok(Vec::new()));
        assert_eq!(search.status(), SearchStatus::NoResults);
    }
}
