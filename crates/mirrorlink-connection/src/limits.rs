use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LimitEntry {
    pattern: String,
    prefix: String,
    max_queued: usize,
}

/// Per-address queue limits.
///
/// Each entry is an address or an address prefix ending in `*`. Lookup walks
/// entries in registration order and the first entry whose prefix matches
/// wins, so register specific paths before broad prefixes.
#[derive(Debug, Clone, Default)]
pub struct MessageLimits {
    entries: Vec<LimitEntry>,
}

impl MessageLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of queued messages for `pattern`.
    ///
    /// Updating an existing pattern keeps its position. A `max_queued` of 0
    /// removes the entry.
    pub fn set(&mut self, pattern: &str, max_queued: usize) {
        let existing = self.entries.iter().position(|e| e.pattern == pattern);

        match (existing, max_queued) {
            (Some(index), 0) => {
                self.entries.remove(index);
                debug!(pattern, "queue limit removed");
            }
            (None, 0) => {}
            (Some(index), _) => {
                self.entries[index].max_queued = max_queued;
                debug!(pattern, max_queued, "queue limit updated");
            }
            (None, _) => {
                self.entries.push(LimitEntry {
                    pattern: pattern.to_string(),
                    prefix: pattern.strip_suffix('*').unwrap_or(pattern).to_string(),
                    max_queued,
                });
                debug!(pattern, max_queued, "queue limit added");
            }
        }
    }

    /// The limit applying to `address`, if any.
    pub fn limit_for(&self, address: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| address.starts_with(entry.prefix.as_str()))
            .map(|entry| entry.max_queued)
    }

    /// Registered `(pattern, max_queued)` pairs in lookup order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries
            .iter()
            .map(|entry| (entry.pattern.as_str(), entry.max_queued))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_prefix_lookup() {
        let mut limits = MessageLimits::new();
        limits.set("/Screen", 2);
        limits.set("/MessageHandler/*", 8);

        assert_eq!(limits.limit_for("/Screen"), Some(2));
        assert_eq!(limits.limit_for("/MessageHandler/KeyDown"), Some(8));
        assert_eq!(limits.limit_for("/XRTracking"), None);
    }

    #[test]
    fn first_registered_match_wins() {
        let mut limits = MessageLimits::new();
        limits.set("/MessageHandler/*", 8);
        limits.set("/MessageHandler/Touch*", 1);

        assert_eq!(limits.limit_for("/MessageHandler/TouchMoved"), Some(8));
    }

    #[test]
    fn update_keeps_position_and_zero_removes() {
        let mut limits = MessageLimits::new();
        limits.set("/a*", 4);
        limits.set("/ab", 1);
        limits.set("/a*", 6);

        let entries: Vec<_> = limits.entries().collect();
        assert_eq!(entries, vec![("/a*", 6), ("/ab", 1)]);

        limits.set("/a*", 0);
        assert_eq!(limits.limit_for("/ab"), Some(1));
        assert_eq!(limits.len(), 1);

        limits.set("/never-added", 0);
        assert_eq!(limits.len(), 1);
    }

    #[test]
    fn bare_star_matches_everything() {
        let mut limits = MessageLimits::new();
        limits.set("*", 3);
        assert_eq!(limits.limit_for("/anything"), Some(3));
        assert!(!limits.is_empty());
    }
}
