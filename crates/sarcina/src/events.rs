use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Kind of a recorded package lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    PreUpgrade,
    PostUpgrade,
    Remove,
}

#[derive(Debug, Clone)]
struct EventEntry {
    kind: EventKind,
    package: String,
    version: String,
    effective_at: Instant,
}

impl EventEntry {
    fn is_effective(&self) -> bool {
        self.effective_at <= Instant::now()
    }
}

/// In-process record of package lifecycle events.
///
/// Consumers ask whether a package "was just installed" or "is about to be
/// upgraded". Entries effective in the future are placeholders an install
/// pipeline registers ahead of a host reload; they only become observable
/// once their time arrives. The log does not survive a restart.
#[derive(Default)]
pub struct EventLog {
    entries: Mutex<Vec<EventEntry>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<EventEntry>> {
        // Entries stay structurally valid even if a holder panicked
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records an event effective immediately.
    pub fn add(&self, kind: EventKind, package: &str, version: &str) {
        self.entries().push(EventEntry {
            kind,
            package: package.to_string(),
            version: version.to_string(),
            effective_at: Instant::now(),
        });
    }

    /// Records a placeholder that becomes effective after `delay`.
    pub fn add_future(&self, kind: EventKind, package: &str, version: &str, delay: Duration) {
        self.entries().push(EventEntry {
            kind,
            package: package.to_string(),
            version: version.to_string(),
            effective_at: Instant::now() + delay,
        });
    }

    /// The version carried by the most recent effective event for the
    /// pair, if any.
    pub fn active(&self, kind: EventKind, package: &str) -> Option<String> {
        self.entries()
            .iter()
            .filter(|entry| {
                entry.kind == kind && entry.package == package && entry.is_effective()
            })
            .last()
            .map(|entry| entry.version.clone())
    }

    /// Removes entries for the pair. With `future_only`, placeholders that
    /// have not become effective yet are removed and effective entries
    /// stay.
    pub fn clear(&self, kind: EventKind, package: &str, future_only: bool) {
        self.entries().retain(|entry| {
            if entry.kind != kind || entry.package != package {
                return true;
            }
            future_only && entry.is_effective()
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_add_is_effective_immediately() {
        let events = EventLog::new();
        events.add(EventKind::PreUpgrade, "Foo", "1.2.0");
        assert_eq!(
            events.active(EventKind::PreUpgrade, "Foo").as_deref(),
            Some("1.2.0")
        );
        assert_eq!(events.active(EventKind::PreUpgrade, "Bar"), None);
        assert_eq!(events.active(EventKind::Remove, "Foo"), None);
    }

    #[test]
    fn test_future_entry_becomes_effective_later() {
        let events = EventLog::new();
        events.add_future(EventKind::Install, "Foo", "1.0.0", Duration::from_millis(30));
        assert_eq!(events.active(EventKind::Install, "Foo"), None);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            events.active(EventKind::Install, "Foo").as_deref(),
            Some("1.0.0")
        );
    }

    #[test]
    fn test_clear_future_keeps_effective_entries() {
        let events = EventLog::new();
        events.add_future(EventKind::Install, "Foo", "1.0.0", Duration::from_secs(60));
        events.add(EventKind::Install, "Foo", "1.0.0");

        // The re-enable pattern: materialize the event, drop the placeholder
        events.clear(EventKind::Install, "Foo", true);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events.active(EventKind::Install, "Foo").as_deref(),
            Some("1.0.0")
        );
    }

    #[test]
    fn test_clear_removes_all_entries_for_pair() {
        let events = EventLog::new();
        events.add(EventKind::Remove, "Foo", "1.0.0");
        events.add(EventKind::Remove, "Bar", "2.0.0");

        events.clear(EventKind::Remove, "Foo", false);
        assert_eq!(events.active(EventKind::Remove, "Foo"), None);
        assert_eq!(
            events.active(EventKind::Remove, "Bar").as_deref(),
            Some("2.0.0")
        );
    }

    #[test]
    fn test_latest_entry_wins() {
        let events = EventLog::new();
        events.add(EventKind::PostUpgrade, "Foo", "1.0.0");
        events.add(EventKind::PostUpgrade, "Foo", "1.1.0");
        assert_eq!(
            events.active(EventKind::PostUpgrade, "Foo").as_deref(),
            Some("1.1.0")
        );
    }
}
