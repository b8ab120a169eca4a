//! In-process [`Navigator`] for headless use and tests.

use labdesk_types::{Navigator, traits::RETURN_PATH_KEY};
use std::{collections::HashMap, sync::Mutex};

/// Tracks a current location and a session key-value map in memory.
///
/// Every navigation is recorded so callers can inspect where an expired
/// session was sent.
pub struct InMemoryNavigator {
    location: Mutex<String>,
    history: Mutex<Vec<String>>,
    session: Mutex<HashMap<String, String>>,
}

impl InMemoryNavigator {
    /// Creates a navigator positioned at `location`.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: Mutex::new(location.into()),
            history: Mutex::new(Vec::new()),
            session: Mutex::new(HashMap::new()),
        }
    }

    /// All navigation targets, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }

    /// Reads a session value without removing it.
    #[must_use]
    pub fn session_value(&self, key: &str) -> Option<String> {
        self.session.lock().unwrap().get(key).cloned()
    }
}

impl Navigator for InMemoryNavigator {
    fn current_location(&self) -> String {
        self.location.lock().unwrap().clone()
    }

    fn navigate(&self, target: &str) {
        tracing::info!(to = target, "navigating");
        target.clone_into(&mut self.location.lock().unwrap());
        self.history.lock().unwrap().push(target.to_string());
    }

    fn save_return_path(&self, location: &str) {
        self.session
            .lock()
            .unwrap()
            .insert(RETURN_PATH_KEY.to_string(), location.to_string());
    }

    fn take_return_path(&self) -> Option<String> {
        self.session.lock().unwrap().remove(RETURN_PATH_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_updates_location_and_history() {
        let nav = InMemoryNavigator::new("/projects");
        assert_eq!(nav.current_location(), "/projects");
        nav.navigate("/login?session_expired=true");
        assert_eq!(nav.current_location(), "/login?session_expired=true");
        assert_eq!(nav.history(), vec!["/login?session_expired=true"]);
    }

    #[test]
    fn test_return_path_is_taken_once() {
        let nav = InMemoryNavigator::new("/");
        nav.save_return_path("/ideas");
        assert_eq!(nav.session_value(RETURN_PATH_KEY).as_deref(), Some("/ideas"));
        assert_eq!(nav.take_return_path().as_deref(), Some("/ideas"));
        assert!(nav.take_return_path().is_none());
    }
}
