//! Quiet-window controller turning rapid input changes into throttled
//! query-rebuild triggers.

/// Debounced input state over caller-supplied millisecond timestamps.
///
/// The latest value is recorded immediately so callers can echo it; the
/// trigger fires only once the window has elapsed with no further input, and
/// every new input restarts the window.
#[derive(Debug, Clone)]
pub struct DebouncedInput {
    window_ms: u64,
    latest: String,
    deadline_ms: Option<u64>,
}

impl DebouncedInput {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            latest: String::new(),
            deadline_ms: None,
        }
    }

    /// Record a new value and restart the quiet window.
    pub fn on_input(&mut self, text: impl Into<String>, now_ms: u64) {
        self.latest = text.into();
        self.deadline_ms = Some(now_ms.saturating_add(self.window_ms));
    }

    /// Latest recorded value, regardless of whether the trigger has fired.
    pub fn latest(&self) -> &str {
        &self.latest
    }

    /// Pending trigger time, when armed.
    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// Yield the effective value if the quiet window has elapsed.
    ///
    /// At most one trigger fires per quiet period; firing disarms the
    /// deadline until the next input.
    pub fn fire(&mut self, now_ms: u64) -> Option<String> {
        let deadline = self.deadline_ms?;
        if now_ms < deadline {
            return None;
        }
        self.deadline_ms = None;
        Some(self.latest.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_latest_value_immediately() {
        let mut input = DebouncedInput::new(500);
        input.on_input("a", 0);
        assert_eq!(input.latest(), "a");
        input.on_input("ab", 10);
        assert_eq!(input.latest(), "ab");
    }

    #[test]
    fn rapid_inputs_collapse_into_one_trigger() {
        let mut input = DebouncedInput::new(500);
        input.on_input("a", 0);
        input.on_input("ab", 100);
        input.on_input("abc", 200);

        assert_eq!(input.fire(400), None);
        assert_eq!(input.fire(699), None);
        assert_eq!(input.fire(700), Some("abc".to_owned()));
        assert_eq!(input.fire(701), None);
    }

    #[test]
    fn new_input_restarts_the_window() {
        let mut input = DebouncedInput::new(500);
        input.on_input("a", 0);
        input.on_input("b", 499);
        assert_eq!(input.fire(500), None);
        assert_eq!(input.deadline_ms(), Some(999));
        assert_eq!(input.fire(999), Some("b".to_owned()));
    }

    #[test]
    fn never_fires_without_input() {
        let mut input = DebouncedInput::new(500);
        assert_eq!(input.fire(10_000), None);
        assert_eq!(input.deadline_ms(), None);
    }
}
