use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Rate-limits the bridge-level debug log for malformed/unrecognized upstream
/// events (spec.md §7: "at most one log per method per 30s, with a
/// suppressed-count rollup").
#[derive(Debug, Default)]
pub struct ThrottledLogger {
    window: Duration,
    last_logged: HashMap<String, (Instant, u64)>,
}

impl ThrottledLogger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_logged: HashMap::new(),
        }
    }

    /// Records an occurrence for `key` and returns `Some(suppressed_count)`
    /// when the caller should actually emit a log line this time (the
    /// suppressed count covers everything dropped since the last emission).
    pub fn should_log(&mut self, key: &str) -> Option<u64> {
        let now = Instant::now();
        match self.last_logged.get_mut(key) {
            Some((last, suppressed)) if now.duration_since(*last) < self.window => {
                *suppressed += 1;
                None
            }
            Some((last, suppressed)) => {
                let rollup = *suppressed;
                *last = now;
                *suppressed = 0;
                Some(rollup)
            }
            None => {
                self.last_logged.insert(key.to_string(), (now, 0));
                Some(0)
            }
        }
    }
}
