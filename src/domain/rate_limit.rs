// Client-side rate ceiling over a 60 second window
const WINDOW_MS: i64 = 60_000;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_per_window: u32,
    window_start_ms: Option<i64>,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_window: max_per_minute,
            window_start_ms: None,
            count: 0,
        }
    }

    /// Returns false once the current window has reached the ceiling.
    /// Call once per would-be-emitted point.
    pub fn allow(&mut self, now_ms: i64) -> bool {
        let expired = self
            .window_start_ms
            .is_none_or(|start| now_ms - start >= WINDOW_MS);
        if expired {
            self.window_start_ms = Some(now_ms);
            self.count = 0;
        }

        if self.count >= self.max_per_window {
            return false;
        }
        self.count += 1;
        true
    }
}
