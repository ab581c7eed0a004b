//! Monotonic time helpers.
//!
//! `std::time::Instant` panics on `wasm32-unknown-unknown`, so browsers read
//! `Date.now()` and native builds read an `Instant` anchored at first use.
//! Readings are only meaningful relative to each other.

/// Milliseconds on the crate clock.
#[cfg(target_arch = "wasm32")]
pub fn now_ms() -> f64 {
    js_sys::Date::now()
}

/// Milliseconds since the first reading in this process.
#[cfg(not(target_arch = "wasm32"))]
pub fn now_ms() -> f64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed().as_secs_f64() * 1000.0
}

/// Measures elapsed milliseconds from its creation.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: f64,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started_at: now_ms(),
        }
    }

    pub fn started_at(&self) -> f64 {
        self.started_at
    }

    pub fn elapsed_ms(&self) -> f64 {
        (now_ms() - self.started_at).max(0.0)
    }
}
