use chrono::{DateTime, Utc};

/// Injectable time source.
///
/// Cache expiry and server-assigned timestamps read the clock through this
/// trait so tests can pin time deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
