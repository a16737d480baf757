use chrono::{DateTime, Local, NaiveDate, Utc};

/// Wall-clock abstraction in float unix seconds.
///
/// Timer and alarm arithmetic all goes through this trait so tests can pin
/// time to known values.
pub trait Clock {
    fn now_unix(&self) -> f64;

    /// Local wall-clock time as a chrono value.
    fn now_local(&self) -> DateTime<Local> {
        unix_to_local(self.now_unix())
    }

    /// Current local calendar date.
    fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }

    /// ISO8601 timestamp for history/annotation entries.
    fn now_iso(&self) -> String {
        self.now_local().to_rfc3339()
    }

    /// Human display stamp stored in `localTime` on new tasks.
    fn local_stamp(&self) -> String {
        self.now_local().format("%Y-%m-%d %H:%M:%S %Z").to_string()
    }
}

/// Convert float unix seconds to a local chrono time for display.
pub fn unix_to_local(secs: f64) -> DateTime<Local> {
    let millis = (secs * 1000.0) as i64;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .with_timezone(&Local)
}

/// Real wall clock with an operator-applied manual offset, settable from
/// the CLI to rehearse day rollovers and alarm times.
#[derive(Debug, Clone, Default)]
pub struct SystemClock {
    offset_secs: f64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manual_offset(&mut self, offset_secs: f64) {
        self.offset_secs = offset_secs;
    }
}

impl Clock for SystemClock {
    fn now_unix(&self) -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0 + self.offset_secs
    }
}

/// Clock pinned to a settable instant, shared across engine and scheduler
/// in tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct FixedClock(pub std::rc::Rc<std::cell::Cell<f64>>);

#[cfg(test)]
impl FixedClock {
    pub fn at(secs: f64) -> Self {
        Self(std::rc::Rc::new(std::cell::Cell::new(secs)))
    }

    pub fn set(&self, secs: f64) {
        self.0.set(secs);
    }

    pub fn advance(&self, secs: f64) {
        self.0.set(self.0.get() + secs);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now_unix(&self) -> f64 {
        self.0.get()
    }
}
