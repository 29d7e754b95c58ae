//! Restart delays for the scan loop and duration parsing for CLI options.

use std::time::Duration;

/// Capped exponential backoff.
///
/// The first failure waits `initial`, every following consecutive failure
/// doubles the delay up to `max`. [`Backoff::reset`] starts over after a scan
/// window completes normally.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
}

/// Default delay after the first failed scan.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

impl Backoff {
    /// Create a backoff starting at `initial` and never exceeding `max`.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use ble_sensor_exporter::backoff::Backoff;
    ///
    /// let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(3));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    /// ```
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            initial: initial.min(max),
            max,
            failures: 0,
        }
    }

    /// Register a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.failures = self.failures.saturating_add(1);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use ble_sensor_exporter::backoff::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s"
    let units: [(&str, fn(u64) -> Duration); 4] = [
        ("ms", Duration::from_millis),
        ("h", |n| Duration::from_secs(n * 3600)),
        ("m", |n| Duration::from_secs(n * 60)),
        ("s", Duration::from_secs),
    ];

    for (suffix, to_duration) in units {
        if let Some(num) = src.strip_suffix(suffix) {
            let value: u64 = num
                .trim()
                .parse()
                .map_err(|_| format!("invalid duration: {}", src))?;
            return Ok(to_duration(value));
        }
    }

    // No suffix, treat as seconds
    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    Ok(Duration::from_secs(secs))
}
