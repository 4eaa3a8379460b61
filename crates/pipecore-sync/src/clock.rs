//! Monotonic microsecond clock.

/// Current monotonic time in microseconds.
///
/// On Unix this reads `CLOCK_MONOTONIC`, so the value counts from an
/// arbitrary fixed point (usually boot) and is comfortably positive as soon
/// as the process runs.
#[cfg(unix)]
pub fn time_ticks_now() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is
    // supported on every Unix target we build for.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return fallback::time_ticks_now();
    }
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000)
        .saturating_add(ts.tv_nsec as u64 / 1_000)
}

/// Current monotonic time in microseconds.
#[cfg(not(unix))]
pub fn time_ticks_now() -> u64 {
    fallback::time_ticks_now()
}

mod fallback {
    use std::sync::OnceLock;
    use std::time::Instant;

    // Offset keeps early readings clear of the "uninitialised" range near zero.
    const BASE_TICKS: u64 = 1_000_000;

    static ANCHOR: OnceLock<Instant> = OnceLock::new();

    pub(super) fn time_ticks_now() -> u64 {
        let anchor = ANCHOR.get_or_init(Instant::now);
        let elapsed = u64::try_from(anchor.elapsed().as_micros()).unwrap_or(u64::MAX);
        BASE_TICKS.saturating_add(elapsed)
    }
}
