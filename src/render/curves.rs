//! Brightness curves, all integer math over milliseconds.
//!
//! Each function maps elapsed time to a brightness in `0..=255` that the
//! engine applies to the target color with [`crate::color::dim`].

/// Length of the suppressed-message flash shown while asleep.
pub const FLASH_DURATION_MS: u32 = 3_000;

/// Heartbeat period while a hold persists.
pub const HEARTBEAT_PERIOD_MS: u32 = 1_500;

/// Resting brightness between heartbeat pulses.
pub const HEARTBEAT_FLOOR: u8 = 40;

const FLASH_RISE_MS: u32 = 300;

/// Fade-out for the Active/Asleep modes: full brightness at activation,
/// monotonically down to zero at `duration_ms`. Quadratic ease-out, so the
/// lamp spends most of the window visibly lit and dies away gently.
///
/// Recomputed from elapsed time on every tick; restarting the curve is just
/// resetting its epoch.
pub fn fade(elapsed_ms: u64, duration_ms: u32) -> u8 {
    if duration_ms == 0 || elapsed_ms >= duration_ms as u64 {
        return 0;
    }
    let remaining = duration_ms as u64 - elapsed_ms;
    let d = duration_ms as u64;
    ((255 * remaining * remaining) / (d * d)) as u8
}

/// Lub-dub double pulse: a strong beat, a weaker echo, then rest until the
/// period wraps. Runs forever; the hold it renders has no fixed end.
pub fn heartbeat(elapsed_ms: u64) -> u8 {
    let phase = (elapsed_ms % HEARTBEAT_PERIOD_MS as u64) as u32;
    match phase {
        0..=149 => ramp(phase, 0, 150, HEARTBEAT_FLOOR, 255),
        150..=399 => ramp(phase, 150, 400, 255, HEARTBEAT_FLOOR),
        400..=549 => ramp(phase, 400, 550, HEARTBEAT_FLOOR, 200),
        550..=849 => ramp(phase, 550, 850, 200, HEARTBEAT_FLOOR),
        _ => HEARTBEAT_FLOOR,
    }
}

/// Suppressed-message flash: fast rise to full, then a steady fall back to
/// zero at the 3 second mark.
pub fn flash(elapsed_ms: u64) -> u8 {
    if elapsed_ms >= FLASH_DURATION_MS as u64 {
        return 0;
    }
    let phase = elapsed_ms as u32;
    if phase < FLASH_RISE_MS {
        ramp(phase, 0, FLASH_RISE_MS, 0, 255)
    } else {
        ramp(phase, FLASH_RISE_MS, FLASH_DURATION_MS, 255, 0)
    }
}

/// Linear interpolation of brightness across a phase segment.
fn ramp(phase: u32, start: u32, end: u32, from: u8, to: u8) -> u8 {
    let span = (end - start) as i32;
    let pos = (phase - start) as i32;
    let from = from as i32;
    let to = to as i32;
    (from + (to - from) * pos / span) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_starts_full_and_ends_dark() {
        assert_eq!(fade(0, 10_000), 255);
        assert_eq!(fade(10_000, 10_000), 0);
        assert_eq!(fade(20_000, 10_000), 0);
    }

    #[test]
    fn fade_is_monotonically_decreasing() {
        let duration = 900_000;
        let mut previous = 255;
        for elapsed in (0..=duration as u64).step_by(5_000) {
            let level = fade(elapsed, duration);
            assert!(level <= previous, "brightness rose at t={elapsed}");
            previous = level;
        }
    }

    #[test]
    fn fade_restart_returns_to_full() {
        // Restarting is a fresh epoch: elapsed 0 is always full brightness,
        // however deep into the previous fade the lamp was.
        assert!(fade(800_000, 900_000) < 10);
        assert_eq!(fade(0, 900_000), 255);
    }

    #[test]
    fn heartbeat_is_periodic_and_bounded() {
        for t in (0..6_000).step_by(37) {
            let level = heartbeat(t);
            assert!(level >= HEARTBEAT_FLOOR);
            assert_eq!(level, heartbeat(t + HEARTBEAT_PERIOD_MS as u64));
        }
    }

    #[test]
    fn heartbeat_peaks_then_rests() {
        assert_eq!(heartbeat(150), 255);
        assert_eq!(heartbeat(1_000), HEARTBEAT_FLOOR);
    }

    #[test]
    fn flash_rises_peaks_and_expires() {
        assert_eq!(flash(0), 0);
        assert_eq!(flash(300), 255);
        assert!(flash(1_500) > 0);
        assert_eq!(flash(3_000), 0);
    }
}
