//! Small helpers shared by the compiler modules: time-to-tick conversion, channel name
//! parsing and a profiling timer.
use std::time::Instant;

/// Products `t * samp_rate` closer than this to an integer are treated as that integer.
///
/// Times are supplied as `f64` seconds, so a nominal edge at `0.3 s` on a `1 kHz` clock
/// may evaluate to `299.99999999999994` ticks. Without snapping it would floor to 299.
pub const TICK_SNAP_TOL: f64 = 1e-6;

/// NI cards refuse to generate buffers shorter than 2 samples.
pub const MIN_TOTAL_SAMPS: usize = 2;

/// Converts a non-negative time (seconds) into a clock tick of a `samp_rate` grid.
///
/// The conversion rounds toward zero; products within [`TICK_SNAP_TOL`] of an integer
/// snap to that integer first.
///
/// ```
/// # use nicompiler_backend::utils::time_to_tick;
/// assert_eq!(time_to_tick(1e-3, 1e6), 1000);
/// assert_eq!(time_to_tick(0.3, 1e3), 300);
/// // 0.2 s on a 123 Sa/s grid is 24.6 ticks
/// assert_eq!(time_to_tick(0.2, 123.0), 24);
/// ```
pub fn time_to_tick(t: f64, samp_rate: f64) -> usize {
    let x = t * samp_rate;
    let nearest = x.round();
    if (x - nearest).abs() < TICK_SNAP_TOL {
        nearest.max(0.0) as usize
    } else {
        x.floor().max(0.0) as usize
    }
}

/// Parses a line channel name of the form `port<P>/line<L>` (e.g. `port0/line32`) into
/// `(P, L)`. Returns `None` for anything else.
pub fn extract_port_line_numbers(chan: &str) -> Option<(usize, usize)> {
    let (port_part, line_part) = chan.split_once('/')?;
    let port = port_part.strip_prefix("port")?.parse::<usize>().ok()?;
    let line = line_part.strip_prefix("line")?.parse::<usize>().ok()?;
    Some((port, line))
}

/// Utility for time-tracking, reports through the `log` facade.
pub struct TickTimer {
    last: Instant,
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Milliseconds since construction or the previous tick.
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let diff = now.duration_since(self.last).as_secs_f64() * 1e3;
        self.last = now;
        diff
    }

    pub fn tick_print(&mut self, msg: &str) -> f64 {
        let diff = self.tick();
        log::debug!("{msg}: {diff:.3} ms");
        diff
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tick_snapping() {
        assert_eq!(time_to_tick(0.0, 1e6), 0);
        assert_eq!(time_to_tick(2e-6, 1e6), 2);
        // 0.1 + 0.2 = 0.30000000000000004
        assert_eq!(time_to_tick(0.1 + 0.2, 1e3), 300);
        // Genuinely fractional products round toward zero
        assert_eq!(time_to_tick(0.1, 123.0), 12);
        assert_eq!(time_to_tick(0.3, 123.0), 36);
        assert_eq!(time_to_tick(1.0, 123.0), 123);
    }

    #[test]
    fn port_line_parsing() {
        assert_eq!(extract_port_line_numbers("port0/line32"), Some((0, 32)));
        assert_eq!(extract_port_line_numbers("port12/line3"), Some((12, 3)));
        assert_eq!(extract_port_line_numbers("port0"), None);
        assert_eq!(extract_port_line_numbers("ao0"), None);
        assert_eq!(extract_port_line_numbers("port/line1"), None);
    }
}
