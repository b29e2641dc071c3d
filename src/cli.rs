// src/cli.rs
//
// Single-character console for bench control of the ESC. The console owns
// the commanded throttle and prints through any fmt::Write sink; motor
// actions it cannot perform itself (beeps, the ramp test, statistics) are
// returned for the main loop to execute.

use core::fmt::Write;

use crate::config::{THROTTLE_MAX, THROTTLE_MIN};

/// Throttle change per `+`/`-` keypress.
pub const THROTTLE_STEP: u16 = 50;

/// Requests the console hands back to the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Send a burst of beep commands to the ESC.
    Beep,
    /// Run the staircase throttle test.
    RampTest,
    /// Print the frame and telemetry counters.
    ShowStats,
}

pub struct Console {
    throttle: u16,
}

impl Console {
    pub fn new() -> Self {
        Self {
            throttle: THROTTLE_MIN,
        }
    }

    /// Currently commanded throttle, always within [THROTTLE_MIN,
    /// THROTTLE_MAX].
    pub fn throttle(&self) -> u16 {
        self.throttle
    }

    /// Snap back to minimum throttle, e.g. after a ramp test.
    pub fn stop(&mut self) {
        self.throttle = THROTTLE_MIN;
    }

    /// Handle one input byte. Feedback is written to `out`; the returned
    /// action, if any, is executed by the caller.
    pub fn handle_byte<W: Write>(&mut self, byte: u8, out: &mut W) -> Action {
        match byte {
            b'+' => {
                self.throttle = (self.throttle + THROTTLE_STEP).min(THROTTLE_MAX);
                writeln!(out, "throttle {}", self.throttle).ok();
                Action::None
            }
            b'-' => {
                self.throttle = self
                    .throttle
                    .saturating_sub(THROTTLE_STEP)
                    .max(THROTTLE_MIN);
                writeln!(out, "throttle {}", self.throttle).ok();
                Action::None
            }
            b'0' => {
                self.throttle = THROTTLE_MIN;
                writeln!(out, "motor stopped").ok();
                Action::None
            }
            b'b' => {
                writeln!(out, "beeping...").ok();
                Action::Beep
            }
            b't' => {
                writeln!(out, "ramp test, props off!").ok();
                Action::RampTest
            }
            b's' => Action::ShowStats,
            b'h' => {
                self.print_help(out);
                Action::None
            }
            b'\r' | b'\n' => Action::None,
            _ => {
                writeln!(out, "unknown command, 'h' for help").ok();
                Action::None
            }
        }
    }

    pub fn print_help<W: Write>(&self, out: &mut W) {
        writeln!(out, "commands:").ok();
        writeln!(out, "  +/-  throttle up/down by {}", THROTTLE_STEP).ok();
        writeln!(out, "  0    stop motor").ok();
        writeln!(out, "  b    beep").ok();
        writeln!(out, "  t    ramp test").ok();
        writeln!(out, "  s    statistics").ok();
        writeln!(out, "  h    this help").ok();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
