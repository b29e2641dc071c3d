// src/config.rs

/// DShot output speed. Every bit timing in the driver derives from this
/// value and the timer kernel clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DshotSpeed {
    Dshot150,
    Dshot300,
    Dshot600,
    Dshot1200,
}

impl DshotSpeed {
    /// Command bitrate in bits per second.
    pub const fn bitrate(self) -> u32 {
        match self {
            DshotSpeed::Dshot150 => 150_000,
            DshotSpeed::Dshot300 => 300_000,
            DshotSpeed::Dshot600 => 600_000,
            DshotSpeed::Dshot1200 => 1_200_000,
        }
    }

    /// Timer ticks for one command bit at `timer_hz`.
    pub const fn bit_period(self, timer_hz: u32) -> u32 {
        timer_hz / self.bitrate()
    }

    /// The ESC replies at 5/4 of the command bitrate.
    pub const fn reply_bitrate(self) -> u32 {
        self.bitrate() / 4 * 5
    }

    /// Timer ticks for one reply bit at `timer_hz`.
    pub const fn reply_bit_period(self, timer_hz: u32) -> u32 {
        timer_hz / self.reply_bitrate()
    }
}

/// Selected DShot speed for this build.
pub const DSHOT_SPEED: DshotSpeed = DshotSpeed::Dshot600;

/// TIM1 kernel clock. With SYSCLK at 168 MHz and the APB2 prescaler at /2
/// the timer runs at the full system clock.
pub const TIMER_CLOCK_HZ: u32 = 168_000_000;

/// Magnet count of the motor. Mechanical rpm = eRPM * 2 / MOTOR_POLES.
pub const MOTOR_POLES: u32 = 14;

/// SysTick rate. All driver timeouts are expressed in these ticks.
pub const TICK_HZ: u32 = 1_000;

/// Ticks to wait after the frame goes out before arming reply capture.
pub const REPLY_DELAY_TICKS: u32 = 1;

/// Ticks after which a pending reply is abandoned and counted as an error.
pub const REPLY_WINDOW_TICKS: u32 = 2;

/// Input-capture sample buffer depth. A full 21-bit reply produces at most
/// 22 edges.
pub const CAPTURE_BUF_LEN: usize = 32;

/// Lowest armed throttle value. 0-47 are reserved for commands.
pub const THROTTLE_MIN: u16 = 48;

/// Full throttle.
pub const THROTTLE_MAX: u16 = 2047;

/// ESC serial telemetry line rate (KISS/BLHeli32), 8-N-1.
pub const SERIAL_TELEM_BAUD: u32 = 115_200;

/// Ticks of inter-byte silence after which a partial telemetry packet is
/// discarded.
pub const SERIAL_TELEM_TIMEOUT_TICKS: u32 = 100;

/// Per-channel driver configuration, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct DshotConfig {
    pub speed: DshotSpeed,
    pub timer_hz: u32,
    /// Inverted wire polarity with rpm telemetry on the signal line. When
    /// false the line is plain DShot and rotor data comes from the serial
    /// telemetry input instead.
    pub bidirectional: bool,
    pub motor_poles: u32,
}

impl Default for DshotConfig {
    fn default() -> Self {
        Self {
            speed: DSHOT_SPEED,
            timer_hz: TIMER_CLOCK_HZ,
            bidirectional: true,
            motor_poles: MOTOR_POLES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dshot600_timings_at_168mhz() {
        let speed = DshotSpeed::Dshot600;
        assert_eq!(speed.bit_period(TIMER_CLOCK_HZ), 280);
        assert_eq!(speed.reply_bitrate(), 750_000);
        assert_eq!(speed.reply_bit_period(TIMER_CLOCK_HZ), 224);
    }

    #[test]
    fn test_reply_rate_is_five_fourths() {
        for speed in [
            DshotSpeed::Dshot150,
            DshotSpeed::Dshot300,
            DshotSpeed::Dshot600,
            DshotSpeed::Dshot1200,
        ] {
            assert_eq!(speed.reply_bitrate() * 4, speed.bitrate() * 5);
        }
    }

    #[test]
    fn test_capture_buffer_fits_worst_case_reply() {
        // 21 bits alternating at every position produce 22 edges.
        assert!(CAPTURE_BUF_LEN >= 22);
    }
}
