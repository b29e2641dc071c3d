use crate::board_config::LedPin;

/// Main-loop heartbeat. Counts update calls rather than ticks so a stalled
/// loop is visible as a frozen LED.
pub struct LedManager {
    led: LedPin,
    counter: u32,
    on_duration: u32,
    off_duration: u32,
}

impl LedManager {
    pub fn new(led: LedPin) -> Self {
        Self::new_with_timing(led, 50_000, 50_000)
    }

    /// on_duration / off_duration are in main-loop passes.
    pub fn new_with_timing(led: LedPin, on_duration: u32, off_duration: u32) -> Self {
        Self {
            led,
            counter: 0,
            on_duration,
            off_duration,
        }
    }

    /// Call once per main-loop pass.
    pub fn update(&mut self) {
        let cycle_length = self.on_duration + self.off_duration;
        if self.counter % cycle_length < self.on_duration {
            self.led.set_high();
        } else {
            self.led.set_low();
        }
        self.counter = self.counter.wrapping_add(1);
    }
}
