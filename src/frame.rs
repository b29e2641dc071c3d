// src/frame.rs
//
// DShot frame construction: an 11-bit value, the telemetry request bit and
// a 4-bit checksum, encoded MSB first into per-bit compare (duty) values
// for the timer DMA buffer.

use crate::config::{DshotSpeed, THROTTLE_MAX};

/// Bits in a command frame.
pub const FRAME_BITS: usize = 16;

/// DMA slots per frame: 16 data bits plus one trailing slot that parks the
/// line at its idle level.
pub const SLOT_COUNT: usize = FRAME_BITS + 1;

/// Highest command code. 48..=2047 are throttle.
pub const CMD_MAX: u16 = 47;

/// Special command codes, sent with the value field below 48.
///
/// Most of these only take effect while the motor is stopped, and several
/// (spin direction, 3D mode, save) must be repeated to be accepted by the
/// ESC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    MotorStop = 0,
    Beep1 = 1,
    Beep2 = 2,
    Beep3 = 3,
    Beep4 = 4,
    Beep5 = 5,
    EscInfo = 6,
    SpinDir1 = 7,
    SpinDir2 = 8,
    Mode3dOff = 9,
    Mode3dOn = 10,
    SettingsRequest = 11,
    SaveSettings = 12,
    ExtendedTelemetryEnable = 13,
    ExtendedTelemetryDisable = 14,
}

/// Per-bit compare values for a given speed and timer clock.
///
/// A zero bit is high for 3/8 of the bit period, a one bit for 3/4. The
/// inverted (bidirectional) encoding substitutes `period - duty`.
#[derive(Debug, Clone, Copy)]
pub struct BitTiming {
    pub period: u16,
    pub duty_zero: u16,
    pub duty_one: u16,
}

impl BitTiming {
    pub const fn new(speed: DshotSpeed, timer_hz: u32) -> Self {
        let period = speed.bit_period(timer_hz);
        Self {
            period: period as u16,
            duty_zero: (period * 3 / 8) as u16,
            duty_one: (period * 3 / 4) as u16,
        }
    }
}

/// Assemble the 16-bit frame for `value`, clamping anything above the
/// throttle ceiling. The checksum is the XOR of the three payload nibbles.
pub fn make_frame(value: u16, request_telemetry: bool) -> u16 {
    let value = if value > THROTTLE_MAX { THROTTLE_MAX } else { value };
    let packet = (value << 1) | request_telemetry as u16;
    let crc = (packet ^ (packet >> 4) ^ (packet >> 8)) & 0x0F;
    (packet << 4) | crc
}

/// Recover `(value, telemetry)` from a frame, or `None` when the checksum
/// does not match.
pub fn parse_frame(frame: u16) -> Option<(u16, bool)> {
    let packet = frame >> 4;
    let crc = (packet ^ (packet >> 4) ^ (packet >> 8)) & 0x0F;
    if crc != frame & 0x0F {
        return None;
    }
    Some((packet >> 1, packet & 1 != 0))
}

/// Encode a frame into the 17-slot compare buffer, MSB first.
///
/// In the inverted encoding the trailing slot holds the full period so the
/// line idles high between frames; in the normal encoding it is zero.
pub fn encode_slots(frame: u16, timing: BitTiming, inverted: bool, slots: &mut [u16; SLOT_COUNT]) {
    for (i, slot) in slots[..FRAME_BITS].iter_mut().enumerate() {
        let duty = if (frame >> (FRAME_BITS - 1 - i)) & 1 == 1 {
            timing.duty_one
        } else {
            timing.duty_zero
        };
        *slot = if inverted { timing.period - duty } else { duty };
    }
    slots[FRAME_BITS] = if inverted { timing.period } else { 0 };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DshotSpeed, TIMER_CLOCK_HZ};

    fn timing() -> BitTiming {
        BitTiming::new(DshotSpeed::Dshot600, TIMER_CLOCK_HZ)
    }

    #[test]
    fn test_frame_throttle_1046_with_telemetry() {
        // packet = (1046 << 1) | 1 = 0x82D, crc = 8 ^ 2 ^ D = 7
        assert_eq!(make_frame(1046, true), 0x82D7);
    }

    #[test]
    fn test_frame_motor_stop() {
        assert_eq!(make_frame(Command::MotorStop as u16, false), 0x0000);
    }

    #[test]
    fn test_frame_nibbles_xor_to_zero() {
        for value in 0..=THROTTLE_MAX {
            for telemetry in [false, true] {
                let frame = make_frame(value, telemetry);
                let folded =
                    (frame ^ (frame >> 4) ^ (frame >> 8) ^ (frame >> 12)) & 0x0F;
                assert_eq!(folded, 0, "frame {frame:#06x}");
            }
        }
    }

    #[test]
    fn test_frame_round_trip() {
        for value in 0..=THROTTLE_MAX {
            for telemetry in [false, true] {
                let frame = make_frame(value, telemetry);
                assert_eq!(parse_frame(frame), Some((value, telemetry)));
            }
        }
    }

    #[test]
    fn test_parse_rejects_bad_crc() {
        let frame = make_frame(1046, true);
        assert_eq!(parse_frame(frame ^ 0x0001), None);
    }

    #[test]
    fn test_overrange_value_clamps_to_full_throttle() {
        assert_eq!(make_frame(2100, true), make_frame(THROTTLE_MAX, true));
    }

    #[test]
    fn test_encode_throttle_1046_normal_polarity() {
        // 0x82D7 = 1000 0010 1101 0111
        let mut slots = [0u16; SLOT_COUNT];
        encode_slots(0x82D7, timing(), false, &mut slots);
        let expected = [
            210, 105, 105, 105, 105, 105, 210, 105, 210, 210, 105, 210, 105,
            210, 210, 210, 0,
        ];
        assert_eq!(slots, expected);
    }

    #[test]
    fn test_encode_motor_stop_is_all_zero_bits() {
        let mut slots = [0u16; SLOT_COUNT];
        encode_slots(make_frame(0, false), timing(), false, &mut slots);
        for slot in &slots[..FRAME_BITS] {
            assert_eq!(*slot, 105);
        }
        assert_eq!(slots[FRAME_BITS], 0);
    }

    #[test]
    fn test_encode_inverted_mirrors_duties() {
        let t = timing();
        let frame = make_frame(1046, true);
        let mut normal = [0u16; SLOT_COUNT];
        let mut inverted = [0u16; SLOT_COUNT];
        encode_slots(frame, t, false, &mut normal);
        encode_slots(frame, t, true, &mut inverted);
        for i in 0..FRAME_BITS {
            assert_eq!(inverted[i], t.period - normal[i]);
        }
        assert_eq!(inverted[FRAME_BITS], t.period);
    }

    #[test]
    fn test_duty_ratios_within_tolerance() {
        // 37.5% and 75% of the bit period, within 5% either way.
        let t = timing();
        let p = t.period as f32;
        assert!((t.duty_zero as f32 / p - 0.375).abs() < 0.05 * 0.375);
        assert!((t.duty_one as f32 / p - 0.75).abs() < 0.05 * 0.75);
    }
}
