// src/telemetry.rs
//
// Reassembler for the KISS/BLHeli32 serial telemetry stream: fixed 10-byte
// packets at 115200 8-N-1, big-endian fields, CRC-8 over the first nine
// bytes. A stalled partial packet is dropped after the inter-byte timeout
// so the parser re-synchronizes on the next packet boundary.

use heapless::Vec;

use crate::config::{MOTOR_POLES, SERIAL_TELEM_TIMEOUT_TICKS};

/// Wire size of one telemetry packet.
pub const PACKET_LEN: usize = 10;

/// Latest decoded ESC telemetry, fixed-point as received off the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscTelemetry {
    /// Temperature in degrees C.
    pub temperature_c: u8,
    /// Voltage in 0.01 V units.
    pub voltage_cv: u16,
    /// Current in 0.01 A units.
    pub current_ca: u16,
    /// Consumed charge in mAh.
    pub consumption_mah: u16,
    /// Electrical rpm divided by 100, as sent by the ESC.
    pub erpm_div100: u16,
    /// Shaft rpm derived from the erpm field and the motor pole count.
    pub rpm: u32,
    pub valid: bool,
    pub last_update: u32,
}

impl EscTelemetry {
    /// Voltage in volts, for display only.
    pub fn voltage_v(&self) -> f32 {
        self.voltage_cv as f32 / 100.0
    }

    /// Current in amps, for display only.
    pub fn current_a(&self) -> f32 {
        self.current_ca as f32 / 100.0
    }
}

/// CRC-8 with polynomial 0xD5, zero init, MSB first.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0xD5
            } else {
                crc << 1
            };
        }
    }
    crc
}

pub struct TelemetryParser {
    buf: Vec<u8, PACKET_LEN>,
    last_byte_tick: u32,
    data: EscTelemetry,
    fresh: bool,
}

impl TelemetryParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            last_byte_tick: 0,
            data: EscTelemetry::default(),
            fresh: false,
        }
    }

    /// Append one received byte. A gap longer than the timeout discards
    /// the partial packet before the byte is buffered. On the tenth byte
    /// the packet is checked and either published or dropped.
    pub fn feed_byte(&mut self, byte: u8, now: u32) {
        if !self.buf.is_empty()
            && now.wrapping_sub(self.last_byte_tick) > SERIAL_TELEM_TIMEOUT_TICKS
        {
            self.buf.clear();
        }
        self.last_byte_tick = now;

        // Cannot overflow: the buffer is drained whenever it reaches the
        // packet size.
        let _ = self.buf.push(byte);

        if self.buf.is_full() {
            if let Some(data) = parse_packet(&self.buf, now) {
                self.data = data;
                self.fresh = true;
            }
            self.buf.clear();
        }
    }

    /// Drop any partial packet, e.g. after a receiver overrun.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn latest(&self) -> &EscTelemetry {
        &self.data
    }

    /// One-shot flag: true once per newly parsed packet.
    pub fn take_fresh(&mut self) -> bool {
        let fresh = self.fresh;
        self.fresh = false;
        fresh
    }
}

impl Default for TelemetryParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_packet(bytes: &[u8], now: u32) -> Option<EscTelemetry> {
    if crc8(&bytes[..PACKET_LEN - 1]) != bytes[PACKET_LEN - 1] {
        return None;
    }

    let erpm_div100 = u16::from_be_bytes([bytes[7], bytes[8]]);
    Some(EscTelemetry {
        temperature_c: bytes[0],
        voltage_cv: u16::from_be_bytes([bytes[1], bytes[2]]),
        current_ca: u16::from_be_bytes([bytes[3], bytes[4]]),
        consumption_mah: u16::from_be_bytes([bytes[5], bytes[6]]),
        erpm_div100,
        rpm: erpm_div100 as u32 * 100 * 2 / MOTOR_POLES,
        valid: true,
        last_update: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> [u8; PACKET_LEN] {
        let mut packet = [0x2A, 0x05, 0xC8, 0x00, 0xFA, 0x00, 0x7F, 0x00, 0x64, 0x00];
        packet[9] = crc8(&packet[..9]);
        packet
    }

    #[test]
    fn test_crc8_known_vectors() {
        assert_eq!(crc8(&[]), 0);
        assert_eq!(crc8(&[0x00]), 0);
        // A lone 1-bit shifts out and folds back in as the polynomial.
        assert_eq!(crc8(&[0x01]), 0xD5);
    }

    #[test]
    fn test_parse_sample_packet() {
        let mut parser = TelemetryParser::new();
        for byte in sample_packet() {
            parser.feed_byte(byte, 5);
        }
        assert!(parser.take_fresh());
        let data = parser.latest();
        assert!(data.valid);
        assert_eq!(data.temperature_c, 42);
        assert_eq!(data.voltage_cv, 1480);
        assert_eq!(data.current_ca, 250);
        assert_eq!(data.consumption_mah, 127);
        assert_eq!(data.erpm_div100, 100);
        assert_eq!(data.rpm, 1428);
        assert_eq!(data.last_update, 5);
        assert!((data.voltage_v() - 14.80).abs() < 0.001);
        assert!((data.current_a() - 2.50).abs() < 0.001);
    }

    #[test]
    fn test_fresh_flag_is_one_shot() {
        let mut parser = TelemetryParser::new();
        for byte in sample_packet() {
            parser.feed_byte(byte, 0);
        }
        assert!(parser.take_fresh());
        assert!(!parser.take_fresh());
    }

    #[test]
    fn test_bad_crc_drops_packet() {
        let mut packet = sample_packet();
        packet[9] ^= 0xFF;
        let mut parser = TelemetryParser::new();
        for byte in packet {
            parser.feed_byte(byte, 0);
        }
        assert!(!parser.take_fresh());
        assert!(!parser.latest().valid);
        // The parser is back in sync for the next packet.
        for byte in sample_packet() {
            parser.feed_byte(byte, 1);
        }
        assert!(parser.take_fresh());
    }

    #[test]
    fn test_inter_byte_timeout_resets_buffer() {
        let packet = sample_packet();
        let mut parser = TelemetryParser::new();
        // A packet that stalls after three bytes.
        for byte in &packet[..3] {
            parser.feed_byte(*byte, 0);
        }
        // Much later, a complete packet arrives. Without the reset the
        // stale prefix would misframe it.
        for byte in packet {
            parser.feed_byte(byte, 200);
        }
        assert!(parser.take_fresh());
        assert_eq!(parser.latest().rpm, 1428);
    }

    #[test]
    fn test_reset_discards_partial_packet() {
        let packet = sample_packet();
        let mut parser = TelemetryParser::new();
        for byte in &packet[..7] {
            parser.feed_byte(*byte, 0);
        }
        parser.reset();
        for byte in packet {
            parser.feed_byte(byte, 1);
        }
        assert!(parser.take_fresh());
    }
}
