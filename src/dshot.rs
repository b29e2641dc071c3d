// src/dshot.rs
//
// Protocol state machine for a single DShot channel. Frames go out through
// the pulse engine; in bidirectional mode the same pin is turned around
// after each frame to capture the ESC's GCR rpm reply.
//
// The driver is cooperative: `poll` advances the state machine from the
// main loop, while the two DMA-complete interrupts only acknowledge the
// hardware and feed `on_pulse_done` / `on_capture_done`. Nothing here
// blocks and nothing is raised to the caller; failures only show up in the
// counters.

use crate::config::{DshotConfig, REPLY_DELAY_TICKS, REPLY_WINDOW_TICKS};
use crate::frame::{self, BitTiming, Command, SLOT_COUNT};
use crate::gcr;

/// Edges needed before a reply is worth decoding early.
const EDGES_READY: usize = 20;

/// Hardware seam for one signal line: pulse generation, pin direction and
/// edge capture on a shared timer channel.
pub trait EscLink {
    /// Clock out the 17-slot compare sequence once. Must wait for any
    /// previous transfer to be disarmed before touching the buffer.
    fn start_pulses(&mut self, slots: &[u16; SLOT_COUNT]);
    /// Compare output: push-pull, no pull, alternate function.
    fn set_output(&mut self);
    /// Input capture on both edges with the internal pull-up, so the
    /// released line reads high.
    fn set_input(&mut self);
    /// Arm edge capture into the link-owned sample buffer.
    fn start_capture(&mut self);
    /// Disarm capture and hand back the samples recorded so far.
    fn stop_capture(&mut self) -> &[u16];
    /// Samples recorded so far while capture is running.
    fn capture_count(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Sending,
    WaitReply,
    Receiving,
    Processing,
}

/// Rotor telemetry decoded from the wire reply, plus frame bookkeeping.
///
/// The rpm fields are only rewritten on a good decode; a failed reply
/// leaves the previous record in place and bumps `errors`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotorTelemetry {
    pub erpm: u32,
    pub rpm: u32,
    pub period_us: u16,
    pub valid: bool,
    pub last_update: u32,
    pub frames_sent: u32,
    pub successes: u32,
    pub errors: u32,
}

pub struct EscDriver<L: EscLink> {
    link: L,
    config: DshotConfig,
    timing: BitTiming,
    reply_bit_period: u32,
    slots: [u16; SLOT_COUNT],
    state: State,
    t_ready: u32,
    telemetry: RotorTelemetry,
    fresh: bool,
}

impl<L: EscLink> EscDriver<L> {
    pub fn new(mut link: L, config: DshotConfig) -> Self {
        link.set_output();
        Self {
            link,
            config,
            timing: BitTiming::new(config.speed, config.timer_hz),
            reply_bit_period: config.speed.reply_bit_period(config.timer_hz),
            slots: [0; SLOT_COUNT],
            state: State::Idle,
            t_ready: 0,
            telemetry: RotorTelemetry::default(),
            fresh: false,
        }
    }

    /// Send a throttle frame. In bidirectional mode the telemetry bit is
    /// set so the ESC answers with its rpm period. Ignored unless idle;
    /// the caller's update loop simply retries on its next pass.
    pub fn send_throttle(&mut self, throttle: u16) {
        self.send_value(throttle, self.config.bidirectional);
    }

    /// Send one of the special command codes. Commands never request the
    /// separate-channel telemetry, in either wire format.
    pub fn send_command(&mut self, command: Command) {
        self.send_value(command as u16, false);
    }

    fn send_value(&mut self, value: u16, request_telemetry: bool) {
        if self.state != State::Idle {
            return;
        }
        let frame = frame::make_frame(value, request_telemetry);
        frame::encode_slots(
            frame,
            self.timing,
            self.config.bidirectional,
            &mut self.slots,
        );
        self.state = State::Sending;
        self.telemetry.frames_sent += 1;
        self.link.start_pulses(&self.slots);
    }

    /// Pulse-engine completion, from interrupt context. Turns the pin
    /// around immediately so the line is listening before the reply
    /// window opens.
    pub fn on_pulse_done(&mut self, now: u32) {
        if self.state != State::Sending {
            return;
        }
        if self.config.bidirectional {
            self.link.set_input();
            self.t_ready = now;
            self.state = State::WaitReply;
        } else {
            self.state = State::Idle;
        }
    }

    /// Capture-engine completion (sample buffer full), from interrupt
    /// context.
    pub fn on_capture_done(&mut self) {
        if self.state == State::Receiving {
            self.state = State::Processing;
        }
    }

    /// Advance the state machine. Call from the main loop with the current
    /// tick; one transition per call.
    pub fn poll(&mut self, now: u32) {
        match self.state {
            State::WaitReply => {
                if now.wrapping_sub(self.t_ready) >= REPLY_DELAY_TICKS {
                    self.link.start_capture();
                    self.state = State::Receiving;
                }
            }
            State::Receiving => {
                let expired = now.wrapping_sub(self.t_ready) >= REPLY_WINDOW_TICKS;
                if self.link.capture_count() >= EDGES_READY || expired {
                    self.state = State::Processing;
                }
            }
            State::Processing => {
                let decoded = {
                    let samples = self.link.stop_capture();
                    gcr::decode_reply(samples, self.reply_bit_period)
                        .and_then(gcr::verify_period)
                };
                match decoded {
                    Ok(period) => self.publish(period, now),
                    Err(_) => self.telemetry.errors += 1,
                }
                self.link.set_output();
                self.state = State::Idle;
            }
            State::Idle | State::Sending => {}
        }
    }

    fn publish(&mut self, period_us: u16, now: u32) {
        let erpm = gcr::erpm_from_period(period_us);
        self.telemetry.period_us = period_us;
        self.telemetry.erpm = erpm;
        self.telemetry.rpm = gcr::mechanical_rpm(erpm, self.config.motor_poles);
        self.telemetry.last_update = now;
        self.telemetry.valid = true;
        self.telemetry.successes += 1;
        self.fresh = true;
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn telemetry(&self) -> &RotorTelemetry {
        &self.telemetry
    }

    /// One-shot flag: true once per newly decoded reply.
    pub fn telemetry_available(&mut self) -> bool {
        let fresh = self.fresh;
        self.fresh = false;
        fresh
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DshotSpeed, THROTTLE_MAX, TIMER_CLOCK_HZ};
    use crate::frame::FRAME_BITS;

    const BIT_PERIOD: u16 = 280;
    const REPLY_PERIOD: u16 = 224;

    #[derive(Default)]
    struct MockLink {
        sent: Vec<[u16; SLOT_COUNT]>,
        output_mode: bool,
        capturing: bool,
        edges: Vec<u16>,
        arrived: usize,
    }

    impl EscLink for MockLink {
        fn start_pulses(&mut self, slots: &[u16; SLOT_COUNT]) {
            assert!(self.output_mode, "pulses armed while pin is an input");
            self.sent.push(*slots);
        }
        fn set_output(&mut self) {
            self.output_mode = true;
        }
        fn set_input(&mut self) {
            self.output_mode = false;
        }
        fn start_capture(&mut self) {
            assert!(!self.output_mode, "capture armed while pin drives the line");
            self.capturing = true;
        }
        fn stop_capture(&mut self) -> &[u16] {
            self.capturing = false;
            &self.edges[..self.arrived]
        }
        fn capture_count(&self) -> usize {
            self.arrived
        }
    }

    fn bidir_driver() -> EscDriver<MockLink> {
        EscDriver::new(MockLink::default(), DshotConfig::default())
    }

    fn unidir_driver() -> EscDriver<MockLink> {
        let config = DshotConfig {
            bidirectional: false,
            ..DshotConfig::default()
        };
        EscDriver::new(MockLink::default(), config)
    }

    /// Ideal reply edges for a period field, checksum appended.
    fn reply_edges(period: u16) -> Vec<u16> {
        const ENCODE: [u32; 16] = [
            0x19, 0x1B, 0x12, 0x13, 0x1D, 0x15, 0x16, 0x17, 0x1A, 0x09,
            0x0A, 0x0B, 0x1E, 0x0D, 0x0E, 0x0F,
        ];
        let value = (period << 4) | ((period ^ (period >> 4) ^ (period >> 8)) & 0x0F);
        let mut gcr: u32 = 0;
        for i in 0..4 {
            gcr = (gcr << 5) | ENCODE[((value >> (12 - 4 * i)) & 0x0F) as usize];
        }
        let stream = (gcr << 1) | 1;
        let mut edges = vec![0u16];
        let mut t = 0u16;
        let mut level = 1;
        let mut run = 0u16;
        for i in (0..21).rev() {
            let bit = (stream >> i) & 1;
            if bit == level {
                run += 1;
            } else {
                t = t.wrapping_add(run * REPLY_PERIOD);
                edges.push(t);
                level = bit;
                run = 1;
            }
        }
        edges.push(t.wrapping_add(run * REPLY_PERIOD));
        edges
    }

    fn deliver_reply(driver: &mut EscDriver<MockLink>, period: u16) {
        let edges = reply_edges(period);
        driver.link_mut().arrived = edges.len();
        driver.link_mut().edges = edges;
    }

    #[test]
    fn test_send_rejected_unless_idle() {
        let mut driver = bidir_driver();
        driver.send_throttle(1046);
        driver.send_throttle(1046);
        assert_eq!(driver.telemetry().frames_sent, 1);
        assert_eq!(driver.link_mut().sent.len(), 1);
        assert_eq!(driver.state(), State::Sending);
    }

    #[test]
    fn test_throttle_frame_is_inverted_with_telemetry_bit() {
        let mut driver = bidir_driver();
        driver.send_throttle(1046);
        let timing = BitTiming::new(DshotSpeed::Dshot600, TIMER_CLOCK_HZ);
        let mut expected = [0u16; SLOT_COUNT];
        frame::encode_slots(frame::make_frame(1046, true), timing, true, &mut expected);
        assert_eq!(driver.link_mut().sent[0], expected);
        assert_eq!(expected[FRAME_BITS], BIT_PERIOD);
    }

    #[test]
    fn test_command_frame_keeps_telemetry_bit_clear() {
        let mut driver = bidir_driver();
        driver.send_command(Command::Beep1);
        let timing = BitTiming::new(DshotSpeed::Dshot600, TIMER_CLOCK_HZ);
        let mut expected = [0u16; SLOT_COUNT];
        frame::encode_slots(frame::make_frame(1, false), timing, true, &mut expected);
        assert_eq!(driver.link_mut().sent[0], expected);
    }

    #[test]
    fn test_full_reply_cycle_publishes_rpm() {
        let mut driver = bidir_driver();
        driver.send_throttle(1046);

        driver.on_pulse_done(10);
        assert_eq!(driver.state(), State::WaitReply);
        assert!(!driver.link_mut().output_mode);

        driver.poll(10); // delay not yet elapsed
        assert_eq!(driver.state(), State::WaitReply);

        driver.poll(11);
        assert_eq!(driver.state(), State::Receiving);
        assert!(driver.link_mut().capturing);

        deliver_reply(&mut driver, 0x0C4);
        driver.on_capture_done();
        assert_eq!(driver.state(), State::Processing);

        driver.poll(12);
        assert_eq!(driver.state(), State::Idle);
        assert!(driver.link_mut().output_mode);

        let telemetry = driver.telemetry();
        assert!(telemetry.valid);
        assert_eq!(telemetry.period_us, 196);
        assert_eq!(telemetry.erpm, 306_122);
        assert_eq!(telemetry.rpm, 43_731);
        assert_eq!(telemetry.successes, 1);
        assert_eq!(telemetry.errors, 0);
        assert_eq!(telemetry.last_update, 12);

        assert!(driver.telemetry_available());
        assert!(!driver.telemetry_available());
    }

    #[test]
    fn test_reply_timeout_counts_error_and_keeps_record() {
        let mut driver = bidir_driver();

        // First frame decodes fine.
        driver.send_throttle(1046);
        driver.on_pulse_done(0);
        driver.poll(1);
        deliver_reply(&mut driver, 0x0C4);
        driver.on_capture_done();
        driver.poll(2);
        assert!(driver.telemetry_available());

        // Second frame gets no edges back.
        driver.send_throttle(1046);
        driver.on_pulse_done(100);
        driver.poll(101);
        driver.link_mut().edges.clear();
        driver.link_mut().arrived = 0;
        driver.poll(102); // window expired
        assert_eq!(driver.state(), State::Processing);
        driver.poll(103);

        let telemetry = driver.telemetry();
        assert_eq!(telemetry.errors, 1);
        assert_eq!(telemetry.successes, 1);
        // The previous record is untouched.
        assert!(telemetry.valid);
        assert_eq!(telemetry.rpm, 43_731);
        assert!(!driver.telemetry_available());
    }

    #[test]
    fn test_frames_sent_balances_successes_and_errors() {
        let mut driver = bidir_driver();
        for i in 0..6u32 {
            let now = i * 10;
            driver.send_throttle(500);
            driver.on_pulse_done(now);
            driver.poll(now + 1);
            if i % 2 == 0 {
                deliver_reply(&mut driver, 0x0C4);
                driver.on_capture_done();
            } else {
                driver.link_mut().edges.clear();
                driver.link_mut().arrived = 0;
                driver.poll(now + 3); // expire the window
            }
            driver.poll(now + 4);
            assert!(driver.is_idle());
        }
        let telemetry = driver.telemetry();
        assert_eq!(
            telemetry.frames_sent,
            telemetry.successes + telemetry.errors
        );
        assert_eq!(telemetry.successes, 3);
        assert_eq!(telemetry.errors, 3);
    }

    #[test]
    fn test_stopped_rotor_reply_is_a_success() {
        let mut driver = bidir_driver();
        driver.send_throttle(0);
        driver.on_pulse_done(0);
        driver.poll(1);
        deliver_reply(&mut driver, 0);
        driver.on_capture_done();
        driver.poll(2);

        let telemetry = driver.telemetry();
        assert!(telemetry.valid);
        assert_eq!(telemetry.rpm, 0);
        assert_eq!(telemetry.erpm, 0);
        assert_eq!(telemetry.successes, 1);
        assert_eq!(telemetry.errors, 0);
    }

    #[test]
    fn test_unidirectional_cycle_skips_reply() {
        let mut driver = unidir_driver();
        driver.send_throttle(1046);
        assert_eq!(driver.state(), State::Sending);

        let timing = BitTiming::new(DshotSpeed::Dshot600, TIMER_CLOCK_HZ);
        let mut expected = [0u16; SLOT_COUNT];
        frame::encode_slots(frame::make_frame(1046, false), timing, false, &mut expected);
        assert_eq!(driver.link_mut().sent[0], expected);
        assert_eq!(expected[FRAME_BITS], 0);

        driver.on_pulse_done(5);
        assert!(driver.is_idle());
        assert!(driver.link_mut().output_mode);
        assert_eq!(driver.telemetry().frames_sent, 1);
    }

    #[test]
    fn test_overrange_throttle_clamps() {
        let mut driver = unidir_driver();
        driver.send_throttle(2100);
        let timing = BitTiming::new(DshotSpeed::Dshot600, TIMER_CLOCK_HZ);
        let mut expected = [0u16; SLOT_COUNT];
        frame::encode_slots(
            frame::make_frame(THROTTLE_MAX, false),
            timing,
            false,
            &mut expected,
        );
        assert_eq!(driver.link_mut().sent[0], expected);
    }

    #[test]
    fn test_short_capture_is_an_error() {
        let mut driver = bidir_driver();
        driver.send_throttle(1046);
        driver.on_pulse_done(0);
        driver.poll(1);
        let edges = reply_edges(0x0C4);
        driver.link_mut().arrived = 3;
        driver.link_mut().edges = edges;
        driver.poll(3); // window expired with too few edges
        driver.poll(4);
        assert_eq!(driver.telemetry().errors, 1);
        assert!(!driver.telemetry().valid);
        assert!(driver.is_idle());
    }
}
