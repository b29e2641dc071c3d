// src/pulse.rs
//
// TIM1 + DMA2 back end for the DShot signal line. One timer channel does
// double duty: edge-aligned PWM with preload for transmission, where a DMA
// stream feeds the next compare value on every capture/compare request, and
// input capture on both edges for the reply, where a second stream drains
// the captured counter values. Switching direction is a CCMR/CCER and GPIO
// reconfiguration, never a peripheral swap.
//
// DMA routing (RM0385, table 27): TIM1_CH1 requests are served by DMA2
// stream 1 channel 6 (memory to peripheral) and DMA2 stream 6 channel 0
// (peripheral to memory).

use crate::board_config::{hal, EscSignalPin};
use crate::config::CAPTURE_BUF_LEN;
use crate::dshot::EscLink;
use crate::frame::{BitTiming, SLOT_COUNT};
use hal::pac::{DMA2, TIM1};

const TX_STREAM: usize = 1;
const TX_CHANNEL: u8 = 6;
const IC_STREAM: usize = 6;
const IC_CHANNEL: u8 = 0;

// Both buffers live for the whole process; ownership alternates between
// the main loop and whichever DMA stream is currently enabled.
static mut DUTY_BUFFER: [u16; SLOT_COUNT] = [0; SLOT_COUNT];
static mut CAPTURE_BUFFER: [u16; CAPTURE_BUF_LEN] = [0; CAPTURE_BUF_LEN];

pub struct TimerLink {
    tim: TIM1,
    dma: DMA2,
    _pin: EscSignalPin,
    /// Compare value that parks the line at its idle level.
    idle_duty: u16,
}

impl TimerLink {
    /// Claims the timer, the DMA controller and the signal pin. The pin is
    /// already in its timer alternate function; this routine only sets up
    /// what the HAL does not touch.
    pub fn new(tim: TIM1, dma: DMA2, pin: EscSignalPin, timing: BitTiming, inverted: bool) -> Self {
        // Peripheral clocks. The HAL only enables what its own drivers use.
        unsafe {
            let rcc = &(*hal::pac::RCC::ptr());
            rcc.apb2enr.modify(|_, w| w.tim1en().set_bit());
            rcc.ahb1enr.modify(|_, w| w.dma2en().set_bit());
        }

        let idle_duty = if inverted { timing.period } else { 0 };
        let mut link = Self {
            tim,
            dma,
            _pin: pin,
            idle_duty,
        };

        link.tim.cr1.reset();
        link.tim.psc.write(|w| w.psc().bits(0));
        link.tim.arr.write(|w| unsafe { w.bits(timing.period as u32 - 1) });
        link.tim.cr1.modify(|_, w| w.arpe().set_bit());

        link.set_output();
        link.tim.ccr1().write(|w| unsafe { w.bits(idle_duty as u32) });

        // Advanced-control timer: outputs stay disconnected until MOE.
        link.tim.bdtr.modify(|_, w| w.moe().set_bit());

        let ccr1 = link.tim.ccr1().as_ptr() as u32;

        // Frame transmission: memory to CCR1, halfword on both sides, one
        // request per compare event, interrupt on completion.
        let tx = &link.dma.st[TX_STREAM];
        tx.cr.reset();
        while tx.cr.read().en().bit_is_set() {}
        tx.par.write(|w| unsafe { w.pa().bits(ccr1) });
        tx.cr.modify(|_, w| unsafe {
            w.chsel()
                .bits(TX_CHANNEL)
                .msize()
                .bits16()
                .psize()
                .bits16()
                .minc()
                .set_bit()
                .dir()
                .memory_to_peripheral()
                .pl()
                .high()
                .tcie()
                .set_bit()
        });

        // Reply capture: CCR1 to memory, same word size, interrupt when the
        // sample buffer fills.
        let ic = &link.dma.st[IC_STREAM];
        ic.cr.reset();
        while ic.cr.read().en().bit_is_set() {}
        ic.par.write(|w| unsafe { w.pa().bits(ccr1) });
        ic.cr.modify(|_, w| unsafe {
            w.chsel()
                .bits(IC_CHANNEL)
                .msize()
                .bits16()
                .psize()
                .bits16()
                .minc()
                .set_bit()
                .dir()
                .peripheral_to_memory()
                .pl()
                .high()
                .tcie()
                .set_bit()
        });

        // Latch ARR/CCR preloads, then run free.
        link.tim.egr.write(|w| w.ug().set_bit());
        link.tim.cr1.modify(|_, w| w.cen().set_bit());

        link
    }

    /// Clear a pending transmit-complete flag. Returns whether one was
    /// pending; call from the stream 1 interrupt.
    pub fn ack_pulse_done(&mut self) -> bool {
        let pending = self.dma.lisr.read().tcif1().bit_is_set();
        if pending {
            self.dma.lifcr.write(|w| w.ctcif1().set_bit());
        }
        pending
    }

    /// Clear a pending capture-complete flag. Returns whether one was
    /// pending; call from the stream 6 interrupt.
    pub fn ack_capture_done(&mut self) -> bool {
        let pending = self.dma.hisr.read().tcif6().bit_is_set();
        if pending {
            self.dma.hifcr.write(|w| w.ctcif6().set_bit());
        }
        pending
    }

    fn clear_tx_flags(&mut self) {
        self.dma.lifcr.write(|w| {
            w.ctcif1()
                .set_bit()
                .chtif1()
                .set_bit()
                .cteif1()
                .set_bit()
                .cdmeif1()
                .set_bit()
                .cfeif1()
                .set_bit()
        });
    }

    fn clear_ic_flags(&mut self) {
        self.dma.hifcr.write(|w| {
            w.ctcif6()
                .set_bit()
                .chtif6()
                .set_bit()
                .cteif6()
                .set_bit()
                .cdmeif6()
                .set_bit()
                .cfeif6()
                .set_bit()
        });
    }
}

impl EscLink for TimerLink {
    #[allow(static_mut_refs)]
    fn start_pulses(&mut self, slots: &[u16; SLOT_COUNT]) {
        let tx = &self.dma.st[TX_STREAM];
        tx.cr.modify(|_, w| w.en().clear_bit());
        while tx.cr.read().en().bit_is_set() {}

        // The stream is disarmed; the buffer is ours to rewrite.
        unsafe {
            DUTY_BUFFER = *slots;
        }

        self.clear_tx_flags();
        let tx = &self.dma.st[TX_STREAM];
        unsafe {
            tx.ndtr.write(|w| w.ndt().bits(SLOT_COUNT as u16));
            tx.m0ar.write(|w| w.m0a().bits(DUTY_BUFFER.as_ptr() as u32));
        }
        self.tim.dier.modify(|_, w| w.cc1de().set_bit());
        tx.cr.modify(|_, w| w.en().set_bit());
    }

    fn set_output(&mut self) {
        // Channel off while CC1S changes.
        self.tim.ccer.modify(|_, w| w.cc1e().clear_bit());
        self.tim.ccmr1_output().write(|w| unsafe {
            w.cc1s().bits(0b00).oc1m().pwm_mode1().oc1pe().set_bit()
        });
        self.tim.ccr1().write(|w| unsafe { w.bits(self.idle_duty as u32) });

        let gpioa = unsafe { &(*hal::pac::GPIOA::ptr()) };
        gpioa.moder.modify(|_, w| w.moder8().alternate());
        gpioa.otyper.modify(|_, w| w.ot8().push_pull());
        gpioa.ospeedr.modify(|_, w| w.ospeedr8().very_high_speed());
        gpioa.pupdr.modify(|_, w| w.pupdr8().floating());
        gpioa.afrh.modify(|_, w| w.afrh8().af1());

        self.tim
            .ccer
            .modify(|_, w| w.cc1p().clear_bit().cc1np().clear_bit().cc1e().set_bit());
    }

    fn set_input(&mut self) {
        self.tim.ccer.modify(|_, w| w.cc1e().clear_bit());
        self.tim.dier.modify(|_, w| w.cc1de().clear_bit());

        // IC1 mapped to TI1, no filter, no prescaler.
        self.tim
            .ccmr1_input()
            .write(|w| unsafe { w.cc1s().bits(0b01) });

        // The released line must read high until the ESC drives it.
        let gpioa = unsafe { &(*hal::pac::GPIOA::ptr()) };
        gpioa.moder.modify(|_, w| w.moder8().alternate());
        gpioa.pupdr.modify(|_, w| w.pupdr8().pull_up());

        // Capture on both edges.
        self.tim
            .ccer
            .modify(|_, w| w.cc1p().set_bit().cc1np().set_bit().cc1e().set_bit());
    }

    #[allow(static_mut_refs)]
    fn start_capture(&mut self) {
        self.clear_ic_flags();
        self.tim.sr.write(|w| unsafe { w.bits(0) });

        let ic = &self.dma.st[IC_STREAM];
        ic.cr.modify(|_, w| w.en().clear_bit());
        while ic.cr.read().en().bit_is_set() {}
        unsafe {
            ic.ndtr.write(|w| w.ndt().bits(CAPTURE_BUF_LEN as u16));
            ic.m0ar.write(|w| w.m0a().bits(CAPTURE_BUFFER.as_ptr() as u32));
        }
        ic.cr.modify(|_, w| w.en().set_bit());
        self.tim.dier.modify(|_, w| w.cc1de().set_bit());
    }

    #[allow(static_mut_refs)]
    fn stop_capture(&mut self) -> &[u16] {
        self.tim.dier.modify(|_, w| w.cc1de().clear_bit());
        let ic = &self.dma.st[IC_STREAM];
        ic.cr.modify(|_, w| w.en().clear_bit());
        while ic.cr.read().en().bit_is_set() {}

        let remaining = ic.ndtr.read().ndt().bits() as usize;
        let count = CAPTURE_BUF_LEN.saturating_sub(remaining);
        unsafe { &CAPTURE_BUFFER[..count] }
    }

    fn capture_count(&self) -> usize {
        let remaining = self.dma.st[IC_STREAM].ndtr.read().ndt().bits() as usize;
        CAPTURE_BUF_LEN.saturating_sub(remaining)
    }
}
