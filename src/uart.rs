// src/uart.rs
//
// Receive-only USART1 driver for the ESC serial telemetry line. The ESC
// transmits unsolicited 10-byte packets at 115200 8-N-1; nothing is ever
// sent back, so only the receiver is enabled.

use crate::board_config::{hal, TelemetryRxPin, TelemetryTxPin};
use hal::pac::USART1;

/// Outcome of one receiver poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    None,
    Byte(u8),
    /// Hardware overrun; the parser should drop its partial packet.
    Overrun,
}

pub struct TelemetryUart {
    usart: USART1,
    _tx: TelemetryTxPin,
    _rx: TelemetryRxPin,
}

impl TelemetryUart {
    /// Claims USART1 and its pins. `pclk_hz` is the APB2 bus clock the
    /// baud divider is derived from.
    pub fn new(
        usart: USART1,
        tx: TelemetryTxPin,
        rx: TelemetryRxPin,
        pclk_hz: u32,
        baud: u32,
    ) -> Self {
        unsafe {
            let rcc = &(*hal::pac::RCC::ptr());
            rcc.apb2enr.modify(|_, w| w.usart1en().set_bit());
        }

        // Oversampling by 16: the divider is simply clock / baud.
        usart.brr.write(|w| unsafe { w.bits(pclk_hz / baud) });
        usart.cr1.write(|w| w.ue().set_bit().re().set_bit());

        Self {
            usart,
            _tx: tx,
            _rx: rx,
        }
    }

    /// Non-blocking read of one byte. Overrun is reported once and
    /// cleared.
    pub fn read(&mut self) -> RxEvent {
        let isr = self.usart.isr.read();
        if isr.ore().bit_is_set() {
            self.usart.icr.write(|w| w.orecf().set_bit());
            return RxEvent::Overrun;
        }
        if isr.rxne().bit_is_set() {
            return RxEvent::Byte(self.usart.rdr.read().rdr().bits() as u8);
        }
        RxEvent::None
    }
}
