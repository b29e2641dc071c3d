// src/board_config.rs

// Re-export the HAL crate for easy access from other modules
pub use stm32f7xx_hal as hal;

use hal::gpio::{Alternate, GpioExt, Output, Pin, PushPull};
use hal::pac::{GPIOA, GPIOB};

// Pin type definitions
pub type LedPin = Pin<'B', 0, Output<PushPull>>;
/// TIM1_CH1: DShot signal out and rpm reply in, on the same wire.
pub type EscSignalPin = Pin<'A', 8, Alternate<1>>;
/// USART1_TX, unused but claimed alongside the RX pin.
pub type TelemetryTxPin = Pin<'A', 9, Alternate<7>>;
/// USART1_RX: ESC serial telemetry input.
pub type TelemetryRxPin = Pin<'A', 10, Alternate<7>>;
pub type UsbDmPin = Pin<'A', 11, Alternate<10>>;
pub type UsbDpPin = Pin<'A', 12, Alternate<10>>;

// A struct to hold all the pins
pub struct Pins {
    pub led: LedPin,
    pub esc_signal: EscSignalPin,
    pub telemetry_tx: TelemetryTxPin,
    pub telemetry_rx: TelemetryRxPin,
    pub usb_dm: UsbDmPin,
    pub usb_dp: UsbDpPin,
}

// Function to set up and return the pins
pub fn setup_pins(gpioa: GPIOA, gpiob: GPIOB) -> Pins {
    let gpioa = gpioa.split();
    let gpiob = gpiob.split();

    Pins {
        led: gpiob.pb0.into_push_pull_output(),
        esc_signal: gpioa.pa8.into_alternate::<1>(),
        telemetry_tx: gpioa.pa9.into_alternate::<7>(),
        telemetry_rx: gpioa.pa10.into_alternate::<7>(),
        usb_dm: gpioa.pa11.into_alternate(),
        usb_dp: gpioa.pa12.into_alternate(),
    }
}
