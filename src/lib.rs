#![cfg_attr(not(test), no_std)]

pub mod board_config;
pub mod cli;
pub mod config;
pub mod dshot;
pub mod frame;
pub mod gcr;
pub mod led;
pub mod pulse;
pub mod telemetry;
pub mod uart;
pub mod usb;

#[cfg(not(test))]
use defmt_rtt as _; // global logger

#[cfg(not(test))]
use panic_probe as _;

// same panicking *behavior* as `panic-probe` but doesn't print a panic message
// this prevents the panic message being printed *twice* when `defmt::panic` is invoked
#[cfg(not(test))]
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

/// Terminates the application by resetting the MCU.
/// This is safe without a debug probe; semihosting would hang.
pub fn exit() -> ! {
    cortex_m::peripheral::SCB::sys_reset();
}

/// Hardfault handler.
///
/// Resets the MCU so the bench controller recovers from crashes.
/// Using semihosting here would hang when running from battery only.
#[cfg(not(test))]
#[cortex_m_rt::exception]
unsafe fn HardFault(_frame: &cortex_m_rt::ExceptionFrame) -> ! {
    cortex_m::peripheral::SCB::sys_reset();
}
