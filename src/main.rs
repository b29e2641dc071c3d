#![no_std]
#![no_main]

use core::fmt::Write;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m_rt::{entry, exception};
use defmt::info;
use fugit::RateExtU32;
use heapless::String;
use surge as _;

use surge::board_config::{self, hal};

use hal::pac::{self, interrupt};
use hal::rcc::{PLL48CLK, RccExt};

use surge::cli::{Action, Console};
use surge::config::{DshotConfig, SERIAL_TELEM_BAUD, THROTTLE_MIN, TICK_HZ, TIMER_CLOCK_HZ};
use surge::dshot::{EscDriver, RotorTelemetry};
use surge::frame::{BitTiming, Command};
use surge::led::LedManager;
use surge::pulse::TimerLink;
use surge::telemetry::TelemetryParser;
use surge::uart::{RxEvent, TelemetryUart};
use surge::usb::UsbManager;

type Driver = EscDriver<TimerLink>;

/// APB2 bus clock with SYSCLK at 168 MHz (prescaler /2). The timers on the
/// bus run at twice this.
const APB2_CLOCK_HZ: u32 = 84_000_000;

/// Throttle frame cadence, 50 Hz.
const SEND_INTERVAL_TICKS: u32 = 20;

/// Status line cadence.
const STATUS_INTERVAL_TICKS: u32 = 500;

static TICKS: AtomicU32 = AtomicU32::new(0);

// The driver is shared with the two DMA interrupts below; outside of them
// it is only touched from the main loop.
static mut DRIVER: Option<Driver> = None;

fn now() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

#[exception]
fn SysTick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

#[interrupt]
fn DMA2_STREAM1() {
    #[allow(static_mut_refs)]
    if let Some(driver) = unsafe { DRIVER.as_mut() } {
        if driver.link_mut().ack_pulse_done() {
            driver.on_pulse_done(now());
        }
    }
}

#[interrupt]
fn DMA2_STREAM6() {
    #[allow(static_mut_refs)]
    if let Some(driver) = unsafe { DRIVER.as_mut() } {
        if driver.link_mut().ack_capture_done() {
            driver.on_capture_done();
        }
    }
}

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    let dp = pac::Peripherals::take().unwrap();

    let rcc = dp.RCC.constrain();
    let clocks = rcc
        .cfgr
        .use_pll48clk(PLL48CLK::Pllq)
        .sysclk(RateExtU32::MHz(168))
        .use_pll()
        .freeze();

    let pins = board_config::setup_pins(dp.GPIOA, dp.GPIOB);

    // 1 ms tick for all driver timeouts.
    let mut syst = cp.SYST;
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(TIMER_CLOCK_HZ / TICK_HZ - 1);
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();

    let mut usb = UsbManager::new(
        dp.OTG_FS_GLOBAL,
        dp.OTG_FS_DEVICE,
        dp.OTG_FS_PWRCLK,
        pins.usb_dm,
        pins.usb_dp,
        &clocks,
    );

    let mut uart = TelemetryUart::new(
        dp.USART1,
        pins.telemetry_tx,
        pins.telemetry_rx,
        APB2_CLOCK_HZ,
        SERIAL_TELEM_BAUD,
    );

    let mut led = LedManager::new(pins.led);

    let config = DshotConfig::default();
    let timing = BitTiming::new(config.speed, config.timer_hz);
    let link = TimerLink::new(dp.TIM1, dp.DMA2, pins.esc_signal, timing, config.bidirectional);

    unsafe {
        DRIVER = Some(EscDriver::new(link, config));
    }
    #[allow(static_mut_refs)]
    let driver = unsafe { DRIVER.as_mut().unwrap() };

    unsafe {
        pac::NVIC::unmask(pac::Interrupt::DMA2_STREAM1);
        pac::NVIC::unmask(pac::Interrupt::DMA2_STREAM6);
    }

    info!("surge up: dshot600 on PA8, esc telemetry on PA10");

    arm_sequence(driver, &mut usb);

    let mut console = Console::new();
    let mut parser = TelemetryParser::new();
    let mut last_send = now();
    let mut last_status = now();

    loop {
        let t = now();
        driver.poll(t);
        usb.poll();
        led.update();

        // Drain the ESC serial telemetry line.
        loop {
            match uart.read() {
                RxEvent::Byte(byte) => parser.feed_byte(byte, t),
                RxEvent::Overrun => {
                    parser.reset();
                    break;
                }
                RxEvent::None => break,
            }
        }

        if let Some(byte) = usb.read_byte() {
            usb.write_bytes(&[byte]); // echo
            usb.write_bytes(b"\r\n");
            let mut out: String<256> = String::new();
            let action = console.handle_byte(byte, &mut out);
            usb.write_bytes(out.as_bytes());
            match action {
                Action::Beep => beep(driver),
                Action::RampTest => {
                    ramp_test(driver, &mut usb);
                    console.stop();
                }
                Action::ShowStats => print_stats(driver.telemetry(), &mut usb),
                Action::None => {}
            }
        }

        if t.wrapping_sub(last_send) >= SEND_INTERVAL_TICKS {
            last_send = t;
            driver.send_throttle(console.throttle());
        }

        if t.wrapping_sub(last_status) >= STATUS_INTERVAL_TICKS {
            last_status = t;
            status_line(console.throttle(), driver.telemetry(), &parser, &mut usb);
        }
    }
}

/// Keep the driver and USB device serviced for a stretch of ticks.
fn run_for(driver: &mut Driver, ticks: u32) {
    let start = now();
    while now().wrapping_sub(start) < ticks {
        driver.poll(now());
    }
}

fn wait_idle(driver: &mut Driver) {
    while !driver.is_idle() {
        driver.poll(now());
    }
}

/// Zero throttle for a second, then a confirmation beep. ESC firmware
/// requires the zero-throttle stretch before it will arm.
fn arm_sequence(driver: &mut Driver, usb: &mut UsbManager) {
    usb.write_line("arming: zero throttle");
    for _ in 0..100 {
        wait_idle(driver);
        driver.send_throttle(0);
        run_for(driver, 10);
    }
    usb.write_line("arming: beep");
    beep(driver);
    run_for(driver, 500);
    usb.write_line("armed, 'h' for help");
}

/// BLHeli acknowledges beeps only when repeated; ten frames 10 ms apart.
fn beep(driver: &mut Driver) {
    for _ in 0..10 {
        wait_idle(driver);
        driver.send_command(Command::Beep1);
        run_for(driver, 10);
    }
}

/// Staircase throttle test: hold each step for a second while printing
/// whatever telemetry comes back, then ramp back down.
fn ramp_test(driver: &mut Driver, usb: &mut UsbManager) {
    const STEPS: [u16; 6] = [
        THROTTLE_MIN,
        THROTTLE_MIN + 100,
        THROTTLE_MIN + 300,
        THROTTLE_MIN + 500,
        THROTTLE_MIN + 700,
        THROTTLE_MIN + 1000,
    ];

    for &throttle in STEPS.iter() {
        let mut line: String<32> = String::new();
        write!(line, "throttle {}", throttle).ok();
        usb.write_line(&line);

        for _ in 0..50 {
            wait_idle(driver);
            driver.send_throttle(throttle);
            run_for(driver, 20);
            usb.poll();

            if driver.telemetry_available() {
                let t = driver.telemetry();
                let mut line: String<64> = String::new();
                write!(line, "  rpm {} (erpm {}, period {} us)", t.rpm, t.erpm, t.period_us).ok();
                usb.write_line(&line);
            }
        }
    }

    usb.write_line("ramping down");
    let mut throttle = THROTTLE_MIN + 500;
    loop {
        for _ in 0..10 {
            wait_idle(driver);
            driver.send_throttle(throttle);
            run_for(driver, 10);
        }
        if throttle == THROTTLE_MIN {
            break;
        }
        throttle -= 50;
    }

    print_stats(driver.telemetry(), usb);
}

fn print_stats(t: &RotorTelemetry, usb: &mut UsbManager) {
    let mut line: String<96> = String::new();
    write!(
        line,
        "frames {}  ok {}  err {}",
        t.frames_sent, t.successes, t.errors
    )
    .ok();
    usb.write_line(&line);

    if t.frames_sent > 0 {
        let mut line: String<32> = String::new();
        write!(line, "success rate {}%", t.successes * 100 / t.frames_sent).ok();
        usb.write_line(&line);
    }
}

fn status_line(
    throttle: u16,
    rotor: &RotorTelemetry,
    parser: &TelemetryParser,
    usb: &mut UsbManager,
) {
    let mut line: String<128> = String::new();
    if rotor.valid {
        write!(line, "[thr {} | rpm {} | erpm {}]", throttle, rotor.rpm, rotor.erpm).ok();
    } else {
        write!(line, "[thr {} | waiting for telemetry]", throttle).ok();
    }

    let esc = parser.latest();
    if esc.valid {
        write!(
            line,
            " [{} C  {:.2} V  {:.2} A]",
            esc.temperature_c,
            esc.voltage_v(),
            esc.current_a()
        )
        .ok();
    }
    usb.write_line(&line);
}
