use crate::board_config::hal;
use crate::board_config::{UsbDmPin, UsbDpPin};
use hal::otg_fs::{UsbBus, USB};
use hal::pac::{OTG_FS_DEVICE, OTG_FS_GLOBAL, OTG_FS_PWRCLK};
use hal::rcc::Clocks;
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

pub type UsbBusType = UsbBusAllocator<UsbBus<USB>>;
pub type SerialPortType = SerialPort<'static, UsbBus<USB>>;
pub type UsbDeviceType = UsbDevice<'static, UsbBus<USB>>;

/// CDC-ACM console the interactive commands come in on and every status
/// line goes out of. Polled from the main loop; reads never block.
pub struct UsbManager {
    serial: SerialPortType,
    usb_dev: UsbDeviceType,
}

impl UsbManager {
    pub fn new(
        usb_global: OTG_FS_GLOBAL,
        usb_device: OTG_FS_DEVICE,
        usb_pwrclk: OTG_FS_PWRCLK,
        pin_dm: UsbDmPin,
        pin_dp: UsbDpPin,
        clocks: &Clocks,
    ) -> Self {
        let usb = USB::new(usb_global, usb_device, usb_pwrclk, (pin_dm, pin_dp), clocks);

        // Static memory for USB endpoints
        static mut EP_MEMORY: [u32; 1024] = [0; 1024];
        static mut USB_BUS: Option<UsbBusType> = None;

        #[allow(static_mut_refs)]
        unsafe {
            USB_BUS = Some(UsbBus::new(usb, &mut EP_MEMORY));
        }

        #[allow(static_mut_refs)]
        let usb_bus = unsafe { USB_BUS.as_ref().unwrap() };

        let serial = SerialPort::new(usb_bus);

        let usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x16c0, 0x27dd))
            .strings(&[StringDescriptors::default()
                .manufacturer("surge")
                .product("ESC console")
                .serial_number("0001")])
            .unwrap()
            .device_class(usbd_serial::USB_CLASS_CDC)
            .max_packet_size_0(64)
            .unwrap()
            .build();

        Self { serial, usb_dev }
    }

    /// Call this in the main loop to keep the device enumerated.
    pub fn poll(&mut self) {
        self.usb_dev.poll(&mut [&mut self.serial]);
    }

    /// One pending input byte, if any.
    pub fn read_byte(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.serial.read(&mut buf) {
            Ok(n) if n > 0 => Some(buf[0]),
            _ => None,
        }
    }

    /// Write a line to the console. Bytes the host is not draining are
    /// dropped rather than waited on.
    pub fn write_line(&mut self, data: &str) {
        self.serial.write(data.as_bytes()).ok();
        self.serial.write(b"\r\n").ok();
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.serial.write(data).ok();
    }
}
