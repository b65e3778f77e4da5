/*!
    host side of the bus, in `std` environment.

    The central resource is the [Client] struct which builds packets and performs request/reply exchanges through a [Transport]:

    - [Serial] for a serial port wired to an RS-485 transceiver
    - `UsbBridge` (feature `usb`) for the USB bridge node

    exchanges are sequential, each call waits for its reply before returning. Nothing is retried except the status of flashed pages, see [Client::flash_firmware].
*/

/// byte transports to the bus
mod transport;
/// packet exchanges
mod client;
/// firmware image preparation and page by page flashing
mod flashing;
#[cfg(feature = "usb")]
mod usb;

pub use transport::*;
pub use client::*;
pub use flashing::*;
#[cfg(feature = "usb")]
pub use usb::UsbBridge;

use std::time::Duration;
use thiserror::Error;

use crate::command::FlashStatus;


/// error regarding bus communication
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with bus transport")]
    Bus(#[from] std::io::Error),
    #[cfg(feature = "usb")]
    #[error("USB transfer to the bridge failed")]
    Usb(#[from] nusb::transfer::TransferError),
    #[error("bus master device not found")]
    DeviceNotFound,
    #[error("no answer")]
    NoAnswer,
    #[error("broken answer, got {received} bytes out of {expected}")]
    BrokenAnswer {expected: usize, received: usize},
    #[error("checksum mismatch, expected {expected:#010x} received {received:#010x}")]
    Crc {expected: u32, received: u32},
    #[error("node refused with status {0}")]
    Refused(u8),
    #[error("invalid use: {0}")]
    Misuse(&'static str),
    #[error("bad firmware file: {0}")]
    Firmware(&'static str),
    #[error("flashing page {page} failed with status {status:?}")]
    Flash {page: u16, status: Option<FlashStatus>},
    #[error("no data arrived in expected time")]
    Timeout,
}

/// host side tunables
#[derive(Clone, Debug)]
pub struct Settings {
    /// serial line rate
    pub baud_rate: u32,
    /// wait for an answer before considering the bus silent
    pub timeout: Duration,
    /// wait for a USB transfer to the bridge
    pub transmit_timeout: Duration,
    /// status reads attempted for each flashed page
    pub flash_attempts: usize,
    /// pause between two status reads of a flashed page
    pub flash_retry_delay: Duration,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            baud_rate: 500_000,
            timeout: Duration::from_millis(1000),
            transmit_timeout: Duration::from_millis(20),
            flash_attempts: 10,
            flash_retry_delay: Duration::from_millis(100),
        }
    }
}
