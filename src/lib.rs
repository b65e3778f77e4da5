/*!
    LBUS, a half-duplex multi-drop serial bus connecting a host to microcontroller nodes, with in-field firmware update.

    - [command] and [layout] define the wire format and flash layout both sides agree on
    - [crc] is the checksum used for firmware pages and images
    - `node` (feature `node`) implements the node side: packet framer, command sets, bootloader and config store, for `no_std` targets
    - [bridge] implements the USB to bus bridge node
    - `host` (feature `host`) implements the host client over a serial port or the USB bridge
*/
#![no_std]
#[cfg(feature = "std")]
extern crate std;

mod mutex;
mod utils;

pub mod command;
pub mod crc;
pub mod layout;
pub mod bridge;
#[cfg(feature = "node")]
pub mod store;
#[cfg(feature = "node")]
pub mod node;
#[cfg(feature = "host")]
pub mod host;

pub use mutex::{BusyMutex, BusyMutexGuard};
