/*!
    LBUS wire format

    every exchange starts with a [Header] sent by the bus master. Its `length` counts the whole exchange: header, request payload, and the reply bytes the addressed node will send back. Since the node counts its own transmitted bytes, everybody on the bus knows when the exchange is over without any delimiter.
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};

use crate::pack_enum;


/// address every node listens to
pub const BROADCAST: u8 = 0xFF;
/// address of a node which never received `SET_ADDRESS`
pub const UNCONFIGURED: u8 = 0;
/// byte size of [Header] on the wire
pub const HEADER_SIZE: usize = <Header as FromBytes>::Bytes::SIZE;

/// packet header
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default, PartialEq)]
pub struct Header {
    /// total size of the exchange, header and reply included
    pub length: u16,
    /// destination node, or [BROADCAST]
    pub address: u8,
    pub command: Command,
}
impl Header {
    pub fn new(length: usize, address: u8, command: Command) -> Self {
        Self {length: length as u16, address, command}
    }
    /// true if a node with the given address must process this packet
    pub fn targets(&self, address: u8) -> bool {
        self.address == BROADCAST || self.address == address
    }
}

#[bitsize(8)]
#[derive(Copy, Clone, Default, FromBits, Debug, PartialEq)]
pub enum Command {
    #[default]
    Nop = 0,
    #[fallback]
    Unknown = 255,

    Ping = 1,
    GetData = 2,
    LedSet16Bit = 10,
    LedCommit = 11,
    LedSet8Bit = 12,
    ResetToBootloader = 122,
    EraseConfig = 123,
    SetAddress = 124,
    ReadMemory = 125,
    FlashFirmware = 126,
    ResetToFirmware = 127,
}
pack_enum!(Command);

/// data item requested by `GET_DATA`
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq)]
pub enum Query {
    #[fallback]
    Unknown = 0,

    Status = 1,
    Address = 2,
    FirmwareVersion = 3,
    BootloaderVersion = 4,
    FirmwareNameLength = 5,
    FirmwareName = 6,
}
impl Query {
    /// query type as transmitted, 16 bit wide on the wire
    pub fn from_code(code: u16) -> Self {
        u8::try_from(code) .map(Self::from) .unwrap_or(Self::Unknown)
    }
}

/// what code a node is running, answered to [Query::Status]
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq)]
pub enum NodeStatus {
    #[fallback]
    Unknown = 0,
    InBootloader = 1,
    InFirmware = 2,
}
pack_enum!(NodeStatus);

/// outcome of a `FLASH_FIRMWARE` page, in order of detection
#[bitsize(8)]
#[derive(Copy, Clone, Default, FromBits, Debug, PartialEq)]
pub enum FlashStatus {
    #[default]
    Success = 0,
    #[fallback]
    Unknown = 255,

    /// page is outside the firmware region
    BadPage = 1,
    /// page content doesn't match its checksum
    BadCrc = 2,
    /// page was not blank after erasing
    EraseFailed = 3,
    /// a programmed word did not read back
    VerifyFailed = 4,
}
pack_enum!(FlashStatus);


/// `GET_DATA` request payload
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
pub struct GetData {
    pub query: u16,
}
/// `SET_ADDRESS` request payload
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
pub struct SetAddress {
    pub address: u8,
}
/// `READ_MEMORY` request payload
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
pub struct ReadMemory {
    /// absolute address of the first word to read
    pub address: u32,
}
/// first field of `LED_SET_16BIT` and `LED_SET_8BIT` payloads, followed by values
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
pub struct LedSet {
    /// first output channel to set
    pub led: u16,
}

/// `FLASH_FIRMWARE` request payload size: page index, page content, page checksum
pub const FLASH_PAYLOAD: usize = 2 + crate::layout::PAGE_SIZE + 4;
/// maximum number of values sent by one `LED_SET_*` command
pub const MAX_LED_VALUES: usize = 1024;

/// total exchange length for a command with given request payload and reply sizes
pub const fn exchange_length(payload: usize, reply: usize) -> usize {
    HEADER_SIZE + payload + reply
}
