use embedded_storage::nor_flash::NorFlash;
use log::*;

use crate::{
    command::*,
    layout::{PAGE_SIZE, NAME_MAX},
    store::{self, ConfigStore},
    utils::read_le,
    };
use super::{Bus, Session};


/// largest `LED_SET_*` payload: channel index and [MAX_LED_VALUES] 16 bit values
pub const LED_PAYLOAD: usize = 2 + 2 * MAX_LED_VALUES;

/**
    set of commands a node answers to

    the framer asks [CommandSet::accept] once a header addressed to the node is complete, then calls [CommandSet::execute] from the main loop once the payload it asked for is complete.
*/
pub trait CommandSet {
    fn accept(&mut self, header: &Header) -> Accept;
    fn execute<B: Bus>(&mut self, request: Request, session: &mut Session<'_, B>);
}

/// what to do with a packet addressed to the node
#[derive(Debug)]
pub enum Accept {
    /// drop the packet, its bytes are still counted
    Ignore,
    /// execute as soon as the header is complete
    Execute,
    /// collect payload bytes before executing
    Collect(Continuation),
}

/// a request ready for execution
#[derive(Clone, Debug)]
pub struct Request {
    pub header: Header,
    pub payload: Payload,
}

/// decoded request payloads
#[derive(Clone, Debug)]
pub enum Payload {
    Empty,
    Query(Query),
    Address(u8),
    Memory(u32),
    Page(Page),
    Leds(Leds),
}

/// firmware page sent by `FLASH_FIRMWARE`
#[derive(Clone, Debug)]
pub struct Page {
    pub index: u16,
    pub data: [u8; PAGE_SIZE],
    pub crc: u32,
}

/// output values sent by `LED_SET_16BIT` or `LED_SET_8BIT`
#[derive(Clone, Debug)]
pub struct Leds {
    /// first channel to set
    pub first: u16,
    pub wide: bool,
    /// raw values, little endian pairs if `wide`
    pub values: heapless::Vec<u8, LED_PAYLOAD>,
}

/// fixed size payload being accumulated
#[derive(Clone, Debug)]
pub struct Partial<const N: usize> {
    bytes: [u8; N],
    len: usize,
}
impl<const N: usize> Partial<N> {
    pub const fn new() -> Self {Self {bytes: [0; N], len: 0}}
    /// push a byte, returns the whole payload once complete
    fn push(&mut self, byte: u8) -> Option<&[u8; N]> {
        if self.len < N {
            self.bytes[self.len] = byte;
            self.len += 1;
        }
        (self.len == N) .then_some(&self.bytes)
    }
}
impl<const N: usize> Default for Partial<N> {
    fn default() -> Self {Self::new()}
}

/// payload accumulation state for a command, carrying the bytes received so far
#[derive(Clone, Debug)]
pub enum Continuation {
    Query(Partial<2>),
    Address(Partial<1>),
    Memory(Partial<4>),
    Page(Partial<FLASH_PAYLOAD>),
    Leds {
        wide: bool,
        bytes: heapless::Vec<u8, LED_PAYLOAD>,
    },
}
impl Continuation {
    pub fn query() -> Self {Self::Query(Partial::new())}
    pub fn address() -> Self {Self::Address(Partial::new())}
    pub fn memory() -> Self {Self::Memory(Partial::new())}
    pub fn page() -> Self {Self::Page(Partial::new())}
    pub fn leds(wide: bool) -> Self {Self::Leds {wide, bytes: heapless::Vec::new()}}

    /**
        consume one payload byte, `position` counting it already

        returns the decoded payload once complete
    */
    pub fn feed(&mut self, byte: u8, position: u32, header: &Header) -> Option<Payload> {
        match self {
            Self::Query(partial) => partial.push(byte)
                .map(|bytes| Payload::Query(Query::from_code(u16::from_le_bytes(*bytes)))),
            Self::Address(partial) => partial.push(byte)
                .map(|bytes| Payload::Address(bytes[0])),
            Self::Memory(partial) => partial.push(byte)
                .map(|bytes| Payload::Memory(u32::from_le_bytes(*bytes))),
            Self::Page(partial) => partial.push(byte)
                .map(|bytes| Payload::Page(decode_page(bytes))),
            Self::Leds {wide, bytes} => {
                // values beyond what we can hold are dropped
                let _ = bytes.push(byte);
                if position < u32::from(header.length)
                    {return None}
                let first = read_le::<LedSet>(bytes)?.led;
                let mut values = heapless::Vec::new();
                let _ = values.extend_from_slice(&bytes[2 ..]);
                Some(Payload::Leds(Leds {first, wide: *wide, values}))
            },
        }
    }
}

fn decode_page(bytes: &[u8; FLASH_PAYLOAD]) -> Page {
    let mut data = [0; PAGE_SIZE];
    data.copy_from_slice(&bytes[2 .. 2 + PAGE_SIZE]);
    let crc = &bytes[2 + PAGE_SIZE ..];
    Page {
        index: u16::from_le_bytes([bytes[0], bytes[1]]),
        data,
        crc: u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]),
    }
}


/// what a node tells about itself through `GET_DATA`
#[derive(Clone, Debug)]
pub struct Identity {
    pub status: NodeStatus,
    pub firmware_version: u32,
    pub bootloader_version: u32,
    /// firmware name, without terminating NUL
    pub name: heapless::Vec<u8, NAME_MAX>,
}
impl Identity {
    pub fn new(status: NodeStatus, firmware_version: u32, bootloader_version: u32, name: &[u8]) -> Self {
        let name = &name[.. name.len().min(NAME_MAX)];
        let mut buffer = heapless::Vec::new();
        let _ = buffer.extend_from_slice(name);
        Self {status, firmware_version, bootloader_version, name: buffer}
    }
}

/// address persisted in the config store, or [UNCONFIGURED]
pub fn stored_address<F: NorFlash>(flash: F) -> u8 {
    match ConfigStore::new(flash).get_u32(store::ADDRESS) {
        Ok(Some(address)) => address as u8,
        Ok(None) => UNCONFIGURED,
        Err(err) => {
            warn!("cannot read node address: {}", err);
            UNCONFIGURED
        },
    }
}

/// accept the commands every command set shares
pub fn accept_common(header: &Header) -> Accept {
    match header.command {
        Command::Ping | Command::EraseConfig => Accept::Execute,
        Command::GetData => Accept::Collect(Continuation::query()),
        Command::SetAddress => Accept::Collect(Continuation::address()),
        _ => Accept::Ignore,
    }
}

/// execute the commands every command set shares
pub fn execute_common<F: NorFlash, B: Bus>(
        request: Request,
        session: &mut Session<'_, B>,
        flash: F,
        identity: &Identity,
        ) {
    match (request.header.command, request.payload) {
        (Command::Ping, _) => session.send(&[1]),
        (Command::GetData, Payload::Query(query)) => answer(query, identity, session),
        (Command::SetAddress, Payload::Address(address)) => {
            if request.header.address == BROADCAST {
                warn!("address {} set through broadcast, every node on the bus takes it", address);
            }
            let status = match ConfigStore::new(flash).set_u32(store::ADDRESS, u32::from(address)) {
                Ok(()) => {
                    session.set_address(address);
                    info!("bus address is now {}", address);
                    0
                },
                Err(err) => {
                    warn!("cannot store address: {}", err);
                    err.status()
                },
            };
            session.send(&[status]);
        },
        (Command::EraseConfig, _) => {
            if let Err(err) = ConfigStore::new(flash).erase() {
                error!("cannot erase config: {}", err);
            }
        },
        (command, _) => debug!("ignored {:?}", command),
    }
}

fn answer<B: Bus>(query: Query, identity: &Identity, session: &mut Session<'_, B>) {
    match query {
        Query::Status => session.send(&[u8::from(identity.status)]),
        Query::Address => {
            let address = session.address();
            session.send(&[address]);
        },
        Query::FirmwareVersion => session.send(&identity.firmware_version.to_le_bytes()),
        Query::BootloaderVersion => session.send(&identity.bootloader_version.to_le_bytes()),
        Query::FirmwareNameLength => session.send(&[identity.name.len() as u8]),
        Query::FirmwareName => {
            let size = session.remaining().min(identity.name.len());
            session.send(&identity.name[.. size]);
            session.fill(0);
        },
        Query::Unknown => session.fill(0),
    }
}
