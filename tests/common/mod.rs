#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    rc::Rc,
    };
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use lbus::{
    command::Command,
    host::{Error, Transport},
    layout::{self, FLASH_SIZE, PAGE_SIZE},
    node::{
        Bus, BootFlag, CommandSet, Node, System, Bootloader,
        firmware::{Firmware, LedTable, Outputs, LINEAR},
        },
    };


/// run a test future to completion
pub fn run<F: Future>(test: F) -> F::Output {
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Runtime::new().unwrap().block_on(test)
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    Read {offset: u32, len: usize},
    Write {offset: u32, len: usize},
    Erase {from: u32, to: u32},
}

#[derive(Debug)]
pub struct FlashError(NorFlashErrorKind);
impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {self.0}
}

/// NOR flash in memory: erasing sets bits, writing can only clear them
#[derive(Debug)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub operations: Vec<Operation>,
    /// pages silently keeping their content when erased
    pub stuck_pages: Vec<u32>,
    /// words silently keeping their content when written
    pub stuck_words: Vec<u32>,
}
impl Flash {
    pub fn new() -> Self {
        Self {
            buf: vec![0xFF; FLASH_SIZE as usize],
            operations: Vec::new(),
            stuck_pages: Vec::new(),
            stuck_words: Vec::new(),
        }
    }
    /// bytes at an absolute address
    pub fn at(&self, address: u32, len: usize) -> &[u8] {
        let offset = (address - layout::FLASH_BASE) as usize;
        &self.buf[offset ..][.. len]
    }
    /// place a raw image at the firmware address, as if flashed
    pub fn load_firmware(&mut self, image: &[u8]) {
        let offset = (layout::FIRMWARE_START - layout::FLASH_BASE) as usize;
        self.buf[offset ..][.. image.len()].copy_from_slice(image);
    }
    fn check(&self, offset: u32, len: usize) -> Result<(), FlashError> {
        if offset as usize + len > self.buf.len()
            {Err(FlashError(NorFlashErrorKind::OutOfBounds))}
        else
            {Ok(())}
    }
}
impl ErrorType for Flash {
    type Error = FlashError;
}
impl ReadNorFlash for Flash {
    const READ_SIZE: usize = 1;
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len())?;
        self.operations.push(Operation::Read {offset, len: bytes.len()});
        bytes.copy_from_slice(&self.buf[offset as usize ..][.. bytes.len()]);
        Ok(())
    }
    fn capacity(&self) -> usize {self.buf.len()}
}
impl NorFlash for Flash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = PAGE_SIZE;
    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from as usize % PAGE_SIZE != 0 || to as usize % PAGE_SIZE != 0
            {return Err(FlashError(NorFlashErrorKind::NotAligned))}
        self.check(from, (to - from) as usize)?;
        self.operations.push(Operation::Erase {from, to});
        for page in (from .. to).step_by(PAGE_SIZE) {
            if !self.stuck_pages.contains(&page) {
                self.buf[page as usize ..][.. PAGE_SIZE].fill(0xFF);
            }
        }
        Ok(())
    }
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset % 4 != 0 || bytes.len() % 4 != 0
            {return Err(FlashError(NorFlashErrorKind::NotAligned))}
        self.check(offset, bytes.len())?;
        self.operations.push(Operation::Write {offset, len: bytes.len()});
        for (i, word) in bytes.chunks(4).enumerate() {
            let start = offset as usize + 4 * i;
            if self.stuck_words.contains(&(start as u32))
                {continue}
            for (cell, byte) in self.buf[start ..][.. 4].iter_mut().zip(word) {
                *cell &= byte;
            }
        }
        Ok(())
    }
}

/// flash handle shared between a node and the test inspecting it
#[derive(Clone)]
pub struct SharedFlash(pub Rc<RefCell<Flash>>);
impl SharedFlash {
    pub fn new() -> Self {Self(Rc::new(RefCell::new(Flash::new())))}
}
impl ErrorType for SharedFlash {
    type Error = FlashError;
}
impl ReadNorFlash for SharedFlash {
    const READ_SIZE: usize = 1;
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.0.borrow_mut().read(offset, bytes)
    }
    fn capacity(&self) -> usize {self.0.borrow().capacity()}
}
impl NorFlash for SharedFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = PAGE_SIZE;
    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.0.borrow_mut().erase(from, to)
    }
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.0.borrow_mut().write(offset, bytes)
    }
}


/// chip services recording what command sets asked for
#[derive(Debug, Default)]
pub struct Chip {
    pub flag: BootFlag,
    pub strap: bool,
    pub bootloader_version: u32,
    pub resets: usize,
    pub boots: Vec<u32>,
}
#[derive(Clone, Default)]
pub struct FakeSystem(pub Rc<RefCell<Chip>>);
impl System for FakeSystem {
    fn boot_flag(&mut self) -> BootFlag {self.0.borrow().flag}
    fn set_boot_flag(&mut self, flag: BootFlag) {self.0.borrow_mut().flag = flag}
    fn bootloader_strap(&mut self) -> bool {self.0.borrow().strap}
    fn bootloader_version(&mut self) -> u32 {self.0.borrow().bootloader_version}
    fn set_bootloader_version(&mut self, version: u32) {self.0.borrow_mut().bootloader_version = version}
    fn reset(&mut self) {self.0.borrow_mut().resets += 1}
    fn boot(&mut self, vector_table: u32) {self.0.borrow_mut().boots.push(vector_table)}
}


/// transceiver events seen by a [Line]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineEvent {
    Transmit,
    Receive,
    Flush,
}

/// node side of the simulated line, collecting what the node sends
#[derive(Clone, Default)]
pub struct Line {
    pub sent: Rc<RefCell<Vec<u8>>>,
    pub events: Rc<RefCell<Vec<LineEvent>>>,
    pub timer: Rc<RefCell<bool>>,
    transmitting: bool,
}
impl Line {
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }
    pub fn timer_running(&self) -> bool {*self.timer.borrow()}
}
impl Bus for Line {
    fn transmit(&mut self) {
        self.transmitting = true;
        self.events.borrow_mut().push(LineEvent::Transmit);
    }
    fn receive(&mut self) {
        self.transmitting = false;
        self.events.borrow_mut().push(LineEvent::Receive);
    }
    fn write(&mut self, bytes: &[u8]) {
        assert!(self.transmitting, "writing without holding the line");
        self.sent.borrow_mut().extend_from_slice(bytes);
    }
    fn flush(&mut self) {
        self.events.borrow_mut().push(LineEvent::Flush);
    }
    fn restart_timer(&mut self) {*self.timer.borrow_mut() = true}
    fn stop_timer(&mut self) {*self.timer.borrow_mut() = false}
}

/// a node on the simulated bus, whatever its command set
pub trait Station {
    fn receive(&self, byte: u8);
    fn timeout(&self);
    fn poll(&self) -> Option<Command>;
}
impl<C: CommandSet> Station for Node<Line, C> {
    fn receive(&self, byte: u8) {Node::receive(self, byte)}
    fn timeout(&self) {Node::timeout(self)}
    fn poll(&self) -> Option<Command> {Node::poll(self)}
}

/**
    in-process bus: every transmitted byte reaches every node, replies reach the host and the other nodes

    the line is considered silent between two host transmissions, so idle timeouts fire there
*/
pub struct SimBus {
    stations: Vec<(Rc<dyn Station>, Line)>,
    replies: VecDeque<u8>,
    /// packets sent by the host, in order
    pub packets: Vec<Vec<u8>>,
    /// commands executed, with the index of the station executing them
    pub executed: Vec<(usize, Command)>,
}
impl SimBus {
    pub fn new() -> Self {
        Self {stations: Vec::new(), replies: VecDeque::new(), packets: Vec::new(), executed: Vec::new()}
    }
    /// plug a station using the given line, returns its index
    pub fn attach(&mut self, station: Rc<dyn Station>, line: Line) -> usize {
        self.stations.push((station, line));
        self.stations.len() - 1
    }
    fn deliver(&self, origin: Option<usize>, byte: u8) {
        for (index, (station, _)) in self.stations.iter().enumerate() {
            if Some(index) != origin
                {station.receive(byte)}
        }
    }
    /// let nodes execute their requests until nobody talks anymore
    fn settle(&mut self) {
        loop {
            let mut quiet = true;
            for index in 0 .. self.stations.len() {
                if let Some(command) = self.stations[index].0.poll() {
                    self.executed.push((index, command));
                }
                let sent = self.stations[index].1.take();
                if !sent.is_empty() {
                    quiet = false;
                }
                for byte in sent {
                    self.replies.push_back(byte);
                    self.deliver(Some(index), byte);
                }
            }
            if quiet
                {break}
        }
    }
    /// silence on the line
    pub fn idle(&self) {
        for (station, _) in &self.stations {
            station.timeout();
        }
    }
    /// put raw bytes on the line without any silence before
    pub fn inject(&mut self, data: &[u8]) {
        for &byte in data {
            self.deliver(None, byte);
        }
        self.settle();
    }
}
impl Transport for SimBus {
    async fn transmit(&mut self, data: &[u8]) -> Result<(), Error> {
        // answers nobody read belong to the previous exchange
        self.replies.clear();
        self.idle();
        self.packets.push(data.to_vec());
        self.inject(data);
        Ok(())
    }
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let size = buffer.len().min(self.replies.len());
        for (slot, byte) in buffer.iter_mut().zip(self.replies.drain(.. size)) {
            *slot = byte;
        }
        Ok(size)
    }
}

/// command of a packet sent by the host
pub fn command_of(packet: &[u8]) -> Command {
    Command::from(packet[3])
}

/// a firmware image with metadata and recognizable content
pub fn firmware_image(name: &str, version: u32, size: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0 .. size).map(|i| (i * 7 + i / 256) as u8).collect();
    layout::VERSION.set(&mut image, version);
    layout::SIZE.set(&mut image, 0);
    layout::CRC.set(&mut image, 0);
    let name_offset = layout::NAME_OFFSET as usize;
    image[name_offset ..][.. name.len()].copy_from_slice(name.as_bytes());
    image[name_offset + name.len()] = 0;
    image
}


/// outputs recording every commit
#[derive(Clone, Default)]
pub struct Recorder(pub Rc<RefCell<Vec<Vec<u16>>>>);
impl Outputs for Recorder {
    fn commit(&mut self, values: &[u16]) {
        self.0.borrow_mut().push(values.to_vec());
    }
}

pub const CHANNELS: usize = 8;
pub type FirmwareNode = Node<Line, Firmware<'static, SharedFlash, FakeSystem, Recorder, CHANNELS>>;
pub type BootloaderNode = Node<Line, Bootloader<SharedFlash, FakeSystem>>;

/// firmware named `boot-test` version 0x0102, at the address stored in flash
pub fn firmware_node(flash: &SharedFlash, system: &FakeSystem, outputs: &Recorder) -> (Rc<FirmwareNode>, Line) {
    let line = Line::default();
    let mut firmware = Firmware::new(
        flash.clone(),
        system.clone(),
        outputs.clone(),
        LedTable::uniform(&LINEAR),
        0x0102,
        "boot-test",
        );
    let address = firmware.address();
    (Rc::new(Node::new(line.clone(), firmware, address)), line)
}

/// bootloader at the address stored in flash
pub fn bootloader_node(flash: &SharedFlash, system: &FakeSystem, version: u32) -> (Rc<BootloaderNode>, Line) {
    let line = Line::default();
    let mut bootloader = Bootloader::new(flash.clone(), system.clone(), version);
    let address = bootloader.address();
    (Rc::new(Node::new(line.clone(), bootloader, address)), line)
}
