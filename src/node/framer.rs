use packbytes::FromBytes;
use log::*;

use crate::command::{Header, HEADER_SIZE, Command};
use super::{Bus, dispatch::*};


/**
    packet framer state, owned by [super::Node]

    there is no delimiter on the wire: a packet ends once `header.length` bytes went through the line, counting the reply, or when the line stays silent for too long.
*/
pub struct Link<B, C> {
    bus: B,
    commands: C,
    address: u8,
    /// bytes exchanged in current packet
    position: u32,
    raw: [u8; HEADER_SIZE],
    header: Header,
    continuation: Option<Continuation>,
    pending: Option<Request>,
    transmitting: bool,
}

impl<B: Bus, C: CommandSet> Link<B, C> {
    pub(super) fn new(bus: B, commands: C, address: u8) -> Self {
        Self {
            bus,
            commands,
            address,
            position: 0,
            raw: [0; HEADER_SIZE],
            header: Header::default(),
            continuation: None,
            pending: None,
            transmitting: false,
        }
    }

    /// consume one received byte, returns true when a request just became ready for execution
    pub(super) fn receive(&mut self, byte: u8) -> bool {
        if self.transmitting || self.pending.is_some()
            {return false}
        self.bus.restart_timer();

        let index = self.position as usize;
        self.position += 1;
        if index < HEADER_SIZE {
            self.raw[index] = byte;
            if index + 1 == HEADER_SIZE {
                self.header = Header::from_le_bytes(self.raw);
                self.accept();
            }
        }
        else if let Some(continuation) = &mut self.continuation {
            if let Some(payload) = continuation.feed(byte, self.position, &self.header) {
                self.continuation = None;
                self.pending = Some(Request {header: self.header, payload});
            }
        }

        if self.pending.is_some() {
            self.bus.stop_timer();
            return true;
        }
        if self.position >= 2 && self.position >= self.declared_length()
            {self.end_packet()}
        false
    }

    fn accept(&mut self) {
        if !self.header.targets(self.address)
            {return}
        debug!("packet {:?} length {} for us", self.header.command, self.header.length);
        match self.commands.accept(&self.header) {
            Accept::Ignore => {},
            Accept::Execute => self.pending = Some(Request {header: self.header, payload: Payload::Empty}),
            Accept::Collect(continuation) => self.continuation = Some(continuation),
        }
    }

    /// declared length, available as soon as its two bytes arrived
    fn declared_length(&self) -> u32 {
        u32::from(u16::from_le_bytes([self.raw[0], self.raw[1]]))
    }

    pub(super) fn timeout(&mut self) {
        if self.pending.is_some()
            {return}
        if self.position != 0 {
            debug!("packet dropped after {} bytes of silence", self.position);
        }
        self.end_packet();
    }

    /// execute the pending request then close the packet
    pub(super) fn execute(&mut self) -> Option<Command> {
        let request = self.pending.take()?;
        let command = request.header.command;
        let mut session = Session {
            bus: &mut self.bus,
            header: request.header,
            position: &mut self.position,
            transmitting: &mut self.transmitting,
            address: &mut self.address,
        };
        self.commands.execute(request, &mut session);
        self.end_packet();
        Some(command)
    }

    fn end_packet(&mut self) {
        if self.transmitting {
            self.bus.flush();
            self.bus.receive();
            self.transmitting = false;
        }
        self.bus.stop_timer();
        self.position = 0;
        self.continuation = None;
    }

    /// give the line back before leaving, as when starting a firmware
    pub fn release(&mut self) {
        self.pending = None;
        self.end_packet();
    }
    pub fn address(&self) -> u8 {self.address}
    /// bytes counted in the packet in progress, 0 between packets
    pub fn position(&self) -> u32 {self.position}
    pub fn commands(&mut self) -> &mut C {&mut self.commands}
    pub fn bus(&mut self) -> &mut B {&mut self.bus}
}


/// access to the line while executing a request
pub struct Session<'l, B> {
    bus: &'l mut B,
    header: Header,
    position: &'l mut u32,
    transmitting: &'l mut bool,
    address: &'l mut u8,
}
impl<B: Bus> Session<'_, B> {
    pub fn header(&self) -> &Header {&self.header}
    /// current node address
    pub fn address(&self) -> u8 {*self.address}
    /// change the address the framer filters packets with
    pub fn set_address(&mut self, address: u8) {*self.address = address}
    /// bytes the packet still declares after what was exchanged so far
    pub fn remaining(&self) -> usize {
        u32::from(self.header.length).saturating_sub(*self.position) as usize
    }
    /// send reply bytes, taking the line on first call
    pub fn send(&mut self, bytes: &[u8]) {
        if !*self.transmitting {
            self.bus.transmit();
            *self.transmitting = true;
        }
        self.bus.write(bytes);
        *self.position = self.position.saturating_add(bytes.len() as u32);
    }
    /// send `byte` until the declared length is reached
    pub fn fill(&mut self, byte: u8) {
        let chunk = [byte; 16];
        loop {
            let size = self.remaining().min(chunk.len());
            if size == 0
                {break}
            self.send(&chunk[.. size]);
        }
    }
}
