/*!
    node side of the bus, for `no_std` targets

    The central resource is the [Node] struct, owning the packet framer state and the [CommandSet] answering packets. It is meant to be shared between three contexts:

    - the receive interrupt, calling [Node::receive] for each byte
    - the idle timer interrupt, calling [Node::timeout] once the line is silent for [IDLE_TIMEOUT]
    - the main loop, calling [Node::poll] to execute completed requests, which may take long when flash is involved

    command sets provided

    - [Bootloader] for the resident bootloader, owning firmware flashing
    - [Firmware] for application firmwares, with a LED output table
*/

/// byte level state machine, this is the tricky part of the code
mod framer;
/// commands shared by every command set
mod dispatch;
/// RS-485 transceiver adapter over embedded-hal and embedded-io
mod rs485;
pub mod bootloader;
pub mod firmware;

pub use framer::{Link, Session};
pub use dispatch::*;
pub use rs485::*;
pub use bootloader::Bootloader;
pub use firmware::Firmware;

use core::{
    time::Duration,
    sync::atomic::{AtomicBool, Ordering::*},
    };

use crate::{
    command::Command,
    mutex::*,
    };


/// silence after which a packet in progress is dropped
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(1);

/**
    half-duplex line driver

    implementations switch a shared transceiver between listening and driving the line
*/
pub trait Bus {
    /// take the line, the node stops listening until [Bus::receive]
    fn transmit(&mut self);
    /// release the line and listen again
    fn receive(&mut self);
    /// send bytes, the line must have been taken
    fn write(&mut self, bytes: &[u8]);
    /// block until the last written byte is completely out
    fn flush(&mut self);
    /// restart the idle timer, its expiry must trigger [Node::timeout]
    fn restart_timer(&mut self);
    fn stop_timer(&mut self);
}

/// persisted boot mode request, kept in a register surviving resets
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum BootFlag {
    #[default]
    Normal = 0,
    /// stay in bootloader after next reset
    GotoBootloader = 1,
    /// start firmware even if the bootloader strap is set
    EnforceNormalBoot = 2,
}
impl From<u32> for BootFlag {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::GotoBootloader,
            2 => Self::EnforceNormalBoot,
            _ => Self::Normal,
        }
    }
}

/**
    chip services used by command sets

    `reset` and `boot` never return on real hardware. `boot` must tear down every peripheral and interrupt the bootloader enabled, move the vector table to `vector_table` and jump to the firmware reset handler.
*/
pub trait System {
    fn boot_flag(&mut self) -> BootFlag;
    fn set_boot_flag(&mut self, flag: BootFlag);
    /// hardware strap requesting bootloader mode
    fn bootloader_strap(&mut self) -> bool;
    /// version stored by the bootloader before starting the firmware
    fn bootloader_version(&mut self) -> u32;
    fn set_bootloader_version(&mut self, version: u32);
    fn reset(&mut self);
    fn boot(&mut self, vector_table: u32);
}


/// a bus node, shared between interrupt handlers and main loop
pub struct Node<B, C> {
    link: BusyMutex<Link<B, C>>,
    /// a complete request is waiting for [Node::poll]
    ready: AtomicBool,
    /// the idle timer fired while the state was locked, the packet in progress is over
    expired: AtomicBool,
}
impl<B: Bus, C: CommandSet> Node<B, C> {
    pub fn new(bus: B, commands: C, address: u8) -> Self {
        Self {
            link: BusyMutex::new(Link::new(bus, commands, address)),
            ready: AtomicBool::new(false),
            expired: AtomicBool::new(false),
        }
    }
    /// feed a received byte, from the receive interrupt
    pub fn receive(&self, byte: u8) {
        // main loop is executing a request, nothing is expected meanwhile
        let Some(link) = self.link.try_lock()
            else {return};
        if self.catch_up(link).receive(byte) {
            self.ready.store(true, Release);
        }
    }
    /// the line stayed silent for [IDLE_TIMEOUT], from the timer interrupt
    pub fn timeout(&self) {
        match self.link.try_lock() {
            Some(mut link) => link.timeout(),
            // applied by whoever takes the lock next
            None => self.expired.store(true, Release),
        }
    }
    /**
        execute the pending request if any, from the main loop

        returns the command executed
    */
    pub fn poll(&self) -> Option<Command> {
        if self.expired.load(Acquire) {
            drop(self.lock());
        }
        if !self.ready.swap(false, Acquire)
            {return None}
        self.lock().execute()
    }
    /// current bus address
    pub fn address(&self) -> u8 {
        self.lock().address()
    }
    /**
        exclusive access to the node state

        bytes received meanwhile are dropped, an idle timeout expiring meanwhile is applied on next access
    */
    pub fn lock(&self) -> BusyMutexGuard<'_, Link<B, C>> {
        self.catch_up(self.link.lock())
    }
    /// apply a timeout missed while the state was locked
    fn catch_up<'n>(&'n self, mut link: BusyMutexGuard<'n, Link<B, C>>) -> BusyMutexGuard<'n, Link<B, C>> {
        if self.expired.swap(false, Acquire) {
            link.timeout();
        }
        link
    }
}
