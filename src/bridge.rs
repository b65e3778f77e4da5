/*!
    USB to bus bridge

    a node owning the only transceiver the host can reach, acting as bus master on behalf of the host. Every USB bulk OUT packet starts with a sub-command:

    - [XMIT] followed by bytes to put on the bus
    - [RECV] followed by the number of bytes wanted (at most [PACKET_SIZE]), answered on bulk IN with what arrived before the line went silent
    - [ECHO] followed by anything, answered with the same bytes, to test the USB link alone

    received bytes are pushed by the receive interrupt into a [Ring] drained by `RECV`.
*/

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicUsize, Ordering::*},
    };

pub const VENDOR_ID: u16 = 0xDEAD;
pub const PRODUCT_ID: u16 = 0xCAFE;
/// bulk OUT endpoint, host to bridge
pub const ENDPOINT_OUT: u8 = 0x01;
/// bulk IN endpoint, bridge to host
pub const ENDPOINT_IN: u8 = 0x82;
/// USB full speed bulk packet size
pub const PACKET_SIZE: usize = 64;

pub const XMIT: u8 = 1;
pub const RECV: u8 = 2;
pub const ECHO: u8 = 3;

/// receive buffer size of the bridge
pub const RING_SIZE: usize = 2048;


/**
    single producer single consumer byte queue

    indices grow forever and wrap on overflow, so `head - tail` is always the number of bytes pushed and not popped. All `N` slots hold unread data. When the producer laps the consumer, the oldest unread bytes are lost and the consumer resumes with the `N` newest.
*/
pub struct Ring<const N: usize> {
    buffer: UnsafeCell<[u8; N]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}
// slots are written by the producer only before publishing head, and read by the consumer only below it
unsafe impl<const N: usize> Sync for Ring<N> {}

impl<const N: usize> Ring<N> {
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }
    /// producer side, from the receive interrupt
    pub fn push(&self, byte: u8) {
        let head = self.head.load(Relaxed);
        unsafe {(*self.buffer.get())[head % N] = byte};
        self.head.store(head.wrapping_add(1), Release);
    }
    /// consumer side
    pub fn pop(&self) -> Option<u8> {
        let head = self.head.load(Acquire);
        let mut tail = self.tail.load(Relaxed);
        if head == tail
            {return None}
        if head.wrapping_sub(tail) > N {
            // overrun, skip to the oldest byte not overwritten
            tail = head.wrapping_sub(N);
        }
        let byte = unsafe {(*self.buffer.get())[tail % N]};
        self.tail.store(tail.wrapping_add(1), Release);
        Some(byte)
    }
    /// consumer side, drop every unread byte
    pub fn clear(&self) {
        self.tail.store(self.head.load(Acquire), Release);
    }
    /// number of unread bytes, capped to the capacity
    pub fn len(&self) -> usize {
        self.head.load(Acquire).wrapping_sub(self.tail.load(Relaxed)).min(N)
    }
    pub fn is_empty(&self) -> bool {self.len() == 0}
}
impl<const N: usize> Default for Ring<N> {
    fn default() -> Self {Self::new()}
}


#[cfg(feature = "node")]
pub use self::master::*;

#[cfg(feature = "node")]
mod master {
    use core::time::Duration;
    use embedded_hal::delay::DelayNs;
    use log::*;

    use crate::node::{Bus, IDLE_TIMEOUT};
    use super::*;

    /// silence after which `RECV` answers with what it got
    pub const RECV_IDLE: Duration = Duration::from_micros(IDLE_TIMEOUT.as_micros() as u64 + 300);
    /// ring polling period while waiting in `RECV`
    const POLL_US: u32 = 10;

    /// bus master side of the bridge, driven by the USB stack
    pub struct Bridge<'r, B, D, const N: usize> {
        ring: &'r Ring<N>,
        bus: B,
        delay: D,
    }
    impl<'r, B: Bus, D: DelayNs, const N: usize> Bridge<'r, B, D, N> {
        /// `ring` must be fed by the bus receive interrupt
        pub fn new(ring: &'r Ring<N>, mut bus: B, delay: D) -> Self {
            bus.receive();
            Self {ring, bus, delay}
        }

        /**
            process a bulk OUT packet

            returns the number of bytes of `reply` to send on bulk IN, if the sub-command has an answer
        */
        pub fn handle(&mut self, request: &[u8], reply: &mut [u8; PACKET_SIZE]) -> Option<usize> {
            let (&command, data) = request.split_first()?;
            match command {
                XMIT => {
                    self.bus.transmit();
                    self.bus.write(data);
                    self.bus.flush();
                    // anything received during turnaround is noise or our own echo
                    self.ring.clear();
                    self.bus.receive();
                    None
                },
                RECV => {
                    let size = usize::from(*data.first()?).min(PACKET_SIZE);
                    Some(self.collect(&mut reply[.. size]))
                },
                ECHO => {
                    let size = data.len().min(PACKET_SIZE);
                    reply[.. size].copy_from_slice(&data[.. size]);
                    Some(size)
                },
                _ => {
                    debug!("unknown bridge command {}", command);
                    None
                },
            }
        }

        /// fill `buffer` from the ring until full or the line is silent for [RECV_IDLE]
        fn collect(&mut self, buffer: &mut [u8]) -> usize {
            let limit = RECV_IDLE.as_micros() as u32;
            let mut count = 0;
            let mut silent = 0;
            while count < buffer.len() {
                match self.ring.pop() {
                    Some(byte) => {
                        buffer[count] = byte;
                        count += 1;
                        silent = 0;
                    },
                    None => {
                        if silent >= limit
                            {break}
                        self.delay.delay_us(POLL_US);
                        silent += POLL_US;
                    },
                }
            }
            count
        }

        pub fn release(self) -> (B, D) {(self.bus, self.delay)}
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let ring = Ring::<8>::new();
        assert_eq!(ring.pop(), None);
        for byte in 1 ..= 5 {ring.push(byte)}
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        for byte in 6 ..= 9 {ring.push(byte)}
        let rest: heapless::Vec<u8, 8> = core::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(rest.as_slice(), &[3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn overrun_keeps_newest() {
        let ring = Ring::<RING_SIZE>::new();
        for i in 0 .. RING_SIZE + 10 {
            ring.push(i as u8);
        }
        assert_eq!(ring.len(), RING_SIZE);
        assert_eq!(ring.pop(), Some(10));
        let mut count = 1;
        while ring.pop().is_some() {count += 1}
        assert_eq!(count, RING_SIZE);
    }

    #[test]
    fn full_ring_loses_nothing() {
        let ring = Ring::<16>::new();
        for i in 0 .. 16 {
            ring.push(i);
        }
        let all: heapless::Vec<u8, 16> = core::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(all.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert!(ring.is_empty());
    }

    #[test]
    fn clear_drops_unread() {
        let ring = Ring::<16>::new();
        ring.push(1);
        ring.push(2);
        ring.clear();
        assert!(ring.is_empty());
        ring.push(3);
        assert_eq!(ring.pop(), Some(3));
    }
}
