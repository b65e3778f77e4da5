mod common;

use std::{cell::Cell, rc::Rc};
use common::*;
use embedded_hal::delay::DelayNs;
use lbus::bridge::{Bridge, Ring, RING_SIZE, PACKET_SIZE, XMIT, RECV, ECHO};
use pretty_assertions::assert_eq;


/// delay advancing a virtual clock, in nanoseconds
#[derive(Clone, Default)]
struct Clock(Rc<Cell<u64>>);
impl DelayNs for Clock {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + u64::from(ns));
    }
}

#[test]
fn xmit_drops_received_bytes() {
    let ring = Ring::<RING_SIZE>::new();
    let line = Line::default();
    let mut bridge = Bridge::new(&ring, line.clone(), Clock::default());
    ring.push(0x55);
    let mut reply = [0; PACKET_SIZE];
    assert_eq!(bridge.handle(&[XMIT, 5, 0, 1, 1, 9], &mut reply), None);
    assert_eq!(line.take(), [5, 0, 1, 1, 9]);
    assert_eq!(
        *line.events.borrow(),
        [LineEvent::Receive, LineEvent::Transmit, LineEvent::Flush, LineEvent::Receive],
        );
    assert!(ring.is_empty());
}

#[test]
fn recv_returns_on_silence() {
    let ring = Ring::<RING_SIZE>::new();
    let clock = Clock::default();
    let mut bridge = Bridge::new(&ring, Line::default(), clock.clone());
    for byte in [1, 2, 3] {ring.push(byte)}
    let mut reply = [0; PACKET_SIZE];
    assert_eq!(bridge.handle(&[RECV, 10], &mut reply), Some(3));
    assert_eq!(reply[.. 3], [1, 2, 3]);
    assert!(clock.0.get() >= 1_300_000);

    // nothing at all
    assert_eq!(bridge.handle(&[RECV, 10], &mut reply), Some(0));
}

#[test]
fn recv_is_bounded() {
    let ring = Ring::<RING_SIZE>::new();
    let clock = Clock::default();
    let mut bridge = Bridge::new(&ring, Line::default(), clock.clone());
    for byte in 0 .. 100 {ring.push(byte)}
    let mut reply = [0; PACKET_SIZE];
    assert_eq!(bridge.handle(&[RECV, 200], &mut reply), Some(PACKET_SIZE));
    assert_eq!(reply[63], 63);
    // a full read does not wait
    assert_eq!(clock.0.get(), 0);
    assert_eq!(bridge.handle(&[RECV, 4], &mut reply), Some(4));
    assert_eq!(reply[.. 4], [64, 65, 66, 67]);
    assert_eq!(ring.len(), 32);
}

#[test]
fn echo_and_garbage() {
    let ring = Ring::<RING_SIZE>::new();
    let mut bridge = Bridge::new(&ring, Line::default(), Clock::default());
    let mut reply = [0; PACKET_SIZE];
    assert_eq!(bridge.handle(&[ECHO, 9, 8, 7], &mut reply), Some(3));
    assert_eq!(reply[.. 3], [9, 8, 7]);
    assert_eq!(bridge.handle(&[], &mut reply), None);
    assert_eq!(bridge.handle(&[RECV], &mut reply), None);
    assert_eq!(bridge.handle(&[42, 1], &mut reply), None);
}
