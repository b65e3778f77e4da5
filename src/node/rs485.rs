use embedded_hal::{digital::OutputPin, delay::DelayNs};
use embedded_io::Write;
use log::*;

use super::Bus;


/// time given to the other transceivers to release the line after we take it
pub const TURNAROUND_US: u32 = 2;

/// one-shot timer whose expiry is wired to [super::Node::timeout]
pub trait IdleTimer {
    fn restart(&mut self);
    fn stop(&mut self);
}

/**
    RS-485 transceiver with separate driver enable and receiver enable pins

    `driver` is active high, `receiver` active low, as on the common MAX485 style parts. Tying both pins together also works, driving both is harmless.
*/
pub struct Rs485<U, DE, RE, D, T> {
    uart: U,
    driver: DE,
    receiver: RE,
    delay: D,
    timer: T,
}
impl<U, DE, RE, D, T> Rs485<U, DE, RE, D, T>
where
    U: Write,
    DE: OutputPin,
    RE: OutputPin,
    D: DelayNs,
    T: IdleTimer,
{
    pub fn new(uart: U, driver: DE, receiver: RE, delay: D, timer: T) -> Self {
        let mut new = Self {uart, driver, receiver, delay, timer};
        new.receive();
        new
    }
    pub fn release(self) -> (U, DE, RE, D, T) {
        (self.uart, self.driver, self.receiver, self.delay, self.timer)
    }
}
impl<U, DE, RE, D, T> Bus for Rs485<U, DE, RE, D, T>
where
    U: Write,
    DE: OutputPin,
    RE: OutputPin,
    D: DelayNs,
    T: IdleTimer,
{
    fn transmit(&mut self) {
        if let Err(err) = self.receiver.set_high() {warn!("receiver pin: {:?}", err)}
        if let Err(err) = self.driver.set_high() {warn!("driver pin: {:?}", err)}
        self.delay.delay_us(TURNAROUND_US);
    }
    fn receive(&mut self) {
        if let Err(err) = self.driver.set_low() {warn!("driver pin: {:?}", err)}
        if let Err(err) = self.receiver.set_low() {warn!("receiver pin: {:?}", err)}
    }
    fn write(&mut self, bytes: &[u8]) {
        if let Err(err) = self.uart.write_all(bytes) {
            warn!("uart write: {:?}", err);
        }
    }
    fn flush(&mut self) {
        if let Err(err) = self.uart.flush() {
            warn!("uart flush: {:?}", err);
        }
    }
    fn restart_timer(&mut self) {self.timer.restart()}
    fn stop_timer(&mut self) {self.timer.stop()}
}
