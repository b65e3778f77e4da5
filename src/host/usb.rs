use nusb::transfer::RequestBuffer;
use std::{
    time::Duration,
    vec::Vec,
    io,
    };
use log::*;

use crate::bridge::*;
use super::{Error, Settings, Transport};


/// host side of the USB bridge node
pub struct UsbBridge {
    interface: nusb::Interface,
    timeout: Duration,
    transmit_timeout: Duration,
}
impl UsbBridge {
    /// connect to the first bridge found
    pub fn open(settings: &Settings) -> Result<Self, Error> {
        let device = nusb::list_devices()?
            .find(|device| device.vendor_id() == VENDOR_ID && device.product_id() == PRODUCT_ID)
            .ok_or(Error::DeviceNotFound)?;
        info!("bus master found on bus {} address {}", device.bus_number(), device.device_address());
        let interface = device.open()?.claim_interface(0)?;
        Ok(Self {
            interface,
            timeout: settings.timeout,
            transmit_timeout: settings.transmit_timeout,
        })
    }

    async fn send(&mut self, packet: Vec<u8>) -> Result<(), Error> {
        let size = packet.len();
        let completion = tokio::time::timeout(self.transmit_timeout, self.interface.bulk_out(ENDPOINT_OUT, packet)).await
            .map_err(|_| Error::Timeout)?;
        let sent = completion.into_result()?;
        if sent.actual_length() != size
            {return Err(Error::Bus(io::Error::other("bridge accepted a partial packet")))}
        Ok(())
    }
    /// receive one bulk IN packet, empty if nothing came in time
    async fn packet(&mut self) -> Result<Vec<u8>, Error> {
        match tokio::time::timeout(self.timeout, self.interface.bulk_in(ENDPOINT_IN, RequestBuffer::new(PACKET_SIZE))).await {
            Ok(completion) => Ok(completion.into_result()?),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// check the USB link with the bridge, without touching the bus
    pub async fn echo(&mut self) -> Result<(), Error> {
        let mut packet = std::vec![0; PACKET_SIZE];
        packet[0] = ECHO;
        for (i, byte) in packet[1 .. 11].iter_mut().enumerate() {
            *byte = i as u8 + 1;
        }
        let expected = packet[1 ..].to_vec();
        self.send(packet).await?;
        let answer = self.packet().await?;
        if answer != expected
            {return Err(Error::BrokenAnswer {expected: expected.len(), received: answer.len()})}
        Ok(())
    }
}
impl Transport for UsbBridge {
    async fn transmit(&mut self, data: &[u8]) -> Result<(), Error> {
        for chunk in data.chunks(PACKET_SIZE - 1) {
            let mut packet = Vec::with_capacity(chunk.len() + 1);
            packet.push(XMIT);
            packet.extend_from_slice(chunk);
            self.send(packet).await?;
        }
        Ok(())
    }
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let mut count = 0;
        while count < buffer.len() {
            let size = (buffer.len() - count).min(PACKET_SIZE);
            self.send(std::vec![RECV, size as u8]).await?;
            let packet = self.packet().await?;
            let received = packet.len().min(size);
            buffer[count ..][.. received].copy_from_slice(&packet[.. received]);
            count += received;
            if received < size
                {break}
        }
        Ok(count)
    }
}
