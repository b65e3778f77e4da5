use packbytes::ToBytes;
use std::{
    string::String,
    vec::Vec,
    };
use log::*;

use crate::{
    command::*,
    crc::{crc32, SEED},
    };
use super::{Error, Settings, Transport};


/**
    LBUS host client

    every method addresses one node, or every node through [BROADCAST]. Broadcast requests expecting an answer get the answers of all nodes at once, which only makes sense on a bus with one node.
*/
pub struct Client<T> {
    transport: T,
    settings: Settings,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, settings: Settings) -> Self {
        Self {transport, settings}
    }
    pub fn settings(&self) -> &Settings {&self.settings}
    pub fn transport(&mut self) -> &mut T {&mut self.transport}
    pub fn into_inner(self) -> T {self.transport}

    /// send a packet whose exchange ends after `reply` bytes from the node
    pub(super) async fn request(&mut self, address: u8, command: Command, payload: &[u8], reply: usize) -> Result<(), Error> {
        let length = exchange_length(payload.len(), reply);
        if length > usize::from(u16::MAX)
            {return Err(Error::Misuse("packet is longer than maximum allowed"))}
        let header = Header::new(length, address, command);
        let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
        packet.extend_from_slice(&header.to_le_bytes());
        packet.extend_from_slice(payload);
        debug!("send {:?} to {} length {}", command, address, length);
        self.transport.transmit(&packet).await
    }
    /// receive exactly `buffer.len()` bytes
    pub(super) async fn receive_exact(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        let received = self.transport.receive(buffer).await?;
        if received == 0 && !buffer.is_empty()
            {Err(Error::NoAnswer)}
        else if received < buffer.len()
            {Err(Error::BrokenAnswer {expected: buffer.len(), received})}
        else
            {Ok(())}
    }
    async fn receive_u8(&mut self) -> Result<u8, Error> {
        let mut reply = [0; 1];
        self.receive_exact(&mut reply).await?;
        Ok(reply[0])
    }

    /// check a node is present
    pub async fn ping(&mut self, address: u8) -> Result<(), Error> {
        self.request(address, Command::Ping, &[], 1).await?;
        self.receive_u8().await?;
        Ok(())
    }

    /**
        query a data item, receiving up to `buffer.len()` bytes

        returns the number of bytes received, unknown items are answered with zeros
    */
    pub async fn get_data(&mut self, address: u8, query: u16, buffer: &mut [u8]) -> Result<usize, Error> {
        let payload = GetData {query}.to_le_bytes();
        self.request(address, Command::GetData, &payload, buffer.len()).await?;
        let received = self.transport.receive(buffer).await?;
        if received == 0 && !buffer.is_empty()
            {return Err(Error::NoAnswer)}
        Ok(received)
    }
    async fn get_exact<const N: usize>(&mut self, address: u8, query: Query) -> Result<[u8; N], Error> {
        let mut buffer = [0; N];
        let received = self.get_data(address, u16::from(u8::from(query)), &mut buffer).await?;
        if received < N
            {return Err(Error::BrokenAnswer {expected: N, received})}
        Ok(buffer)
    }
    pub async fn status(&mut self, address: u8) -> Result<NodeStatus, Error> {
        let [status] = self.get_exact::<1>(address, Query::Status).await?;
        Ok(NodeStatus::from(status))
    }
    /// address a node reports, useful through [BROADCAST] with a single node on the bus
    pub async fn node_address(&mut self, address: u8) -> Result<u8, Error> {
        let [reply] = self.get_exact::<1>(address, Query::Address).await?;
        Ok(reply)
    }
    pub async fn firmware_version(&mut self, address: u8) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.get_exact(address, Query::FirmwareVersion).await?))
    }
    pub async fn bootloader_version(&mut self, address: u8) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.get_exact(address, Query::BootloaderVersion).await?))
    }
    pub async fn firmware_name_length(&mut self, address: u8) -> Result<u8, Error> {
        let [length] = self.get_exact::<1>(address, Query::FirmwareNameLength).await?;
        Ok(length)
    }
    /// firmware name, empty if the node has none
    pub async fn firmware_name(&mut self, address: u8) -> Result<String, Error> {
        let length = self.firmware_name_length(address).await?;
        if length == 0
            {return Ok(String::new())}
        let mut name = std::vec![0; usize::from(length)];
        let received = self.get_data(address, u16::from(u8::from(Query::FirmwareName)), &mut name).await?;
        name.truncate(received);
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    /// change a node address, valid addresses are 1 to 254
    pub async fn set_address(&mut self, address: u8, new: u8) -> Result<(), Error> {
        if new == UNCONFIGURED || new == BROADCAST
            {return Err(Error::Misuse("node address must be between 1 and 254"))}
        if address == BROADCAST {
            warn!("setting address {} by broadcast, every node listening takes it", new);
        }
        let payload = SetAddress {address: new}.to_le_bytes();
        self.request(address, Command::SetAddress, &payload, 1).await?;
        match self.receive_u8().await? {
            0 => Ok(()),
            status => Err(Error::Refused(status)),
        }
    }
    /// erase the node config, including its address
    pub async fn erase_config(&mut self, address: u8) -> Result<(), Error> {
        self.request(address, Command::EraseConfig, &[], 0).await
    }
    pub async fn reset_to_bootloader(&mut self, address: u8) -> Result<(), Error> {
        self.request(address, Command::ResetToBootloader, &[], 0).await
    }
    pub async fn reset_to_firmware(&mut self, address: u8) -> Result<(), Error> {
        self.request(address, Command::ResetToFirmware, &[], 0).await
    }

    /**
        read node memory at an absolute address, only nodes in bootloader answer

        `buffer` length must be a multiple of 4 and at most 1024. The node checksum of the bytes is verified.
    */
    pub async fn read_memory(&mut self, address: u8, location: u32, buffer: &mut [u8]) -> Result<(), Error> {
        if buffer.len() % 4 != 0 || buffer.len() > crate::layout::PAGE_SIZE
            {return Err(Error::Misuse("memory read length must be a multiple of 4 up to 1024"))}
        let payload = ReadMemory {address: location}.to_le_bytes();
        self.request(address, Command::ReadMemory, &payload, buffer.len() + 4).await?;
        self.receive_exact(buffer).await?;
        let mut crc = [0; 4];
        self.receive_exact(&mut crc).await?;
        let received = u32::from_le_bytes(crc);
        let expected = crc32(SEED, buffer);
        if received != expected
            {return Err(Error::Crc {expected, received})}
        Ok(())
    }

    /// set output channels starting at `led`, no answer
    pub async fn led_set_16bit(&mut self, address: u8, led: u16, values: &[u16]) -> Result<(), Error> {
        if values.len() > MAX_LED_VALUES
            {return Err(Error::Misuse("too many values"))}
        let mut payload = Vec::with_capacity(2 + 2 * values.len());
        payload.extend_from_slice(&LedSet {led}.to_le_bytes());
        for value in values {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        self.request(address, Command::LedSet16Bit, &payload, 0).await
    }
    /// set output channels starting at `led` through the node curves, no answer
    pub async fn led_set_8bit(&mut self, address: u8, led: u16, values: &[u8]) -> Result<(), Error> {
        if values.len() > MAX_LED_VALUES
            {return Err(Error::Misuse("too many values"))}
        let mut payload = Vec::with_capacity(2 + values.len());
        payload.extend_from_slice(&LedSet {led}.to_le_bytes());
        payload.extend_from_slice(values);
        self.request(address, Command::LedSet8Bit, &payload, 0).await
    }
    /// apply output channels set so far
    pub async fn led_commit(&mut self, address: u8) -> Result<(), Error> {
        self.request(address, Command::LedCommit, &[], 0).await
    }
}
