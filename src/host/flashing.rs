use std::{
    path::Path,
    vec::Vec,
    };
use log::*;

use crate::{
    command::*,
    crc::{crc32, SEED},
    layout::{self, PAGE_SIZE, FIRMWARE_MAX_SIZE, FIRMWARE_START_PAGE, NAME_OFFSET, ImageInfo},
    };
use super::{Client, Error, Transport};


/**
    firmware image ready for flashing

    the image is padded with zeros to a whole number of pages, then its size and checksum are patched in its metadata, the checksum being computed with its own field zeroed, as the bootloader does when checking it.
*/
#[derive(Clone, Debug)]
pub struct FirmwareImage {
    data: Vec<u8>,
}
impl FirmwareImage {
    pub fn new(mut data: Vec<u8>) -> Result<Self, Error> {
        if data.len() < NAME_OFFSET as usize
            {return Err(Error::Firmware("image too small to hold its metadata"))}
        if data.len() > FIRMWARE_MAX_SIZE as usize
            {return Err(Error::Firmware("image larger than firmware region"))}
        let size = data.len().div_ceil(PAGE_SIZE) * PAGE_SIZE;
        data.resize(size, 0);
        layout::SIZE.set(&mut data, size as u32);
        layout::CRC.set(&mut data, 0);
        let crc = crc32(SEED, &data);
        layout::CRC.set(&mut data, crc);
        Ok(Self {data})
    }
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::new(std::fs::read(path)?)
    }
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            version: layout::VERSION.get(&self.data).unwrap_or_default(),
            size: layout::SIZE.get(&self.data).unwrap_or_default(),
            crc: layout::CRC.get(&self.data).unwrap_or_default(),
        }
    }
    pub fn as_bytes(&self) -> &[u8] {&self.data}
    /// pages to send with their index in flash
    pub fn pages(&self) -> impl Iterator<Item=(u16, &[u8])> {
        self.data.chunks(PAGE_SIZE)
            .enumerate()
            .map(|(i, page)| (FIRMWARE_START_PAGE + i as u16, page))
    }
}

impl<T: Transport> Client<T> {
    /**
        flash a firmware image to a node in bootloader mode

        pages are sent in order, each status being polled a bounded number of times. The first page not acknowledged with success aborts the whole sequence, leaving the node with a partial image its bootloader will refuse to start.
    */
    pub async fn flash_firmware(&mut self, address: u8, image: &FirmwareImage) -> Result<(), Error> {
        let info = image.info();
        info!("flashing {} bytes, version {:#x}, checksum {:#010x}", info.size, info.version, info.crc);
        for (page, data) in image.pages() {
            let mut payload = Vec::with_capacity(FLASH_PAYLOAD);
            payload.extend_from_slice(&page.to_le_bytes());
            payload.extend_from_slice(data);
            payload.extend_from_slice(&crc32(SEED, data).to_le_bytes());
            self.request(address, Command::FlashFirmware, &payload, 1).await?;

            let mut status = None;
            for _ in 0 .. self.settings().flash_attempts {
                let mut reply = [0; 1];
                if self.transport().receive(&mut reply).await? == 1 {
                    status = Some(FlashStatus::from(reply[0]));
                    break;
                }
                tokio::time::sleep(self.settings().flash_retry_delay).await;
            }
            match status {
                Some(FlashStatus::Success) => debug!("page {} flashed", page),
                status => {
                    error!("page {} failed: {:?}", page, status);
                    return Err(Error::Flash {page, status});
                },
            }
        }
        info!("firmware flashed");
        Ok(())
    }
}
