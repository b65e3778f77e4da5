/*!
    append-only configuration store in a dedicated flash region

    records are laid out one after the other, each one 4 byte aligned:

    ```text
    | type: u32 | length: u32 | data: [u8; length] | padding to 4 |
    ```

    erased flash reads as all ones, so the first header of type [UNSET] marks the free space. A value is never overwritten in place: writing a type again appends a new record and lookups return the last one. Only a full [ConfigStore::erase] gets rid of old records.
*/

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};
use log::*;

use crate::layout::{CONFIG_START, CONFIG_SIZE, FLASH_BASE};


/// type of erased space
pub const UNSET: u32 = 0xFFFF_FFFF;
/// record holding the node bus address as a u32
pub const ADDRESS: u32 = 1;

const HEADER: u32 = 8;

/// error raised by config store operations
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq)]
pub enum Error {
    #[error("no room left in config region")]
    NoSpace,
    #[error("record type is reserved for free space")]
    ReservedType,
    #[error("flash operation failed: {0:?}")]
    Flash(NorFlashErrorKind),
}
impl Error {
    /// status byte reported to the bus, 0 being reserved for success
    pub fn status(&self) -> u8 {
        match self {
            Self::ReservedType => 0xFF,
            Self::NoSpace => 0xFE,
            Self::Flash(_) => 0xFD,
        }
    }
}
fn flash_error<E: NorFlashError>(error: E) -> Error {
    Error::Flash(error.kind())
}

/// location of a record in flash
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Record {
    pub kind: u32,
    /// data length, without header and padding
    pub length: u32,
    /// flash offset of the record header
    offset: u32,
}
impl Record {
    /// flash offset of the record data
    pub fn data(&self) -> u32 {self.offset + HEADER}
    /// flash offset right after this record, if representable
    fn next(&self) -> Option<u32> {
        self.offset.checked_add(record_size(self.length)?)
    }
}
/// space taken by a record with given data length
fn record_size(length: u32) -> Option<u32> {
    Some(length.checked_add(HEADER + 3)? & !3)
}

pub struct ConfigStore<F> {
    flash: F,
    start: u32,
    size: u32,
}
impl<F: NorFlash> ConfigStore<F> {
    /// store in the standard config region, `flash` offsets being relative to [FLASH_BASE]
    pub fn new(flash: F) -> Self {
        Self::with_region(flash, CONFIG_START - FLASH_BASE, CONFIG_SIZE)
    }
    /// store in a custom region, given as flash offsets
    pub fn with_region(flash: F, start: u32, size: u32) -> Self {
        Self {flash, start, size}
    }
    pub fn release(self) -> F {self.flash}

    fn end(&self) -> u32 {self.start + self.size}

    fn header(&mut self, offset: u32) -> Result<Record, Error> {
        let mut bytes = [0u8; HEADER as usize];
        self.flash.read(offset, &mut bytes) .map_err(flash_error)?;
        Ok(Record {
            kind: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            offset,
        })
    }

    /**
        last record of the given type before the free space

        `find(UNSET)` returns the first free slot instead, or `None` when the region is full
    */
    pub fn find(&mut self, kind: u32) -> Result<Option<Record>, Error> {
        let mut found = None;
        let mut offset = self.start;
        while offset.checked_add(HEADER).is_some_and(|end| end <= self.end()) {
            let record = self.header(offset)?;
            if record.kind == kind
                {found = Some(record)}
            if record.kind == UNSET
                {break}
            match record.next() {
                Some(next) => offset = next,
                // garbage length, nothing readable after it
                None => break,
            }
        }
        Ok(found)
    }

    /// append a record, `data` is zero padded to a whole number of words
    pub fn write(&mut self, kind: u32, data: &[u8]) -> Result<(), Error> {
        if kind == UNSET
            {return Err(Error::ReservedType)}
        let slot = self.find(UNSET)?.ok_or(Error::NoSpace)?;
        let length = u32::try_from(data.len()) .map_err(|_| Error::NoSpace)?;
        let end = record_size(length)
            .and_then(|size| slot.offset.checked_add(size))
            .ok_or(Error::NoSpace)?;
        if end > self.end()
            {return Err(Error::NoSpace)}

        let mut header = [0u8; HEADER as usize];
        header[.. 4].copy_from_slice(&kind.to_le_bytes());
        header[4 ..].copy_from_slice(&length.to_le_bytes());
        self.flash.write(slot.offset, &header) .map_err(flash_error)?;

        let mut offset = slot.data();
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[.. chunk.len()].copy_from_slice(chunk);
            self.flash.write(offset, &word) .map_err(flash_error)?;
            offset += 4;
        }
        debug!("config record {} written at {:#x}, {} bytes", kind, slot.offset, length);
        Ok(())
    }

    /// copy a record's data into `buffer`, returning the number of bytes copied
    pub fn read(&mut self, record: &Record, buffer: &mut [u8]) -> Result<usize, Error> {
        let size = buffer.len().min(record.length as usize);
        self.flash.read(record.data(), &mut buffer[.. size]) .map_err(flash_error)?;
        Ok(size)
    }

    /// erase every page of the region
    pub fn erase(&mut self) -> Result<(), Error> {
        info!("erasing config region");
        self.flash.erase(self.start, self.end()) .map_err(flash_error)
    }

    pub fn get_u32(&mut self, kind: u32) -> Result<Option<u32>, Error> {
        let Some(record) = self.find(kind)?
            else {return Ok(None)};
        let mut bytes = [0u8; 4];
        if self.read(&record, &mut bytes)? < bytes.len()
            {return Ok(None)}
        Ok(Some(u32::from_le_bytes(bytes)))
    }
    pub fn set_u32(&mut self, kind: u32, value: u32) -> Result<(), Error> {
        self.write(kind, &value.to_le_bytes())
    }
}
