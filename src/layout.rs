/*!
    flash layout shared by the bootloader, the firmwares and the host tooling

    ```text
    FLASH_BASE       +---------------------+
                     | bootloader          |  BOOTLOADER_SIZE
    FIRMWARE_START   +---------------------+
                     | vector table        |
                     | ImageInfo @ 0x150   |
                     | code and data       |  FIRMWARE_MAX_SIZE
    CONFIG_START     +---------------------+
                     | config store        |  CONFIG_SIZE
                     +---------------------+
    ```

    each piece of firmware metadata is described by a [Field] giving its type and its offset in the image, so the same definition serves patching an image file on the host and reading the flashed image on the node.
*/

use core::marker::PhantomData;
use packbytes::{FromBytes, ToBytes, ByteArray};

use crate::utils::{read_le, write_le};


/// erase and transfer unit of flash
pub const PAGE_SIZE: usize = 1024;
/// absolute address of the first flash byte
pub const FLASH_BASE: u32 = 0x0800_0000;
/// whole flash size
pub const FLASH_SIZE: u32 = 0x1_0000;
/// flash reserved for the bootloader itself
pub const BOOTLOADER_SIZE: u32 = 0x1000;
/// absolute address of the firmware image, its vector table comes first
pub const FIRMWARE_START: u32 = FLASH_BASE + BOOTLOADER_SIZE;
/// absolute address of the config store region
pub const CONFIG_START: u32 = 0x0800_C000;
/// config store region size, a whole number of pages
pub const CONFIG_SIZE: u32 = 0x4000;
/// largest firmware image fitting between bootloader and config store
pub const FIRMWARE_MAX_SIZE: u32 = CONFIG_START - FIRMWARE_START;
/// index of the first page of the firmware image
pub const FIRMWARE_START_PAGE: u16 = (BOOTLOADER_SIZE / PAGE_SIZE as u32) as u16;

/// firmware metadata position in the image, right after the vector table
pub const INFO_OFFSET: u32 = 0x150;
/// firmware version, free format
pub const VERSION: Field<u32> = Field::new(INFO_OFFSET);
/// image size in bytes, page rounded
pub const SIZE: Field<u32> = Field::new(INFO_OFFSET + 4);
/// checksum of the image, computed with this field set to zero
pub const CRC: Field<u32> = Field::new(INFO_OFFSET + 8);
/// start of the NUL terminated firmware name
pub const NAME_OFFSET: u32 = INFO_OFFSET + 12;
/// longest firmware name reported
pub const NAME_MAX: usize = 64;


/**
    a typed location in a firmware image

    it only holds the byte offset of the referenced value relative to the image start, hence can be created, copied or destroyed at no cost
*/
#[derive(PartialEq, Hash, Debug)]
pub struct Field<T> {
    offset: u32,
    ty: PhantomData<T>,
}
impl<T> Field<T> {
    pub const fn new(offset: u32) -> Self {
        Self {offset, ty: PhantomData}
    }
    /// offset from image start
    pub const fn offset(&self) -> u32 {self.offset}
    /// absolute address once the image is flashed
    pub const fn address(&self) -> u32 {FIRMWARE_START + self.offset}
}
impl<T: FromBytes> Field<T> {
    pub const fn size(&self) -> usize {T::Bytes::SIZE}
    /// read the field from an image, `None` if the image is too short to hold it
    pub fn get(&self, image: &[u8]) -> Option<T> {
        read_le(image.get(self.offset as usize ..)?)
    }
}
impl<T: ToBytes + FromBytes> Field<T> {
    /// patch the field in an image, `false` if the image is too short to hold it
    pub fn set(&self, image: &mut [u8], value: T) -> bool {
        let start = self.offset as usize;
        if image.len() < start + self.size()
            {return false}
        write_le(&mut image[start ..], value);
        true
    }
}
impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {Self::new(self.offset)}
}
impl<T> Copy for Field<T> {}

/// fixed part of the firmware metadata
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default, PartialEq)]
pub struct ImageInfo {
    pub version: u32,
    pub size: u32,
    pub crc: u32,
}

/// absolute address of a firmware page
pub const fn page_address(page: u16) -> u32 {
    FLASH_BASE + page as u32 * PAGE_SIZE as u32
}
/// true if the page lies in the region the bootloader may overwrite
pub const fn is_firmware_page(page: u16) -> bool {
    let address = page_address(page);
    address >= FIRMWARE_START && address < CONFIG_START
}
/// offset relative to flash start of an absolute address inside flash
pub const fn flash_offset(address: u32) -> Option<u32> {
    if address >= FLASH_BASE && address - FLASH_BASE < FLASH_SIZE
        {Some(address - FLASH_BASE)}
    else
        {None}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions() {
        assert_eq!(FIRMWARE_MAX_SIZE, 44 * 1024);
        assert_eq!(FIRMWARE_START_PAGE, 4);
        assert!(!is_firmware_page(3));
        assert!(is_firmware_page(4));
        assert!(is_firmware_page(47));
        assert!(!is_firmware_page(48));
        assert_eq!(flash_offset(CONFIG_START), Some(0xC000));
        assert_eq!(flash_offset(0x2000_0000), None);
    }

    #[test]
    fn fields() {
        let mut image = [0u8; 0x200];
        assert!(SIZE.set(&mut image, 2048));
        assert_eq!(&image[0x154 .. 0x158], &[0, 8, 0, 0]);
        assert_eq!(SIZE.get(&image), Some(2048));
        assert_eq!(CRC.get(&image[.. 0x159]), None);
        assert!(!CRC.set(&mut image[.. 0x15A], 1));
        assert_eq!(SIZE.address(), 0x0800_1154);
    }
}
