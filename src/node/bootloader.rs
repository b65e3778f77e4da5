/*!
    resident bootloader

    at reset, [Bootloader::decide] picks between staying here and starting the firmware, then [run] serves the bus until the decided timeout expires. Staying is forced when the flashed firmware fails its checksum, so an interrupted update never bricks the node.
*/

use core::time::Duration;
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};
use packbytes::{FromBytes, ByteArray};
use log::*;

use crate::{
    command::*,
    crc::{crc32, Crc32, SEED},
    layout::*,
    };
use super::{Bus, BootFlag, System, Node, Session, dispatch::*};


/// time the bootloader waits for a host before starting a valid firmware
pub const BOOT_TIMEOUT: Duration = Duration::from_secs(3);

/// why the bootloader is running
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Decision {
    /// firmware failed its self check
    Broken,
    /// firmware asked for the bootloader before resetting
    Requested,
    /// hardware strap is set
    Strapped,
    /// normal boot, the firmware starts after [BOOT_TIMEOUT]
    Linger,
}
impl Decision {
    /// time after which the firmware is started, `None` to stay forever
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Linger => Some(BOOT_TIMEOUT),
            _ => None,
        }
    }
}

/// boot decision, first matching condition wins
pub fn decide(firmware_valid: bool, flag: BootFlag, strap: bool) -> Decision {
    if !firmware_valid
        {Decision::Broken}
    else if flag == BootFlag::GotoBootloader
        {Decision::Requested}
    else if strap && flag != BootFlag::EnforceNormalBoot
        {Decision::Strapped}
    else
        {Decision::Linger}
}

/// reason a flashed firmware is not started
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq)]
pub enum FirmwareError {
    #[error("firmware size {0:#x} is out of bounds")]
    Size(u32),
    #[error("firmware checksum {computed:#010x} doesn't match {expected:#010x}")]
    Crc {expected: u32, computed: u32},
    #[error("flash read failed: {0:?}")]
    Flash(NorFlashErrorKind),
}
fn flash_error<E: NorFlashError>(error: E) -> FirmwareError {
    FirmwareError::Flash(error.kind())
}

/// check the flashed firmware image, the checksum field reading as zero
pub fn check_firmware<F: NorFlash>(flash: &mut F) -> Result<ImageInfo, FirmwareError> {
    let base = FIRMWARE_START - FLASH_BASE;
    let mut bytes = <ImageInfo as FromBytes>::Bytes::zeroed();
    flash.read(base + INFO_OFFSET, bytes.as_mut()) .map_err(flash_error)?;
    let info = ImageInfo::from_le_bytes(bytes);

    if info.size > FIRMWARE_MAX_SIZE || info.size < NAME_OFFSET || info.size % 4 != 0
        {return Err(FirmwareError::Size(info.size))}

    let skip = CRC.offset() .. CRC.offset() + CRC.size() as u32;
    let mut crc = Crc32::new();
    let mut chunk = [0u8; 64];
    let mut offset = 0;
    while offset < info.size {
        let size = (info.size - offset).min(chunk.len() as u32);
        let chunk = &mut chunk[.. size as usize];
        flash.read(base + offset, chunk) .map_err(flash_error)?;
        for (i, byte) in chunk.iter_mut().enumerate() {
            if skip.contains(&(offset + i as u32))
                {*byte = 0}
        }
        crc.update(chunk);
        offset += size;
    }
    if crc.value() != info.crc
        {return Err(FirmwareError::Crc {expected: info.crc, computed: crc.value()})}
    Ok(info)
}

/// name of the flashed firmware, read up to its terminating NUL
fn firmware_name<F: NorFlash>(flash: &mut F, info: &ImageInfo) -> heapless::Vec<u8, NAME_MAX> {
    let mut bytes = [0u8; NAME_MAX];
    let size = (info.size - NAME_OFFSET).min(NAME_MAX as u32) as usize;
    let mut name = heapless::Vec::new();
    if flash.read(FIRMWARE_START - FLASH_BASE + NAME_OFFSET, &mut bytes[.. size]).is_ok() {
        let end = bytes[.. size].iter().position(|&b| b == 0).unwrap_or(size);
        let _ = name.extend_from_slice(&bytes[.. end]);
    }
    name
}


/**
    bootloader command set

    `flash` offsets are relative to [FLASH_BASE] and cover the whole flash, including the config store region.
*/
pub struct Bootloader<F, S> {
    flash: F,
    system: S,
    version: u32,
    firmware: Result<ImageInfo, FirmwareError>,
    identity: Identity,
    /// pages were flashed since `firmware` and `identity` were computed
    stale: bool,
}
impl<F: NorFlash, S: System> Bootloader<F, S> {
    /// `version` is this bootloader's own version, handed to the firmware
    pub fn new(flash: F, system: S, version: u32) -> Self {
        let mut new = Self {
            flash,
            system,
            version,
            firmware: Err(FirmwareError::Size(0)),
            identity: Identity::new(NodeStatus::InBootloader, 0, version, &[]),
            stale: false,
        };
        new.identify();
        if let Err(err) = &new.firmware {
            warn!("firmware invalid: {}", err);
        }
        new
    }
    /// check the flashed firmware again and update what `GET_DATA` reports
    fn identify(&mut self) {
        self.firmware = check_firmware(&mut self.flash);
        self.identity = match &self.firmware {
            Ok(info) => {
                let name = firmware_name(&mut self.flash, info);
                Identity::new(NodeStatus::InBootloader, info.version, self.version, &name)
            },
            Err(_) => Identity::new(NodeStatus::InBootloader, 0, self.version, &[]),
        };
    }
    /// metadata of the flashed firmware if it passed its self check, as of startup or the last `GET_DATA` after flashing
    pub fn firmware(&self) -> Result<&ImageInfo, &FirmwareError> {
        self.firmware.as_ref()
    }
    /// address persisted in the config store
    pub fn address(&mut self) -> u8 {
        stored_address(&mut self.flash)
    }
    pub fn decide(&mut self) -> Decision {
        let flag = self.system.boot_flag();
        let strap = self.system.bootloader_strap();
        let decision = decide(self.firmware.is_ok(), flag, strap);
        info!("boot decision {:?} (flag {:?}, strap {})", decision, flag, strap);
        decision
    }
    /// hand over to the firmware, never returns on real hardware
    pub fn start_firmware(&mut self) {
        info!("starting firmware");
        self.system.set_bootloader_version(self.version);
        self.system.boot(FIRMWARE_START);
    }
    pub fn system(&mut self) -> &mut S {&mut self.system}
    pub fn release(self) -> (F, S) {(self.flash, self.system)}

    /// write one firmware page, checking each step
    pub fn flash_page(&mut self, page: &Page) -> FlashStatus {
        if !is_firmware_page(page.index)
            {return FlashStatus::BadPage}
        if crc32(SEED, &page.data) != page.crc
            {return FlashStatus::BadCrc}

        let offset = page_address(page.index) - FLASH_BASE;
        if let Err(err) = self.flash.erase(offset, offset + PAGE_SIZE as u32) {
            error!("erase of page {} failed: {:?}", page.index, err.kind());
            return FlashStatus::EraseFailed;
        }
        let mut chunk = [0u8; 64];
        for start in (0 .. PAGE_SIZE).step_by(chunk.len()) {
            let blank = self.flash.read(offset + start as u32, &mut chunk).is_ok()
                && chunk.iter().all(|&b| b == 0xFF);
            if !blank {
                error!("page {} not blank after erase", page.index);
                return FlashStatus::EraseFailed;
            }
        }
        for (i, word) in page.data.chunks_exact(4).enumerate() {
            let address = offset + 4 * i as u32;
            let mut readback = [0u8; 4];
            let written = self.flash.write(address, word).is_ok()
                && self.flash.read(address, &mut readback).is_ok()
                && readback == word;
            if !written {
                error!("page {} verify failed at {:#x}", page.index, address + FLASH_BASE);
                return FlashStatus::VerifyFailed;
            }
        }
        info!("page {} flashed", page.index);
        FlashStatus::Success
    }

    /// stream words from memory then their checksum, as many as the packet declares
    fn read_memory<B: Bus>(&mut self, address: u32, session: &mut Session<'_, B>) {
        let count = session.remaining().saturating_sub(4) / 4;
        let mut crc = Crc32::new();
        for i in 0 .. count as u32 {
            let mut word = [0u8; 4];
            let location = address.wrapping_add(4 * i);
            // only flash is readable here, anything else reads as zero
            if let Some(offset) = flash_offset(location).filter(|offset| offset + 4 <= FLASH_SIZE) {
                if self.flash.read(offset, &mut word).is_err()
                    {word = [0; 4]}
            }
            crc.update(&word);
            session.send(&word);
        }
        session.send(&crc.value().to_le_bytes());
    }
}

impl<F: NorFlash, S: System> CommandSet for Bootloader<F, S> {
    fn accept(&mut self, header: &Header) -> Accept {
        match header.command {
            Command::ResetToBootloader | Command::ResetToFirmware => Accept::Execute,
            Command::ReadMemory => Accept::Collect(Continuation::memory()),
            Command::FlashFirmware => Accept::Collect(Continuation::page()),
            _ => accept_common(header),
        }
    }
    fn execute<B: Bus>(&mut self, request: Request, session: &mut Session<'_, B>) {
        match request.header.command {
            // already there, the main loop cancels the boot timeout
            Command::ResetToBootloader => {},
            Command::ResetToFirmware => {
                self.system.set_boot_flag(BootFlag::EnforceNormalBoot);
                self.system.reset();
            },
            Command::ReadMemory => {
                if let Payload::Memory(address) = request.payload
                    {self.read_memory(address, session)}
            },
            Command::FlashFirmware => {
                if let Payload::Page(page) = &request.payload {
                    let status = self.flash_page(page);
                    if status == FlashStatus::Success
                        {self.stale = true}
                    else
                        {warn!("page {} rejected: {:?}", page.index, status)}
                    session.send(&[u8::from(status)]);
                }
            },
            command => {
                // the image changed since the last check, queries must describe the new one
                if command == Command::GetData && self.stale {
                    self.identify();
                    self.stale = false;
                }
                execute_common(request, session, &mut self.flash, &self.identity)
            },
        }
    }
}

/**
    serve the bus until the boot timeout expires, then start the firmware

    `uptime` is a monotonic clock, `idle` is called between polls and may sleep until the next interrupt. Receiving `RESET_TO_BOOTLOADER` or a firmware page cancels the timeout. Once cancelled, this only returns after `RESET_TO_FIRMWARE` if [System::reset] returns.
*/
pub fn run<B, F, S>(
        node: &Node<B, Bootloader<F, S>>,
        decision: Decision,
        mut uptime: impl FnMut() -> Duration,
        mut idle: impl FnMut(),
        )
where
    B: Bus,
    F: NorFlash,
    S: System,
{
    let mut deadline = decision.timeout().map(|timeout| uptime() + timeout);
    loop {
        match node.poll() {
            Some(Command::ResetToBootloader | Command::FlashFirmware) => {
                if deadline.take().is_some() {
                    info!("boot timeout cancelled");
                }
            },
            // the reset was requested and returned, leave it to the caller
            Some(Command::ResetToFirmware) => return,
            _ => {},
        }
        if deadline.is_some_and(|deadline| uptime() >= deadline)
            {break}
        idle();
    }
    let mut link = node.lock();
    link.release();
    link.commands().start_firmware();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_order() {
        use BootFlag::*;
        assert_eq!(decide(false, GotoBootloader, true), Decision::Broken);
        assert_eq!(decide(false, Normal, false), Decision::Broken);
        assert_eq!(decide(true, GotoBootloader, false), Decision::Requested);
        assert_eq!(decide(true, GotoBootloader, true), Decision::Requested);
        assert_eq!(decide(true, Normal, true), Decision::Strapped);
        assert_eq!(decide(true, EnforceNormalBoot, true), Decision::Linger);
        assert_eq!(decide(true, Normal, false), Decision::Linger);
        assert_eq!(decide(true, Normal, false).timeout(), Some(BOOT_TIMEOUT));
        assert_eq!(decide(true, Normal, true).timeout(), None);
    }
}
