/*!
    command set of application firmwares

    besides the shared commands, a firmware answers `RESET_TO_BOOTLOADER` and drives a table of output channels (LED or PWM values) the host sets with `LED_SET_16BIT`, `LED_SET_8BIT` and applies with `LED_COMMIT`.
*/

use embedded_storage::nor_flash::NorFlash;
use log::*;

use crate::command::*;
use super::{Bus, BootFlag, System, Session, dispatch::*};


/// conversion from 8 bit values to channel values
pub type Curve = [u16; 256];

/// curve spreading 8 bit values over the whole 16 bit range
pub const LINEAR: Curve = {
    let mut curve = [0; 256];
    let mut i = 0;
    while i < 256 {
        curve[i] = (i as u16) << 8 | i as u16;
        i += 1;
    }
    curve
};

/// peripheral applying channel values, implemented by the application
pub trait Outputs {
    fn commit(&mut self, values: &[u16]);
}

/// channel values waiting for commit
pub struct LedTable<'c, const N: usize> {
    values: [u16; N],
    curves: [&'c Curve; N],
}
impl<'c, const N: usize> LedTable<'c, N> {
    pub fn new(curves: [&'c Curve; N]) -> Self {
        Self {values: [0; N], curves}
    }
    /// table with the same curve on every channel
    pub fn uniform(curve: &'c Curve) -> Self {
        Self::new([curve; N])
    }
    /// set channels starting at `first`, channels beyond the table are ignored
    pub fn set_16bit(&mut self, first: u16, values: impl IntoIterator<Item=u16>) {
        let first = usize::from(first);
        for (slot, value) in self.values.iter_mut().skip(first).zip(values) {
            *slot = value;
        }
    }
    /// set channels starting at `first` through their curves
    pub fn set_8bit(&mut self, first: u16, values: impl IntoIterator<Item=u8>) {
        let first = usize::from(first);
        let channels = self.values.iter_mut().zip(self.curves.iter()).skip(first);
        for ((slot, curve), value) in channels.zip(values) {
            *slot = curve[usize::from(value)];
        }
    }
    pub fn values(&self) -> &[u16; N] {&self.values}
}


/// firmware command set
pub struct Firmware<'c, F, S, O, const N: usize> {
    flash: F,
    system: S,
    outputs: O,
    identity: Identity,
    leds: LedTable<'c, N>,
}
impl<'c, F, S, O, const N: usize> Firmware<'c, F, S, O, N>
where
    F: NorFlash,
    S: System,
    O: Outputs,
{
    /// `version` and `name` describe this firmware, they should match its image metadata
    pub fn new(flash: F, mut system: S, outputs: O, leds: LedTable<'c, N>, version: u32, name: &str) -> Self {
        let bootloader = system.bootloader_version();
        Self {
            identity: Identity::new(NodeStatus::InFirmware, version, bootloader, name.as_bytes()),
            flash,
            system,
            outputs,
            leds,
        }
    }
    /// address persisted in the config store
    pub fn address(&mut self) -> u8 {
        stored_address(&mut self.flash)
    }
    pub fn leds(&self) -> &LedTable<'c, N> {&self.leds}
    pub fn outputs(&mut self) -> &mut O {&mut self.outputs}
    pub fn system(&mut self) -> &mut S {&mut self.system}
    pub fn release(self) -> (F, S, O) {(self.flash, self.system, self.outputs)}
}

impl<F, S, O, const N: usize> CommandSet for Firmware<'_, F, S, O, N>
where
    F: NorFlash,
    S: System,
    O: Outputs,
{
    fn accept(&mut self, header: &Header) -> Accept {
        // channel index and at least one value
        const LED_MINIMUM: u16 = HEADER_SIZE as u16 + 3;
        match header.command {
            Command::ResetToBootloader | Command::LedCommit => Accept::Execute,
            Command::LedSet16Bit if header.length >= LED_MINIMUM => Accept::Collect(Continuation::leds(true)),
            Command::LedSet8Bit if header.length >= LED_MINIMUM => Accept::Collect(Continuation::leds(false)),
            _ => accept_common(header),
        }
    }
    fn execute<B: Bus>(&mut self, request: Request, session: &mut Session<'_, B>) {
        match request.header.command {
            Command::ResetToBootloader => {
                info!("reset to bootloader");
                self.system.set_boot_flag(BootFlag::GotoBootloader);
                self.system.reset();
            },
            Command::LedCommit => self.outputs.commit(self.leds.values()),
            Command::LedSet16Bit | Command::LedSet8Bit => {
                if let Payload::Leds(leds) = &request.payload {
                    if leds.wide {
                        let values = leds.values.chunks_exact(2)
                            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
                        self.leds.set_16bit(leds.first, values);
                    }
                    else {
                        self.leds.set_8bit(leds.first, leds.values.iter().copied());
                    }
                }
            },
            _ => execute_common(request, session, &mut self.flash, &self.identity),
        }
    }
}
