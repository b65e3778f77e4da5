use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};
use std::{
    path::Path,
    time::Duration,
    };
use log::*;

use super::{Error, Settings};


/**
    byte pipe to the bus

    a transport knows nothing about packets, it moves bytes and reports silence as short reads
*/
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// put bytes on the bus
    async fn transmit(&mut self, data: &[u8]) -> Result<(), Error>;
    /**
        receive up to `buffer.len()` bytes

        returns early with less when the bus stays silent, 0 meaning nothing arrived. Short reads are normal.
    */
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Error>;
}

/// serial port driving an RS-485 transceiver directly
pub struct Serial {
    port: SerialPort,
    timeout: Duration,
}
impl Serial {
    /// open the given serial port file, 8N1 at the settings' baud rate
    pub fn open(path: impl AsRef<Path>, settings: &Settings) -> Result<Self, Error> {
        let rate = settings.baud_rate;
        let port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
                settings.set_raw();
                settings.set_baud_rate(rate)?;
                settings.set_char_size(CharSize::Bits8);
                settings.set_stop_bits(StopBits::One);
                settings.set_parity(Parity::None);
                Ok(settings)
                })?;
        Ok(Self {port, timeout: settings.timeout})
    }
}
impl Transport for Serial {
    async fn transmit(&mut self, data: &[u8]) -> Result<(), Error> {
        self.port.write_all(data).await?;
        Ok(())
    }
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let mut count = 0;
        while count < buffer.len() {
            match tokio::time::timeout(self.timeout, self.port.read(&mut buffer[count ..])).await {
                Ok(read) => match read? {
                    0 => break,
                    size => count += size,
                },
                Err(_) => {
                    debug!("serial silent after {} bytes", count);
                    break
                },
            }
        }
        Ok(count)
    }
}
