/*!
    command line access to an LBUS bus, through the USB bridge or a serial port
*/

use std::{
    io::Write,
    path::PathBuf,
    process::ExitCode,
    time::Duration,
    };
use clap::{Parser, Subcommand};
use log::*;

use lbus::host::{Client, Error, FirmwareImage, Serial, Settings, Transport, UsbBridge};


#[derive(Parser, Debug)]
#[command(version, about = "talk to nodes on an LBUS bus")]
struct Cli {
    /// serial port wired to the bus, the USB bridge is used if not given
    #[arg(long)]
    serial: Option<PathBuf>,
    /// serial line rate
    #[arg(long, default_value_t = 500_000)]
    baud: u32,
    /// answer timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout: u64,
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// test the link with the USB bridge
    Echo,
    /// check a node answers
    Ping {#[arg(value_parser = number::<u8>)] node: u8},
    /// tell whether a node runs its bootloader or its firmware
    Status {#[arg(value_parser = number::<u8>)] node: u8},
    /// address reported by a node
    Address {#[arg(value_parser = number::<u8>)] node: u8},
    FirmwareVersion {#[arg(value_parser = number::<u8>)] node: u8},
    BootloaderVersion {#[arg(value_parser = number::<u8>)] node: u8},
    FirmwareName {#[arg(value_parser = number::<u8>)] node: u8},
    /// raw data query, the answer is written to stdout
    GetData {
        #[arg(value_parser = number::<u8>)] node: u8,
        #[arg(value_parser = number::<u16>)] query: u16,
        #[arg(value_parser = number::<u16>)] size: u16,
    },
    SetAddress {
        #[arg(value_parser = number::<u8>)] node: u8,
        #[arg(value_parser = number::<u8>)] address: u8,
    },
    EraseConfig {#[arg(value_parser = number::<u8>)] node: u8},
    ResetToBootloader {#[arg(value_parser = number::<u8>)] node: u8},
    ResetToFirmware {#[arg(value_parser = number::<u8>)] node: u8},
    /// dump node memory to stdout, length is rounded up to 4
    ReadMemory {
        #[arg(value_parser = number::<u8>)] node: u8,
        #[arg(value_parser = number::<u32>)] location: u32,
        #[arg(value_parser = number::<u16>)] length: u16,
    },
    LedSet16 {
        #[arg(value_parser = number::<u8>)] node: u8,
        #[arg(value_parser = number::<u16>)] led: u16,
        #[arg(value_parser = number::<u16>, required = true)] values: Vec<u16>,
    },
    LedSet8 {
        #[arg(value_parser = number::<u8>)] node: u8,
        #[arg(value_parser = number::<u16>)] led: u16,
        #[arg(value_parser = number::<u8>, required = true)] values: Vec<u8>,
    },
    LedCommit {#[arg(value_parser = number::<u8>)] node: u8},
    /// flash a firmware binary to a node in bootloader
    Flash {
        #[arg(value_parser = number::<u8>)] node: u8,
        file: PathBuf,
    },
}

/// parse decimal or 0x prefixed hexadecimal numbers
fn number<T: TryFrom<u64>>(text: &str) -> Result<T, String> {
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    }.map_err(|err| err.to_string())?;
    T::try_from(value) .map_err(|_| format!("{} is out of range", value))
}

/// whichever transport was selected on the command line
enum Link {
    Serial(Serial),
    Usb(UsbBridge),
}
impl Transport for Link {
    async fn transmit(&mut self, data: &[u8]) -> Result<(), Error> {
        match self {
            Self::Serial(port) => port.transmit(data).await,
            Self::Usb(bridge) => bridge.transmit(data).await,
        }
    }
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        match self {
            Self::Serial(port) => port.receive(buffer).await,
            Self::Usb(bridge) => bridge.receive(buffer).await,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let settings = Settings {
        baud_rate: cli.baud,
        timeout: Duration::from_millis(cli.timeout),
        .. Settings::default()
    };
    let link = match &cli.serial {
        Some(path) => Link::Serial(Serial::open(path, &settings)?),
        None => Link::Usb(UsbBridge::open(&settings)?),
    };
    let mut client = Client::new(link, settings);

    match cli.action {
        Action::Echo => {
            let Link::Usb(bridge) = client.transport()
                else {return Err(Error::Misuse("echo needs the USB bridge"))};
            bridge.echo().await?;
            println!("echo ok");
        },
        Action::Ping {node} => {
            client.ping(node).await?;
            println!("got reply");
        },
        Action::Status {node} => println!("{:?}", client.status(node).await?),
        Action::Address {node} => println!("{}", client.node_address(node).await?),
        Action::FirmwareVersion {node} => println!("{:x}", client.firmware_version(node).await?),
        Action::BootloaderVersion {node} => println!("{:x}", client.bootloader_version(node).await?),
        Action::FirmwareName {node} => {
            let name = client.firmware_name(node).await?;
            if name.is_empty()
                {println!("<not assigned>")}
            else
                {println!("{}", name)}
        },
        Action::GetData {node, query, size} => {
            let mut buffer = vec![0; usize::from(size)];
            let received = client.get_data(node, query, &mut buffer).await?;
            std::io::stdout().write_all(&buffer[.. received])?;
        },
        Action::SetAddress {node, address} => {
            client.set_address(node, address).await?;
            println!("success");
        },
        Action::EraseConfig {node} => client.erase_config(node).await?,
        Action::ResetToBootloader {node} => client.reset_to_bootloader(node).await?,
        Action::ResetToFirmware {node} => client.reset_to_firmware(node).await?,
        Action::ReadMemory {node, location, length} => {
            let mut buffer = vec![0; (usize::from(length) + 3) & !3];
            client.read_memory(node, location, &mut buffer).await?;
            std::io::stdout().write_all(&buffer)?;
        },
        Action::LedSet16 {node, led, values} => client.led_set_16bit(node, led, &values).await?,
        Action::LedSet8 {node, led, values} => client.led_set_8bit(node, led, &values).await?,
        Action::LedCommit {node} => client.led_commit(node).await?,
        Action::Flash {node, file} => {
            let image = FirmwareImage::open(&file)?;
            client.flash_firmware(node, &image).await?;
        },
    }
    Ok(())
}
