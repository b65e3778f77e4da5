mod common;

use common::*;
use lbus::{
    layout::{CONFIG_START, CONFIG_SIZE, FLASH_BASE},
    store::{self, ConfigStore, Error, UNSET},
    };
use pretty_assertions::assert_eq;


#[test]
fn last_write_wins() {
    let mut flash = Flash::new();
    let mut config = ConfigStore::new(&mut flash);
    assert_eq!(config.get_u32(store::ADDRESS), Ok(None));
    config.set_u32(store::ADDRESS, 10).unwrap();
    config.set_u32(2, 0xdead).unwrap();
    config.set_u32(store::ADDRESS, 20).unwrap();
    assert_eq!(config.get_u32(store::ADDRESS), Ok(Some(20)));
    assert_eq!(config.get_u32(2), Ok(Some(0xdead)));
    assert_eq!(config.get_u32(3), Ok(None));

    // records are appended, never rewritten
    assert_eq!(flash.at(CONFIG_START, 12), &[1,0,0,0, 4,0,0,0, 10,0,0,0]);
    assert_eq!(flash.at(CONFIG_START + 24, 12), &[1,0,0,0, 4,0,0,0, 20,0,0,0]);
    assert_eq!(flash.at(CONFIG_START + 36, 4), &[0xFF; 4]);
}

#[test]
fn unaligned_data() {
    let mut flash = Flash::new();
    let mut config = ConfigStore::new(&mut flash);
    config.write(5, b"abcde").unwrap();
    config.set_u32(6, 1).unwrap();

    let record = config.find(5).unwrap().unwrap();
    assert_eq!(record.length, 5);
    let mut buffer = [0; 16];
    assert_eq!(config.read(&record, &mut buffer), Ok(5));
    assert_eq!(&buffer[.. 5], b"abcde");
    // padding keeps the next record aligned
    assert_eq!(config.find(6).unwrap().unwrap().data(), CONFIG_START - FLASH_BASE + 16 + 8);
    assert_eq!(flash.at(CONFIG_START + 8, 8), b"abcde\0\0\0");
}

#[test]
fn free_slot() {
    let mut flash = Flash::new();
    let mut config = ConfigStore::new(&mut flash);
    let slot = config.find(UNSET).unwrap().unwrap();
    assert_eq!(slot.data(), CONFIG_START - FLASH_BASE + 8);
    assert_eq!(config.write(UNSET, &[1, 2, 3, 4]), Err(Error::ReservedType));
}

#[test]
fn full_region() {
    let mut flash = Flash::new();
    let mut config = ConfigStore::with_region(&mut flash, CONFIG_START - FLASH_BASE, 32);
    config.set_u32(1, 1).unwrap();
    config.set_u32(1, 2).unwrap();
    assert_eq!(config.set_u32(1, 3), Err(Error::NoSpace));
    assert_eq!(Error::NoSpace.status(), 0xFE);
    assert_eq!(config.get_u32(1), Ok(Some(2)));
}

#[test]
fn erase_region() {
    let mut flash = Flash::new();
    let mut config = ConfigStore::new(&mut flash);
    config.set_u32(store::ADDRESS, 42).unwrap();
    config.erase().unwrap();
    assert_eq!(config.get_u32(store::ADDRESS), Ok(None));
    config.set_u32(store::ADDRESS, 43).unwrap();
    assert_eq!(config.get_u32(store::ADDRESS), Ok(Some(43)));

    let from = CONFIG_START - FLASH_BASE;
    assert!(flash.operations.contains(&Operation::Erase {from, to: from + CONFIG_SIZE}));
}

#[test]
fn corrupt_length() {
    let mut flash = Flash::new();
    let offset = (CONFIG_START - FLASH_BASE) as usize;
    flash.buf[offset ..][.. 8].copy_from_slice(&[7,0,0,0, 0xF4,0x3F,0xFF,0xFF]);
    let mut config = ConfigStore::new(&mut flash);
    // the record claims to span up to the end of the address space
    assert_eq!(config.get_u32(store::ADDRESS), Ok(None));
    assert_eq!(config.find(7).unwrap().map(|record| record.length), Some(0xFFFF_3FF4));
    assert_eq!(config.get_u32(7), Ok(Some(0xFFFF_FFFF)));
    assert_eq!(config.find(UNSET), Ok(None));
    assert_eq!(config.set_u32(store::ADDRESS, 1), Err(Error::NoSpace));
}
