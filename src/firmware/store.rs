//! Flash-backed configuration storage.
//!
//! The last flash sector holds the config text behind a small header:
//! magic, format version, text length, and a checksum over the text. A
//! remote `ConfigUpdate` rewrites one `key = value` line in place and
//! writes the sector back; the running Config is never touched, the new
//! value applies after the next reboot.

use embedded_storage::{ReadStorage, Storage};
use esp_storage::FlashStorage;

use crate::config::KNOWN_KEYS;
use crate::ports::{ConfigStore, StoreError};

/// Largest config text the sector record accommodates.
pub const CONFIG_TEXT_MAX: usize = 2_048;

const STORE_MAGIC: u32 = 0x504D_414C; // "LAMP"
const STORE_VERSION: u8 = 1;
const HEADER_LEN: usize = 8; // magic(4) + version(1) + len(2) + checksum(1)

pub struct FlashConfigStore<'d> {
    flash: FlashStorage<'d>,
    offset: u32,
}

impl<'d> FlashConfigStore<'d> {
    pub fn new(flash_peripheral: esp_hal::peripherals::FLASH<'d>) -> Self {
        let flash = FlashStorage::new(flash_peripheral).multicore_auto_park();
        let capacity = flash.capacity() as u32;
        let offset = capacity.saturating_sub(FlashStorage::SECTOR_SIZE);
        Self { flash, offset }
    }

    fn read_text(&mut self, text: &mut [u8; CONFIG_TEXT_MAX]) -> Result<usize, StoreError> {
        let mut header = [0u8; HEADER_LEN];
        self.flash
            .read(self.offset, &mut header)
            .map_err(|_| StoreError::Unreadable)?;
        if u32::from_le_bytes([header[0], header[1], header[2], header[3]]) != STORE_MAGIC {
            return Err(StoreError::Corrupt);
        }
        if header[4] != STORE_VERSION {
            return Err(StoreError::Corrupt);
        }
        let len = u16::from_le_bytes([header[5], header[6]]) as usize;
        if len > CONFIG_TEXT_MAX {
            return Err(StoreError::Corrupt);
        }
        self.flash
            .read(self.offset + HEADER_LEN as u32, &mut text[..len])
            .map_err(|_| StoreError::Unreadable)?;
        if checksum8(&text[..len]) != header[7] {
            return Err(StoreError::Corrupt);
        }
        Ok(len)
    }

    fn write_text(&mut self, text: &[u8]) -> Result<(), StoreError> {
        if text.len() > CONFIG_TEXT_MAX {
            return Err(StoreError::Full);
        }
        let mut record = [0xFFu8; CONFIG_TEXT_MAX + HEADER_LEN];
        record[0..4].copy_from_slice(&STORE_MAGIC.to_le_bytes());
        record[4] = STORE_VERSION;
        record[5..7].copy_from_slice(&(text.len() as u16).to_le_bytes());
        record[7] = checksum8(text);
        record[HEADER_LEN..HEADER_LEN + text.len()].copy_from_slice(text);
        self.flash
            .write(self.offset, &record[..HEADER_LEN + text.len()])
            .map_err(|_| StoreError::WriteFailed)
    }
}

impl ConfigStore for FlashConfigStore<'_> {
    fn load<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a str, StoreError> {
        let mut text = [0u8; CONFIG_TEXT_MAX];
        let len = self.read_text(&mut text)?;
        if buf.len() < len {
            return Err(StoreError::Full);
        }
        buf[..len].copy_from_slice(&text[..len]);
        core::str::from_utf8(&buf[..len]).map_err(|_| StoreError::Corrupt)
    }

    fn apply_update(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if !KNOWN_KEYS.contains(&key) {
            return Err(StoreError::UnknownKey);
        }

        let mut text = [0u8; CONFIG_TEXT_MAX];
        let len = self.read_text(&mut text)?;
        let current = core::str::from_utf8(&text[..len]).map_err(|_| StoreError::Corrupt)?;

        // Rewrite the matching line, keep everything else byte for byte.
        let mut updated = [0u8; CONFIG_TEXT_MAX];
        let mut cursor = 0usize;
        let mut found = false;
        for line in current.lines() {
            let trimmed = line.trim();
            let is_target = !trimmed.starts_with('#')
                && trimmed
                    .split_once('=')
                    .is_some_and(|(k, _)| k.trim() == key);
            if is_target {
                found = true;
                push(&mut updated, &mut cursor, key.as_bytes())?;
                push(&mut updated, &mut cursor, b" = ")?;
                push(&mut updated, &mut cursor, value.as_bytes())?;
            } else {
                push(&mut updated, &mut cursor, line.as_bytes())?;
            }
            push(&mut updated, &mut cursor, b"\n")?;
        }
        if !found {
            push(&mut updated, &mut cursor, key.as_bytes())?;
            push(&mut updated, &mut cursor, b" = ")?;
            push(&mut updated, &mut cursor, value.as_bytes())?;
            push(&mut updated, &mut cursor, b"\n")?;
        }

        self.write_text(&updated[..cursor])
    }
}

fn push(buf: &mut [u8; CONFIG_TEXT_MAX], cursor: &mut usize, bytes: &[u8]) -> Result<(), StoreError> {
    if *cursor + bytes.len() > buf.len() {
        return Err(StoreError::Full);
    }
    buf[*cursor..*cursor + bytes.len()].copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

fn checksum8(bytes: &[u8]) -> u8 {
    let mut acc = 0x5Au8;
    for &byte in bytes {
        acc ^= byte.rotate_left(1);
    }
    acc
}
