// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{SimError, SimResult};
use std::path::Path;

pub const FLASH_SIZE: usize = 64 * 1024;
pub const SRAM_SIZE: usize = 20 * 1024;

pub const FLASH_ALIAS_BASE: u32 = 0x0000_0000;
pub const FLASH_BASE: u32 = 0x0800_0000;
pub const SRAM_BASE: u32 = 0x2000_0000;

/// On-chip memories of the STM32F103C8T6: 64 KiB flash, 20 KiB SRAM.
///
/// Flash is writable only through the loader; runtime stores fail. All
/// multi-byte accesses are little-endian.
pub struct Memory {
    flash: Vec<u8>,
    sram: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            flash: vec![0; FLASH_SIZE],
            sram: vec![0; SRAM_SIZE],
        }
    }

    /// Clears SRAM. Flash models non-volatile storage and survives reset.
    pub fn reset(&mut self) {
        self.sram.fill(0);
    }

    /// Load a raw firmware image file into flash starting at offset 0.
    /// Files longer than the flash are truncated without error.
    pub fn load_binary(&mut self, path: &Path) -> SimResult<usize> {
        let image = std::fs::read(path)
            .map_err(|e| SimError::Other(format!("cannot open '{}': {}", path.display(), e)))?;
        if image.is_empty() {
            return Err(SimError::Other(format!(
                "firmware image '{}' is empty",
                path.display()
            )));
        }
        let n = self.load_image(&image);
        tracing::info!("loaded {} bytes into flash", n);
        Ok(n)
    }

    /// Copy image bytes into flash at offset 0, truncating at the flash end.
    pub fn load_image(&mut self, image: &[u8]) -> usize {
        let n = image.len().min(FLASH_SIZE);
        self.flash[..n].copy_from_slice(&image[..n]);
        n
    }

    fn read_le(buf: &[u8], offset: usize, size: u8) -> u32 {
        match size {
            1 => buf[offset] as u32,
            2 => u16::from_le_bytes([buf[offset], buf[offset + 1]]) as u32,
            4 => u32::from_le_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]),
            _ => 0,
        }
    }

    fn write_le(buf: &mut [u8], offset: usize, value: u32, size: u8) {
        match size {
            1 => buf[offset] = value as u8,
            2 => buf[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            4 => buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes()),
            _ => {}
        }
    }

    pub fn flash_read(&self, offset: u32, size: u8) -> u32 {
        let offset = offset as usize;
        if offset + size as usize > FLASH_SIZE {
            return 0;
        }
        Self::read_le(&self.flash, offset, size)
    }

    /// Flash is read-only during normal execution.
    pub fn flash_write(&mut self, offset: u32, _value: u32, _size: u8) -> SimResult<()> {
        tracing::warn!("attempted write to read-only flash at offset {:#x}", offset);
        Err(SimError::Other(format!(
            "flash is read-only (offset {:#x})",
            offset
        )))
    }

    pub fn sram_read(&self, offset: u32, size: u8) -> u32 {
        let offset = offset as usize;
        if offset + size as usize > SRAM_SIZE {
            return 0;
        }
        Self::read_le(&self.sram, offset, size)
    }

    pub fn sram_write(&mut self, offset: u32, value: u32, size: u8) -> SimResult<()> {
        if offset as usize + size as usize > SRAM_SIZE {
            return Err(SimError::InvalidAddress(SRAM_BASE.wrapping_add(offset)));
        }
        Self::write_le(&mut self.sram, offset as usize, value, size);
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
