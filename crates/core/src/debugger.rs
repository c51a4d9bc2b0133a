// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{SimError, SimResult};

pub const MAX_BREAKPOINTS: usize = 64;

/// Breakpoint table: an unordered set of PC addresses, checked after every
/// retired instruction.
#[derive(Debug, Default)]
pub struct Debugger {
    breakpoints: Vec<u32>,
}

impl Debugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent up to capacity.
    pub fn add(&mut self, addr: u32) -> SimResult<()> {
        if self.breakpoints.contains(&addr) {
            return Ok(());
        }
        if self.breakpoints.len() >= MAX_BREAKPOINTS {
            return Err(SimError::Other(format!(
                "breakpoint limit reached ({})",
                MAX_BREAKPOINTS
            )));
        }
        self.breakpoints.push(addr);
        Ok(())
    }

    pub fn remove(&mut self, addr: u32) -> SimResult<()> {
        match self.breakpoints.iter().position(|&bp| bp == addr) {
            Some(i) => {
                self.breakpoints.swap_remove(i);
                Ok(())
            }
            None => Err(SimError::Other(format!("no breakpoint at {:#010x}", addr))),
        }
    }

    pub fn check(&self, pc: u32) -> bool {
        self.breakpoints.contains(&pc)
    }

    pub fn list(&self) -> &[u32] {
        &self.breakpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_check() {
        let mut dbg = Debugger::new();
        dbg.add(0x0800_0086).unwrap();
        assert!(dbg.check(0x0800_0086));
        assert!(!dbg.check(0x0800_0084));

        dbg.remove(0x0800_0086).unwrap();
        assert!(!dbg.check(0x0800_0086));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut dbg = Debugger::new();
        dbg.add(0x100).unwrap();
        dbg.add(0x100).unwrap();
        assert_eq!(dbg.list().len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut dbg = Debugger::new();
        for i in 0..MAX_BREAKPOINTS as u32 {
            dbg.add(i * 2).unwrap();
        }
        assert!(dbg.add(0xFFFF_0000).is_err());
        // An existing address still succeeds at capacity.
        dbg.add(0).unwrap();
    }

    #[test]
    fn test_remove_absent_fails() {
        let mut dbg = Debugger::new();
        assert!(dbg.remove(0x42).is_err());
    }
}
