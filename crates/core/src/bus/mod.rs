// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::memory::Memory;
use crate::{Bus, Peripheral, SimError, SimResult};

pub const BUS_MAX_REGIONS: usize = 16;

/// What a bus region routes to. Flash and SRAM are owned by the bus itself
/// so the flash bytes can back both the alias window at 0x0000_0000 and the
/// canonical window at 0x0800_0000.
pub enum RegionTarget {
    Flash,
    Sram,
    Device(Box<dyn Peripheral>),
}

pub struct BusRegion {
    pub name: &'static str,
    pub base: u32,
    pub size: u32,
    pub irq: Option<u32>,
    target: RegionTarget,
}

/// Address-range router. Lookup is a linear scan in registration order;
/// the first region containing the address wins. A region with size 0 is
/// tick-only and never matches an address.
pub struct SystemBus {
    pub memory: Memory,
    regions: Vec<BusRegion>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self {
            memory: Memory::new(),
            regions: Vec::new(),
        }
    }

    pub fn register_region(
        &mut self,
        name: &'static str,
        base: u32,
        size: u32,
        irq: Option<u32>,
        target: RegionTarget,
    ) -> SimResult<()> {
        if self.regions.len() >= BUS_MAX_REGIONS {
            return Err(SimError::Other("bus region limit reached".into()));
        }
        if size != 0 {
            let new_end = base as u64 + size as u64;
            for r in &self.regions {
                if r.size == 0 {
                    continue;
                }
                let end = r.base as u64 + r.size as u64;
                if (base as u64) < end && (r.base as u64) < new_end {
                    return Err(SimError::Other(format!(
                        "region '{}' at {:#010x} overlaps '{}'",
                        name, base, r.name
                    )));
                }
            }
        }
        self.regions.push(BusRegion {
            name,
            base,
            size,
            irq,
            target,
        });
        Ok(())
    }

    fn region_index(&self, addr: u32) -> Option<usize> {
        self.regions
            .iter()
            .position(|r| r.size != 0 && addr >= r.base && (addr as u64) < r.base as u64 + r.size as u64)
    }

    /// Tick every device region once, returning the IRQ lines raised.
    pub fn tick_peripherals(&mut self) -> Vec<u32> {
        let mut raised = Vec::new();
        for r in &mut self.regions {
            if let RegionTarget::Device(dev) = &mut r.target {
                if dev.tick().irq {
                    if let Some(irq) = r.irq {
                        raised.push(irq);
                    }
                }
            }
        }
        raised
    }

    pub fn reset_peripherals(&mut self) {
        for r in &mut self.regions {
            if let RegionTarget::Device(dev) = &mut r.target {
                dev.reset();
            }
        }
    }

    /// Borrow a registered device by concrete type, together with the IRQ
    /// line its region was wired to.
    pub fn device_mut<T: 'static>(&mut self) -> Option<(&mut T, Option<u32>)> {
        for r in &mut self.regions {
            let irq = r.irq;
            if let RegionTarget::Device(dev) = &mut r.target {
                if let Some(any) = dev.as_any_mut() {
                    if let Some(d) = any.downcast_mut::<T>() {
                        return Some((d, irq));
                    }
                }
            }
        }
        None
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

impl Bus for SystemBus {
    fn read(&mut self, addr: u32, size: u8) -> u32 {
        match self.region_index(addr) {
            Some(i) => {
                let offset = addr - self.regions[i].base;
                match &mut self.regions[i].target {
                    RegionTarget::Flash => self.memory.flash_read(offset, size),
                    RegionTarget::Sram => self.memory.sram_read(offset, size),
                    RegionTarget::Device(dev) => dev.read(offset, size),
                }
            }
            None => {
                tracing::warn!("bus fault: read from unmapped address {:#010x}", addr);
                0
            }
        }
    }

    fn write(&mut self, addr: u32, value: u32, size: u8) -> SimResult<()> {
        match self.region_index(addr) {
            Some(i) => {
                let offset = addr - self.regions[i].base;
                match &mut self.regions[i].target {
                    RegionTarget::Flash => self.memory.flash_write(offset, value, size),
                    RegionTarget::Sram => self.memory.sram_write(offset, value, size),
                    RegionTarget::Device(dev) => dev.write(offset, value, size),
                }
            }
            None => {
                tracing::warn!("bus fault: write to unmapped address {:#010x}", addr);
                Err(SimError::InvalidAddress(addr))
            }
        }
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TickResult;

    /// Records the offsets it is accessed with.
    struct RecordingDevice {
        regs: [u32; 4],
        last_read: Option<u32>,
        last_write: Option<(u32, u32)>,
        ticks: u32,
        raise_irq: bool,
    }

    impl RecordingDevice {
        fn new() -> Self {
            Self {
                regs: [0; 4],
                last_read: None,
                last_write: None,
                ticks: 0,
                raise_irq: false,
            }
        }
    }

    impl Peripheral for RecordingDevice {
        fn read(&mut self, offset: u32, _size: u8) -> u32 {
            self.last_read = Some(offset);
            self.regs.get((offset / 4) as usize).copied().unwrap_or(0)
        }

        fn write(&mut self, offset: u32, value: u32, _size: u8) -> SimResult<()> {
            self.last_write = Some((offset, value));
            if let Some(reg) = self.regs.get_mut((offset / 4) as usize) {
                *reg = value;
            }
            Ok(())
        }

        fn tick(&mut self) -> TickResult {
            self.ticks += 1;
            TickResult::with_irq(self.raise_irq)
        }

        fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
            Some(self)
        }
    }

    #[test]
    fn test_handler_receives_base_relative_offsets() {
        let mut bus = SystemBus::new();
        bus.register_region(
            "dev",
            0x4000_0000,
            0x400,
            None,
            RegionTarget::Device(Box::new(RecordingDevice::new())),
        )
        .unwrap();

        bus.write(0x4000_0008, 0x1234, 4).unwrap();
        assert_eq!(bus.read(0x4000_0008, 4), 0x1234);

        let (dev, _) = bus.device_mut::<RecordingDevice>().unwrap();
        assert_eq!(dev.last_write, Some((0x8, 0x1234)));
        assert_eq!(dev.last_read, Some(0x8));
    }

    #[test]
    fn test_unmapped_access() {
        let mut bus = SystemBus::new();
        assert_eq!(bus.read(0x5000_0000, 4), 0);
        assert!(matches!(
            bus.write(0x5000_0000, 1, 4),
            Err(SimError::InvalidAddress(0x5000_0000))
        ));
    }

    #[test]
    fn test_overlapping_registration_rejected() {
        let mut bus = SystemBus::new();
        bus.register_region("a", 0x1000, 0x100, None, RegionTarget::Sram)
            .unwrap();
        assert!(bus
            .register_region("b", 0x10FF, 0x100, None, RegionTarget::Sram)
            .is_err());
        // Adjacent is fine.
        bus.register_region("c", 0x1100, 0x100, None, RegionTarget::Sram)
            .unwrap();
    }

    #[test]
    fn test_region_limit() {
        let mut bus = SystemBus::new();
        for i in 0..BUS_MAX_REGIONS {
            bus.register_region("r", i as u32 * 0x100, 0x100, None, RegionTarget::Sram)
                .unwrap();
        }
        assert!(bus
            .register_region("overflow", 0x9000_0000, 0x100, None, RegionTarget::Sram)
            .is_err());
    }

    #[test]
    fn test_tick_reports_configured_irq() {
        let mut bus = SystemBus::new();
        let mut dev = RecordingDevice::new();
        dev.raise_irq = true;
        bus.register_region("dev", 0x4000_0000, 0x400, Some(17), RegionTarget::Device(Box::new(dev)))
            .unwrap();

        assert_eq!(bus.tick_peripherals(), vec![17]);
        let (dev, irq) = bus.device_mut::<RecordingDevice>().unwrap();
        assert_eq!(dev.ticks, 1);
        assert_eq!(irq, Some(17));
    }

    #[test]
    fn test_size_zero_region_is_tick_only() {
        let mut bus = SystemBus::new();
        bus.register_region(
            "tickable",
            0,
            0,
            None,
            RegionTarget::Device(Box::new(RecordingDevice::new())),
        )
        .unwrap();

        // Never matches an address, even address 0.
        assert_eq!(bus.read(0, 4), 0);
        bus.tick_peripherals();
        let (dev, _) = bus.device_mut::<RecordingDevice>().unwrap();
        assert_eq!(dev.ticks, 1);
        assert_eq!(dev.last_read, None);
    }

    #[test]
    fn test_flash_alias_reads_same_bytes() {
        let mut bus = SystemBus::new();
        bus.memory.load_image(&[0x11, 0x22, 0x33, 0x44]);
        bus.register_region("flash", 0x0000_0000, 0x1_0000, None, RegionTarget::Flash)
            .unwrap();
        bus.register_region("flash", 0x0800_0000, 0x1_0000, None, RegionTarget::Flash)
            .unwrap();

        assert_eq!(bus.read(0x0000_0000, 4), 0x44332211);
        assert_eq!(bus.read(0x0800_0000, 4), 0x44332211);
        assert!(bus.write(0x0800_0000, 0, 4).is_err());
    }
}
