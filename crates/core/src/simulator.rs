// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::{RegionTarget, SystemBus};
use crate::cpu::CortexM;
use crate::debugger::Debugger;
use crate::memory::{FLASH_ALIAS_BASE, FLASH_BASE, FLASH_SIZE, SRAM_BASE, SRAM_SIZE};
use crate::nvic::Nvic;
use crate::peripherals::timer::Timer;
use crate::peripherals::uart::{OutputFn, Uart};
use crate::{Bus, Peripheral, SimError, SimResult, StopReason};
use std::path::Path;

pub const TIM2_BASE: u32 = 0x4000_0000;
pub const TIM2_IRQ: u32 = 28;
pub const USART1_BASE: u32 = 0x4001_3800;
pub const USART1_IRQ: u32 = 37;
const PERIPH_WINDOW: u32 = 0x400;

/// Owns every subsystem and drives the tick -> step -> breakpoint cycle.
///
/// Per step, in this order: every registered peripheral ticks, the core
/// takes a pending exception or retires one instruction, IRQs raised by
/// this step's ticks are pended in the NVIC, and the breakpoint table is
/// checked against the new PC. Pending an IRQ after the instruction gives
/// one step of interrupt latency: the exception entry consumes the
/// following step without retiring an instruction.
pub struct Simulator {
    pub bus: SystemBus,
    pub nvic: Nvic,
    pub cpu: CortexM,
    pub debugger: Debugger,
    pub halted: bool,
    pub running: bool,
}

impl Simulator {
    /// Builds the STM32F103C8T6 memory map: flash aliased at 0x0000_0000
    /// and canonical at 0x0800_0000, SRAM at 0x2000_0000, TIM2 and USART1
    /// on the APB windows. UART output goes to stdout until replaced.
    pub fn new() -> Self {
        let mut bus = SystemBus::new();
        bus.register_region(
            "flash",
            FLASH_ALIAS_BASE,
            FLASH_SIZE as u32,
            None,
            RegionTarget::Flash,
        )
        .expect("fixed memory map");
        bus.register_region("flash", FLASH_BASE, FLASH_SIZE as u32, None, RegionTarget::Flash)
            .expect("fixed memory map");
        bus.register_region("sram", SRAM_BASE, SRAM_SIZE as u32, None, RegionTarget::Sram)
            .expect("fixed memory map");
        bus.register_region(
            "tim2",
            TIM2_BASE,
            PERIPH_WINDOW,
            Some(TIM2_IRQ),
            RegionTarget::Device(Box::new(Timer::new())),
        )
        .expect("fixed memory map");
        bus.register_region(
            "usart1",
            USART1_BASE,
            PERIPH_WINDOW,
            Some(USART1_IRQ),
            RegionTarget::Device(Box::new(Uart::new())),
        )
        .expect("fixed memory map");

        Self {
            bus,
            nvic: Nvic::new(),
            cpu: CortexM::new(),
            debugger: Debugger::new(),
            halted: false,
            running: false,
        }
    }

    pub fn step(&mut self) -> SimResult<StopReason> {
        if self.halted {
            return Err(SimError::Halted);
        }

        let raised = self.bus.tick_peripherals();
        let step_result = self.cpu.step(&mut self.bus, &mut self.nvic);
        for irq in raised {
            self.nvic.set_pending(irq);
        }

        if let Err(e) = step_result {
            self.halted = true;
            return Err(e);
        }

        let pc = self.cpu.pc();
        if self.debugger.check(pc) {
            self.halted = true;
            tracing::info!("breakpoint hit at {:#010x}", pc);
            return Ok(StopReason::Breakpoint(pc));
        }

        Ok(StopReason::StepDone)
    }

    /// Run until a breakpoint, a fault, a `halt`, or the step budget (used
    /// by the GDB continue loop to stay interruptible).
    pub fn run(&mut self, max_steps: Option<u64>) -> SimResult<StopReason> {
        self.running = true;
        self.halted = false;

        let mut steps: u64 = 0;
        let result = loop {
            if let Some(limit) = max_steps {
                if steps >= limit {
                    break Ok(StopReason::MaxStepsReached);
                }
            }
            match self.step() {
                Ok(StopReason::Breakpoint(pc)) => break Ok(StopReason::Breakpoint(pc)),
                Ok(_) => steps += 1,
                Err(e) => break Err(e),
            }
            if !self.running || self.halted {
                break Ok(StopReason::StepDone);
            }
        };

        self.running = false;
        result
    }

    pub fn halt(&mut self) {
        self.running = false;
        self.halted = true;
    }

    /// Reset peripherals, NVIC, memory (flash preserved) and the core.
    pub fn reset(&mut self) {
        self.bus.reset_peripherals();
        self.nvic.reset();
        self.bus.memory.reset();
        self.cpu.reset(&mut self.bus);
        self.halted = false;
        self.running = false;
        tracing::info!("simulator reset, PC={:#010x}", self.cpu.pc());
    }

    /// Load a raw firmware image and reset so SP/PC come from its vector
    /// table.
    pub fn load(&mut self, path: &Path) -> SimResult<usize> {
        let n = self.bus.memory.load_binary(path)?;
        self.reset();
        Ok(n)
    }

    /// Register an extra peripheral. With `size == 0` the device is not
    /// address-mapped but still ticks and resets with the simulator.
    pub fn add_peripheral(
        &mut self,
        name: &'static str,
        base: u32,
        size: u32,
        irq: Option<u32>,
        dev: Box<dyn Peripheral>,
    ) -> SimResult<()> {
        self.bus
            .register_region(name, base, size, irq, RegionTarget::Device(dev))
    }

    /// Deliver one byte to the USART1 receiver, pending its IRQ when the
    /// peripheral is configured to raise one.
    pub fn uart_incoming_char(&mut self, c: u8) {
        if let Some((uart, irq)) = self.bus.device_mut::<Uart>() {
            if uart.incoming_char(c) {
                if let Some(irq) = irq {
                    self.nvic.set_pending(irq);
                }
            }
        }
    }

    /// Replace the UART output sink.
    pub fn set_uart_output(&mut self, output: OutputFn) {
        if let Some((uart, _)) = self.bus.device_mut::<Uart>() {
            uart.set_output(output);
        }
    }

    /// Byte-wise debug reads for the console and the GDB stub. Unmapped
    /// bytes read as zero.
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.bus.read(addr.wrapping_add(i as u32), 1) as u8)
            .collect()
    }

    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> SimResult<()> {
        for (i, b) in data.iter().enumerate() {
            self.bus.write(addr.wrapping_add(i as u32), *b as u32, 1)?;
        }
        Ok(())
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}
