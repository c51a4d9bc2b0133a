// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, SimError, SimResult, TickResult};
use std::any::Any;

pub const TIM_CR1_OFFSET: u32 = 0x00;
pub const TIM_DIER_OFFSET: u32 = 0x0C;
pub const TIM_SR_OFFSET: u32 = 0x10;
pub const TIM_CNT_OFFSET: u32 = 0x24;
pub const TIM_PSC_OFFSET: u32 = 0x28;
pub const TIM_ARR_OFFSET: u32 = 0x2C;

pub const TIM_CR1_CEN: u32 = 1 << 0;
pub const TIM_DIER_UIE: u32 = 1 << 0;
pub const TIM_SR_UIF: u32 = 1 << 0;

/// STM32 general-purpose timer (TIM2 model).
///
/// One `tick` is one input clock. The prescaler divides by PSC + 1; the
/// counter reloads to zero when it reaches ARR, setting UIF and raising the
/// update IRQ when DIER.UIE is set.
#[derive(Debug, Default)]
pub struct Timer {
    cr1: u32,
    dier: u32,
    sr: u32,
    cnt: u32,
    psc: u32,
    arr: u32,

    prescaler_counter: u32,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            arr: 0xFFFF_FFFF,
            ..Default::default()
        }
    }

    pub fn sr(&self) -> u32 {
        self.sr
    }

    pub fn cnt(&self) -> u32 {
        self.cnt
    }
}

impl Peripheral for Timer {
    fn read(&mut self, offset: u32, _size: u8) -> u32 {
        match offset {
            TIM_CR1_OFFSET => self.cr1,
            TIM_DIER_OFFSET => self.dier,
            TIM_SR_OFFSET => self.sr,
            TIM_CNT_OFFSET => self.cnt,
            TIM_PSC_OFFSET => self.psc,
            TIM_ARR_OFFSET => self.arr,
            _ => {
                tracing::warn!("TIM2: read from unknown offset {:#04x}", offset);
                0
            }
        }
    }

    fn write(&mut self, offset: u32, value: u32, _size: u8) -> SimResult<()> {
        match offset {
            TIM_CR1_OFFSET => self.cr1 = value,
            TIM_DIER_OFFSET => self.dier = value,
            // Write-zero-to-clear.
            TIM_SR_OFFSET => self.sr &= value,
            TIM_CNT_OFFSET => self.cnt = value,
            TIM_PSC_OFFSET => self.psc = value,
            TIM_ARR_OFFSET => self.arr = value,
            _ => {
                tracing::warn!("TIM2: write to unknown offset {:#04x}", offset);
                return Err(SimError::Other(format!(
                    "TIM2: write to unknown offset {:#04x}",
                    offset
                )));
            }
        }
        Ok(())
    }

    fn tick(&mut self) -> TickResult {
        if self.cr1 & TIM_CR1_CEN == 0 {
            return TickResult::default();
        }

        self.prescaler_counter = self.prescaler_counter.wrapping_add(1);
        if self.prescaler_counter <= self.psc {
            return TickResult::default();
        }
        self.prescaler_counter = 0;

        self.cnt = self.cnt.wrapping_add(1);
        if self.cnt >= self.arr && self.arr > 0 {
            self.cnt = 0;
            self.sr |= TIM_SR_UIF;
            return TickResult::with_irq(self.dier & TIM_DIER_UIE != 0);
        }

        TickResult::default()
    }

    fn reset(&mut self) {
        *self = Timer::new();
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}
