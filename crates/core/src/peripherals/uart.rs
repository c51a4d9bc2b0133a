// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, SimError, SimResult, TickResult};
use std::any::Any;
use std::io::{self, Write};

pub const UART_SR_OFFSET: u32 = 0x00;
pub const UART_DR_OFFSET: u32 = 0x04;
pub const UART_BRR_OFFSET: u32 = 0x08;
pub const UART_CR1_OFFSET: u32 = 0x0C;

pub const UART_SR_TXE: u32 = 1 << 7;
pub const UART_SR_TC: u32 = 1 << 6;
pub const UART_SR_RXNE: u32 = 1 << 5;

pub const UART_CR1_UE: u32 = 1 << 13;
pub const UART_CR1_TXEIE: u32 = 1 << 7;
pub const UART_CR1_TCIE: u32 = 1 << 6;
pub const UART_CR1_RXNEIE: u32 = 1 << 5;
pub const UART_CR1_TE: u32 = 1 << 3;
pub const UART_CR1_RE: u32 = 1 << 2;

const RX_BUFFER_SIZE: usize = 16;

/// Output sink for transmitted bytes; replaceable at runtime.
pub type OutputFn = Box<dyn FnMut(u8) + Send>;

fn stdout_output() -> OutputFn {
    Box::new(|byte| {
        let mut out = io::stdout();
        let _ = out.write_all(&[byte]);
        let _ = out.flush();
    })
}

/// STM32 USART1 model.
///
/// A write to DR latches one TX byte; the next `tick` delivers it through
/// the output sink and re-raises TXE|TC. Received bytes go through a fixed
/// 16-byte circular FIFO drained by DR reads.
pub struct Uart {
    sr: u32,
    brr: u32,
    cr1: u32,
    tx_pending: Option<u8>,
    rx_buffer: [u8; RX_BUFFER_SIZE],
    rx_head: usize,
    rx_tail: usize,
    rx_count: usize,
    output: OutputFn,
}

impl Uart {
    pub fn new() -> Self {
        Self {
            sr: UART_SR_TXE | UART_SR_TC,
            brr: 0,
            cr1: 0,
            tx_pending: None,
            rx_buffer: [0; RX_BUFFER_SIZE],
            rx_head: 0,
            rx_tail: 0,
            rx_count: 0,
            output: stdout_output(),
        }
    }

    pub fn set_output(&mut self, output: OutputFn) {
        self.output = output;
    }

    /// Feed one byte into the RX FIFO. Returns whether the RXNE interrupt
    /// should be raised.
    pub fn incoming_char(&mut self, c: u8) -> bool {
        if self.rx_count >= RX_BUFFER_SIZE {
            tracing::warn!("USART1: RX buffer overflow, byte dropped");
            return false;
        }
        self.rx_buffer[self.rx_head] = c;
        self.rx_head = (self.rx_head + 1) % RX_BUFFER_SIZE;
        self.rx_count += 1;
        self.sr |= UART_SR_RXNE;

        self.cr1 & UART_CR1_UE != 0 && self.cr1 & UART_CR1_RXNEIE != 0
    }

    pub fn sr(&self) -> u32 {
        self.sr
    }
}

impl Peripheral for Uart {
    fn read(&mut self, offset: u32, _size: u8) -> u32 {
        match offset {
            UART_SR_OFFSET => self.sr,
            UART_DR_OFFSET => {
                // Reading DR dequeues one byte and clears RXNE when the
                // FIFO drains.
                let mut data = 0;
                if self.rx_count > 0 {
                    data = self.rx_buffer[self.rx_tail] as u32;
                    self.rx_tail = (self.rx_tail + 1) % RX_BUFFER_SIZE;
                    self.rx_count -= 1;
                    if self.rx_count == 0 {
                        self.sr &= !UART_SR_RXNE;
                    }
                }
                data
            }
            UART_BRR_OFFSET => self.brr,
            UART_CR1_OFFSET => self.cr1,
            _ => {
                tracing::warn!("USART1: read from unknown offset {:#04x}", offset);
                0
            }
        }
    }

    fn write(&mut self, offset: u32, value: u32, _size: u8) -> SimResult<()> {
        match offset {
            // Write-zero-to-clear.
            UART_SR_OFFSET => self.sr &= value,
            UART_DR_OFFSET => {
                if self.cr1 & UART_CR1_UE != 0 {
                    self.tx_pending = Some((value & 0xFF) as u8);
                    self.sr &= !(UART_SR_TXE | UART_SR_TC);
                }
            }
            UART_BRR_OFFSET => self.brr = value,
            UART_CR1_OFFSET => self.cr1 = value,
            _ => {
                tracing::warn!("USART1: write to unknown offset {:#04x}", offset);
                return Err(SimError::Other(format!(
                    "USART1: write to unknown offset {:#04x}",
                    offset
                )));
            }
        }
        Ok(())
    }

    fn tick(&mut self) -> TickResult {
        let Some(byte) = self.tx_pending.take() else {
            return TickResult::default();
        };

        // Transmission completes instantly in simulation.
        (self.output)(byte);
        self.sr |= UART_SR_TXE | UART_SR_TC;

        TickResult::with_irq(self.cr1 & UART_CR1_UE != 0 && self.cr1 & UART_CR1_TXEIE != 0)
    }

    fn reset(&mut self) {
        self.sr = UART_SR_TXE | UART_SR_TC;
        self.brr = 0;
        self.cr1 = 0;
        self.tx_pending = None;
        self.rx_buffer = [0; RX_BUFFER_SIZE];
        self.rx_head = 0;
        self.rx_tail = 0;
        self.rx_count = 0;
        // The output sink survives reset.
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}
