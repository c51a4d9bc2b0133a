// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! End-to-end scenarios driving the full simulator: firmware in flash,
//! peripherals ticking, exceptions entering and returning, breakpoints and
//! UART traffic.

use std::sync::{Arc, Mutex};
use stm32sim_core::cpu::cortex_m::{REG_LR, REG_SP, XPSR_Z};
use stm32sim_core::peripherals::timer::{
    TIM_ARR_OFFSET, TIM_CR1_OFFSET, TIM_DIER_OFFSET, TIM_PSC_OFFSET, TIM_SR_OFFSET, TIM_SR_UIF,
};
use stm32sim_core::peripherals::uart::{UART_CR1_OFFSET, UART_CR1_TE, UART_CR1_UE, UART_DR_OFFSET};
use stm32sim_core::simulator::{TIM2_BASE, TIM2_IRQ, USART1_BASE};
use stm32sim_core::{Bus, Simulator, StopReason};

/// Build a firmware image: vector table entries as (offset, word), code as
/// (offset, halfword) pairs.
fn firmware(words: &[(usize, u32)], halfwords: &[(usize, u16)]) -> Vec<u8> {
    let mut image = vec![0u8; 0x200];
    for &(off, w) in words {
        image[off..off + 4].copy_from_slice(&w.to_le_bytes());
    }
    for &(off, hw) in halfwords {
        image[off..off + 2].copy_from_slice(&hw.to_le_bytes());
    }
    image
}

fn boot(image: &[u8]) -> Simulator {
    let mut sim = Simulator::new();
    sim.bus.memory.load_image(image);
    sim.reset();
    sim
}

/// Timer overflow drives the full interrupt path: tick -> NVIC pending ->
/// exception entry -> handler -> exception return.
#[test]
fn test_timer_irq_handler_roundtrip() {
    // Reset handler at 0x80: MOV R4, #0; B .
    // TIM2 handler at 0xC0:  MOV R4, #1; BX LR
    let image = firmware(
        &[
            (0x00, 0x2000_4FF0),
            (0x04, 0x0800_0081),
            ((16 + TIM2_IRQ as usize) * 4, 0x0800_00C1),
        ],
        &[(0x80, 0x2400), (0x82, 0xE7FE), (0xC0, 0x2401), (0xC2, 0x4770)],
    );
    let mut sim = boot(&image);

    assert_eq!(sim.cpu.r[REG_SP], 0x2000_4FF0);
    assert_eq!(sim.cpu.pc(), 0x0800_0080);

    // Configure TIM2 through the bus, as firmware would.
    sim.bus.write(TIM2_BASE + TIM_ARR_OFFSET, 5, 4).unwrap();
    sim.bus.write(TIM2_BASE + TIM_PSC_OFFSET, 0, 4).unwrap();
    sim.bus.write(TIM2_BASE + TIM_DIER_OFFSET, 1, 4).unwrap();
    sim.bus.write(TIM2_BASE + TIM_CR1_OFFSET, 1, 4).unwrap();
    sim.nvic.enable_irq(TIM2_IRQ);

    // Five steps: MOV R4, #0 then the B . loop; the overflow pends at the
    // fifth tick but the handler has not run.
    for _ in 0..5 {
        sim.step().unwrap();
    }
    assert_eq!(sim.cpu.r[4], 0);

    // Step 6 is consumed by exception entry.
    sim.step().unwrap();
    assert_eq!(sim.cpu.pc(), 0x0800_00C0);
    assert!(sim.cpu.current_irq.is_some());
    assert!(sim.nvic.is_active(TIM2_IRQ));

    // Step 7 executes the handler body.
    sim.step().unwrap();
    assert_eq!(sim.cpu.r[4], 1);

    // Step 8: BX LR unstacks back into the B . loop.
    sim.step().unwrap();
    assert_eq!(sim.cpu.pc(), 0x0800_0082);
    assert_eq!(sim.cpu.current_irq, None);
    assert!(!sim.nvic.is_active(TIM2_IRQ));
    assert_eq!(sim.cpu.r[4], 1);
    assert_eq!(sim.cpu.r[REG_SP], 0x2000_4FF0);

    // UIF stays latched until firmware clears it.
    assert_ne!(sim.bus.read(TIM2_BASE + TIM_SR_OFFSET, 4) & TIM_SR_UIF, 0);
    assert!(sim.cpu.cycles >= 7);
}

#[test]
fn test_breakpoint_halt() {
    // MOV R0, #0; ADD R0, #1 (x3); B .
    let image = firmware(
        &[(0x00, 0x2000_4FF0), (0x04, 0x0800_0081)],
        &[
            (0x80, 0x2000),
            (0x82, 0x3001),
            (0x84, 0x3001),
            (0x86, 0x3001),
            (0x88, 0xE7FE),
        ],
    );
    let mut sim = boot(&image);
    sim.debugger.add(0x0800_0086).unwrap();

    let reason = sim.run(None).unwrap();
    assert_eq!(reason, StopReason::Breakpoint(0x0800_0086));
    assert_eq!(sim.cpu.pc(), 0x0800_0086);
    assert_eq!(sim.cpu.r[0], 2);
    assert!(sim.halted);
}

#[test]
fn test_uart_output_single_step() {
    let image = firmware(&[(0x00, 0x2000_4FF0), (0x04, 0x0800_0081)], &[(0x80, 0xE7FE)]);
    let mut sim = boot(&image);

    let sink = Arc::new(Mutex::new(Vec::new()));
    let captured = sink.clone();
    sim.set_uart_output(Box::new(move |b| captured.lock().unwrap().push(b)));

    sim.bus
        .write(USART1_BASE + UART_CR1_OFFSET, UART_CR1_UE | UART_CR1_TE, 4)
        .unwrap();
    sim.bus
        .write(USART1_BASE + UART_DR_OFFSET, b'Q' as u32, 4)
        .unwrap();

    sim.step().unwrap();
    assert_eq!(*sink.lock().unwrap(), vec![b'Q']);
}

#[test]
fn test_cmp_beq_skips_untaken_path() {
    // MOV R0, #10; MOV R1, #10; CMP R0, R1; BEQ +2; MOV R2, #0xFF; MOV R3, #1; B .
    let image = firmware(
        &[(0x00, 0x2000_4FF0), (0x04, 0x0800_0081)],
        &[
            (0x80, 0x200A),
            (0x82, 0x210A),
            (0x84, 0x4288),
            (0x86, 0xD000),
            (0x88, 0x22FF),
            (0x8A, 0x2301),
            (0x8C, 0xE7FE),
        ],
    );
    let mut sim = boot(&image);

    for _ in 0..5 {
        sim.step().unwrap();
    }
    assert_eq!(sim.cpu.r[2], 0);
    assert_eq!(sim.cpu.r[3], 1);
    assert_ne!(sim.cpu.xpsr & XPSR_Z, 0);
}

#[test]
fn test_bl_then_bx_lr() {
    // 0x80: BL +8; 0x84: MOV R2, #0xBB; 0x86: B .; 0x8C: MOV R0, #0xAA; BX LR
    let image = firmware(
        &[(0x00, 0x2000_4FF0), (0x04, 0x0800_0081)],
        &[
            (0x80, 0xF000),
            (0x82, 0xF804),
            (0x84, 0x22BB),
            (0x86, 0xE7FE),
            (0x8C, 0x20AA),
            (0x8E, 0x4770),
        ],
    );
    let mut sim = boot(&image);

    sim.step().unwrap();
    assert_eq!(sim.cpu.pc(), 0x0800_008C);
    assert_eq!(sim.cpu.r[REG_LR], 0x0800_0085);

    sim.step().unwrap();
    assert_eq!(sim.cpu.r[0], 0xAA);

    sim.step().unwrap();
    assert_eq!(sim.cpu.pc(), 0x0800_0084);

    sim.step().unwrap();
    assert_eq!(sim.cpu.r[2], 0xBB);
}

/// Identical flash contents, UART schedule and breakpoints give identical
/// traces and output.
#[test]
fn test_determinism() {
    fn run_once() -> ([u32; 16], u32, u64, Vec<u8>) {
        let image = firmware(
            &[
                (0x00, 0x2000_4FF0),
                (0x04, 0x0800_0081),
                ((16 + TIM2_IRQ as usize) * 4, 0x0800_00C1),
            ],
            &[
                (0x80, 0x2400),
                (0x82, 0x3401),
                (0x84, 0xE7FD),
                (0xC0, 0x2401),
                (0xC2, 0x4770),
            ],
        );
        let mut sim = boot(&image);

        let sink = Arc::new(Mutex::new(Vec::new()));
        let captured = sink.clone();
        sim.set_uart_output(Box::new(move |b| captured.lock().unwrap().push(b)));

        sim.bus.write(TIM2_BASE + TIM_ARR_OFFSET, 7, 4).unwrap();
        sim.bus.write(TIM2_BASE + TIM_DIER_OFFSET, 1, 4).unwrap();
        sim.bus.write(TIM2_BASE + TIM_CR1_OFFSET, 1, 4).unwrap();
        sim.nvic.enable_irq(TIM2_IRQ);
        sim.bus
            .write(USART1_BASE + UART_CR1_OFFSET, UART_CR1_UE | UART_CR1_TE, 4)
            .unwrap();

        for i in 0..40 {
            if i == 10 {
                sim.bus
                    .write(USART1_BASE + UART_DR_OFFSET, b'A' as u32, 4)
                    .unwrap();
            }
            if i == 20 {
                sim.uart_incoming_char(b'z');
            }
            sim.step().unwrap();
        }

        let output = sink.lock().unwrap().clone();
        (sim.cpu.r, sim.cpu.xpsr, sim.cpu.cycles, output)
    }

    assert_eq!(run_once(), run_once());
}

/// Runtime stores to flash fault the step and halt the simulator; flash
/// contents survive.
#[test]
fn test_flash_write_faults_and_preserves_contents() {
    // LDR R1, [PC, #4] loads the flash base, STR R0, [R1, #0] faults.
    let image = firmware(
        &[(0x00, 0x2000_4FF0), (0x04, 0x0800_0081), (0x88, 0x0800_0000)],
        &[(0x80, 0x4901), (0x82, 0x6008), (0x84, 0xE7FE)],
    );
    let mut sim = boot(&image);
    sim.cpu.r[0] = 0xBAD0_BAD0;

    sim.step().unwrap();
    assert_eq!(sim.cpu.r[1], 0x0800_0000);
    assert!(sim.step().is_err());
    assert!(sim.halted);
    assert_eq!(sim.bus.read(0x0800_0000, 4), 0x2000_4FF0);
}

/// A pending IRQ with priority >= the active one waits for completion.
#[test]
fn test_nvic_preemption_across_steps() {
    // Handler at 0xC0 spins; a second, equal-priority IRQ pended while the
    // first is active must not re-enter.
    let image = firmware(
        &[
            (0x00, 0x2000_4FF0),
            (0x04, 0x0800_0081),
            ((16 + 5) * 4, 0x0800_00C1),
            ((16 + 6) * 4, 0x0800_00D1),
        ],
        &[(0x80, 0xE7FE), (0xC0, 0xE7FE), (0xD0, 0xE7FE)],
    );
    let mut sim = boot(&image);
    sim.nvic.enable_irq(5);
    sim.nvic.enable_irq(6);
    sim.nvic.set_priority(5, 1);
    sim.nvic.set_priority(6, 1);

    sim.nvic.set_pending(5);
    sim.step().unwrap(); // entry into IRQ 5
    assert_eq!(sim.cpu.pc(), 0x0800_00C0);

    sim.nvic.set_pending(6);
    sim.step().unwrap();
    sim.step().unwrap();
    // Still spinning in the IRQ 5 handler.
    assert_eq!(sim.cpu.pc(), 0x0800_00C0);

    // A strictly more urgent line preempts immediately.
    sim.nvic.set_priority(6, 0);
    sim.step().unwrap();
    assert_eq!(sim.cpu.pc(), 0x0800_00D0);
}
