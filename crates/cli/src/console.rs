// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Line-oriented interactive console on stdin.

use std::io::{self, BufRead, Write};
use std::path::Path;
use stm32sim_core::{SimError, Simulator, StopReason};

const HELP: &[(&str, &str)] = &[
    ("help", "Show this help message"),
    ("load", "Load binary: load <path>"),
    ("run", "Run until breakpoint or error"),
    ("stop", "Stop execution"),
    ("step", "Step N instructions: step [N]"),
    ("reset", "Reset the simulator"),
    ("reg", "Display registers"),
    ("mem", "Read memory: mem <addr> [count]"),
    ("break", "Set breakpoint: break [addr]"),
    ("delete", "Delete breakpoint: delete <addr>"),
    ("uart", "Send char to UART: uart <char>"),
    ("quit", "Exit the simulator"),
];

pub fn run(sim: &mut Simulator) {
    println!("STM32F103C8T6 Simulator");
    println!("Type 'help' for available commands");
    println!();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("stm32> ");
        let _ = io::stdout().flush();

        let Some(Ok(line)) = lines.next() else {
            break; // EOF
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, args) = split_command(line);
        match cmd {
            "help" => cmd_help(),
            "load" => cmd_load(sim, args),
            "run" => cmd_run(sim),
            "stop" => {
                sim.halt();
                println!("Halted");
            }
            "step" => cmd_step(sim, args),
            "reset" => cmd_reset(sim),
            "reg" => cmd_reg(sim),
            "mem" => cmd_mem(sim, args),
            "break" => cmd_break(sim, args),
            "delete" => cmd_delete(sim, args),
            "uart" => cmd_uart(sim, args),
            "quit" => break,
            other => println!("Unknown command: '{}'. Type 'help' for list.", other),
        }
    }

    println!("Goodbye.");
}

fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    }
}

/// Accepts decimal or 0x-prefixed hex.
fn parse_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn report_error(sim: &Simulator, err: &SimError) {
    eprintln!("error: {} (PC={:#010x})", err, sim.cpu.pc());
}

fn cmd_help() {
    println!("Available commands:");
    for (name, help) in HELP {
        println!("  {:<10} {}", name, help);
    }
}

fn cmd_load(sim: &mut Simulator, args: &str) {
    if args.is_empty() {
        println!("Usage: load <path>");
        return;
    }
    match sim.load(Path::new(args)) {
        Ok(n) => println!("Loaded {} bytes into flash", n),
        Err(e) => report_error(sim, &e),
    }
}

fn cmd_run(sim: &mut Simulator) {
    println!("Running...");
    match sim.run(None) {
        Ok(StopReason::Breakpoint(pc)) => println!("Breakpoint hit at {:#010x}", pc),
        Ok(_) => {}
        Err(e) => report_error(sim, &e),
    }
    println!(
        "Stopped at PC={:#010x} (cycles={})",
        sim.cpu.pc(),
        sim.cpu.cycles
    );
}

fn cmd_step(sim: &mut Simulator, args: &str) {
    let count = if args.is_empty() {
        1
    } else {
        parse_u32(args).unwrap_or(1)
    };

    for i in 0..count {
        match sim.step() {
            Ok(StopReason::Breakpoint(pc)) => {
                println!("Breakpoint hit at {:#010x} (step {})", pc, i + 1);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                report_error(sim, &e);
                break;
            }
        }
    }

    println!("PC={:#010x}  cycles={}", sim.cpu.pc(), sim.cpu.cycles);
}

fn cmd_reset(sim: &mut Simulator) {
    sim.reset();
    println!("Simulator reset");
}

fn cmd_reg(sim: &Simulator) {
    const NAMES: [&str; 16] = [
        "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12", "SP",
        "LR", "PC",
    ];

    for (i, name) in NAMES.iter().enumerate() {
        print!("{:<4}= {:#010x}", name, sim.cpu.r[i]);
        if i % 4 == 3 {
            println!();
        } else {
            print!("  ");
        }
    }

    let xpsr = sim.cpu.xpsr;
    let flag = |bit: u32, c: char| if xpsr & (1 << bit) != 0 { c } else { '-' };
    println!(
        "xPSR= {:#010x}  [{}{}{}{}]  cycles={}",
        xpsr,
        flag(31, 'N'),
        flag(30, 'Z'),
        flag(29, 'C'),
        flag(28, 'V'),
        sim.cpu.cycles
    );
}

fn cmd_mem(sim: &mut Simulator, args: &str) {
    let mut parts = args.split_whitespace();
    let Some(addr) = parts.next().and_then(parse_u32) else {
        println!("Usage: mem <addr> [count]");
        return;
    };
    let count = parts.next().and_then(parse_u32).unwrap_or(64).min(1024);

    let bytes = sim.read_memory(addr, count as usize);
    for (row_idx, row) in bytes.chunks(16).enumerate() {
        print!("{:#010x}: ", addr + row_idx as u32 * 16);
        for b in row {
            print!("{:02X} ", b);
        }
        print!(" |");
        for b in row {
            let c = *b as char;
            print!("{}", if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        println!("|");
    }
}

fn cmd_break(sim: &mut Simulator, args: &str) {
    if args.is_empty() {
        let bps = sim.debugger.list();
        if bps.is_empty() {
            println!("No breakpoints set");
        } else {
            println!("Breakpoints:");
            for (i, bp) in bps.iter().enumerate() {
                println!("  [{}] {:#010x}", i, bp);
            }
        }
        return;
    }

    let Some(addr) = parse_u32(args) else {
        println!("Invalid address");
        return;
    };
    match sim.debugger.add(addr) {
        Ok(()) => println!("Breakpoint set at {:#010x}", addr),
        Err(e) => report_error(sim, &e),
    }
}

fn cmd_delete(sim: &mut Simulator, args: &str) {
    let Some(addr) = parse_u32(args) else {
        println!("Usage: delete <addr>");
        return;
    };
    match sim.debugger.remove(addr) {
        Ok(()) => println!("Breakpoint removed at {:#010x}", addr),
        Err(_) => println!("No breakpoint at {:#010x}", addr),
    }
}

fn cmd_uart(sim: &mut Simulator, args: &str) {
    let Some(&byte) = args.as_bytes().first() else {
        println!("Usage: uart <char>");
        return;
    };
    sim.uart_incoming_char(byte);
    println!("Sent '{}' to UART", byte as char);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u32_decimal_and_hex() {
        assert_eq!(parse_u32("64"), Some(64));
        assert_eq!(parse_u32("0x40"), Some(0x40));
        assert_eq!(parse_u32("0X08000080"), Some(0x0800_0080));
        assert_eq!(parse_u32("  0x10  "), Some(0x10));
        assert_eq!(parse_u32("zzz"), None);
        assert_eq!(parse_u32(""), None);
    }

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("step 5"), ("step", "5"));
        assert_eq!(split_command("run"), ("run", ""));
        assert_eq!(split_command("mem 0x100   64"), ("mem", "0x100   64"));
    }
}
