// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use gdbstub::arch::{Arch, RegId, Registers};
use std::num::NonZeroUsize;

/// Cortex-M target description served through qXfer:features:read. Lists
/// exactly the registers the emulator models, instead of the legacy ARM
/// layout with FPA floating-point registers.
pub const TARGET_XML: &str = concat!(
    r#"<?xml version="1.0"?>"#,
    r#"<!DOCTYPE target SYSTEM "gdb-target.dtd">"#,
    r#"<target version="1.0">"#,
    r#"<architecture>arm</architecture>"#,
    r#"<feature name="org.gnu.gdb.arm.m-profile">"#,
    r#"<reg name="r0" bitsize="32" regnum="0"/>"#,
    r#"<reg name="r1" bitsize="32" regnum="1"/>"#,
    r#"<reg name="r2" bitsize="32" regnum="2"/>"#,
    r#"<reg name="r3" bitsize="32" regnum="3"/>"#,
    r#"<reg name="r4" bitsize="32" regnum="4"/>"#,
    r#"<reg name="r5" bitsize="32" regnum="5"/>"#,
    r#"<reg name="r6" bitsize="32" regnum="6"/>"#,
    r#"<reg name="r7" bitsize="32" regnum="7"/>"#,
    r#"<reg name="r8" bitsize="32" regnum="8"/>"#,
    r#"<reg name="r9" bitsize="32" regnum="9"/>"#,
    r#"<reg name="r10" bitsize="32" regnum="10"/>"#,
    r#"<reg name="r11" bitsize="32" regnum="11"/>"#,
    r#"<reg name="r12" bitsize="32" regnum="12"/>"#,
    r#"<reg name="sp" bitsize="32" regnum="13" type="data_ptr"/>"#,
    r#"<reg name="lr" bitsize="32" regnum="14"/>"#,
    r#"<reg name="pc" bitsize="32" regnum="15" type="code_ptr"/>"#,
    r#"<reg name="xpsr" bitsize="32" regnum="16"/>"#,
    r#"</feature>"#,
    r#"</target>"#,
);

/// Register file visible to GDB: r0-r12, sp, lr, pc, xpsr. The `g` packet
/// carries all 17 words little-endian, 136 hex characters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CortexM3Regs {
    pub r: [u32; 13],
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

impl Registers for CortexM3Regs {
    type ProgramCounter = u32;

    fn pc(&self) -> u32 {
        self.pc
    }

    fn gdb_serialize(&self, mut write_byte: impl FnMut(Option<u8>)) {
        let mut write_u32 = |val: u32| {
            for b in val.to_le_bytes() {
                write_byte(Some(b));
            }
        };
        for reg in self.r {
            write_u32(reg);
        }
        write_u32(self.sp);
        write_u32(self.lr);
        write_u32(self.pc);
        write_u32(self.xpsr);
    }

    fn gdb_deserialize(&mut self, bytes: &[u8]) -> Result<(), ()> {
        if bytes.len() != 17 * 4 {
            return Err(());
        }
        let mut words = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        for reg in &mut self.r {
            *reg = words.next().ok_or(())?;
        }
        self.sp = words.next().ok_or(())?;
        self.lr = words.next().ok_or(())?;
        self.pc = words.next().ok_or(())?;
        self.xpsr = words.next().ok_or(())?;
        Ok(())
    }
}

/// 0..=12 are r0-r12, 13 sp, 14 lr, 15 pc, 16 xpsr. Anything above replies
/// E00 at the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CortexM3RegId(pub u8);

impl RegId for CortexM3RegId {
    fn from_raw_id(id: usize) -> Option<(Self, Option<NonZeroUsize>)> {
        if id > 16 {
            return None;
        }
        Some((Self(id as u8), NonZeroUsize::new(4)))
    }
}

/// Cortex-M3 architecture definition for the RSP layer.
pub enum CortexM3 {}

impl Arch for CortexM3 {
    type Usize = u32;
    type Registers = CortexM3Regs;
    type BreakpointKind = usize;
    type RegId = CortexM3RegId;

    fn target_description_xml() -> Option<&'static str> {
        Some(TARGET_XML)
    }
}
