// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! GDB Remote Serial Protocol server.
//!
//! Packet framing, checksums and query dispatch come from the `gdbstub`
//! crate; this crate supplies the Cortex-M3 architecture description and
//! maps the protocol onto the simulator's debug surface. During a continue
//! the simulator runs in bounded chunks so a `0x03` interrupt from the
//! client is picked up between chunks.

mod arch;

pub use arch::{CortexM3, CortexM3RegId, CortexM3Regs, TARGET_XML};

use core::convert::Infallible;
use gdbstub::common::Signal;
use gdbstub::conn::Connection;
use gdbstub::stub::run_blocking::{self, WaitForStopReasonError};
use gdbstub::stub::{DisconnectReason, GdbStub, SingleThreadStopReason};
use gdbstub::target::ext::base::single_register_access::{
    SingleRegisterAccess, SingleRegisterAccessOps,
};
use gdbstub::target::ext::base::singlethread::{
    SingleThreadBase, SingleThreadResume, SingleThreadResumeOps, SingleThreadSingleStep,
    SingleThreadSingleStepOps,
};
use gdbstub::target::ext::base::BaseOps;
use gdbstub::target::ext::breakpoints::{
    Breakpoints, BreakpointsOps, SwBreakpoint, SwBreakpointOps,
};
use gdbstub::target::ext::monitor_cmd::{ConsoleOutput, MonitorCmd, MonitorCmdOps};
use gdbstub::target::{Target, TargetError, TargetResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream};
use stm32sim_core::{Simulator, StopReason};

/// Steps executed per chunk during a continue, between interrupt polls.
const RUN_CHUNK_STEPS: u64 = 1000;

/// How the next wait-for-stop invocation should drive the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecMode {
    Step,
    Continue,
}

pub struct EmuTarget {
    pub sim: Simulator,
    exec_mode: ExecMode,
}

impl EmuTarget {
    pub fn new(sim: Simulator) -> Self {
        Self {
            sim,
            exec_mode: ExecMode::Continue,
        }
    }
}

impl Target for EmuTarget {
    type Arch = CortexM3;
    type Error = Infallible;

    fn base_ops(&mut self) -> BaseOps<'_, Self::Arch, Self::Error> {
        BaseOps::SingleThread(self)
    }

    fn support_breakpoints(&mut self) -> Option<BreakpointsOps<'_, Self>> {
        Some(self)
    }

    fn support_monitor_cmd(&mut self) -> Option<MonitorCmdOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadBase for EmuTarget {
    fn read_registers(&mut self, regs: &mut CortexM3Regs) -> TargetResult<(), Self> {
        for i in 0..13 {
            regs.r[i] = self.sim.cpu.r[i];
        }
        regs.sp = self.sim.cpu.r[13];
        regs.lr = self.sim.cpu.r[14];
        regs.pc = self.sim.cpu.r[15];
        regs.xpsr = self.sim.cpu.xpsr;
        Ok(())
    }

    fn write_registers(&mut self, regs: &CortexM3Regs) -> TargetResult<(), Self> {
        for i in 0..13 {
            self.sim.cpu.r[i] = regs.r[i];
        }
        self.sim.cpu.r[13] = regs.sp;
        self.sim.cpu.r[14] = regs.lr;
        self.sim.cpu.r[15] = regs.pc;
        self.sim.cpu.xpsr = regs.xpsr;
        Ok(())
    }

    fn read_addrs(&mut self, start_addr: u32, data: &mut [u8]) -> TargetResult<usize, Self> {
        let mem = self.sim.read_memory(start_addr, data.len());
        data[..mem.len()].copy_from_slice(&mem);
        Ok(mem.len())
    }

    fn write_addrs(&mut self, start_addr: u32, data: &[u8]) -> TargetResult<(), Self> {
        self.sim
            .write_memory(start_addr, data)
            .map_err(|_| TargetError::NonFatal)
    }

    fn support_resume(&mut self) -> Option<SingleThreadResumeOps<'_, Self>> {
        Some(self)
    }

    fn support_single_register_access(&mut self) -> Option<SingleRegisterAccessOps<'_, (), Self>> {
        Some(self)
    }
}

impl SingleRegisterAccess<()> for EmuTarget {
    fn read_register(
        &mut self,
        _tid: (),
        reg_id: CortexM3RegId,
        buf: &mut [u8],
    ) -> TargetResult<usize, Self> {
        let val = self.sim.cpu.reg(reg_id.0 as usize);
        buf[..4].copy_from_slice(&val.to_le_bytes());
        Ok(4)
    }

    fn write_register(
        &mut self,
        _tid: (),
        reg_id: CortexM3RegId,
        val: &[u8],
    ) -> TargetResult<(), Self> {
        if val.len() != 4 {
            return Err(TargetError::NonFatal);
        }
        let word = u32::from_le_bytes([val[0], val[1], val[2], val[3]]);
        self.sim.cpu.set_reg(reg_id.0 as usize, word);
        Ok(())
    }
}

impl SingleThreadResume for EmuTarget {
    fn resume(&mut self, _signal: Option<Signal>) -> Result<(), Self::Error> {
        self.exec_mode = ExecMode::Continue;
        Ok(())
    }

    fn support_single_step(&mut self) -> Option<SingleThreadSingleStepOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadSingleStep for EmuTarget {
    fn step(&mut self, _signal: Option<Signal>) -> Result<(), Self::Error> {
        self.exec_mode = ExecMode::Step;
        Ok(())
    }
}

impl Breakpoints for EmuTarget {
    fn support_sw_breakpoint(&mut self) -> Option<SwBreakpointOps<'_, Self>> {
        Some(self)
    }
}

impl SwBreakpoint for EmuTarget {
    fn add_sw_breakpoint(&mut self, addr: u32, _kind: usize) -> TargetResult<bool, Self> {
        Ok(self.sim.debugger.add(addr).is_ok())
    }

    fn remove_sw_breakpoint(&mut self, addr: u32, _kind: usize) -> TargetResult<bool, Self> {
        Ok(self.sim.debugger.remove(addr).is_ok())
    }
}

impl MonitorCmd for EmuTarget {
    fn handle_monitor_cmd(
        &mut self,
        cmd: &[u8],
        mut out: ConsoleOutput<'_>,
    ) -> Result<(), Self::Error> {
        let cmd = String::from_utf8_lossy(cmd);
        match cmd.trim() {
            "halt" => self.sim.halt(),
            "reset" => self.sim.reset(),
            "reset halt" => {
                self.sim.reset();
                self.sim.halt();
            }
            other => {
                // Unknown monitor commands are accepted, matching openocd
                // habits of frontends that probe them.
                gdbstub::outputln!(out, "unknown monitor command '{}'", other);
            }
        }
        Ok(())
    }
}

pub enum EmuEventLoop {}

impl run_blocking::BlockingEventLoop for EmuEventLoop {
    type Target = EmuTarget;
    type Connection = TcpStream;
    type StopReason = SingleThreadStopReason<u32>;

    fn wait_for_stop_reason(
        target: &mut Self::Target,
        conn: &mut Self::Connection,
    ) -> Result<
        run_blocking::Event<Self::StopReason>,
        WaitForStopReasonError<
            <Self::Target as Target>::Error,
            <Self::Connection as Connection>::Error,
        >,
    > {
        use run_blocking::Event;
        use std::io::Read;

        if target.exec_mode == ExecMode::Step {
            target.sim.halted = false;
            let reason = match target.sim.step() {
                Ok(_) => SingleThreadStopReason::DoneStep,
                Err(e) => {
                    tracing::warn!("step fault: {}", e);
                    SingleThreadStopReason::Signal(Signal::SIGTRAP)
                }
            };
            return Ok(Event::TargetStopped(reason));
        }

        loop {
            // Poll the socket between chunks; a 0x03 arriving mid-run is
            // handed back to the protocol layer as incoming data.
            let mut byte = [0u8; 1];
            conn.set_nonblocking(true).ok();
            let incoming = matches!(conn.read(&mut byte), Ok(1));
            conn.set_nonblocking(false).ok();
            if incoming {
                return Ok(Event::IncomingData(byte[0]));
            }

            match target.sim.run(Some(RUN_CHUNK_STEPS)) {
                Ok(StopReason::Breakpoint(_)) | Ok(StopReason::StepDone) => {
                    return Ok(Event::TargetStopped(SingleThreadStopReason::Signal(
                        Signal::SIGTRAP,
                    )));
                }
                Ok(StopReason::MaxStepsReached) => continue,
                Err(e) => {
                    tracing::warn!("execution fault: {}", e);
                    return Ok(Event::TargetStopped(SingleThreadStopReason::Signal(
                        Signal::SIGTRAP,
                    )));
                }
            }
        }
    }

    fn on_interrupt(
        target: &mut Self::Target,
    ) -> Result<Option<Self::StopReason>, <Self::Target as Target>::Error> {
        target.sim.halt();
        Ok(Some(SingleThreadStopReason::Signal(Signal::SIGTRAP)))
    }
}

pub struct GdbServer {
    port: u16,
}

impl GdbServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Serve RSP sessions forever, accepting reconnects after detach.
    pub fn run(&self, sim: Simulator) -> anyhow::Result<()> {
        // SO_REUSEADDR so a restarted server can rebind the port while old
        // sessions linger in TIME_WAIT.
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        let listener: TcpListener = socket.into();
        tracing::info!(
            "GDB stub listening on port {}; connect with 'target remote :{}'",
            self.port,
            self.port
        );

        let mut target = EmuTarget::new(sim);

        loop {
            let (stream, addr) = listener.accept()?;
            stream.set_nodelay(true).ok();
            tracing::info!("GDB client connected from {}", addr);

            let gdb = GdbStub::new(stream);
            match gdb.run_blocking::<EmuEventLoop>(&mut target) {
                Ok(DisconnectReason::Disconnect) => tracing::info!("GDB client detached"),
                Ok(reason) => tracing::info!("GDB session ended: {:?}", reason),
                Err(e) => tracing::warn!("GDB session error: {}", e),
            }
        }
    }
}
