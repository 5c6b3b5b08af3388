//! The process controller: inferior lifecycle, the resume/step/wait
//! protocol, stop classification, and syscall catching.

use crate::address::VirtAddr;
use crate::breakpoint::BreakpointSite;
use crate::error::{LdbgError, LdbgResult};
use crate::event::{
    ProcessState, StopReason, StoppointHit, SyscallCatchPolicy, SyscallData, SyscallInfo,
    TrapType, SYSCALL_SIGTRAP,
};
use crate::pipe::Pipe;
use crate::ptrace;
use crate::register::{dr_register_id, RegValue, RegisterFile, RegisterId, RegisterInfo};
use crate::stoppoint::{StopCtx, StoppointCollection, StoppointMode};
use crate::watchpoint::Watchpoint;
use nix::errno::Errno;
use nix::sys::personality::{self, Persona};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};
use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

// si_code values for SIGTRAP stops
const TRAP_TRACE: i32 = 2;
const TRAP_HWBKPT: i32 = 4;
const SI_KERNEL: i32 = 0x80;

/// One traced inferior process.
///
/// All mutating operations must be serialized by the caller; between a
/// resume and the matching [`Process::wait_on_signal`] the inferior runs
/// concurrently and the only safe call is `wait_on_signal` itself.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    terminate_on_end: bool,
    is_attached: bool,
    state: ProcessState,
    registers: RegisterFile,
    breakpoint_sites: StoppointCollection<BreakpointSite>,
    watchpoints: StoppointCollection<Watchpoint>,
    syscall_policy: SyscallCatchPolicy,
    expecting_syscall_exit: bool,
}

fn exit_with_errno(channel: &Pipe, prefix: &str, err: Errno) -> ! {
    let message = format!("{prefix}: {}", err.desc());
    let _ = channel.write(message.as_bytes());
    std::process::exit(-1);
}

impl Process {
    fn new(pid: Pid, terminate_on_end: bool, is_attached: bool) -> Self {
        Process {
            pid,
            terminate_on_end,
            is_attached,
            state: ProcessState::Stopped,
            registers: RegisterFile::new(),
            breakpoint_sites: StoppointCollection::new(),
            watchpoints: StoppointCollection::new(),
            syscall_policy: SyscallCatchPolicy::None,
            expecting_syscall_exit: false,
        }
    }

    /// Fork and exec `path` under trace, waiting for the initial stop.
    pub fn launch(path: impl AsRef<Path>) -> LdbgResult<Self> {
        Self::launch_with(path, true, None)
    }

    /// Launch with explicit control over tracing and the child's stdout.
    ///
    /// Pre-exec failures in the child travel back over a close-on-exec
    /// pipe; on a successful exec the parent just sees EOF.
    pub fn launch_with(
        path: impl AsRef<Path>,
        debug: bool,
        stdout_replacement: Option<RawFd>,
    ) -> LdbgResult<Self> {
        let path = path.as_ref();
        let program = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| LdbgError::usage("program path contains an interior NUL byte"))?;
        let mut channel = Pipe::new(true)?;

        let fork_result =
            unsafe { unistd::fork() }.map_err(|e| LdbgError::errno("fork failed", e))?;
        let child = match fork_result {
            ForkResult::Child => Self::exec_inferior(&program, debug, stdout_replacement, channel),
            ForkResult::Parent { child } => child,
        };

        channel.close_write();
        let data = channel.read()?;
        channel.close_read();

        if !data.is_empty() {
            // the child never reached exec; reap it and relay its message
            let _ = waitpid(child, None);
            return Err(LdbgError::Kernel(
                String::from_utf8_lossy(&data).into_owned(),
            ));
        }

        let mut process = Self::new(child, true, debug);
        if debug {
            process.wait_on_signal()?;
            ptrace::set_trace_sysgood(child)
                .map_err(|e| LdbgError::errno("Failed to set TRACESYSGOOD option", e))?;
        }
        debug!("launched {} as pid {child}", path.display());
        Ok(process)
    }

    fn exec_inferior(
        program: &CString,
        debug: bool,
        stdout_replacement: Option<RawFd>,
        mut channel: Pipe,
    ) -> ! {
        // move into a fresh process group so inferior signals stay separate
        if let Err(err) = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
            exit_with_errno(&channel, "Could not set pgid", err);
        }
        let _ = personality::set(Persona::ADDR_NO_RANDOMIZE);
        channel.close_read();

        if let Some(fd) = stdout_replacement {
            if let Err(err) = unistd::dup2(fd, libc::STDOUT_FILENO) {
                exit_with_errno(&channel, "stdout replacement failed", err);
            }
        }

        if debug {
            if let Err(err) = ptrace::traceme() {
                exit_with_errno(&channel, "Tracing failed", err);
            }
        }

        let err = unistd::execvp(program.as_c_str(), std::slice::from_ref(program))
            .err()
            .unwrap_or(Errno::EINVAL);
        exit_with_errno(&channel, "exec failed", err);
    }

    /// Attach to a running process and wait for its initial stop.
    pub fn attach(pid: i32) -> LdbgResult<Self> {
        if pid == 0 {
            return Err(LdbgError::usage("Invalid PID"));
        }
        let pid = Pid::from_raw(pid);
        ptrace::attach(pid).map_err(|e| LdbgError::errno("Could not attach", e))?;

        let mut process = Self::new(pid, false, true);
        process.wait_on_signal()?;
        ptrace::set_trace_sysgood(pid)
            .map_err(|e| LdbgError::errno("Failed to set TRACESYSGOOD option", e))?;
        debug!("attached to pid {pid}");
        Ok(process)
    }

    #[inline]
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    #[inline]
    pub(crate) fn pid_raw(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    #[inline]
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    #[inline]
    pub fn breakpoint_sites(&self) -> &StoppointCollection<BreakpointSite> {
        &self.breakpoint_sites
    }

    #[inline]
    pub fn watchpoints(&self) -> &StoppointCollection<Watchpoint> {
        &self.watchpoints
    }

    #[inline]
    pub fn syscall_catch_policy(&self) -> &SyscallCatchPolicy {
        &self.syscall_policy
    }

    pub fn set_syscall_catch_policy(&mut self, policy: SyscallCatchPolicy) {
        self.syscall_policy = policy;
    }

    #[inline]
    pub fn pc(&self) -> VirtAddr {
        VirtAddr::new(self.registers.read_as_u64(RegisterId::rip))
    }

    pub fn set_pc(&mut self, address: VirtAddr) -> LdbgResult<()> {
        self.registers
            .write_by_id(self.pid, RegisterId::rip, address.addr())
    }

    pub fn read_register(&self, id: RegisterId) -> RegValue {
        self.registers.read_by_id(id)
    }

    pub fn write_register(
        &mut self,
        info: &RegisterInfo,
        value: impl Into<RegValue>,
    ) -> LdbgResult<()> {
        self.registers.write(self.pid, info, value.into())
    }

    pub fn write_register_by_id(
        &mut self,
        id: RegisterId,
        value: impl Into<RegValue>,
    ) -> LdbgResult<()> {
        self.registers.write_by_id(self.pid, id, value)
    }

    /// Resume the inferior. A breakpoint at the current pc is stepped over
    /// first: its byte would otherwise re-trap on the same instruction.
    pub fn resume(&mut self) -> LdbgResult<()> {
        let pc = self.pc();
        if self.breakpoint_sites.enabled_stoppoint_at_address(pc) {
            let mut ctx = StopCtx {
                pid: self.pid,
                regs: &mut self.registers,
            };
            let site = self.breakpoint_sites.get_by_address_mut(pc)?;
            site.disable(&mut ctx)?;
            ptrace::single_step(ctx.pid)
                .map_err(|e| LdbgError::errno("Failed to single step", e))?;
            waitpid(ctx.pid, None).map_err(|e| LdbgError::errno("waitpid failed", e))?;
            site.enable(&mut ctx)?;
        }

        // a non-trivial catch policy turns every syscall boundary into a stop
        let result = if matches!(self.syscall_policy, SyscallCatchPolicy::None) {
            ptrace::cont(self.pid)
        } else {
            ptrace::cont_syscall(self.pid)
        };
        result.map_err(|e| LdbgError::errno("Could not resume", e))?;

        self.state = ProcessState::Running;
        Ok(())
    }

    /// Execute one instruction, stepping over a breakpoint at the current
    /// pc the same way resume does.
    pub fn step_instruction(&mut self) -> LdbgResult<StopReason> {
        let pc = self.pc();
        let mut to_reenable = None;
        if self.breakpoint_sites.enabled_stoppoint_at_address(pc) {
            let mut ctx = StopCtx {
                pid: self.pid,
                regs: &mut self.registers,
            };
            self.breakpoint_sites
                .get_by_address_mut(pc)?
                .disable(&mut ctx)?;
            to_reenable = Some(pc);
        }

        ptrace::single_step(self.pid)
            .map_err(|e| LdbgError::errno("Could not single step", e))?;
        let reason = self.wait_on_signal()?;

        if let Some(address) = to_reenable {
            let mut ctx = StopCtx {
                pid: self.pid,
                regs: &mut self.registers,
            };
            self.breakpoint_sites
                .get_by_address_mut(address)?
                .enable(&mut ctx)?;
        }
        Ok(reason)
    }

    /// Block until the inferior stops, exits, or is killed, and classify
    /// what happened.
    pub fn wait_on_signal(&mut self) -> LdbgResult<StopReason> {
        let status =
            waitpid(self.pid, None).map_err(|e| LdbgError::errno("waitpid failed", e))?;
        let mut reason = StopReason::from_wait_status(status);
        self.state = reason.reason;
        debug!("pid {}: {status:?}", self.pid);

        if self.is_attached && self.state == ProcessState::Stopped {
            self.registers.read_all(self.pid)?;
            self.augment_stop_reason(&mut reason)?;

            if reason.info == libc::SIGTRAP as u8 {
                match reason.trap {
                    // the int3 byte has already executed, so the reported
                    // pc is one past the breakpoint
                    Some(TrapType::SoftwareBreakpoint) if !self.pc().is_null() => {
                        let instruction_begin = self.pc() - 1;
                        if self
                            .breakpoint_sites
                            .enabled_stoppoint_at_address(instruction_begin)
                        {
                            self.set_pc(instruction_begin)?;
                        }
                    }
                    Some(TrapType::HardwareBreakpoint) => {
                        if let StoppointHit::Watchpoint(id) = self.current_hardware_stoppoint()? {
                            self.watchpoints.get_by_id_mut(id)?.update_data()?;
                        }
                    }
                    Some(TrapType::Syscall) => {
                        reason = self.maybe_resume_from_syscall(reason)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(reason)
    }

    /// Combine siginfo, the syscall-stop marker, and the pairing flag into
    /// the final trap classification.
    fn augment_stop_reason(&mut self, reason: &mut StopReason) -> LdbgResult<()> {
        let siginfo = ptrace::getsiginfo(self.pid)
            .map_err(|e| LdbgError::errno("Failed to get siginfo", e))?;

        if reason.info == SYSCALL_SIGTRAP {
            let id = self.registers.read_as_u64(RegisterId::orig_rax) as u16;
            let data = if self.expecting_syscall_exit {
                self.expecting_syscall_exit = false;
                SyscallData::Exit {
                    ret: self.registers.read_as_u64(RegisterId::rax),
                }
            } else {
                // SysV ABI syscall arguments, in order
                const ARG_REGISTERS: [RegisterId; 6] = [
                    RegisterId::rdi,
                    RegisterId::rsi,
                    RegisterId::rdx,
                    RegisterId::r10,
                    RegisterId::r8,
                    RegisterId::r9,
                ];
                let mut args = [0u64; 6];
                for (value, id) in args.iter_mut().zip(ARG_REGISTERS) {
                    *value = self.registers.read_as_u64(id);
                }
                self.expecting_syscall_exit = true;
                SyscallData::Entry { args }
            };

            reason.syscall = Some(SyscallInfo { id, data });
            reason.info = libc::SIGTRAP as u8;
            reason.trap = Some(TrapType::Syscall);
            return Ok(());
        }

        // any non-syscall stop breaks an entry/exit pair
        self.expecting_syscall_exit = false;

        reason.trap = Some(TrapType::Unknown);
        if reason.info == libc::SIGTRAP as u8 {
            reason.trap = Some(match siginfo.si_code {
                TRAP_TRACE => TrapType::SingleStep,
                // x86-64 Linux reports software breakpoints as SI_KERNEL,
                // not TRAP_BRKPT; tooling depends on the quirk
                SI_KERNEL => TrapType::SoftwareBreakpoint,
                TRAP_HWBKPT => TrapType::HardwareBreakpoint,
                _ => TrapType::Unknown,
            });
        }
        Ok(())
    }

    /// Resolve a hardware trap to the stop-point that fired: the lowest
    /// set bit of dr6 names the slot, the slot register holds the address.
    pub fn current_hardware_stoppoint(&self) -> LdbgResult<StoppointHit> {
        let status = self.registers.read_as_u64(RegisterId::dr6);
        let slot = status.trailing_zeros() as usize;
        if slot > 3 {
            return Err(LdbgError::Kernel(
                "no hardware stop-point recorded in dr6".to_string(),
            ));
        }

        let address = VirtAddr::new(self.registers.read_as_u64(dr_register_id(slot)));
        if self.breakpoint_sites.contains_address(address) {
            let id = self.breakpoint_sites.get_by_address(address)?.id();
            Ok(StoppointHit::BreakpointSite(id))
        } else {
            let id = self.watchpoints.get_by_address(address)?.id();
            Ok(StoppointHit::Watchpoint(id))
        }
    }

    /// For a Some(list) policy, a syscall outside the list resumes
    /// transparently and the next stop is returned instead.
    fn maybe_resume_from_syscall(&mut self, reason: StopReason) -> LdbgResult<StopReason> {
        let uncaught = match &self.syscall_policy {
            SyscallCatchPolicy::Some(to_catch) => {
                let id = reason.syscall.map(|info| info.id);
                !to_catch.iter().any(|&caught| Some(caught) == id)
            }
            _ => false,
        };
        if uncaught {
            debug!(
                "pid {}: resuming through uncaught syscall {:?}",
                self.pid,
                reason.syscall.map(|info| info.id)
            );
            self.resume()?;
            return self.wait_on_signal();
        }
        Ok(reason)
    }

    /// Register a breakpoint site. Duplicate addresses are refused.
    pub fn create_breakpoint_site(
        &mut self,
        address: VirtAddr,
        hardware: bool,
        internal: bool,
    ) -> LdbgResult<&mut BreakpointSite> {
        if self.breakpoint_sites.contains_address(address) {
            return Err(LdbgError::usage(format!(
                "breakpoint site already created at address {address}"
            )));
        }
        Ok(self
            .breakpoint_sites
            .push(BreakpointSite::new(self.pid, address, hardware, internal)))
    }

    /// Register a watchpoint. Duplicate addresses are refused; size and
    /// alignment are validated by the watchpoint itself.
    pub fn create_watchpoint(
        &mut self,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> LdbgResult<&mut Watchpoint> {
        if self.watchpoints.contains_address(address) {
            return Err(LdbgError::usage(format!(
                "watchpoint already created at address {address}"
            )));
        }
        let watchpoint = Watchpoint::new(self.pid, address, mode, size)?;
        Ok(self.watchpoints.push(watchpoint))
    }

    pub fn enable_breakpoint_site(&mut self, id: i32) -> LdbgResult<()> {
        let mut ctx = StopCtx {
            pid: self.pid,
            regs: &mut self.registers,
        };
        self.breakpoint_sites.get_by_id_mut(id)?.enable(&mut ctx)
    }

    pub fn disable_breakpoint_site(&mut self, id: i32) -> LdbgResult<()> {
        let mut ctx = StopCtx {
            pid: self.pid,
            regs: &mut self.registers,
        };
        self.breakpoint_sites.get_by_id_mut(id)?.disable(&mut ctx)
    }

    pub fn remove_breakpoint_site_by_id(&mut self, id: i32) -> LdbgResult<()> {
        let mut ctx = StopCtx {
            pid: self.pid,
            regs: &mut self.registers,
        };
        self.breakpoint_sites.remove_by_id(id, &mut ctx)
    }

    pub fn remove_breakpoint_site_by_address(&mut self, address: VirtAddr) -> LdbgResult<()> {
        let mut ctx = StopCtx {
            pid: self.pid,
            regs: &mut self.registers,
        };
        self.breakpoint_sites.remove_by_address(address, &mut ctx)
    }

    pub fn enable_watchpoint(&mut self, id: i32) -> LdbgResult<()> {
        let mut ctx = StopCtx {
            pid: self.pid,
            regs: &mut self.registers,
        };
        self.watchpoints.get_by_id_mut(id)?.enable(&mut ctx)
    }

    pub fn disable_watchpoint(&mut self, id: i32) -> LdbgResult<()> {
        let mut ctx = StopCtx {
            pid: self.pid,
            regs: &mut self.registers,
        };
        self.watchpoints.get_by_id_mut(id)?.disable(&mut ctx)
    }

    pub fn remove_watchpoint_by_id(&mut self, id: i32) -> LdbgResult<()> {
        let mut ctx = StopCtx {
            pid: self.pid,
            regs: &mut self.registers,
        };
        self.watchpoints.remove_by_id(id, &mut ctx)
    }

    pub fn remove_watchpoint_by_address(&mut self, address: VirtAddr) -> LdbgResult<()> {
        let mut ctx = StopCtx {
            pid: self.pid,
            regs: &mut self.registers,
        };
        self.watchpoints.remove_by_address(address, &mut ctx)
    }

    /// The inferior's auxiliary vector, keyed by AT_* tag.
    ///
    /// AT_ENTRY minus the ELF header's e_entry gives the load bias for the
    /// main executable.
    pub fn auxv(&self) -> LdbgResult<HashMap<u64, u64>> {
        let data = fs::read(format!("/proc/{}/auxv", self.pid))?;
        let mut result = HashMap::new();
        for pair in data.chunks_exact(16) {
            let tag = u64::from_ne_bytes(pair[..8].try_into().unwrap());
            let value = u64::from_ne_bytes(pair[8..].try_into().unwrap());
            if tag == libc::AT_NULL {
                break;
            }
            result.insert(tag, value);
        }
        Ok(result)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // guarded so a zeroed-out handle tears down nothing
        if self.pid.as_raw() == 0 {
            return;
        }

        if self.is_attached {
            // detach needs a stopped inferior
            if self.state == ProcessState::Running {
                let _ = signal::kill(self.pid, Signal::SIGSTOP);
                let _ = waitpid(self.pid, None);
            }
            let _ = ptrace::detach(self.pid);
            let _ = signal::kill(self.pid, Signal::SIGCONT);
        }

        if self.terminate_on_end {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}
