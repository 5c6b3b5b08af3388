//! Structured stop events: process state, trap classification, and
//! syscall information.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The marker waitpid reports for syscall-stops once TRACESYSGOOD is set.
pub(crate) const SYSCALL_SIGTRAP: u8 = (libc::SIGTRAP | 0x80) as u8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Running,
    Stopped,
    Exited,
    Terminated,
}

/// What kind of trap produced a SIGTRAP stop.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrapType {
    SingleStep,
    SoftwareBreakpoint,
    HardwareBreakpoint,
    Syscall,
    Unknown,
}

/// Entry stops carry the six SysV argument registers; exit stops carry the
/// return value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallData {
    Entry { args: [u64; 6] },
    Exit { ret: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallInfo {
    pub id: u16,
    pub data: SyscallData,
}

impl SyscallInfo {
    #[inline]
    pub fn is_entry(&self) -> bool {
        matches!(self.data, SyscallData::Entry { .. })
    }
}

/// Which syscalls should stop the inferior. Read on every resume.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyscallCatchPolicy {
    #[default]
    None,
    All,
    Some(Vec<u16>),
}

/// One observed stop, exit, or termination of the inferior.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReason {
    pub reason: ProcessState,
    /// Exit code for exits, signal number otherwise.
    pub info: u8,
    pub trap: Option<TrapType>,
    pub syscall: Option<SyscallInfo>,
}

impl StopReason {
    pub(crate) fn from_wait_status(status: WaitStatus) -> Self {
        let (reason, info) = match status {
            WaitStatus::Exited(_, code) => (ProcessState::Exited, code as u8),
            WaitStatus::Signaled(_, signal, _) => (ProcessState::Terminated, signal as u8),
            WaitStatus::Stopped(_, signal) => (ProcessState::Stopped, signal as u8),
            WaitStatus::PtraceSyscall(_) => (ProcessState::Stopped, SYSCALL_SIGTRAP),
            WaitStatus::PtraceEvent(_, signal, _) => (ProcessState::Stopped, signal as u8),
            WaitStatus::Continued(_) | WaitStatus::StillAlive => (ProcessState::Running, 0),
        };
        StopReason {
            reason,
            info,
            trap: None,
            syscall: None,
        }
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.reason == ProcessState::Stopped
    }

    /// Exit and termination both mean the inferior is gone.
    #[inline]
    pub fn is_ended(&self) -> bool {
        matches!(self.reason, ProcessState::Exited | ProcessState::Terminated)
    }
}

fn signal_name(signo: u8) -> String {
    match Signal::try_from(signo as i32) {
        Ok(signal) => signal.to_string(),
        Err(_) => format!("signal {signo}"),
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited => write!(f, "exited with status {}", self.info),
            ProcessState::Terminated => {
                write!(f, "terminated with signal {}", signal_name(self.info))
            }
            ProcessState::Stopped => {
                write!(f, "stopped with signal {}", signal_name(self.info))?;
                match self.trap {
                    Some(TrapType::SingleStep) => write!(f, " (single step)"),
                    Some(TrapType::SoftwareBreakpoint) => write!(f, " (software breakpoint)"),
                    Some(TrapType::HardwareBreakpoint) => write!(f, " (hardware breakpoint)"),
                    Some(TrapType::Syscall) => match self.syscall {
                        Some(info) if info.is_entry() => {
                            write!(f, " (syscall entry, id {})", info.id)
                        }
                        Some(info) => write!(f, " (syscall exit, id {})", info.id),
                        None => write!(f, " (syscall)"),
                    },
                    _ => Ok(()),
                }
            }
        }
    }
}

/// Which stop-point a hardware trap resolved to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoppointHit {
    BreakpointSite(i32),
    Watchpoint(i32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn wait_status_mapping() {
        let pid = Pid::from_raw(42);

        let exited = StopReason::from_wait_status(WaitStatus::Exited(pid, 3));
        assert_eq!(exited.reason, ProcessState::Exited);
        assert_eq!(exited.info, 3);
        assert!(exited.is_ended());

        let killed =
            StopReason::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false));
        assert_eq!(killed.reason, ProcessState::Terminated);
        assert_eq!(killed.info, Signal::SIGKILL as u8);

        let stopped = StopReason::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGTRAP));
        assert!(stopped.is_stopped());
        assert_eq!(stopped.info, libc::SIGTRAP as u8);

        let syscall = StopReason::from_wait_status(WaitStatus::PtraceSyscall(pid));
        assert_eq!(syscall.info, SYSCALL_SIGTRAP);
        assert!(syscall.is_stopped());
    }

    #[test]
    fn display_forms() {
        let mut reason = StopReason {
            reason: ProcessState::Exited,
            info: 0,
            trap: None,
            syscall: None,
        };
        assert_eq!(reason.to_string(), "exited with status 0");

        reason.reason = ProcessState::Stopped;
        reason.info = libc::SIGTRAP as u8;
        reason.trap = Some(TrapType::SoftwareBreakpoint);
        assert_eq!(
            reason.to_string(),
            "stopped with signal SIGTRAP (software breakpoint)"
        );

        reason.trap = Some(TrapType::Syscall);
        reason.syscall = Some(SyscallInfo {
            id: 1,
            data: SyscallData::Exit { ret: 0 },
        });
        assert_eq!(
            reason.to_string(),
            "stopped with signal SIGTRAP (syscall exit, id 1)"
        );
    }
}
