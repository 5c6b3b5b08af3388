//! Thin wrappers over the trace requests the controller issues, including
//! the ones nix does not expose (user-area peeks and pokes, the x87 area).

use libc::{c_long, c_void, siginfo_t, user_fpregs_struct, user_regs_struct};
use nix::errno::Errno;
use nix::sys::ptrace::{self, Options};
use nix::unistd::Pid;

pub fn traceme() -> nix::Result<()> {
    ptrace::traceme()
}

pub fn attach(pid: Pid) -> nix::Result<()> {
    ptrace::attach(pid)
}

pub fn detach(pid: Pid) -> nix::Result<()> {
    ptrace::detach(pid, None)
}

pub fn cont(pid: Pid) -> nix::Result<()> {
    ptrace::cont(pid, None)
}

/// Continue, trapping at the next syscall boundary.
pub fn cont_syscall(pid: Pid) -> nix::Result<()> {
    ptrace::syscall(pid, None)
}

pub fn single_step(pid: Pid) -> nix::Result<()> {
    ptrace::step(pid, None)
}

/// Mark syscall traps with bit 7 so they are distinguishable from plain
/// SIGTRAP stops.
pub fn set_trace_sysgood(pid: Pid) -> nix::Result<()> {
    ptrace::setoptions(pid, Options::PTRACE_O_TRACESYSGOOD)
}

pub fn getsiginfo(pid: Pid) -> nix::Result<siginfo_t> {
    ptrace::getsiginfo(pid)
}

pub fn getregs(pid: Pid) -> nix::Result<user_regs_struct> {
    ptrace::getregs(pid)
}

pub fn setregs(pid: Pid, regs: user_regs_struct) -> nix::Result<()> {
    ptrace::setregs(pid, regs)
}

pub fn peekdata(pid: Pid, addr: u64) -> nix::Result<u64> {
    ptrace::read(pid, addr as ptrace::AddressType).map(|word| word as u64)
}

pub fn pokedata(pid: Pid, addr: u64, data: u64) -> nix::Result<()> {
    unsafe { ptrace::write(pid, addr as ptrace::AddressType, data as *mut c_void) }
}

/// Read one aligned word from the kernel user area.
pub fn peekuser(pid: Pid, offset: usize) -> nix::Result<u64> {
    Errno::clear();
    let data = unsafe { libc::ptrace(libc::PTRACE_PEEKUSER, pid.as_raw(), offset, 0) };
    if data == -1 {
        let errno = Errno::last();
        if errno != Errno::from_i32(0) {
            return Err(errno);
        }
    }
    Ok(data as u64)
}

/// Write one aligned word into the kernel user area.
pub fn pokeuser(pid: Pid, offset: usize, data: u64) -> nix::Result<()> {
    Errno::result(unsafe { libc::ptrace(libc::PTRACE_POKEUSER, pid.as_raw(), offset, data) })
        .map(drop)
}

/// The kernel does not support single-word access to the x87 area, so the
/// floating-point registers move as a whole block.
pub fn getfpregs(pid: Pid) -> nix::Result<user_fpregs_struct> {
    let mut fprs: user_fpregs_struct = unsafe { std::mem::zeroed() };
    Errno::result(unsafe {
        libc::ptrace(
            libc::PTRACE_GETFPREGS,
            pid.as_raw(),
            0,
            &mut fprs as *mut user_fpregs_struct,
        )
    })
    .map(|_: c_long| fprs)
}

pub fn setfpregs(pid: Pid, fprs: &user_fpregs_struct) -> nix::Result<()> {
    Errno::result(unsafe {
        libc::ptrace(
            libc::PTRACE_SETFPREGS,
            pid.as_raw(),
            0,
            fprs as *const user_fpregs_struct,
        )
    })
    .map(drop)
}
