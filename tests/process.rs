//! Live-inferior tests against stock system binaries.

use anyhow::Result;
use ldbg::prelude::*;
use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Once;

fn init_logger() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = flexi_logger::Logger::try_with_env_or_str("info").map(|l| l.start());
    });
}

/// The state character from /proc/<pid>/stat: 't' is tracing stop.
fn process_status(pid: i32) -> char {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).expect("read stat");
    let after_comm = stat.rfind(')').expect("comm in stat") + 2;
    stat.as_bytes()[after_comm] as char
}

fn entry_point(process: &Process) -> VirtAddr {
    let auxv = process.auxv().expect("read auxv");
    VirtAddr::new(auxv[&libc::AT_ENTRY])
}

/// First readable mapping of at least two pages, from /proc/<pid>/maps.
fn two_page_mapping(pid: i32) -> Option<VirtAddr> {
    let maps = fs::read_to_string(format!("/proc/{pid}/maps")).ok()?;
    for line in maps.lines() {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let perms = fields.next()?;
        if !perms.starts_with('r') {
            continue;
        }
        let (low, high) = range.split_once('-')?;
        let low = u64::from_str_radix(low, 16).ok()?;
        let high = u64::from_str_radix(high, 16).ok()?;
        if high - low >= 0x2000 {
            return Some(VirtAddr::new(low));
        }
    }
    None
}

#[test]
fn launch_leaves_the_inferior_in_tracing_stop() -> Result<()> {
    init_logger();
    let process = Process::launch("yes")?;
    assert!(process.pid() > 0);
    assert_eq!(process.state(), ProcessState::Stopped);
    assert_eq!(process_status(process.pid()), 't');
    Ok(())
}

#[test]
fn launch_of_a_missing_program_reports_exec_failure() {
    init_logger();
    let error = Process::launch("/no/such/ldbg_target").unwrap_err();
    assert!(error.to_string().contains("exec failed"), "{error}");
}

#[test]
fn attach_then_detach() -> Result<()> {
    init_logger();
    let mut target = Command::new("yes")
        .stdout(Stdio::null())
        .spawn()?;

    {
        let process = Process::attach(target.id() as i32)?;
        assert_eq!(process_status(process.pid()), 't');
        // dropping the handle detaches and lets the target run on
    }
    std::thread::sleep(std::time::Duration::from_millis(50));
    let status = process_status(target.id() as i32);
    assert!(status == 'R' || status == 'S', "status {status}");

    target.kill()?;
    target.wait()?;
    Ok(())
}

#[test]
fn attach_to_pid_zero_is_a_usage_error() {
    init_logger();
    assert!(matches!(Process::attach(0), Err(LdbgError::Usage(_))));
}

#[test]
fn resume_runs_to_exit_with_replaced_stdout() -> Result<()> {
    init_logger();
    let channel = Pipe::new(false)?;
    let mut process = Process::launch_with("echo", true, Some(channel.write_fd()))?;

    process.resume()?;
    let reason = process.wait_on_signal()?;
    assert_eq!(reason.reason, ProcessState::Exited);
    assert_eq!(reason.info, 0);
    assert_eq!(process.state(), ProcessState::Exited);

    assert_eq!(channel.read()?, b"\n");

    // the inferior is gone, so another resume must fail
    assert!(process.resume().is_err());
    Ok(())
}

#[test]
fn software_breakpoint_at_the_entry_point() -> Result<()> {
    init_logger();
    let devnull = fs::File::options().write(true).open("/dev/null")?;
    let mut process = Process::launch_with("yes", true, Some(devnull.as_raw_fd()))?;
    let entry = entry_point(&process);

    let original = process.read_memory(entry, 1)?[0];
    let id = process.create_breakpoint_site(entry, false, false)?.id();
    assert!(id > 0);
    process.enable_breakpoint_site(id)?;

    // the patched byte is visible raw, hidden through the overlay
    assert_eq!(process.read_memory(entry, 1)?[0], BP_INSN);
    assert_eq!(process.read_memory_without_traps(entry, 1)?[0], original);
    assert_ne!(original, BP_INSN);

    // a second site at the same address is refused
    assert!(matches!(
        process.create_breakpoint_site(entry, false, false),
        Err(LdbgError::Usage(_))
    ));

    process.resume()?;
    let reason = process.wait_on_signal()?;
    assert_eq!(reason.reason, ProcessState::Stopped);
    assert_eq!(reason.info, libc::SIGTRAP as u8);
    assert_eq!(reason.trap, Some(TrapType::SoftwareBreakpoint));
    assert_eq!(process.pc(), entry);

    process.remove_breakpoint_site_by_id(id)?;
    assert!(process.breakpoint_sites().is_empty());
    assert_eq!(process.read_memory(entry, 1)?[0], original);
    Ok(())
}

#[test]
fn disassembly_hides_breakpoint_bytes() -> Result<()> {
    init_logger();
    let devnull = fs::File::options().write(true).open("/dev/null")?;
    let mut process = Process::launch_with("yes", true, Some(devnull.as_raw_fd()))?;
    let entry = entry_point(&process);

    let id = process.create_breakpoint_site(entry, false, false)?.id();
    process.enable_breakpoint_site(id)?;

    let instructions = Disassembler::new(&process).disassemble(5, Some(entry))?;
    assert_eq!(instructions.len(), 5);
    assert_eq!(instructions[0].address, entry);
    assert!(instructions.windows(2).all(|w| w[0].address < w[1].address));
    assert_ne!(instructions[0].text, "int3");
    Ok(())
}

#[test]
fn register_writes_survive_a_kernel_round_trip() -> Result<()> {
    init_logger();
    let mut process = Process::launch("yes")?;

    process.write_register_by_id(RegisterId::rsi, 0xcafecafe_u64)?;
    // mm1 aliases st1, so the pair below must use different indices
    process.write_register_by_id(RegisterId::mm1, 0xba5eba11_u64)?;
    process.write_register_by_id(RegisterId::xmm0, 42.24_f64)?;
    process.write_register_by_id(RegisterId::st0, 1.5_f64)?;

    // stepping refreshes the snapshot from the kernel
    let reason = process.step_instruction()?;
    assert_eq!(reason.trap, Some(TrapType::SingleStep));

    assert_eq!(
        process.read_register(RegisterId::rsi),
        RegValue::U64(0xcafecafe)
    );
    match process.read_register(RegisterId::mm1) {
        RegValue::Bytes8(bytes) => assert_eq!(u64::from_le_bytes(bytes), 0xba5eba11),
        other => panic!("unexpected mm1 value {other:?}"),
    }
    match process.read_register(RegisterId::xmm0) {
        RegValue::Bytes16(bytes) => {
            assert_eq!(bytes[..8], 42.24_f64.to_le_bytes());
        }
        other => panic!("unexpected xmm0 value {other:?}"),
    }
    match process.read_register(RegisterId::st0) {
        RegValue::Bytes16(bytes) => {
            // 1.5 in 80-bit extended: integer bit plus one fraction bit,
            // exponent at the bias
            assert_eq!(bytes[..8], 0xc000_0000_0000_0000_u64.to_le_bytes());
            assert_eq!(bytes[8..10], 16383_u16.to_le_bytes());
        }
        other => panic!("unexpected st0 value {other:?}"),
    }
    Ok(())
}

#[test]
fn single_step_advances_the_inferior() -> Result<()> {
    init_logger();
    let mut process = Process::launch("yes")?;
    let before = process.pc();
    let reason = process.step_instruction()?;
    assert_eq!(reason.reason, ProcessState::Stopped);
    assert_eq!(reason.trap, Some(TrapType::SingleStep));
    assert_ne!(process.pc(), before);
    Ok(())
}

#[test]
fn memory_writes_round_trip_including_the_tail() -> Result<()> {
    init_logger();
    let mut process = Process::launch("yes")?;

    let rsp = match process.read_register(RegisterId::rsp) {
        RegValue::U64(v) => VirtAddr::new(v),
        other => panic!("unexpected rsp value {other:?}"),
    };

    // 13 bytes: one whole word plus a 5-byte merged tail
    let payload = b"Hello, ldbg!\0";
    process.write_memory(rsp, payload)?;
    assert_eq!(process.read_memory(rsp, payload.len())?, payload);
    Ok(())
}

#[test]
fn reads_span_page_boundaries() -> Result<()> {
    init_logger();
    let process = Process::launch("yes")?;
    let base = two_page_mapping(process.pid()).expect("a mapped two-page region");

    let data = process.read_memory(base + 0xf00, 0x200)?;
    assert_eq!(data.len(), 0x200);
    Ok(())
}

#[test]
fn hardware_stoppoint_slots_are_shared_and_finite() -> Result<()> {
    init_logger();
    let mut process = Process::launch("yes")?;
    let entry = entry_point(&process);

    let bp = process.create_breakpoint_site(entry, true, false)?.id();
    process.enable_breakpoint_site(bp)?;
    assert_eq!(
        process.registers().read_as_u64(RegisterId::dr0),
        entry.addr()
    );

    let watch_base = VirtAddr::new((entry.addr() & !7) + 0x100);
    let mut watch_ids = Vec::new();
    for slot in 0..3u64 {
        let id = process
            .create_watchpoint(watch_base + slot * 8, StoppointMode::Write, 8)?
            .id();
        process.enable_watchpoint(id)?;
        watch_ids.push(id);
    }

    // all four debug registers are now claimed
    let overflow = process
        .create_watchpoint(watch_base + 0x40, StoppointMode::ReadWrite, 4)?
        .id();
    assert!(matches!(
        process.enable_watchpoint(overflow),
        Err(LdbgError::OutOfDebugRegisters)
    ));

    // releasing any slot makes room again
    process.remove_breakpoint_site_by_id(bp)?;
    process.enable_watchpoint(overflow)?;

    process.disable_watchpoint(overflow)?;
    for id in watch_ids {
        process.remove_watchpoint_by_id(id)?;
    }
    Ok(())
}

#[test]
fn execute_watchpoint_resolves_as_a_watchpoint_hit() -> Result<()> {
    init_logger();
    let devnull = fs::File::options().write(true).open("/dev/null")?;
    let mut process = Process::launch_with("yes", true, Some(devnull.as_raw_fd()))?;
    let entry = entry_point(&process);

    let id = process
        .create_watchpoint(entry, StoppointMode::Execute, 1)?
        .id();
    process.enable_watchpoint(id)?;

    process.resume()?;
    let reason = process.wait_on_signal()?;
    assert_eq!(reason.reason, ProcessState::Stopped);
    assert_eq!(reason.info, libc::SIGTRAP as u8);
    assert_eq!(reason.trap, Some(TrapType::HardwareBreakpoint));
    assert_eq!(process.pc(), entry);
    assert_eq!(
        process.current_hardware_stoppoint()?,
        StoppointHit::Watchpoint(id)
    );

    let watchpoint = process.watchpoints().get_by_id(id)?;
    assert_eq!(watchpoint.previous_data(), 0);
    assert_ne!(watchpoint.data(), 0);
    Ok(())
}

#[test]
fn catching_all_syscalls_pairs_entries_and_exits() -> Result<()> {
    init_logger();
    let channel = Pipe::new(false)?;
    let mut process = Process::launch_with("echo", true, Some(channel.write_fd()))?;
    process.set_syscall_catch_policy(SyscallCatchPolicy::All);

    process.resume()?;
    let entry_stop = process.wait_on_signal()?;
    assert_eq!(entry_stop.trap, Some(TrapType::Syscall));
    let entry_info = entry_stop.syscall.expect("syscall info");
    assert!(entry_info.is_entry());

    process.resume()?;
    let exit_stop = process.wait_on_signal()?;
    assert_eq!(exit_stop.trap, Some(TrapType::Syscall));
    let exit_info = exit_stop.syscall.expect("syscall info");
    assert!(!exit_info.is_entry());
    assert_eq!(exit_info.id, entry_info.id);
    Ok(())
}

#[test]
fn catching_some_syscalls_skips_the_rest() -> Result<()> {
    init_logger();
    let channel = Pipe::new(false)?;
    let mut process = Process::launch_with("echo", true, Some(channel.write_fd()))?;

    let write_id = syscall_name_to_id("write")?;
    process.set_syscall_catch_policy(SyscallCatchPolicy::Some(vec![write_id]));

    process.resume()?;
    let entry_stop = process.wait_on_signal()?;
    let entry_info = entry_stop.syscall.expect("syscall info");
    assert_eq!(entry_stop.trap, Some(TrapType::Syscall));
    assert_eq!(entry_info.id, write_id);
    assert!(entry_info.is_entry());
    match entry_info.data {
        SyscallData::Entry { args } => assert_eq!(args[0], libc::STDOUT_FILENO as u64),
        SyscallData::Exit { .. } => panic!("expected an entry stop"),
    }

    process.resume()?;
    let exit_stop = process.wait_on_signal()?;
    let exit_info = exit_stop.syscall.expect("syscall info");
    assert_eq!(exit_info.id, write_id);
    assert!(!exit_info.is_entry());

    process.set_syscall_catch_policy(SyscallCatchPolicy::None);
    process.resume()?;
    let reason = process.wait_on_signal()?;
    assert_eq!(reason.reason, ProcessState::Exited);
    assert_eq!(channel.read()?, b"\n");
    Ok(())
}

#[test]
fn launch_without_debug_does_not_trace() -> Result<()> {
    init_logger();
    let devnull = fs::File::options().write(true).open("/dev/null")?;
    let process = Process::launch_with("yes", false, Some(devnull.as_raw_fd()))?;
    // no tracer: the target is running or sleeping, not trace-stopped
    let status = process_status(process.pid());
    assert!(status != 't', "status {status}");
    Ok(())
}

#[test]
fn launch_rejects_paths_with_interior_nul() {
    init_logger();
    let path = Path::new("bad\0path");
    assert!(Process::launch(path).is_err());
}
