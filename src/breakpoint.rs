//! Software (int3) and hardware (debug-register) instruction breakpoints.

use crate::address::VirtAddr;
use crate::error::{LdbgError, LdbgResult};
use crate::ptrace;
use crate::stoppoint::{StopCtx, StopPoint, StoppointMode};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicI32, Ordering};

/// The one-byte x86 trap instruction software breakpoints patch in.
pub const BP_INSN: u8 = 0xcc;

/// Id for internal sites the core plants for its own purposes.
pub const INTERNAL_ID: i32 = -1;

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

fn next_id() -> i32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A breakpoint site: one concrete trap location in the inferior.
///
/// Software sites patch the instruction byte at the address; hardware
/// sites claim one of the four debug-register slots with an execute
/// condition. Sites must be disabled before they are dropped, which their
/// collection guarantees on removal.
#[derive(Debug)]
pub struct BreakpointSite {
    id: i32,
    pid: Pid,
    address: VirtAddr,
    is_enabled: bool,
    is_hardware: bool,
    is_internal: bool,
    saved_byte: u8,
    slot: i32,
}

impl BreakpointSite {
    pub(crate) fn new(pid: Pid, address: VirtAddr, hardware: bool, internal: bool) -> Self {
        BreakpointSite {
            id: if internal { INTERNAL_ID } else { next_id() },
            pid,
            address,
            is_enabled: false,
            is_hardware: hardware,
            is_internal: internal,
            saved_byte: 0,
            slot: -1,
        }
    }

    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[inline]
    pub fn address(&self) -> VirtAddr {
        self.address
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    #[inline]
    pub fn is_hardware(&self) -> bool {
        self.is_hardware
    }

    #[inline]
    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    /// The original low byte at the address, valid while an enabled
    /// software site hides it behind the trap instruction.
    #[inline]
    pub fn saved_byte(&self) -> u8 {
        self.saved_byte
    }

    /// The claimed debug-register slot, or -1 for software sites and
    /// disabled hardware sites.
    #[inline]
    pub fn hardware_slot(&self) -> i32 {
        self.slot
    }

    /// Arm the site. Enabling an enabled site is a no-op.
    pub fn enable(&mut self, ctx: &mut StopCtx) -> LdbgResult<()> {
        if self.is_enabled {
            return Ok(());
        }

        if self.is_hardware {
            self.slot = ctx
                .regs
                .set_hardware_stoppoint(ctx.pid, self.address, StoppointMode::Execute, 1)?
                as i32;
        } else {
            let data = ptrace::peekdata(self.pid, self.address.addr())
                .map_err(|e| LdbgError::errno("Enabling breakpoint site failed", e))?;
            self.saved_byte = (data & 0xff) as u8;
            let patched = (data & !0xff) | u64::from(BP_INSN);
            ptrace::pokedata(self.pid, self.address.addr(), patched)
                .map_err(|e| LdbgError::errno("Enabling breakpoint site failed", e))?;
        }

        self.is_enabled = true;
        Ok(())
    }

    /// Disarm the site, restoring the original byte or releasing the
    /// debug-register slot. Disabling a disabled site is a no-op.
    pub fn disable(&mut self, ctx: &mut StopCtx) -> LdbgResult<()> {
        if !self.is_enabled {
            return Ok(());
        }

        if self.is_hardware {
            ctx.regs.clear_hardware_stoppoint(ctx.pid, self.slot as usize)?;
            self.slot = -1;
        } else {
            let data = ptrace::peekdata(self.pid, self.address.addr())
                .map_err(|e| LdbgError::errno("Disabling breakpoint site failed", e))?;
            let restored = (data & !0xff) | u64::from(self.saved_byte);
            ptrace::pokedata(self.pid, self.address.addr(), restored)
                .map_err(|e| LdbgError::errno("Disabling breakpoint site failed", e))?;
        }

        self.is_enabled = false;
        Ok(())
    }
}

impl StopPoint for BreakpointSite {
    fn id(&self) -> i32 {
        self.id
    }

    fn address(&self) -> VirtAddr {
        self.address
    }

    fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    fn disable(&mut self, ctx: &mut StopCtx) -> LdbgResult<()> {
        BreakpointSite::disable(self, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_site_ids_are_positive_and_increasing() {
        let pid = Pid::from_raw(0);
        let a = BreakpointSite::new(pid, VirtAddr::new(0x1000), false, false);
        let b = BreakpointSite::new(pid, VirtAddr::new(0x2000), false, false);
        assert!(a.id() > 0);
        assert!(b.id() > a.id());
    }

    #[test]
    fn internal_sites_share_the_sentinel_id() {
        let pid = Pid::from_raw(0);
        let a = BreakpointSite::new(pid, VirtAddr::new(0x1000), false, true);
        let b = BreakpointSite::new(pid, VirtAddr::new(0x2000), true, true);
        assert_eq!(a.id(), INTERNAL_ID);
        assert_eq!(b.id(), INTERNAL_ID);
        assert_eq!(b.hardware_slot(), -1);
    }
}
