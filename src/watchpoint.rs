//! Hardware data watchpoints with value-change tracking.

use crate::address::VirtAddr;
use crate::error::{LdbgError, LdbgResult};
use crate::memory;
use crate::stoppoint::{StopCtx, StopPoint, StoppointMode};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicI32, Ordering};

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

/// A hardware watchpoint over `size` bytes at a naturally aligned address.
///
/// On every stop the controller attributes to this watchpoint, the current
/// word shifts into `previous_data` and the watched bytes are re-read, so
/// a front-end can render old and new values side by side.
#[derive(Debug)]
pub struct Watchpoint {
    id: i32,
    pid: Pid,
    address: VirtAddr,
    mode: StoppointMode,
    size: usize,
    is_enabled: bool,
    slot: i32,
    data: u64,
    previous_data: u64,
}

impl Watchpoint {
    pub(crate) fn new(
        pid: Pid,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> LdbgResult<Self> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(LdbgError::usage(format!(
                "invalid watchpoint size: {size}"
            )));
        }
        // x86 requires watched addresses to fall on a multiple of their size
        if address.addr() & (size as u64 - 1) != 0 {
            return Err(LdbgError::usage(
                "watchpoints must be aligned to their size",
            ));
        }

        Ok(Watchpoint {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            pid,
            address,
            mode,
            size,
            is_enabled: false,
            slot: -1,
            data: 0,
            previous_data: 0,
        })
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
    pub fn mode(&self) -> StoppointMode {
        self.mode
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    #[inline]
    pub fn hardware_slot(&self) -> i32 {
        self.slot
    }

    /// The watched word as of the most recent update.
    #[inline]
    pub fn data(&self) -> u64 {
        self.data
    }

    /// The watched word one update before [`Watchpoint::data`].
    #[inline]
    pub fn previous_data(&self) -> u64 {
        self.previous_data
    }

    pub fn enable(&mut self, ctx: &mut StopCtx) -> LdbgResult<()> {
        if self.is_enabled {
            return Ok(());
        }
        self.slot =
            ctx.regs
                .set_hardware_stoppoint(ctx.pid, self.address, self.mode, self.size)? as i32;
        self.is_enabled = true;
        Ok(())
    }

    pub fn disable(&mut self, ctx: &mut StopCtx) -> LdbgResult<()> {
        if !self.is_enabled {
            return Ok(());
        }
        ctx.regs.clear_hardware_stoppoint(ctx.pid, self.slot as usize)?;
        self.slot = -1;
        self.is_enabled = false;
        Ok(())
    }

    /// Shift the current value into the previous slot and re-read the
    /// watched bytes.
    pub(crate) fn update_data(&mut self) -> LdbgResult<()> {
        let bytes = memory::read_process_memory(self.pid, self.address, self.size)?;
        let mut word = [0u8; 8];
        word[..self.size].copy_from_slice(&bytes);
        self.previous_data = self.data;
        self.data = u64::from_le_bytes(word);
        Ok(())
    }
}

impl StopPoint for Watchpoint {
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
        Watchpoint::disable(self, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_validates_size_and_alignment() {
        let pid = Pid::from_raw(0);
        assert!(Watchpoint::new(pid, VirtAddr::new(0x1000), StoppointMode::Write, 8).is_ok());
        assert!(Watchpoint::new(pid, VirtAddr::new(0x1001), StoppointMode::Write, 1).is_ok());
        // 3 is not a legal watch width
        assert!(Watchpoint::new(pid, VirtAddr::new(0x1000), StoppointMode::Write, 3).is_err());
        // 0x1004 is 4-aligned but not 8-aligned
        assert!(Watchpoint::new(pid, VirtAddr::new(0x1004), StoppointMode::ReadWrite, 8).is_err());
        assert!(Watchpoint::new(pid, VirtAddr::new(0x1004), StoppointMode::ReadWrite, 4).is_ok());
    }

    #[test]
    fn fresh_watchpoints_start_with_zeroed_data() {
        let wp =
            Watchpoint::new(Pid::from_raw(0), VirtAddr::new(0x2000), StoppointMode::Write, 4)
                .unwrap();
        assert_eq!(wp.data(), 0);
        assert_eq!(wp.previous_data(), 0);
        assert_eq!(wp.hardware_slot(), -1);
        assert!(!wp.is_enabled());
    }
}
