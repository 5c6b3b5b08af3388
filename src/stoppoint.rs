//! Generic stop-point storage shared by breakpoint sites and watchpoints.

use crate::address::VirtAddr;
use crate::error::{LdbgError, LdbgResult};
use crate::register::RegisterFile;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

/// Hardware stop-point trigger condition, as encoded into dr7.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoppointMode {
    Write,
    ReadWrite,
    Execute,
}

/// Context handed to stop-points for operations that touch the inferior:
/// the pid plus the register file that owns the debug-register slots.
///
/// Built by the controller from disjoint fields of the process, so a
/// stop-point borrowed out of a collection can still be enabled or
/// disabled.
pub struct StopCtx<'a> {
    pub pid: Pid,
    pub regs: &'a mut RegisterFile,
}

/// Capability set every stop-point exposes to its collection.
pub trait StopPoint {
    fn id(&self) -> i32;
    fn address(&self) -> VirtAddr;
    fn is_enabled(&self) -> bool;

    fn at_address(&self, address: VirtAddr) -> bool {
        self.address() == address
    }

    fn in_range(&self, low: VirtAddr, high: VirtAddr) -> bool {
        low <= self.address() && self.address() < high
    }

    fn disable(&mut self, ctx: &mut StopCtx) -> LdbgResult<()>;
}

/// Insertion-ordered container of stop-points, unique by id and by address.
#[derive(Debug)]
pub struct StoppointCollection<T> {
    points: Vec<T>,
}

impl<T> Default for StoppointCollection<T> {
    fn default() -> Self {
        StoppointCollection { points: Vec::new() }
    }
}

impl<T: StopPoint> StoppointCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a stop-point. The reference stays valid until the
    /// point is removed.
    pub fn push(&mut self, point: T) -> &mut T {
        self.points.push(point);
        self.points.last_mut().unwrap()
    }

    pub fn contains_id(&self, id: i32) -> bool {
        self.points.iter().any(|p| p.id() == id)
    }

    pub fn contains_address(&self, address: VirtAddr) -> bool {
        self.points.iter().any(|p| p.at_address(address))
    }

    pub fn enabled_stoppoint_at_address(&self, address: VirtAddr) -> bool {
        self.points
            .iter()
            .any(|p| p.at_address(address) && p.is_enabled())
    }

    pub fn get_by_id(&self, id: i32) -> LdbgResult<&T> {
        self.points
            .iter()
            .find(|p| p.id() == id)
            .ok_or_else(|| LdbgError::usage(format!("invalid stop-point id: {id}")))
    }

    pub fn get_by_id_mut(&mut self, id: i32) -> LdbgResult<&mut T> {
        self.points
            .iter_mut()
            .find(|p| p.id() == id)
            .ok_or_else(|| LdbgError::usage(format!("invalid stop-point id: {id}")))
    }

    pub fn get_by_address(&self, address: VirtAddr) -> LdbgResult<&T> {
        self.points
            .iter()
            .find(|p| p.at_address(address))
            .ok_or_else(|| LdbgError::usage(format!("no stop-point at address {address}")))
    }

    pub fn get_by_address_mut(&mut self, address: VirtAddr) -> LdbgResult<&mut T> {
        self.points
            .iter_mut()
            .find(|p| p.at_address(address))
            .ok_or_else(|| LdbgError::usage(format!("no stop-point at address {address}")))
    }

    /// Stop-points with `low <= address < high`, in insertion order.
    pub fn get_in_range(&self, low: VirtAddr, high: VirtAddr) -> Vec<&T> {
        self.points.iter().filter(|p| p.in_range(low, high)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.points.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.points.iter_mut()
    }

    /// Remove a stop-point, disabling it first so no hardware or patched
    /// byte outlives the entry.
    pub fn remove_by_id(&mut self, id: i32, ctx: &mut StopCtx) -> LdbgResult<()> {
        let index = self
            .points
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| LdbgError::usage(format!("invalid stop-point id: {id}")))?;
        self.points[index].disable(ctx)?;
        self.points.remove(index);
        Ok(())
    }

    pub fn remove_by_address(&mut self, address: VirtAddr, ctx: &mut StopCtx) -> LdbgResult<()> {
        let index = self
            .points
            .iter()
            .position(|p| p.at_address(address))
            .ok_or_else(|| LdbgError::usage(format!("no stop-point at address {address}")))?;
        self.points[index].disable(ctx)?;
        self.points.remove(index);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterFile;

    struct TestPoint {
        id: i32,
        address: VirtAddr,
        enabled: bool,
    }

    impl StopPoint for TestPoint {
        fn id(&self) -> i32 {
            self.id
        }
        fn address(&self) -> VirtAddr {
            self.address
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        fn disable(&mut self, _ctx: &mut StopCtx) -> LdbgResult<()> {
            self.enabled = false;
            Ok(())
        }
    }

    fn point(id: i32, addr: u64, enabled: bool) -> TestPoint {
        TestPoint {
            id,
            address: VirtAddr::new(addr),
            enabled,
        }
    }

    #[test]
    fn lookup_by_id_and_address() {
        let mut c = StoppointCollection::new();
        c.push(point(1, 0x1000, false));
        c.push(point(2, 0x2000, true));

        assert!(c.contains_id(1));
        assert!(!c.contains_id(3));
        assert!(c.contains_address(VirtAddr::new(0x2000)));
        assert!(c.enabled_stoppoint_at_address(VirtAddr::new(0x2000)));
        assert!(!c.enabled_stoppoint_at_address(VirtAddr::new(0x1000)));
        assert_eq!(c.get_by_address(VirtAddr::new(0x1000)).unwrap().id(), 1);
        assert!(c.get_by_id(7).is_err());
        assert!(c.get_by_address(VirtAddr::new(0x3000)).is_err());
    }

    #[test]
    fn range_query_preserves_insertion_order() {
        let mut c = StoppointCollection::new();
        c.push(point(1, 0x1008, false));
        c.push(point(2, 0x1000, false));
        c.push(point(3, 0x2000, false));

        let hits = c.get_in_range(VirtAddr::new(0x1000), VirtAddr::new(0x1010));
        assert_eq!(hits.iter().map(|p| p.id()).collect::<Vec<_>>(), [1, 2]);
        // the range is half-open
        assert!(c
            .get_in_range(VirtAddr::new(0x1000), VirtAddr::new(0x2000))
            .iter()
            .all(|p| p.id() != 3));
    }

    #[test]
    fn removal_disables_first() {
        let mut regs = RegisterFile::new();
        let mut ctx = StopCtx {
            pid: nix::unistd::Pid::from_raw(0),
            regs: &mut regs,
        };
        let mut c = StoppointCollection::new();
        c.push(point(1, 0x1000, true));
        c.remove_by_id(1, &mut ctx).unwrap();
        assert!(c.is_empty());
        assert!(c.remove_by_address(VirtAddr::new(0x1000), &mut ctx).is_err());
    }
}
