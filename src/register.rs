//! The register file: typed read/write access over the kernel user area.
//!
//! The register table is process-wide and immutable. Offsets index into
//! `libc::user`, the same layout `PTRACE_PEEKUSER`/`PTRACE_POKEUSER`
//! address, so a write can always be flushed as the aligned word that
//! contains the changed bytes. The x87 area is the exception: the kernel
//! refuses single-word access there, so floating-point writes push the
//! whole area back with `PTRACE_SETFPREGS`.

use crate::address::VirtAddr;
use crate::error::{LdbgError, LdbgResult};
use crate::ptrace;
use crate::stoppoint::StoppointMode;
use memoffset::offset_of;
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use std::mem::size_of;
use std::slice;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterType {
    Gpr,
    SubGpr,
    Fpr,
    Dr,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterFormat {
    Uint,
    DoubleFloat,
    LongDouble,
    Vector,
}

#[derive(Debug, Copy, Clone)]
pub struct RegisterInfo {
    pub id: RegisterId,
    pub name: &'static str,
    pub dwarf_id: i32,
    pub size: usize,
    pub offset: usize,
    pub reg_type: RegisterType,
    pub format: RegisterFormat,
}

macro_rules! gpr_offset {
    ($field:ident) => {
        offset_of!(libc::user, regs) + offset_of!(libc::user_regs_struct, $field)
    };
}

macro_rules! fpr_offset {
    ($field:ident) => {
        offset_of!(libc::user, i387) + offset_of!(libc::user_fpregs_struct, $field)
    };
}

fn st_offset(index: usize) -> usize {
    fpr_offset!(st_space) + index * 16
}

fn xmm_offset(index: usize) -> usize {
    fpr_offset!(xmm_space) + index * 16
}

fn dr_offset(index: usize) -> usize {
    offset_of!(libc::user, u_debugreg) + index * 8
}

macro_rules! register_table {
    ($($name:ident => $dwarf:expr, $size:expr, $offset:expr, $ty:ident, $fmt:ident;)*) => {
        /// Closed enumeration of every x86-64 register the core exposes.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        #[repr(usize)]
        pub enum RegisterId {
            $($name,)*
        }

        /// Information for every register in the system, in [`RegisterId`]
        /// declaration order.
        pub static REGISTER_INFOS: Lazy<Vec<RegisterInfo>> = Lazy::new(|| {
            vec![
                $(RegisterInfo {
                    id: RegisterId::$name,
                    name: stringify!($name),
                    dwarf_id: $dwarf,
                    size: $size,
                    offset: $offset,
                    reg_type: RegisterType::$ty,
                    format: RegisterFormat::$fmt,
                },)*
            ]
        });
    };
}

register_table! {
    // 64-bit general purpose
    rax => 0, 8, gpr_offset!(rax), Gpr, Uint;
    rdx => 1, 8, gpr_offset!(rdx), Gpr, Uint;
    rcx => 2, 8, gpr_offset!(rcx), Gpr, Uint;
    rbx => 3, 8, gpr_offset!(rbx), Gpr, Uint;
    rsi => 4, 8, gpr_offset!(rsi), Gpr, Uint;
    rdi => 5, 8, gpr_offset!(rdi), Gpr, Uint;
    rbp => 6, 8, gpr_offset!(rbp), Gpr, Uint;
    rsp => 7, 8, gpr_offset!(rsp), Gpr, Uint;
    r8 => 8, 8, gpr_offset!(r8), Gpr, Uint;
    r9 => 9, 8, gpr_offset!(r9), Gpr, Uint;
    r10 => 10, 8, gpr_offset!(r10), Gpr, Uint;
    r11 => 11, 8, gpr_offset!(r11), Gpr, Uint;
    r12 => 12, 8, gpr_offset!(r12), Gpr, Uint;
    r13 => 13, 8, gpr_offset!(r13), Gpr, Uint;
    r14 => 14, 8, gpr_offset!(r14), Gpr, Uint;
    r15 => 15, 8, gpr_offset!(r15), Gpr, Uint;
    rip => 16, 8, gpr_offset!(rip), Gpr, Uint;
    rflags => 49, 8, gpr_offset!(eflags), Gpr, Uint;
    cs => 51, 8, gpr_offset!(cs), Gpr, Uint;
    fs => 54, 8, gpr_offset!(fs), Gpr, Uint;
    gs => 55, 8, gpr_offset!(gs), Gpr, Uint;
    ss => 52, 8, gpr_offset!(ss), Gpr, Uint;
    ds => 53, 8, gpr_offset!(ds), Gpr, Uint;
    es => 50, 8, gpr_offset!(es), Gpr, Uint;
    fs_base => 58, 8, gpr_offset!(fs_base), Gpr, Uint;
    gs_base => 59, 8, gpr_offset!(gs_base), Gpr, Uint;
    orig_rax => -1, 8, gpr_offset!(orig_rax), Gpr, Uint;

    // 32-bit sub-registers
    eax => -1, 4, gpr_offset!(rax), SubGpr, Uint;
    edx => -1, 4, gpr_offset!(rdx), SubGpr, Uint;
    ecx => -1, 4, gpr_offset!(rcx), SubGpr, Uint;
    ebx => -1, 4, gpr_offset!(rbx), SubGpr, Uint;
    esi => -1, 4, gpr_offset!(rsi), SubGpr, Uint;
    edi => -1, 4, gpr_offset!(rdi), SubGpr, Uint;
    ebp => -1, 4, gpr_offset!(rbp), SubGpr, Uint;
    esp => -1, 4, gpr_offset!(rsp), SubGpr, Uint;
    r8d => -1, 4, gpr_offset!(r8), SubGpr, Uint;
    r9d => -1, 4, gpr_offset!(r9), SubGpr, Uint;
    r10d => -1, 4, gpr_offset!(r10), SubGpr, Uint;
    r11d => -1, 4, gpr_offset!(r11), SubGpr, Uint;
    r12d => -1, 4, gpr_offset!(r12), SubGpr, Uint;
    r13d => -1, 4, gpr_offset!(r13), SubGpr, Uint;
    r14d => -1, 4, gpr_offset!(r14), SubGpr, Uint;
    r15d => -1, 4, gpr_offset!(r15), SubGpr, Uint;

    // 16-bit sub-registers
    ax => -1, 2, gpr_offset!(rax), SubGpr, Uint;
    dx => -1, 2, gpr_offset!(rdx), SubGpr, Uint;
    cx => -1, 2, gpr_offset!(rcx), SubGpr, Uint;
    bx => -1, 2, gpr_offset!(rbx), SubGpr, Uint;
    si => -1, 2, gpr_offset!(rsi), SubGpr, Uint;
    di => -1, 2, gpr_offset!(rdi), SubGpr, Uint;
    bp => -1, 2, gpr_offset!(rbp), SubGpr, Uint;
    sp => -1, 2, gpr_offset!(rsp), SubGpr, Uint;
    r8w => -1, 2, gpr_offset!(r8), SubGpr, Uint;
    r9w => -1, 2, gpr_offset!(r9), SubGpr, Uint;
    r10w => -1, 2, gpr_offset!(r10), SubGpr, Uint;
    r11w => -1, 2, gpr_offset!(r11), SubGpr, Uint;
    r12w => -1, 2, gpr_offset!(r12), SubGpr, Uint;
    r13w => -1, 2, gpr_offset!(r13), SubGpr, Uint;
    r14w => -1, 2, gpr_offset!(r14), SubGpr, Uint;
    r15w => -1, 2, gpr_offset!(r15), SubGpr, Uint;

    // 8-bit high sub-registers
    ah => -1, 1, gpr_offset!(rax) + 1, SubGpr, Uint;
    dh => -1, 1, gpr_offset!(rdx) + 1, SubGpr, Uint;
    ch => -1, 1, gpr_offset!(rcx) + 1, SubGpr, Uint;
    bh => -1, 1, gpr_offset!(rbx) + 1, SubGpr, Uint;

    // 8-bit low sub-registers
    al => -1, 1, gpr_offset!(rax), SubGpr, Uint;
    dl => -1, 1, gpr_offset!(rdx), SubGpr, Uint;
    cl => -1, 1, gpr_offset!(rcx), SubGpr, Uint;
    bl => -1, 1, gpr_offset!(rbx), SubGpr, Uint;
    sil => -1, 1, gpr_offset!(rsi), SubGpr, Uint;
    dil => -1, 1, gpr_offset!(rdi), SubGpr, Uint;
    bpl => -1, 1, gpr_offset!(rbp), SubGpr, Uint;
    spl => -1, 1, gpr_offset!(rsp), SubGpr, Uint;
    r8b => -1, 1, gpr_offset!(r8), SubGpr, Uint;
    r9b => -1, 1, gpr_offset!(r9), SubGpr, Uint;
    r10b => -1, 1, gpr_offset!(r10), SubGpr, Uint;
    r11b => -1, 1, gpr_offset!(r11), SubGpr, Uint;
    r12b => -1, 1, gpr_offset!(r12), SubGpr, Uint;
    r13b => -1, 1, gpr_offset!(r13), SubGpr, Uint;
    r14b => -1, 1, gpr_offset!(r14), SubGpr, Uint;
    r15b => -1, 1, gpr_offset!(r15), SubGpr, Uint;

    // x87 control and status
    fcw => 65, 2, fpr_offset!(cwd), Fpr, Uint;
    fsw => 66, 2, fpr_offset!(swd), Fpr, Uint;
    ftw => -1, 2, fpr_offset!(ftw), Fpr, Uint;
    fop => -1, 2, fpr_offset!(fop), Fpr, Uint;
    frip => -1, 8, fpr_offset!(rip), Fpr, Uint;
    frdp => -1, 8, fpr_offset!(rdp), Fpr, Uint;
    mxcsr => 64, 4, fpr_offset!(mxcsr), Fpr, Uint;
    mxcsrmask => -1, 4, fpr_offset!(mxcr_mask), Fpr, Uint;

    // x87 stack
    st0 => 33, 16, st_offset(0), Fpr, LongDouble;
    st1 => 34, 16, st_offset(1), Fpr, LongDouble;
    st2 => 35, 16, st_offset(2), Fpr, LongDouble;
    st3 => 36, 16, st_offset(3), Fpr, LongDouble;
    st4 => 37, 16, st_offset(4), Fpr, LongDouble;
    st5 => 38, 16, st_offset(5), Fpr, LongDouble;
    st6 => 39, 16, st_offset(6), Fpr, LongDouble;
    st7 => 40, 16, st_offset(7), Fpr, LongDouble;

    // MMX, aliased onto the x87 stack with a 16-byte stride
    mm0 => 41, 8, st_offset(0), Fpr, Vector;
    mm1 => 42, 8, st_offset(1), Fpr, Vector;
    mm2 => 43, 8, st_offset(2), Fpr, Vector;
    mm3 => 44, 8, st_offset(3), Fpr, Vector;
    mm4 => 45, 8, st_offset(4), Fpr, Vector;
    mm5 => 46, 8, st_offset(5), Fpr, Vector;
    mm6 => 47, 8, st_offset(6), Fpr, Vector;
    mm7 => 48, 8, st_offset(7), Fpr, Vector;

    // SSE
    xmm0 => 17, 16, xmm_offset(0), Fpr, Vector;
    xmm1 => 18, 16, xmm_offset(1), Fpr, Vector;
    xmm2 => 19, 16, xmm_offset(2), Fpr, Vector;
    xmm3 => 20, 16, xmm_offset(3), Fpr, Vector;
    xmm4 => 21, 16, xmm_offset(4), Fpr, Vector;
    xmm5 => 22, 16, xmm_offset(5), Fpr, Vector;
    xmm6 => 23, 16, xmm_offset(6), Fpr, Vector;
    xmm7 => 24, 16, xmm_offset(7), Fpr, Vector;
    xmm8 => 25, 16, xmm_offset(8), Fpr, Vector;
    xmm9 => 26, 16, xmm_offset(9), Fpr, Vector;
    xmm10 => 27, 16, xmm_offset(10), Fpr, Vector;
    xmm11 => 28, 16, xmm_offset(11), Fpr, Vector;
    xmm12 => 29, 16, xmm_offset(12), Fpr, Vector;
    xmm13 => 30, 16, xmm_offset(13), Fpr, Vector;
    xmm14 => 31, 16, xmm_offset(14), Fpr, Vector;
    xmm15 => 32, 16, xmm_offset(15), Fpr, Vector;

    // debug registers
    dr0 => -1, 8, dr_offset(0), Dr, Uint;
    dr1 => -1, 8, dr_offset(1), Dr, Uint;
    dr2 => -1, 8, dr_offset(2), Dr, Uint;
    dr3 => -1, 8, dr_offset(3), Dr, Uint;
    dr4 => -1, 8, dr_offset(4), Dr, Uint;
    dr5 => -1, 8, dr_offset(5), Dr, Uint;
    dr6 => -1, 8, dr_offset(6), Dr, Uint;
    dr7 => -1, 8, dr_offset(7), Dr, Uint;
}

/// Look up the table entry for `id`. Infallible: the table is total over
/// [`RegisterId`] by construction.
pub fn register_info_by_id(id: RegisterId) -> &'static RegisterInfo {
    let info = &REGISTER_INFOS[id as usize];
    debug_assert_eq!(info.id, id);
    info
}

pub fn register_info_by_name(name: &str) -> LdbgResult<&'static RegisterInfo> {
    REGISTER_INFOS
        .iter()
        .find(|info| info.name == name)
        .ok_or_else(|| LdbgError::usage(format!("no such register: {name}")))
}

pub fn register_info_by_dwarf(dwarf_id: i32) -> LdbgResult<&'static RegisterInfo> {
    REGISTER_INFOS
        .iter()
        .find(|info| info.dwarf_id == dwarf_id)
        .ok_or_else(|| LdbgError::usage(format!("no register with DWARF id {dwarf_id}")))
}

/// The address slot register for a hardware stop-point slot.
pub(crate) fn dr_register_id(slot: usize) -> RegisterId {
    match slot {
        0 => RegisterId::dr0,
        1 => RegisterId::dr1,
        2 => RegisterId::dr2,
        3 => RegisterId::dr3,
        4 => RegisterId::dr4,
        5 => RegisterId::dr5,
        6 => RegisterId::dr6,
        _ => RegisterId::dr7,
    }
}

/// A register value tagged with its runtime type.
///
/// x87 stack registers have no native Rust representation; they read back
/// as [`RegValue::Bytes16`] holding the raw 80-bit extended value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RegValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes8([u8; 8]),
    Bytes16([u8; 16]),
}

impl RegValue {
    pub fn size(&self) -> usize {
        match self {
            RegValue::U8(_) | RegValue::I8(_) => 1,
            RegValue::U16(_) | RegValue::I16(_) => 2,
            RegValue::U32(_) | RegValue::I32(_) | RegValue::F32(_) => 4,
            RegValue::U64(_) | RegValue::I64(_) | RegValue::F64(_) | RegValue::Bytes8(_) => 8,
            RegValue::Bytes16(_) => 16,
        }
    }

    /// The value as an unsigned integer, if it carries one.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            RegValue::U8(v) => Some(v.into()),
            RegValue::U16(v) => Some(v.into()),
            RegValue::U32(v) => Some(v.into()),
            RegValue::U64(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_reg_value_from {
    ($($ty:ty => $variant:ident;)*) => {
        $(impl From<$ty> for RegValue {
            fn from(v: $ty) -> Self {
                RegValue::$variant(v)
            }
        })*
    };
}

impl_reg_value_from! {
    u8 => U8; u16 => U16; u32 => U32; u64 => U64;
    i8 => I8; i16 => I16; i32 => I32; i64 => I64;
    f32 => F32; f64 => F64;
    [u8; 8] => Bytes8; [u8; 16] => Bytes16;
}

/// Encode an f64 as the 80-bit x87 extended format, little-endian in the
/// low ten bytes of a 16-byte register slot.
fn f64_to_x87_bytes(value: f64) -> [u8; 16] {
    let bits = value.to_bits();
    let sign = (bits >> 63) as u16;
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & 0x000f_ffff_ffff_ffff;

    let (ext_exp, mantissa): (u16, u64) = if exp == 0x7ff {
        // infinity and NaN keep the explicit integer bit set
        (0x7fff, 0x8000_0000_0000_0000 | (frac << 11))
    } else if exp == 0 {
        if frac == 0 {
            (0, 0)
        } else {
            // subnormal doubles normalize in the wider exponent range
            let top = 63 - frac.leading_zeros() as i32;
            let unbiased = top - 1074;
            ((unbiased + 16383) as u16, frac << (63 - top))
        }
    } else {
        let unbiased = exp - 1023;
        (
            (unbiased + 16383) as u16,
            0x8000_0000_0000_0000 | (frac << 11),
        )
    };

    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&mantissa.to_le_bytes());
    out[8..10].copy_from_slice(&((sign << 15) | ext_exp).to_le_bytes());
    out
}

/// Widen `value` to the storage width of `info`, as a 16-byte little-endian
/// buffer of which the low `info.size` bytes are meaningful.
///
/// Floats widen to double or long double according to the register format;
/// signed integers sign-extend into Uint storage; everything else is
/// written verbatim and zero-extended.
fn widen(info: &RegisterInfo, value: RegValue) -> [u8; 16] {
    let mut out = [0u8; 16];
    match value {
        RegValue::F32(v) => match info.format {
            RegisterFormat::DoubleFloat => out[..8].copy_from_slice(&f64::from(v).to_le_bytes()),
            RegisterFormat::LongDouble => out = f64_to_x87_bytes(f64::from(v)),
            _ => out[..4].copy_from_slice(&v.to_le_bytes()),
        },
        RegValue::F64(v) => match info.format {
            RegisterFormat::DoubleFloat => out[..8].copy_from_slice(&v.to_le_bytes()),
            RegisterFormat::LongDouble => out = f64_to_x87_bytes(v),
            _ => out[..8].copy_from_slice(&v.to_le_bytes()),
        },
        RegValue::I8(v) if info.format == RegisterFormat::Uint => {
            sign_extend_into(&mut out, v.into(), info.size)
        }
        RegValue::I16(v) if info.format == RegisterFormat::Uint => {
            sign_extend_into(&mut out, v.into(), info.size)
        }
        RegValue::I32(v) if info.format == RegisterFormat::Uint => {
            sign_extend_into(&mut out, v.into(), info.size)
        }
        RegValue::I64(v) if info.format == RegisterFormat::Uint => {
            sign_extend_into(&mut out, v, info.size)
        }
        RegValue::U8(v) => out[..1].copy_from_slice(&v.to_le_bytes()),
        RegValue::U16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
        RegValue::U32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
        RegValue::U64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
        RegValue::I8(v) => out[..1].copy_from_slice(&v.to_le_bytes()),
        RegValue::I16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
        RegValue::I32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
        RegValue::I64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
        RegValue::Bytes8(v) => out[..8].copy_from_slice(&v),
        RegValue::Bytes16(v) => out = v,
    }
    out
}

fn sign_extend_into(out: &mut [u8; 16], value: i64, size: usize) {
    // the low `size` bytes of the i64 representation are exactly the value
    // sign-extended to the storage width (size is at most 8 for Uint)
    debug_assert!(size <= 8);
    out[..8].copy_from_slice(&value.to_le_bytes());
}

/// Snapshot of the inferior's user area plus the write-back policy.
///
/// After any observed stop, the buffer is a snapshot of the inferior taken
/// at that stop; it is refreshed by the controller before stop reasons are
/// classified.
pub struct RegisterFile {
    user: libc::user,
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile").finish_non_exhaustive()
    }
}

fn user_bytes(user: &libc::user) -> &[u8] {
    unsafe { slice::from_raw_parts(user as *const libc::user as *const u8, size_of::<libc::user>()) }
}

fn user_bytes_mut(user: &mut libc::user) -> &mut [u8] {
    unsafe {
        slice::from_raw_parts_mut(user as *mut libc::user as *mut u8, size_of::<libc::user>())
    }
}

impl RegisterFile {
    pub(crate) fn new() -> Self {
        RegisterFile {
            user: unsafe { std::mem::zeroed() },
        }
    }

    /// Read a register out of the snapshot. The runtime type of the result
    /// follows the register's format and size.
    pub fn read(&self, info: &RegisterInfo) -> RegValue {
        let bytes = &user_bytes(&self.user)[info.offset..info.offset + info.size];
        match info.format {
            RegisterFormat::Uint => match info.size {
                1 => RegValue::U8(bytes[0]),
                2 => RegValue::U16(u16::from_le_bytes(bytes.try_into().unwrap())),
                4 => RegValue::U32(u32::from_le_bytes(bytes.try_into().unwrap())),
                8 => RegValue::U64(u64::from_le_bytes(bytes.try_into().unwrap())),
                _ => unreachable!("unexpected register size"),
            },
            RegisterFormat::DoubleFloat => {
                RegValue::F64(f64::from_le_bytes(bytes[..8].try_into().unwrap()))
            }
            RegisterFormat::LongDouble => RegValue::Bytes16(bytes.try_into().unwrap()),
            RegisterFormat::Vector if info.size == 8 => {
                RegValue::Bytes8(bytes.try_into().unwrap())
            }
            RegisterFormat::Vector => RegValue::Bytes16(bytes.try_into().unwrap()),
        }
    }

    #[inline]
    pub fn read_by_id(&self, id: RegisterId) -> RegValue {
        self.read(register_info_by_id(id))
    }

    /// Read a full-width unsigned register.
    ///
    /// Panics if `id` does not name a Uint register of eight bytes; the
    /// controller only uses it for rip, rax, orig_rax, the syscall argument
    /// registers, and dr0..dr7.
    pub fn read_as_u64(&self, id: RegisterId) -> u64 {
        match self.read_by_id(id) {
            RegValue::U64(v) => v,
            other => panic!("register {id:?} read as {other:?}, expected a u64"),
        }
    }

    /// Update the snapshot without touching the inferior.
    ///
    /// Panics if the value is wider than the register: that is a
    /// programming bug in the caller, not a recoverable condition.
    pub(crate) fn set(&mut self, info: &RegisterInfo, value: RegValue) {
        if value.size() > info.size {
            panic!(
                "register write called with mismatched register and value sizes ({} > {})",
                value.size(),
                info.size
            );
        }
        let wide = widen(info, value);
        user_bytes_mut(&mut self.user)[info.offset..info.offset + info.size]
            .copy_from_slice(&wide[..info.size]);
    }

    /// Write a register: update the snapshot, then push the change to the
    /// kernel. FPR writes replace the whole x87 area; all other writes poke
    /// the aligned user-area word containing the changed bytes.
    pub fn write(&mut self, pid: Pid, info: &RegisterInfo, value: RegValue) -> LdbgResult<()> {
        self.set(info, value);
        if info.reg_type == RegisterType::Fpr {
            ptrace::setfpregs(pid, &self.user.i387)
                .map_err(|e| LdbgError::errno("Could not write FPRs", e))?;
        } else {
            let aligned = info.offset & !0b111;
            let word =
                u64::from_le_bytes(user_bytes(&self.user)[aligned..aligned + 8].try_into().unwrap());
            ptrace::pokeuser(pid, aligned, word)
                .map_err(|e| LdbgError::errno("Could not write to user area", e))?;
        }
        Ok(())
    }

    #[inline]
    pub fn write_by_id(
        &mut self,
        pid: Pid,
        id: RegisterId,
        value: impl Into<RegValue>,
    ) -> LdbgResult<()> {
        self.write(pid, register_info_by_id(id), value.into())
    }

    /// Re-read the whole snapshot from the stopped inferior: bulk fetches
    /// for the GPRs and the x87 area, then dr0..dr7 one word at a time (the
    /// kernel does not expose the debug registers as a block).
    pub(crate) fn read_all(&mut self, pid: Pid) -> LdbgResult<()> {
        self.user.regs = ptrace::getregs(pid)
            .map_err(|e| LdbgError::errno("Could not read GPR registers", e))?;
        self.user.i387 = ptrace::getfpregs(pid)
            .map_err(|e| LdbgError::errno("Could not read FPR registers", e))?;
        for slot in 0..8 {
            self.user.u_debugreg[slot] = ptrace::peekuser(pid, dr_offset(slot))
                .map_err(|e| LdbgError::errno("Could not read debug register", e))?;
        }
        Ok(())
    }

    /// Claim a free hardware stop-point slot and program it. Returns the
    /// slot index.
    pub(crate) fn set_hardware_stoppoint(
        &mut self,
        pid: Pid,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> LdbgResult<usize> {
        let control = self.read_as_u64(RegisterId::dr7);
        let slot = find_free_stoppoint_slot(control)?;

        self.write_by_id(pid, dr_register_id(slot), address.addr())?;

        let mode_flag = encode_hardware_stoppoint_mode(mode);
        let size_flag = encode_hardware_stoppoint_size(size)?;

        let enable_bit = 1u64 << (slot * 2);
        let mode_bits = mode_flag << (slot * 4 + 16);
        let size_bits = size_flag << (slot * 4 + 18);
        let clear_mask = (0b11u64 << (slot * 2)) | (0b1111u64 << (slot * 4 + 16));

        let masked = (control & !clear_mask) | enable_bit | mode_bits | size_bits;
        self.write_by_id(pid, RegisterId::dr7, masked)?;
        Ok(slot)
    }

    /// Release a hardware stop-point slot: zero its address register and
    /// clear its enable bits and condition/length nibble in dr7.
    pub(crate) fn clear_hardware_stoppoint(&mut self, pid: Pid, slot: usize) -> LdbgResult<()> {
        self.write_by_id(pid, dr_register_id(slot), 0u64)?;

        let control = self.read_as_u64(RegisterId::dr7);
        let clear_mask = (0b11u64 << (slot * 2)) | (0b1111u64 << (slot * 4 + 16));
        self.write_by_id(pid, RegisterId::dr7, control & !clear_mask)?;
        Ok(())
    }
}

fn encode_hardware_stoppoint_mode(mode: StoppointMode) -> u64 {
    match mode {
        StoppointMode::Write => 0b01,
        StoppointMode::ReadWrite => 0b11,
        StoppointMode::Execute => 0b00,
    }
}

fn encode_hardware_stoppoint_size(size: usize) -> LdbgResult<u64> {
    match size {
        1 => Ok(0b00),
        2 => Ok(0b01),
        4 => Ok(0b11),
        8 => Ok(0b10),
        _ => Err(LdbgError::usage(format!("invalid stop-point size: {size}"))),
    }
}

/// Scan dr7 for a slot whose two enable bits are clear.
fn find_free_stoppoint_slot(control: u64) -> LdbgResult<usize> {
    for slot in 0..4 {
        if control & (0b11 << (slot * 2)) == 0 {
            return Ok(slot);
        }
    }
    Err(LdbgError::OutOfDebugRegisters)
}
