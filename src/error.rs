//! Error types for ldbg and helpers for kernel error codes

use nix::errno::Errno;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LdbgError {
    /// Caller misuse: invalid pid, unaligned watchpoint, duplicate
    /// breakpoint address, unknown register or syscall name.
    #[error("{0}")]
    Usage(String),
    /// A kernel request failed; the message carries the errno text.
    #[error("{0}")]
    Kernel(String),
    #[error("no remaining hardware debug registers")]
    OutOfDebugRegisters,
    /// Malformed integer, float, or byte-vector literal from the front-end.
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Elf(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LdbgResult<T> = std::result::Result<T, LdbgError>;

impl LdbgError {
    #[inline]
    pub fn usage(msg: impl Into<String>) -> Self {
        LdbgError::Usage(msg.into())
    }

    /// A failed kernel request, rendered like `perror`.
    pub fn errno(context: impl Into<String>, err: Errno) -> Self {
        LdbgError::Kernel(format!("{}: {}", context.into(), err.desc()))
    }
}

impl From<&str> for LdbgError {
    fn from(s: &str) -> Self {
        LdbgError::Usage(s.to_string())
    }
}

impl From<String> for LdbgError {
    fn from(s: String) -> Self {
        LdbgError::Usage(s)
    }
}
