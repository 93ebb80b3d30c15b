//! # Kernel error numbers
//!
//! The values the system-call and trap layers hand back to user space.

/// Out of memory.
pub const ENOMEM: i32 = 3;

/// Bad memory reference.
pub const EFAULT: i32 = 6;

/// Invalid argument.
pub const EINVAL: i32 = 8;
