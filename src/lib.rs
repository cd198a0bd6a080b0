//! zloader - a UEFI loader for compressed kernels
//!
//! This library locates a (possibly compressed) kernel or EFI executable,
//! decompresses it into memory, relocates it as a PE32/PE32+ image into
//! freshly allocated pages, registers it as a loaded image and starts it.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]
#![allow(clippy::result_unit_err)]

extern crate alloc;

pub mod boot;
pub mod buffer;
pub mod config;
pub mod decompress;
pub mod efi;
#[cfg(target_os = "uefi")]
pub mod heap;
pub mod image;
pub mod initrd;
pub mod logger;
pub mod pe;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

/// Name reported in log output and the loaded image record
pub const LOADER_NAME: &str = "zloader";

/// Loader version
pub const LOADER_VERSION: &str = env!("CARGO_PKG_VERSION");
