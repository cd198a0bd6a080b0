//! Global loader state
//!
//! The loader passes its [`Firmware`] context explicitly wherever it can.
//! Callbacks the firmware invokes on its own (the unload function stored in a
//! loaded-image record, the initrd LoadFile2 service) have no such argument,
//! so the context is also published here for the duration of a boot attempt.
//!
//! # Thread Safety
//!
//! The loader is single-threaded and Boot Services are not reentrant; the
//! mutex only makes the global sound to share.

use spin::Mutex;

use crate::efi::Firmware;

static FIRMWARE: Mutex<Option<&'static dyn Firmware>> = Mutex::new(None);

/// Publish the firmware context
///
/// Replaces any previously published context.
pub fn init(firmware: &'static dyn Firmware) {
    *FIRMWARE.lock() = Some(firmware);
}

/// Withdraw the firmware context
pub fn teardown() {
    *FIRMWARE.lock() = None;
}

/// The published firmware context
#[inline]
pub fn firmware() -> Option<&'static dyn Firmware> {
    *FIRMWARE.lock()
}
