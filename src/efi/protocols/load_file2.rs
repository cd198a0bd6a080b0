//! EFI Load File 2 Protocol
//!
//! The Linux EFI stub fetches its initrd through a LoadFile2 instance on the
//! initrd media device path. [`serve`] implements the buffer negotiation of
//! EFI_LOAD_FILE2_PROTOCOL.LoadFile for an in-memory file.

use core::ffi::c_void;

use r_efi::efi::{Boolean, Guid, Status};
use r_efi::protocols::device_path::Protocol as DevicePathProtocol;

use super::device_path::is_end_node;

/// EFI_LOAD_FILE2_PROTOCOL_GUID
pub const LOAD_FILE2_PROTOCOL_GUID: Guid = Guid::from_fields(
    0x4006c0c1,
    0xfcb3,
    0x403e,
    0x99,
    0x6d,
    &[0x4a, 0x6c, 0x87, 0x24, 0xe0, 0x6d],
);

pub type LoadFileFn = extern "efiapi" fn(
    *mut Protocol,
    *mut DevicePathProtocol,
    Boolean,
    *mut usize,
    *mut c_void,
) -> Status;

/// EFI_LOAD_FILE2_PROTOCOL
#[repr(C)]
pub struct Protocol {
    pub load_file: LoadFileFn,
}

/// Answer a LoadFile request for `data`
///
/// # Safety
/// `file_path`, `buffer_size` and `buffer` must be null or valid as
/// described by the LoadFile contract.
pub unsafe fn serve(
    data: &[u8],
    file_path: *mut DevicePathProtocol,
    boot_policy: Boolean,
    buffer_size: *mut usize,
    buffer: *mut c_void,
) -> Status {
    if file_path.is_null() || buffer_size.is_null() {
        return Status::INVALID_PARAMETER;
    }
    if bool::from(boot_policy) {
        return Status::UNSUPPORTED;
    }
    if !is_end_node(file_path) {
        return Status::UNSUPPORTED;
    }
    if data.is_empty() {
        return Status::NOT_FOUND;
    }

    if buffer.is_null() || *buffer_size < data.len() {
        *buffer_size = data.len();
        return Status::BUFFER_TOO_SMALL;
    }

    core::ptr::copy_nonoverlapping(data.as_ptr(), buffer as *mut u8, data.len());
    *buffer_size = data.len();
    log::debug!("LoadFile2: served {} bytes", data.len());
    Status::SUCCESS
}
