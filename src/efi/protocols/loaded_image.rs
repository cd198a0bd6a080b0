//! EFI Loaded Image Protocol
//!
//! Construction of the loaded-image record for images the loader installs
//! and load option handling for started images.

use core::ffi::c_void;
use r_efi::efi::{Handle, Status, SystemTable};
use r_efi::protocols::device_path::Protocol as DevicePathProtocol;
use r_efi::protocols::loaded_image;

/// Unload callback stored in a loaded-image record
pub type UnloadFn = extern "efiapi" fn(Handle) -> Status;

/// Create a Loaded Image Protocol record for an image at `image_base`
///
/// Code and data live in the same page allocation, so both use the loader
/// code memory type.
pub fn new_loaded_image(
    parent_handle: Handle,
    system_table: *mut SystemTable,
    device_handle: Handle,
    file_path: *mut DevicePathProtocol,
    image_base: u64,
    image_size: u64,
    unload: Option<UnloadFn>,
) -> loaded_image::Protocol {
    if device_handle.is_null() {
        log::warn!("LoadedImageProtocol: DeviceHandle is NULL");
    }

    loaded_image::Protocol {
        revision: loaded_image::REVISION,
        parent_handle,
        system_table,
        device_handle,
        file_path,
        reserved: core::ptr::null_mut(),
        load_options_size: 0,
        load_options: core::ptr::null_mut(),
        image_base: image_base as usize as *mut c_void,
        image_size,
        image_code_type: r_efi::efi::LOADER_CODE,
        image_data_type: r_efi::efi::LOADER_CODE,
        unload,
    }
}

/// Set UCS-2 load options on a loaded image protocol
///
/// An empty slice clears the options.
///
/// # Safety
/// The protocol pointer must be valid and `options` must outlive every use
/// of the options by the image.
pub unsafe fn set_load_options(protocol: *mut loaded_image::Protocol, options: &[u16]) {
    if protocol.is_null() {
        return;
    }
    if options.is_empty() {
        (*protocol).load_options = core::ptr::null_mut();
        (*protocol).load_options_size = 0;
    } else {
        (*protocol).load_options = options.as_ptr() as *mut c_void;
        (*protocol).load_options_size = core::mem::size_of_val(options) as u32;
    }
}

/// Load options of a loaded image as UCS-2 code units
///
/// # Safety
/// The protocol pointer must be valid and its options must stay mapped for
/// the returned lifetime.
pub unsafe fn load_options<'a>(protocol: *const loaded_image::Protocol) -> &'a [u16] {
    if protocol.is_null() {
        return &[];
    }
    let ptr = (*protocol).load_options as *const u16;
    let len = (*protocol).load_options_size as usize / 2;
    if ptr.is_null() || len == 0 || ptr.align_offset(2) != 0 {
        return &[];
    }
    core::slice::from_raw_parts(ptr, len)
}
