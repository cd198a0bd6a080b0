//! Loaded image handles
//!
//! A relocated image is published to the firmware as a handle carrying a
//! loaded-image record and a memory-mapped device path. The device path is
//! the image's identity: the unload callback only reclaims handles whose
//! identity is a memory-mapped range and whose record points back at it.

use alloc::boxed::Box;
use core::ffi::c_void;

use r_efi::efi::{Handle, Status};
use r_efi::protocols::device_path::Protocol as DevicePathProtocol;
use r_efi::protocols::loaded_image;

use crate::buffer::AlignedBuffer;
use crate::efi::protocols::device_path::{MemoryMappedDevicePath, read_memory_mapped};
use crate::efi::protocols::loaded_image::{new_loaded_image, set_load_options};
use crate::efi::{Firmware, LOADED_IMAGE_DEVICE_PATH_PROTOCOL_GUID, LOADED_IMAGE_PROTOCOL_GUID, PAGE_SIZE};
use crate::pe::{LoaderContext, LoadedImage};
use crate::state;

/// Register the relocated image in `buffer` with the firmware
///
/// On success the pages belong to the firmware handle and are reclaimed by
/// [`unload`]. On failure everything allocated here and the pages are
/// released.
pub fn install(
    firmware: &dyn Firmware,
    buffer: AlignedBuffer<'_>,
    ctx: &LoaderContext<'_>,
) -> Result<LoadedImage, Status> {
    let allocation = buffer.allocation();
    let image_base = buffer.base_address();
    let image_size = ctx.size_of_image as u64;

    let device_path = Box::into_raw(Box::new(MemoryMappedDevicePath::new(
        allocation.memory_type,
        allocation.address,
        allocation.end(),
    )));
    let protocol = Box::into_raw(Box::new(new_loaded_image(
        firmware.image_handle(),
        firmware.system_table(),
        firmware.device_handle(),
        device_path as *mut DevicePathProtocol,
        image_base,
        image_size,
        Some(unload_callback),
    )));

    let installed = firmware.install_protocol_interfaces(
        core::ptr::null_mut(),
        &[
            (LOADED_IMAGE_PROTOCOL_GUID, protocol as *mut c_void),
            (LOADED_IMAGE_DEVICE_PATH_PROTOCOL_GUID, device_path as *mut c_void),
        ],
    );

    match installed {
        Ok(handle) => {
            let allocation = buffer.into_raw();
            log::debug!(
                "Installed image handle {:?} for {} pages at {:#x}",
                handle,
                allocation.pages,
                allocation.address
            );
            Ok(LoadedImage {
                handle,
                entry_point: image_base + ctx.entry_point as u64,
                image_base,
                image_size,
                allocation,
            })
        }
        Err(status) => {
            log::error!("Creating image handle failed: {:?}", status);
            // SAFETY: both records came from Box::into_raw above and were not installed
            unsafe {
                drop(Box::from_raw(protocol));
                drop(Box::from_raw(device_path));
            }
            Err(status)
        }
    }
}

/// Start an installed image with `load_options`
///
/// The options are visible to the image through its loaded-image record for
/// the duration of the call.
pub fn start(firmware: &dyn Firmware, image: &LoadedImage, load_options: &[u16]) -> Status {
    let protocol = match firmware.handle_protocol(image.handle, &LOADED_IMAGE_PROTOCOL_GUID) {
        Ok(protocol) => protocol as *mut loaded_image::Protocol,
        Err(status) => {
            log::error!("Image handle has no loaded image protocol: {:?}", status);
            return status;
        }
    };

    // SAFETY: the record was installed by `install` and stays alive until unload
    unsafe { set_load_options(protocol, load_options) };

    log::info!("Executing image at {:#x}", image.entry_point);
    let status = firmware.transfer(image.handle, image.entry_point);
    log::info!("Image returned with status: {:?}", status);

    // SAFETY: as above
    unsafe { set_load_options(protocol, &[]) };
    status
}

/// Reclaim an image installed by [`install`]
///
/// Handles that were not created by this loader are refused with
/// `UNSUPPORTED`, and their memory is left alone.
pub fn unload(firmware: &dyn Firmware, handle: Handle) -> Status {
    // Exclusive opens make sure nobody else holds a reference
    let Ok(device_path) =
        firmware.open_protocol_exclusive(handle, &LOADED_IMAGE_DEVICE_PATH_PROTOCOL_GUID)
    else {
        return Status::UNSUPPORTED;
    };
    let close_device_path = || {
        firmware.close_protocol(handle, &LOADED_IMAGE_DEVICE_PATH_PROTOCOL_GUID);
    };

    // SAFETY: the firmware returned a device path interface for this handle
    let Some(node) = (unsafe { read_memory_mapped(device_path as *const DevicePathProtocol) })
    else {
        log::debug!("Handle {:?} has no memory mapped device path", handle);
        close_device_path();
        return Status::UNSUPPORTED;
    };

    let Ok(protocol) = firmware.open_protocol_exclusive(handle, &LOADED_IMAGE_PROTOCOL_GUID)
    else {
        close_device_path();
        return Status::UNSUPPORTED;
    };
    let protocol = protocol as *mut loaded_image::Protocol;
    let close_both = || {
        firmware.close_protocol(handle, &LOADED_IMAGE_PROTOCOL_GUID);
        close_device_path();
    };

    // SAFETY: the firmware returned a loaded image interface for this handle
    let ours = unsafe {
        (*protocol).unload.map(|f| f as usize) == Some(unload_callback as usize)
            && (*protocol).file_path as *mut c_void == device_path
    };
    if !ours {
        log::debug!("Handle {:?} was not loaded by this loader", handle);
        close_both();
        return Status::UNSUPPORTED;
    }

    let start = node.start;
    let end = node.end;
    let Some(pages) = end
        .checked_sub(start)
        .map(|len| (len + 1) / PAGE_SIZE)
        .filter(|&pages| pages > 0)
    else {
        log::error!("Invalid memory mapped range {:#x}-{:#x}", start, end);
        close_both();
        return Status::UNSUPPORTED;
    };

    close_both();
    let status = firmware.uninstall_protocol_interfaces(
        handle,
        &[
            (LOADED_IMAGE_PROTOCOL_GUID, protocol as *mut c_void),
            (LOADED_IMAGE_DEVICE_PATH_PROTOCOL_GUID, device_path),
        ],
    );
    if status != Status::SUCCESS {
        log::error!("Failed to uninstall image handle: {:?}", status);
        return status;
    }

    let freed = firmware.free_pages(start, pages as usize);
    if freed != Status::SUCCESS {
        log::warn!("Failed to free {} image pages at {:#x}: {:?}", pages, start, freed);
    }

    // SAFETY: both records were leaked by `install` and are no longer installed
    unsafe {
        drop(Box::from_raw(protocol));
        drop(Box::from_raw(device_path as *mut MemoryMappedDevicePath));
    }

    log::debug!("Unloaded image handle {:?}", handle);
    freed
}

/// EFI_IMAGE_UNLOAD for images installed by this loader
pub extern "efiapi" fn unload_callback(handle: Handle) -> Status {
    match state::firmware() {
        Some(firmware) => unload(firmware, handle),
        None => Status::NOT_READY,
    }
}
