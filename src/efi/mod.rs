//! EFI firmware services
//!
//! Everything the loader needs from the firmware goes through the [`Firmware`]
//! trait. The real implementation ([`boot_services::UefiFirmware`]) wraps the
//! system table handed to `efi_main`; tests run the pipeline against an
//! in-memory implementation instead.

pub mod boot_services;
pub mod protocols;

use alloc::boxed::Box;
use core::ffi::c_void;

use r_efi::efi::{Guid, Handle, MemoryType, PhysicalAddress, Status, SystemTable};
use r_efi::protocols::device_path::Protocol as DevicePathProtocol;
use r_efi::protocols::loaded_image;

use crate::decompress::ByteSource;

/// Page size used by the firmware page allocator
pub const PAGE_SIZE: u64 = 4096;

/// OpenProtocol attribute (UEFI Spec 7.3)
pub const OPEN_PROTOCOL_EXCLUSIVE: u32 = 0x20;

/// EFI_LOADED_IMAGE_PROTOCOL_GUID
pub const LOADED_IMAGE_PROTOCOL_GUID: Guid = loaded_image::PROTOCOL_GUID;

/// EFI_LOADED_IMAGE_DEVICE_PATH_PROTOCOL_GUID
pub const LOADED_IMAGE_DEVICE_PATH_PROTOCOL_GUID: Guid = Guid::from_fields(
    0xbc62157e,
    0x3e33,
    0x4fec,
    0x99,
    0x20,
    &[0x2d, 0x3b, 0x36, 0xd7, 0x50, 0xdf],
);

/// Number of pages needed to hold `size` bytes
pub const fn pages_for(size: u64) -> u64 {
    size.div_ceil(PAGE_SIZE)
}

/// Firmware services consumed by the loader
///
/// Handles and interface pointers are opaque to the loader; it never
/// dereferences a handle and only dereferences interfaces it installed itself.
pub trait Firmware: Sync {
    /// Allocate `pages` contiguous pages anywhere in memory
    fn allocate_pages(&self, memory_type: MemoryType, pages: usize)
    -> Result<PhysicalAddress, Status>;

    /// Free pages obtained from [`Firmware::allocate_pages`]
    fn free_pages(&self, address: PhysicalAddress, pages: usize) -> Status;

    /// Install all `interfaces` on `handle` (a new handle if null)
    ///
    /// Either every interface is installed or none is.
    fn install_protocol_interfaces(
        &self,
        handle: Handle,
        interfaces: &[(Guid, *mut c_void)],
    ) -> Result<Handle, Status>;

    /// Remove all `interfaces` from `handle`
    fn uninstall_protocol_interfaces(
        &self,
        handle: Handle,
        interfaces: &[(Guid, *mut c_void)],
    ) -> Status;

    /// Open a protocol on `handle` exclusively on behalf of the loader image
    fn open_protocol_exclusive(&self, handle: Handle, guid: &Guid) -> Result<*mut c_void, Status>;

    /// Close a protocol opened with [`Firmware::open_protocol_exclusive`]
    fn close_protocol(&self, handle: Handle, guid: &Guid) -> Status;

    /// Look up the interface `guid` on `handle`
    fn handle_protocol(&self, handle: Handle, guid: &Guid) -> Result<*mut c_void, Status>;

    /// Find the handle that provides `guid` on the device path `path`
    fn locate_device_path(
        &self,
        guid: &Guid,
        path: *mut DevicePathProtocol,
    ) -> Result<Handle, Status>;

    /// Transfer control to the entry point of an image installed by the loader
    fn transfer(&self, image: Handle, entry_point: u64) -> Status;

    /// Load an image from memory with the firmware's own loader
    fn load_image_from_buffer(&self, data: &[u8]) -> Result<Handle, Status>;

    /// Start an image loaded by [`Firmware::load_image_from_buffer`]
    fn start_image(&self, image: Handle) -> Status;

    /// Unload an image loaded by [`Firmware::load_image_from_buffer`]
    fn unload_image(&self, image: Handle) -> Status;

    /// Open a file by path on the volume the loader was started from
    fn open_file(&self, path: &str) -> Result<Box<dyn ByteSource>, Status>;

    /// Handle of the loader image itself
    fn image_handle(&self) -> Handle;

    /// The system table passed to started images
    fn system_table(&self) -> *mut SystemTable;

    /// Device handle the loader was started from
    fn device_handle(&self) -> Handle;

    /// The loader's own image as mapped in memory
    fn own_image(&self) -> &[u8];

    /// UCS-2 load options the loader was started with
    fn load_options(&self) -> &[u16];
}
