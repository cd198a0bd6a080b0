//! EFI Boot Services
//!
//! [`UefiFirmware`] implements the loader's [`Firmware`] surface on top of
//! the Boot Services table of the system table handed to `efi_main`.

use alloc::boxed::Box;
use core::ffi::c_void;

use r_efi::efi::{
    self, Boolean, Guid, Handle, MemoryType, PhysicalAddress, Status, SystemTable,
};
use r_efi::protocols::device_path::Protocol as DevicePathProtocol;
use r_efi::protocols::loaded_image;
use r_efi::protocols::simple_text_output;

use super::protocols::loaded_image::load_options as loaded_image_options;
use super::protocols::simple_file_system::{EfiFile, SIMPLE_FILE_SYSTEM_GUID};
use super::{Firmware, LOADED_IMAGE_PROTOCOL_GUID, OPEN_PROTOCOL_EXCLUSIVE};
use crate::decompress::ByteSource;
use crate::pe::EfiEntryPoint;

/// Firmware services of a running UEFI implementation
pub struct UefiFirmware {
    image_handle: Handle,
    system_table: *mut SystemTable,
    boot_services: *mut efi::BootServices,
    loaded_image: *mut loaded_image::Protocol,
}

// SAFETY: the loader is single-threaded; the pointers are never used
// concurrently and stay valid until ExitBootServices.
unsafe impl Send for UefiFirmware {}
unsafe impl Sync for UefiFirmware {}

impl UefiFirmware {
    /// Wrap the arguments of `efi_main`
    ///
    /// # Safety
    /// `system_table` must be the valid system table passed to the image
    /// `image_handle`, with Boot Services still available.
    pub unsafe fn new(image_handle: Handle, system_table: *mut SystemTable) -> Result<Self, Status> {
        if image_handle.is_null() || system_table.is_null() {
            return Err(Status::INVALID_PARAMETER);
        }
        let boot_services = (*system_table).boot_services;
        if boot_services.is_null() {
            return Err(Status::NOT_READY);
        }

        let mut this = Self {
            image_handle,
            system_table,
            boot_services,
            loaded_image: core::ptr::null_mut(),
        };
        this.loaded_image = this
            .handle_protocol(image_handle, &LOADED_IMAGE_PROTOCOL_GUID)?
            as *mut loaded_image::Protocol;
        Ok(this)
    }

    /// The console output protocol, if the firmware provides one
    pub fn con_out(&self) -> *mut simple_text_output::Protocol {
        // SAFETY: the system table is valid for the lifetime of self
        unsafe { (*self.system_table).con_out }
    }

    /// The Boot Services table
    pub fn boot_services(&self) -> *mut efi::BootServices {
        self.boot_services
    }

    fn bs(&self) -> &efi::BootServices {
        // SAFETY: checked non-null in new, valid until ExitBootServices
        unsafe { &*self.boot_services }
    }
}

impl Firmware for UefiFirmware {
    fn allocate_pages(
        &self,
        memory_type: MemoryType,
        pages: usize,
    ) -> Result<PhysicalAddress, Status> {
        let mut address: PhysicalAddress = 0;
        let status =
            (self.bs().allocate_pages)(efi::ALLOCATE_ANY_PAGES, memory_type, pages, &mut address);
        if status.is_error() {
            return Err(status);
        }
        Ok(address)
    }

    fn free_pages(&self, address: PhysicalAddress, pages: usize) -> Status {
        (self.bs().free_pages)(address, pages)
    }

    fn install_protocol_interfaces(
        &self,
        handle: Handle,
        interfaces: &[(Guid, *mut c_void)],
    ) -> Result<Handle, Status> {
        let mut handle = handle;
        for (index, &(guid, interface)) in interfaces.iter().enumerate() {
            let mut guid = guid;
            let status = (self.bs().install_protocol_interface)(
                &mut handle,
                &mut guid,
                efi::NATIVE_INTERFACE,
                interface,
            );
            if status.is_error() {
                // Roll back what was installed so far
                for &(guid, interface) in interfaces[..index].iter().rev() {
                    let mut guid = guid;
                    (self.bs().uninstall_protocol_interface)(handle, &mut guid, interface);
                }
                return Err(status);
            }
        }
        Ok(handle)
    }

    fn uninstall_protocol_interfaces(
        &self,
        handle: Handle,
        interfaces: &[(Guid, *mut c_void)],
    ) -> Status {
        for (index, &(guid, interface)) in interfaces.iter().enumerate() {
            let mut guid = guid;
            let status = (self.bs().uninstall_protocol_interface)(handle, &mut guid, interface);
            if status.is_error() {
                // Reinstate the interfaces already removed
                let mut handle = handle;
                for &(guid, interface) in interfaces[..index].iter().rev() {
                    let mut guid = guid;
                    (self.bs().install_protocol_interface)(
                        &mut handle,
                        &mut guid,
                        efi::NATIVE_INTERFACE,
                        interface,
                    );
                }
                return status;
            }
        }
        Status::SUCCESS
    }

    fn open_protocol_exclusive(&self, handle: Handle, guid: &Guid) -> Result<*mut c_void, Status> {
        let mut guid = *guid;
        let mut interface: *mut c_void = core::ptr::null_mut();
        let status = (self.bs().open_protocol)(
            handle,
            &mut guid,
            &mut interface,
            self.image_handle,
            core::ptr::null_mut(),
            OPEN_PROTOCOL_EXCLUSIVE,
        );
        if status.is_error() {
            return Err(status);
        }
        Ok(interface)
    }

    fn close_protocol(&self, handle: Handle, guid: &Guid) -> Status {
        let mut guid = *guid;
        (self.bs().close_protocol)(handle, &mut guid, self.image_handle, core::ptr::null_mut())
    }

    fn handle_protocol(&self, handle: Handle, guid: &Guid) -> Result<*mut c_void, Status> {
        let mut guid = *guid;
        let mut interface: *mut c_void = core::ptr::null_mut();
        let status = (self.bs().handle_protocol)(handle, &mut guid, &mut interface);
        if status.is_error() {
            return Err(status);
        }
        if interface.is_null() {
            return Err(Status::UNSUPPORTED);
        }
        Ok(interface)
    }

    fn locate_device_path(
        &self,
        guid: &Guid,
        path: *mut DevicePathProtocol,
    ) -> Result<Handle, Status> {
        let mut guid = *guid;
        let mut path = path;
        let mut device: Handle = core::ptr::null_mut();
        let status = (self.bs().locate_device_path)(&mut guid, &mut path, &mut device);
        if status.is_error() {
            return Err(status);
        }
        Ok(device)
    }

    fn transfer(&self, image: Handle, entry_point: u64) -> Status {
        // SAFETY: the entry point lies inside an image relocated and
        // installed by this loader
        let entry: EfiEntryPoint = unsafe { core::mem::transmute(entry_point as usize) };
        entry(image, self.system_table)
    }

    fn load_image_from_buffer(&self, data: &[u8]) -> Result<Handle, Status> {
        let mut image: Handle = core::ptr::null_mut();
        let status = (self.bs().load_image)(
            Boolean::FALSE,
            self.image_handle,
            core::ptr::null_mut(),
            data.as_ptr() as *mut c_void,
            data.len(),
            &mut image,
        );
        if status.is_error() {
            return Err(status);
        }
        Ok(image)
    }

    fn start_image(&self, image: Handle) -> Status {
        (self.bs().start_image)(image, core::ptr::null_mut(), core::ptr::null_mut())
    }

    fn unload_image(&self, image: Handle) -> Status {
        (self.bs().unload_image)(image)
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn ByteSource>, Status> {
        let sfs = self
            .handle_protocol(self.device_handle(), &SIMPLE_FILE_SYSTEM_GUID)
            .inspect_err(|status| {
                log::error!("Boot device has no file system: {:?}", status);
            })?;
        // SAFETY: the firmware returned a simple file system interface
        let file = unsafe { EfiFile::open(sfs as *mut _, path)? };
        Ok(Box::new(file))
    }

    fn image_handle(&self) -> Handle {
        self.image_handle
    }

    fn system_table(&self) -> *mut SystemTable {
        self.system_table
    }

    fn device_handle(&self) -> Handle {
        // SAFETY: the loaded image record of the loader is valid while it runs
        unsafe { (*self.loaded_image).device_handle }
    }

    fn own_image(&self) -> &[u8] {
        // SAFETY: as above; the image stays mapped while the loader runs
        unsafe {
            let base = (*self.loaded_image).image_base as *const u8;
            let size = (*self.loaded_image).image_size as usize;
            if base.is_null() {
                return &[];
            }
            core::slice::from_raw_parts(base, size)
        }
    }

    fn load_options(&self) -> &[u16] {
        // SAFETY: as above
        unsafe { loaded_image_options(self.loaded_image) }
    }
}
