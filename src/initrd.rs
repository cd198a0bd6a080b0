//! Linux initrd provider
//!
//! The Linux EFI stub looks up a LoadFile2 protocol on the vendor media
//! device path `LINUX_EFI_INITRD_MEDIA_GUID` and calls it to fetch the
//! initrd. [`register`] publishes an in-memory initrd that way until
//! [`deregister`] withdraws it.

use alloc::boxed::Box;
use core::ffi::c_void;

use r_efi::efi::{Boolean, Status};
use r_efi::protocols::device_path::Protocol as DevicePathProtocol;
use spin::Mutex;

use crate::buffer::Buffer;
use crate::efi::Firmware;
use crate::efi::protocols::device_path::{DEVICE_PATH_PROTOCOL_GUID, INITRD_DEVICE_PATH};
use crate::efi::protocols::load_file2::{self, LOAD_FILE2_PROTOCOL_GUID};

struct Registration {
    data: Buffer,
    handle: usize,
    protocol: Box<load_file2::Protocol>,
}

/// The registered initrd, if any
static INITRD: Mutex<Option<Registration>> = Mutex::new(None);

fn device_path() -> *mut DevicePathProtocol {
    &INITRD_DEVICE_PATH as *const _ as *mut DevicePathProtocol
}

extern "efiapi" fn load_file(
    this: *mut load_file2::Protocol,
    file_path: *mut DevicePathProtocol,
    boot_policy: Boolean,
    buffer_size: *mut usize,
    buffer: *mut c_void,
) -> Status {
    if this.is_null() {
        return Status::INVALID_PARAMETER;
    }

    let initrd = INITRD.lock();
    match initrd.as_ref() {
        Some(registration) if core::ptr::eq(&*registration.protocol, this) => {
            // SAFETY: the caller passes pointers per the LoadFile contract
            unsafe {
                load_file2::serve(
                    registration.data.remaining(),
                    file_path,
                    boot_policy,
                    buffer_size,
                    buffer,
                )
            }
        }
        _ => Status::NOT_FOUND,
    }
}

/// Publish `data` as the initrd
///
/// An empty buffer registers nothing.
pub fn register(fw: &dyn Firmware, data: Buffer) -> Result<(), Status> {
    if data.remaining().is_empty() {
        log::debug!("Empty initrd, not registering");
        return Ok(());
    }

    let mut initrd = INITRD.lock();
    if initrd.is_some() {
        log::error!("An initrd is already registered by this loader");
        return Err(Status::ALREADY_STARTED);
    }

    if let Ok(handle) = fw.locate_device_path(&LOAD_FILE2_PROTOCOL_GUID, device_path()) {
        log::warn!("initrd media device path already registered on {:?}", handle);
    }

    let mut protocol = Box::new(load_file2::Protocol { load_file });
    let handle = fw
        .install_protocol_interfaces(
            core::ptr::null_mut(),
            &[
                (DEVICE_PATH_PROTOCOL_GUID, device_path() as *mut c_void),
                (
                    LOAD_FILE2_PROTOCOL_GUID,
                    &mut *protocol as *mut load_file2::Protocol as *mut c_void,
                ),
            ],
        )
        .inspect_err(|status| log::error!("Failed to install initrd protocols: {:?}", status))?;

    log::info!("Registered {} byte initrd", data.remaining().len());
    *initrd = Some(Registration {
        data,
        handle: handle as usize,
        protocol,
    });
    Ok(())
}

/// Withdraw the registered initrd, if any
pub fn deregister(fw: &dyn Firmware) -> Status {
    let mut initrd = INITRD.lock();
    let Some(mut registration) = initrd.take() else {
        return Status::SUCCESS;
    };

    let status = fw.uninstall_protocol_interfaces(
        registration.handle as *mut c_void,
        &[
            (DEVICE_PATH_PROTOCOL_GUID, device_path() as *mut c_void),
            (
                LOAD_FILE2_PROTOCOL_GUID,
                &mut *registration.protocol as *mut load_file2::Protocol as *mut c_void,
            ),
        ],
    );
    if status.is_error() {
        log::error!("Failed to uninstall initrd protocols: {:?}", status);
        *initrd = Some(registration);
        return status;
    }
    Status::SUCCESS
}

/// Check if an initrd is registered
pub fn is_registered() -> bool {
    INITRD.lock().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efi::protocols::device_path::end_node;
    use crate::testing::{MockFirmware, serial};

    fn fetch(fw: &MockFirmware) -> (Status, Vec<u8>) {
        let handle = fw
            .locate_device_path(&LOAD_FILE2_PROTOCOL_GUID, device_path())
            .unwrap();
        let protocol = fw.interface(handle, &LOAD_FILE2_PROTOCOL_GUID).unwrap()
            as *mut load_file2::Protocol;
        let mut end = end_node();
        let path = &mut end as *mut _ as *mut DevicePathProtocol;

        let mut size = 0usize;
        let status = unsafe {
            ((*protocol).load_file)(protocol, path, Boolean::FALSE, &mut size, core::ptr::null_mut())
        };
        assert_eq!(status, Status::BUFFER_TOO_SMALL);

        let mut data = vec![0u8; size];
        let status = unsafe {
            ((*protocol).load_file)(
                protocol,
                path,
                Boolean::FALSE,
                &mut size,
                data.as_mut_ptr() as *mut c_void,
            )
        };
        (status, data)
    }

    #[test]
    fn test_register_serve_deregister() {
        let _guard = serial();
        let fw = MockFirmware::new();

        // Nothing to withdraw yet
        assert_eq!(deregister(&fw), Status::SUCCESS);

        // Empty initrds are skipped
        register(&fw, Buffer::default()).unwrap();
        assert!(!is_registered());
        assert_eq!(fw.handle_count(), 0);

        let initrd = b"070701 cpio archive".to_vec();
        register(&fw, Buffer::from_vec(initrd.clone())).unwrap();
        assert!(is_registered());
        assert_eq!(fw.handle_count(), 1);

        let (status, data) = fetch(&fw);
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(data, initrd);

        // A second registration is refused and leaves the first in place
        assert_eq!(
            register(&fw, Buffer::from_vec(vec![1, 2, 3])),
            Err(Status::ALREADY_STARTED)
        );
        assert_eq!(fetch(&fw).1, initrd);

        // A foreign protocol instance is not served
        let mut other = load_file2::Protocol { load_file };
        let mut end = end_node();
        let mut size = 0usize;
        let status = load_file(
            &mut other,
            &mut end as *mut _ as *mut DevicePathProtocol,
            Boolean::FALSE,
            &mut size,
            core::ptr::null_mut(),
        );
        assert_eq!(status, Status::NOT_FOUND);

        assert_eq!(deregister(&fw), Status::SUCCESS);
        assert!(!is_registered());
        assert_eq!(fw.handle_count(), 0);

        // Installation failure registers nothing
        let mut failing = MockFirmware::new();
        failing.install_failure = Some(Status::OUT_OF_RESOURCES);
        assert_eq!(
            register(&failing, Buffer::from_vec(initrd)),
            Err(Status::OUT_OF_RESOURCES)
        );
        assert!(!is_registered());
    }
}
