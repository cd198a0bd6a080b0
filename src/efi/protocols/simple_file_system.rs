//! EFI Simple File System Protocol
//!
//! Client side of EFI_SIMPLE_FILE_SYSTEM_PROTOCOL and EFI_FILE_PROTOCOL: opens
//! a file on the volume the loader was started from and exposes it as a
//! [`ByteSource`].

use alloc::vec;
use alloc::vec::Vec;
use core::ffi::c_void;

use r_efi::efi::{Guid, Status};
use r_efi::protocols::file as efi_file;
use r_efi::protocols::simple_file_system as efi_sfs;

use crate::decompress::ByteSource;

/// Re-export GUIDs
pub const SIMPLE_FILE_SYSTEM_GUID: Guid = efi_sfs::PROTOCOL_GUID;
pub const FILE_INFO_GUID: Guid = efi_file::INFO_ID;

/// Offset of FileSize in EFI_FILE_INFO
const FILE_INFO_FILE_SIZE_OFFSET: usize = 8;

/// Maximum path length supported
const MAX_PATH_LEN: usize = 256;

/// Encode `path` as a NUL terminated UCS-2 EFI path
///
/// Forward slashes become backslashes.
pub fn encode_path(path: &str) -> Result<Vec<u16>, Status> {
    let mut name: Vec<u16> = path
        .chars()
        .map(|c| if c == '/' { '\\' } else { c })
        .flat_map(|c| {
            let mut units = [0u16; 2];
            let len = c.encode_utf16(&mut units).len();
            units.into_iter().take(len)
        })
        .collect();
    if name.is_empty() || name.len() >= MAX_PATH_LEN || name.contains(&0) {
        return Err(Status::INVALID_PARAMETER);
    }
    name.push(0);
    Ok(name)
}

/// An open, read-only EFI file
pub struct EfiFile {
    file: *mut efi_file::Protocol,
    size: u64,
}

impl EfiFile {
    /// Open `path` on the file system `sfs`
    ///
    /// # Safety
    /// `sfs` must be a valid simple file system protocol instance.
    pub unsafe fn open(sfs: *mut efi_sfs::Protocol, path: &str) -> Result<Self, Status> {
        let mut name = encode_path(path)?;

        let mut volume: *mut efi_file::Protocol = core::ptr::null_mut();
        let status = ((*sfs).open_volume)(sfs, &mut volume);
        if status.is_error() || volume.is_null() {
            log::error!("Failed to open volume: {:?}", status);
            return Err(status);
        }

        let mut file: *mut efi_file::Protocol = core::ptr::null_mut();
        let status = ((*volume).open)(
            volume,
            &mut file,
            name.as_mut_ptr(),
            efi_file::MODE_READ,
            0,
        );
        ((*volume).close)(volume);
        if status.is_error() || file.is_null() {
            log::error!("Unable to open file {}: {:?}", path, status);
            return Err(if status.is_error() { status } else { Status::NOT_FOUND });
        }

        // Closes the file if the size query fails
        let mut this = Self { file, size: 0 };
        this.size = this.query_size()?;
        log::debug!("Opened {} ({} bytes)", path, this.size);
        Ok(this)
    }

    fn query_size(&self) -> Result<u64, Status> {
        let mut guid = FILE_INFO_GUID;
        let mut size = 0usize;
        // SAFETY: self.file is an open file protocol
        let status = unsafe {
            ((*self.file).get_info)(self.file, &mut guid, &mut size, core::ptr::null_mut())
        };
        if status != Status::BUFFER_TOO_SMALL {
            log::error!("GetInfo size query failed: {:?}", status);
            return Err(if status.is_error() { status } else { Status::DEVICE_ERROR });
        }
        if size < FILE_INFO_FILE_SIZE_OFFSET + 8 {
            return Err(Status::DEVICE_ERROR);
        }

        let mut info = vec![0u8; size];
        // SAFETY: info holds `size` writable bytes
        let status = unsafe {
            ((*self.file).get_info)(
                self.file,
                &mut guid,
                &mut size,
                info.as_mut_ptr() as *mut c_void,
            )
        };
        if status.is_error() {
            log::error!("GetInfo failed: {:?}", status);
            return Err(status);
        }

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&info[FILE_INFO_FILE_SIZE_OFFSET..FILE_INFO_FILE_SIZE_OFFSET + 8]);
        Ok(u64::from_le_bytes(bytes))
    }
}

impl ByteSource for EfiFile {
    fn len(&self) -> u64 {
        self.size
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        let mut size = buf.len();
        // SAFETY: self.file is an open file protocol and buf is writable
        let status =
            unsafe { ((*self.file).read)(self.file, &mut size, buf.as_mut_ptr() as *mut c_void) };
        if status.is_error() {
            log::error!("File read failed: {:?}", status);
            return Err(status);
        }
        Ok(size.min(buf.len()))
    }
}

impl Drop for EfiFile {
    fn drop(&mut self) {
        // SAFETY: self.file is open until here
        unsafe { ((*self.file).close)(self.file) };
    }
}
