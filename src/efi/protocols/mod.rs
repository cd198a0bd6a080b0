//! EFI Protocol definitions
//!
//! Protocols the loader produces (loaded image, device paths, initrd
//! LoadFile2) and consumes (simple file system).

pub mod device_path;
pub mod load_file2;
pub mod loaded_image;
pub mod simple_file_system;
