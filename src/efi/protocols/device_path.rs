//! EFI Device Path Protocol
//!
//! Device paths the loader synthesizes: the memory-mapped identity of a
//! loaded image and the vendor media path the Linux kernel looks up to find
//! its initrd.

use r_efi::efi::{Guid, MemoryType};
use r_efi::protocols::device_path::{self, End, Protocol, TYPE_END};

/// Re-export the GUID for external use
pub const DEVICE_PATH_PROTOCOL_GUID: Guid = device_path::PROTOCOL_GUID;

/// Hardware device path type
pub const TYPE_HARDWARE: u8 = 0x01;
/// Memory mapped hardware node
pub const SUBTYPE_MEMORY_MAPPED: u8 = 0x03;
/// Media device path type
pub const TYPE_MEDIA: u8 = 0x04;
/// Vendor defined media node
pub const SUBTYPE_MEDIA_VENDOR: u8 = 0x03;

/// LINUX_EFI_INITRD_MEDIA_GUID, 5568e427-68fc-4f3d-ac74-ca555231cc68
pub const LINUX_INITRD_MEDIA_GUID: [u8; 16] = [
    0x27, 0xe4, 0x68, 0x55, 0xfc, 0x68, 0x3d, 0x4f, 0xac, 0x74, 0xca, 0x55, 0x52, 0x31, 0xcc, 0x68,
];

/// Memory mapped node (UEFI Spec 10.3.2.4)
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MemoryMappedNode {
    pub header: Protocol,
    pub memory_type: u32,
    pub start: u64,
    /// Address of the last byte, inclusive
    pub end: u64,
}

/// Device path for an image that lives in a raw memory range
#[repr(C, packed)]
pub struct MemoryMappedDevicePath {
    pub node: MemoryMappedNode,
    pub end: End,
}

impl MemoryMappedDevicePath {
    /// Device path covering `start..=end`
    pub fn new(memory_type: MemoryType, start: u64, end: u64) -> Self {
        Self {
            node: MemoryMappedNode {
                header: header::<MemoryMappedNode>(TYPE_HARDWARE, SUBTYPE_MEMORY_MAPPED),
                memory_type,
                start,
                end,
            },
            end: end_node(),
        }
    }
}

/// Vendor media device path with the Linux initrd GUID
#[repr(C, packed)]
pub struct InitrdDevicePath {
    pub header: Protocol,
    pub guid: [u8; 16],
    pub end: End,
}

/// The device path the kernel's EFI stub locates the initrd LoadFile2 on
pub static INITRD_DEVICE_PATH: InitrdDevicePath = InitrdDevicePath {
    header: Protocol {
        r#type: TYPE_MEDIA,
        sub_type: SUBTYPE_MEDIA_VENDOR,
        length: (core::mem::size_of::<Protocol>() as u16 + 16).to_le_bytes(),
    },
    guid: LINUX_INITRD_MEDIA_GUID,
    end: End {
        header: Protocol {
            r#type: TYPE_END,
            sub_type: End::SUBTYPE_ENTIRE,
            length: (core::mem::size_of::<End>() as u16).to_le_bytes(),
        },
    },
};

const fn header<T>(r#type: u8, sub_type: u8) -> Protocol {
    Protocol {
        r#type,
        sub_type,
        length: (core::mem::size_of::<T>() as u16).to_le_bytes(),
    }
}

/// An "end entire device path" node
pub const fn end_node() -> End {
    End {
        header: header::<End>(TYPE_END, End::SUBTYPE_ENTIRE),
    }
}

/// Whether `node` is an end-of-path node
///
/// # Safety
/// `node` must point to a readable device path node header.
pub unsafe fn is_end_node(node: *const Protocol) -> bool {
    let header = core::ptr::read_unaligned(node);
    header.r#type == TYPE_END
}

/// Read a memory mapped node, if `node` is one
///
/// # Safety
/// `node` must point to a readable device path node.
pub unsafe fn read_memory_mapped(node: *const Protocol) -> Option<MemoryMappedNode> {
    let header = core::ptr::read_unaligned(node);
    let length = u16::from_le_bytes(header.length) as usize;
    if header.r#type != TYPE_HARDWARE
        || header.sub_type != SUBTYPE_MEMORY_MAPPED
        || length < core::mem::size_of::<MemoryMappedNode>()
    {
        return None;
    }
    Some(core::ptr::read_unaligned(node as *const MemoryMappedNode))
}
