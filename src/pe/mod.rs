//! PE32/PE32+ image loader
//!
//! Loads an EFI executable from memory: [`parser`] validates the headers,
//! [`relocate`] places the sections into page memory and [`fixup`] applies
//! the base relocations. [`handle_image`] runs the whole pipeline and
//! registers the result as a loaded-image handle.

pub mod fixup;
pub mod headers;
pub mod parser;
pub mod relocate;
pub mod sections;

use core::ops::Range;

use r_efi::efi::{Handle, Status, SystemTable};

pub use parser::{LoaderContext, Platform, parse_headers};

use crate::buffer::{AlignedBuffer, PageAllocation};
use crate::efi::Firmware;
use crate::image;

/// EFI application entry point type
pub type EfiEntryPoint = extern "efiapi" fn(Handle, *mut SystemTable) -> Status;

/// Memory type of loaded images
pub const IMAGE_MEMORY_TYPE: r_efi::efi::MemoryType = r_efi::efi::LOADER_CODE;

/// A relocated image registered with the firmware
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    /// Handle carrying the loaded-image and device path protocols
    pub handle: Handle,
    /// Absolute entry point address
    pub entry_point: u64,
    /// Base address of the relocated image
    pub image_base: u64,
    /// Size of the relocated image in bytes
    pub image_size: u64,
    /// Pages backing the image
    pub allocation: PageAllocation,
}

/// Bounds-checked byte range `[rva, rva + len)` inside an image of `size` bytes
pub fn image_range(size: usize, rva: u32, len: u32) -> Result<Range<usize>, Status> {
    let start = rva as usize;
    let end = start.checked_add(len as usize).ok_or(Status::LOAD_ERROR)?;
    if end > size {
        return Err(Status::LOAD_ERROR);
    }
    Ok(start..end)
}

/// `len` bytes of `region` at `rva`
pub fn translate(region: &[u8], rva: u32, len: usize) -> Result<&[u8], Status> {
    let len = u32::try_from(len).map_err(|_| Status::LOAD_ERROR)?;
    let range = image_range(region.len(), rva, len)?;
    Ok(&region[range])
}

/// `len` mutable bytes of `region` at `rva`
pub fn translate_mut(region: &mut [u8], rva: u32, len: usize) -> Result<&mut [u8], Status> {
    let len = u32::try_from(len).map_err(|_| Status::LOAD_ERROR)?;
    let range = image_range(region.len(), rva, len)?;
    Ok(&mut region[range])
}

/// Place a validated image into freshly allocated pages and relocate it
///
/// Returns the page buffer holding the image; it is released on every error
/// path by dropping it.
pub fn load_sections<'fw>(
    firmware: &'fw dyn Firmware,
    ctx: &LoaderContext<'_>,
) -> Result<AlignedBuffer<'fw>, Status> {
    let mut buffer = AlignedBuffer::allocate(
        firmware,
        ctx.size_of_image as usize,
        ctx.section_alignment as u64,
        IMAGE_MEMORY_TYPE,
    )?;
    let base = buffer.base_address();
    let region = buffer.as_mut_slice();

    let headers = ctx.size_of_headers as usize;
    region[..headers].copy_from_slice(&ctx.source[..headers]);

    if ctx.entry_point >= ctx.size_of_image {
        log::error!(
            "PE: Entry point {:#x} outside image of {:#x} bytes",
            ctx.entry_point,
            ctx.size_of_image
        );
        return Err(Status::LOAD_ERROR);
    }

    let reloc = relocate::relocate_sections(ctx, region)?;

    match (reloc, ctx.relocations()) {
        (Some(reloc), Some(_)) => {
            fixup::apply_fixups(ctx, &reloc, region, base).inspect_err(|status| {
                log::error!("PE: Relocation failed: {:?}", status);
            })?;
        }
        (None, Some(_)) => log::warn!("PE: Image has no valid .reloc section"),
        (_, None) if base != ctx.image_base => {
            log::warn!("PE: Image has no relocations but was loaded away from its base")
        }
        _ => {}
    }

    Ok(buffer)
}

/// Load `data` as an EFI image for the platform the loader runs on
pub fn handle_image(firmware: &dyn Firmware, data: &[u8]) -> Result<LoadedImage, Status> {
    handle_image_for(firmware, data, Platform::native())
}

/// Load `data` as an EFI image for `platform`
pub fn handle_image_for(
    firmware: &dyn Firmware,
    data: &[u8],
    platform: Platform,
) -> Result<LoadedImage, Status> {
    if data.is_empty() {
        log::error!("PE: Empty image buffer");
        return Err(Status::INVALID_PARAMETER);
    }

    let ctx = parse_headers(data, platform)?;
    let buffer = load_sections(firmware, &ctx)?;

    let loaded = image::install(firmware, buffer, &ctx)?;
    log::info!(
        "PE: Loaded image at {:#x}, entry point at {:#x}",
        loaded.image_base,
        loaded.entry_point
    );
    Ok(loaded)
}
