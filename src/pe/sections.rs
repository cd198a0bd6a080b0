//! Named section lookup
//!
//! Finds sections by their exact 8-byte name inside an image that is mapped
//! in memory layout, the way the loader's own image is. This is how an
//! embedded kernel, initrd or command line is picked up.

use r_efi::efi::Status;

use super::headers::IMAGE_SUBSYSTEM_EFI_APPLICATION;
use super::{Platform, parse_headers, translate};

/// Embedded kernel image
pub const SECTION_LINUX: &[u8] = b".linux";
/// Embedded initial ramdisk
pub const SECTION_INITRD: &[u8] = b".initrd";
/// Embedded kernel command line
pub const SECTION_CMDLINE: &[u8] = b".cmdline";

/// Sections embedded in the loader image
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedSections<'a> {
    pub linux: Option<&'a [u8]>,
    pub initrd: Option<&'a [u8]>,
    pub cmdline: Option<&'a [u8]>,
}

/// Contents of the section called `name` in a memory-layout `image`
pub fn find_section<'a>(image: &'a [u8], name: &[u8]) -> Result<Option<&'a [u8]>, Status> {
    let ctx = parse_headers(image, Platform::native())?;
    if ctx.subsystem != IMAGE_SUBSYSTEM_EFI_APPLICATION {
        log::debug!("PE: Not an EFI application: {}", ctx.subsystem);
        return Err(Status::UNSUPPORTED);
    }

    let mut found = None;
    for section in ctx.sections() {
        let section = section?;
        if section.name() != name {
            continue;
        }
        let va = section.virtual_address;
        let vs = section.virtual_size;
        found = Some(translate(image, va, vs as usize).inspect_err(|_| {
            log::warn!("PE: Section {} lies outside the image", section.name_str());
        })?);
    }
    Ok(found)
}

/// Locate the `.linux`, `.initrd` and `.cmdline` sections of `image`
pub fn locate_sections(image: &[u8]) -> Result<EmbeddedSections<'_>, Status> {
    let sections = EmbeddedSections {
        linux: find_section(image, SECTION_LINUX)?,
        initrd: find_section(image, SECTION_INITRD)?,
        cmdline: find_section(image, SECTION_CMDLINE)?,
    };
    log::debug!(
        "PE: Embedded sections: linux={}, initrd={}, cmdline={}",
        sections.linux.is_some(),
        sections.initrd.is_some(),
        sections.cmdline.is_some()
    );
    Ok(sections)
}
