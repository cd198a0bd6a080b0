//! Section relocator
//!
//! Places every section of a validated image at its virtual address inside
//! the destination region and finds the relocation section on the way.

use r_efi::efi::Status;

use super::headers::SectionHeader;
use super::{LoaderContext, image_range};

/// Name of the base relocation section
pub const RELOC_SECTION_NAME: &[u8] = b".reloc";

/// The section that holds the base relocation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocSection {
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub pointer_to_raw_data: u32,
    pub size_of_raw_data: u32,
}

impl RelocSection {
    fn from_header(section: &SectionHeader) -> Self {
        Self {
            virtual_address: section.virtual_address,
            virtual_size: section.virtual_size,
            pointer_to_raw_data: section.pointer_to_raw_data,
            size_of_raw_data: section.size_of_raw_data,
        }
    }
}

/// Copy or zero-fill every section of `ctx` into `region`
///
/// `region` is the destination image, `size_of_image` bytes long and already
/// holding the headers. Returns the relocation section if the image has one
/// that matches the base relocation directory.
pub fn relocate_sections(
    ctx: &LoaderContext<'_>,
    region: &mut [u8],
) -> Result<Option<RelocSection>, Status> {
    let size_of_image = region.len().min(ctx.size_of_image as usize);
    let directory = ctx.relocations();
    let mut reloc: Option<RelocSection> = None;
    let mut seen_reloc = false;
    let mut found_entry_point = false;

    for section in ctx.sections() {
        let section = section?;
        let name = section.name_str();
        let va = section.virtual_address;
        let vs = section.virtual_size;
        let raw_size = section.size_of_raw_data;
        let raw_ptr = section.pointer_to_raw_data;

        let range = image_range(size_of_image, va, vs);

        // .reloc is looked at even when it is discardable
        if section.name() == RELOC_SECTION_NAME {
            if seen_reloc {
                log::error!("PE: Image has multiple .reloc sections");
                return Err(Status::LOAD_ERROR);
            }
            seen_reloc = true;

            let matches_directory = directory.is_some_and(|dir| {
                let dir_va = dir.virtual_address;
                let dir_end = dir_va as u64 + dir.size as u64;
                dir_va == va && dir_end <= va as u64 + vs as u64
            });
            if raw_size > 0 && vs > 0 && range.is_ok() && matches_directory {
                reloc = Some(RelocSection::from_header(&section));
            } else {
                log::warn!("PE: Ignoring .reloc section that does not match the directory");
            }
        }

        if section.is_discardable() && vs == 0 {
            continue;
        }

        if vs == 0 {
            log::error!("PE: Section {} has an empty virtual extent", name);
            return Err(Status::LOAD_ERROR);
        }
        let range = range.inspect_err(|_| {
            log::error!(
                "PE: Section {} ({:#x}+{:#x}) lies outside the image",
                name,
                va,
                vs
            );
        })?;

        if section.is_uninitialized_data() {
            region[range.clone()].fill(0);
        } else {
            if raw_size > 0 && raw_ptr < ctx.size_of_headers {
                log::error!("PE: Section {} is inside image headers", name);
                return Err(Status::LOAD_ERROR);
            }

            let available = ctx.source.len().saturating_sub(raw_ptr as usize);
            let count = (raw_size as usize).min(vs as usize).min(available);
            let dest = &mut region[range.clone()];
            if count > 0 {
                let start = raw_ptr as usize;
                dest[..count].copy_from_slice(&ctx.source[start..start + count]);
            }
            dest[count..].fill(0);
            if count < raw_size.min(vs) as usize {
                log::warn!(
                    "PE: Section {} truncated, {:#x} of {:#x} bytes present",
                    name,
                    count,
                    raw_size
                );
            }
        }

        let entry = ctx.entry_point;
        if !found_entry_point && va <= entry && (entry as u64) < va as u64 + vs as u64 {
            found_entry_point = true;
            log::debug!("PE: Found entry point in section {}", name);
        }
    }

    if !found_entry_point {
        log::warn!("PE: No section contains entry point {:#x}", ctx.entry_point);
    }

    Ok(reloc)
}
