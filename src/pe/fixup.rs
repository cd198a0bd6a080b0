//! Base relocation fixups
//!
//! Walks the base relocation table block by block and patches every recorded
//! address by the distance between the preferred and the actual image base.

use r_efi::efi::Status;
use zerocopy::FromBytes;

use super::headers::{BASE_RELOCATION_BLOCK_SIZE, BaseRelocationBlock};
use super::relocate::RelocSection;
use super::{LoaderContext, translate_mut};

/// Base relocation types
pub const IMAGE_REL_BASED_ABSOLUTE: u16 = 0;
pub const IMAGE_REL_BASED_HIGH: u16 = 1;
pub const IMAGE_REL_BASED_LOW: u16 = 2;
pub const IMAGE_REL_BASED_HIGHLOW: u16 = 3;
pub const IMAGE_REL_BASED_DIR64: u16 = 10;

/// Supported relocation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixup {
    /// Padding, nothing to patch
    Absolute,
    /// Upper 16 bits of the delta added to a 16-bit field
    High,
    /// Lower 16 bits of the delta added to a 16-bit field
    Low,
    /// 32-bit field
    HighLow,
    /// 64-bit field
    Dir64,
}

impl TryFrom<u16> for Fixup {
    type Error = u16;

    fn try_from(kind: u16) -> Result<Self, Self::Error> {
        match kind {
            IMAGE_REL_BASED_ABSOLUTE => Ok(Self::Absolute),
            IMAGE_REL_BASED_HIGH => Ok(Self::High),
            IMAGE_REL_BASED_LOW => Ok(Self::Low),
            IMAGE_REL_BASED_HIGHLOW => Ok(Self::HighLow),
            IMAGE_REL_BASED_DIR64 => Ok(Self::Dir64),
            other => Err(other),
        }
    }
}

impl Fixup {
    /// Width of the patched field in bytes
    pub fn width(self) -> usize {
        match self {
            Self::Absolute => 0,
            Self::High | Self::Low => 2,
            Self::HighLow => 4,
            Self::Dir64 => 8,
        }
    }

    /// Patch `field` (exactly [`Fixup::width`] bytes) by `adjust`
    pub fn apply(self, field: &mut [u8], adjust: u64) {
        match self {
            Self::Absolute => {}
            Self::High => apply_u16(field, (adjust >> 16) as u16),
            Self::Low => apply_u16(field, adjust as u16),
            Self::HighLow => apply_u32(field, adjust as u32),
            Self::Dir64 => apply_u64(field, adjust),
        }
    }
}

fn apply_u16(field: &mut [u8], adjust: u16) {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&field[..2]);
    let value = u16::from_le_bytes(bytes).wrapping_add(adjust);
    field[..2].copy_from_slice(&value.to_le_bytes());
}

fn apply_u32(field: &mut [u8], adjust: u32) {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&field[..4]);
    let value = u32::from_le_bytes(bytes).wrapping_add(adjust);
    field[..4].copy_from_slice(&value.to_le_bytes());
}

fn apply_u64(field: &mut [u8], adjust: u64) {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&field[..8]);
    let value = u64::from_le_bytes(bytes).wrapping_add(adjust);
    field[..8].copy_from_slice(&value.to_le_bytes());
}

/// Apply the base relocations of `ctx` to `region` loaded at `actual_base`
///
/// The table is read from the source image at the raw data offset of the
/// relocation section and is bounded by the directory size.
pub fn apply_fixups(
    ctx: &LoaderContext<'_>,
    reloc: &RelocSection,
    region: &mut [u8],
    actual_base: u64,
) -> Result<(), Status> {
    let Some(directory) = ctx.relocations() else {
        log::debug!("PE: Empty relocation directory");
        return Ok(());
    };

    let adjust = actual_base.wrapping_sub(ctx.image_base);
    if adjust == 0 {
        log::debug!("PE: Loaded at preferred base, no relocation fixup necessary");
        return Ok(());
    }

    let start = reloc.pointer_to_raw_data as usize;
    let table = start
        .checked_add(directory.size as usize)
        .and_then(|end| ctx.source.get(start..end))
        .ok_or_else(|| {
            log::error!("PE: Relocation table outside the image file");
            Status::LOAD_ERROR
        })?;

    log::debug!(
        "PE: Applying relocations, adjust={:#x}, table={:#x} bytes",
        adjust,
        table.len()
    );

    let mut offset = 0usize;
    let mut index = 0usize;
    while offset < table.len() {
        let rest = &table[offset..];
        let Ok((block, _)) = BaseRelocationBlock::read_from_prefix(rest) else {
            log::error!("PE: Reloc {} truncated block header", index);
            return Err(Status::LOAD_ERROR);
        };
        let page = block.virtual_address;
        let block_size = block.size_of_block as usize;

        if block_size == 0 {
            log::error!("PE: Reloc {} block size 0 is invalid", index);
            return Err(Status::LOAD_ERROR);
        }
        if block_size < BASE_RELOCATION_BLOCK_SIZE {
            log::error!("PE: Reloc {} block size {} is too small", index, block_size);
            return Err(Status::LOAD_ERROR);
        }
        if block_size > table.len() {
            log::error!(
                "PE: Reloc {} block size {} greater than reloc dir size {}",
                index,
                block_size,
                table.len()
            );
            return Err(Status::LOAD_ERROR);
        }
        if block_size > rest.len() {
            log::error!("PE: Reloc {} block runs past the table", index);
            return Err(Status::LOAD_ERROR);
        }

        let entries = &rest[BASE_RELOCATION_BLOCK_SIZE..block_size];
        for raw in entries.chunks_exact(2) {
            let entry = u16::from_le_bytes([raw[0], raw[1]]);
            let fixup = Fixup::try_from(entry >> 12).map_err(|kind| {
                log::error!("PE: Reloc {} unknown relocation type {}", index, kind);
                Status::UNSUPPORTED
            })?;
            if fixup == Fixup::Absolute {
                continue;
            }

            let target = page
                .checked_add((entry & 0x0FFF) as u32)
                .ok_or(Status::LOAD_ERROR)?;
            let field = translate_mut(region, target, fixup.width()).inspect_err(|_| {
                log::error!("PE: Reloc {} invalid target address {:#x}", index, target);
            })?;
            fixup.apply(field, adjust);
        }

        offset += block_size;
        index += 1;
    }

    log::debug!("PE: Applied {} relocation blocks", index);
    Ok(())
}
