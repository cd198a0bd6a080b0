//! LZ4 frame decoding
//!
//! Frame and block framing are handled here; block payloads are decoded with
//! `lz4_flex`. Linked blocks are decoded against the preceding 64 KiB of
//! output, which stays resident because the whole image is decoded into one
//! buffer.

use alloc::vec::Vec;
use core::hash::Hasher;

use r_efi::efi::Status;
use twox_hash::XxHash32;

use super::ChunkedInput;
use crate::buffer::Buffer;

/// LZ4 frame magic, little-endian
pub const LZ4_MAGIC: u32 = 0x184D_2204;

/// FLG byte
const FLG_VERSION_MASK: u8 = 0xC0;
const FLG_VERSION: u8 = 0x40;
const FLG_BLOCK_INDEPENDENT: u8 = 1 << 5;
const FLG_BLOCK_CHECKSUM: u8 = 1 << 4;
const FLG_CONTENT_SIZE: u8 = 1 << 3;
const FLG_CONTENT_CHECKSUM: u8 = 1 << 2;
const FLG_RESERVED: u8 = 1 << 1;
const FLG_DICT_ID: u8 = 1 << 0;

/// BD byte reserved bits
const BD_RESERVED: u8 = 0x8F;

/// High bit of a block size word marks an uncompressed block
const BLOCK_UNCOMPRESSED: u32 = 0x8000_0000;

/// Window of previous output linked blocks may reference
const LINKED_WINDOW: usize = 64 * 1024;

/// Parsed frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub independent_blocks: bool,
    pub block_checksums: bool,
    pub content_checksum: bool,
    pub block_max_size: usize,
    pub content_size: Option<u64>,
    pub dict_id: Option<u32>,
}

fn xxh32(data: &[u8]) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(data);
    hasher.finish() as u32
}

/// Read the magic number and frame descriptor
pub fn read_descriptor(input: &mut ChunkedInput<'_>) -> Result<FrameDescriptor, Status> {
    if input.read_u32()? != LZ4_MAGIC {
        return Err(Status::UNSUPPORTED);
    }

    // FLG, BD, content size, dictionary id
    let mut descriptor = [0u8; 14];
    input.read_exact(&mut descriptor[..2])?;
    let flags = descriptor[0];
    let block_descriptor = descriptor[1];

    if flags & FLG_VERSION_MASK != FLG_VERSION {
        log::error!("LZ4: unsupported frame version {}", flags >> 6);
        return Err(Status::UNSUPPORTED);
    }
    if flags & FLG_RESERVED != 0 || block_descriptor & BD_RESERVED != 0 {
        log::error!("LZ4: reserved frame descriptor bits set");
        return Err(Status::COMPROMISED_DATA);
    }

    let block_max_size = match (block_descriptor >> 4) & 0x7 {
        4 => 64 * 1024,
        5 => 256 * 1024,
        6 => 1024 * 1024,
        7 => 4 * 1024 * 1024,
        id => {
            log::error!("LZ4: invalid block maximum size id {}", id);
            return Err(Status::COMPROMISED_DATA);
        }
    };

    let mut len = 2;
    let mut content_size = None;
    if flags & FLG_CONTENT_SIZE != 0 {
        input.read_exact(&mut descriptor[len..len + 8])?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&descriptor[len..len + 8]);
        content_size = Some(u64::from_le_bytes(bytes));
        len += 8;
    }
    let mut dict_id = None;
    if flags & FLG_DICT_ID != 0 {
        input.read_exact(&mut descriptor[len..len + 4])?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&descriptor[len..len + 4]);
        dict_id = Some(u32::from_le_bytes(bytes));
        len += 4;
    }

    let mut header_checksum = [0u8; 1];
    input.read_exact(&mut header_checksum)?;
    let expected = ((xxh32(&descriptor[..len]) >> 8) & 0xFF) as u8;
    if header_checksum[0] != expected {
        log::error!(
            "LZ4: frame header checksum mismatch ({:#04x} != {:#04x})",
            header_checksum[0],
            expected
        );
        return Err(Status::COMPROMISED_DATA);
    }

    Ok(FrameDescriptor {
        independent_blocks: flags & FLG_BLOCK_INDEPENDENT != 0,
        block_checksums: flags & FLG_BLOCK_CHECKSUM != 0,
        content_checksum: flags & FLG_CONTENT_CHECKSUM != 0,
        block_max_size,
        content_size,
        dict_id,
    })
}

/// Decode one LZ4 frame into a buffer of exactly its content size
pub fn decompress(mut input: ChunkedInput<'_>) -> Result<Buffer, Status> {
    let frame = read_descriptor(&mut input)?;
    log::debug!("LZ4: {:?}", frame);

    if let Some(id) = frame.dict_id {
        log::error!("LZ4: frame requires dictionary {:#x}", id);
        return Err(Status::UNSUPPORTED);
    }
    let content_size = frame.content_size.ok_or_else(|| {
        log::error!("LZ4: frame does not record its content size");
        Status::UNSUPPORTED
    })?;
    let size = usize::try_from(content_size).map_err(|_| Status::OUT_OF_RESOURCES)?;

    let mut output = Buffer::with_capacity(size)?;
    let mut block = Vec::new();
    block
        .try_reserve_exact(frame.block_max_size)
        .map_err(|_| Status::OUT_OF_RESOURCES)?;
    block.resize(frame.block_max_size, 0);

    let mut content_hash = XxHash32::with_seed(0);
    loop {
        let word = input.read_u32()?;
        if word == 0 {
            // EndMark
            break;
        }

        let stored = word & BLOCK_UNCOMPRESSED != 0;
        let len = (word & !BLOCK_UNCOMPRESSED) as usize;
        if len > frame.block_max_size {
            log::error!("LZ4: block of {} bytes exceeds the frame maximum", len);
            return Err(Status::COMPROMISED_DATA);
        }
        let data = &mut block[..len];
        input.read_exact(data)?;

        if frame.block_checksums {
            let expected = input.read_u32()?;
            if xxh32(data) != expected {
                log::error!("LZ4: block checksum mismatch");
                return Err(Status::COMPROMISED_DATA);
            }
        }

        let start = output.len();
        let produced = if stored {
            let target = output
                .unfilled_mut()
                .get_mut(..len)
                .ok_or(Status::COMPROMISED_DATA)?;
            target.copy_from_slice(data);
            len
        } else if frame.independent_blocks {
            lz4_flex::block::decompress_into(data, output.unfilled_mut())
                .map_err(|err| {
                    log::error!("LZ4: block decoding failed: {:?}", err);
                    Status::COMPROMISED_DATA
                })?
        } else {
            let (filled, unfilled) = output.split_filled_mut();
            let window = &filled[filled.len().saturating_sub(LINKED_WINDOW)..];
            lz4_flex::block::decompress_into_with_dict(data, unfilled, window).map_err(|err| {
                log::error!("LZ4: block decoding failed: {:?}", err);
                Status::COMPROMISED_DATA
            })?
        };
        output.commit(produced)?;

        if frame.content_checksum {
            content_hash.write(&output.as_slice()[start..]);
        }
    }

    if frame.content_checksum {
        let expected = input.read_u32()?;
        let actual = content_hash.finish() as u32;
        if actual != expected {
            log::error!(
                "LZ4: content checksum mismatch ({:#010x} != {:#010x})",
                actual,
                expected
            );
            return Err(Status::COMPROMISED_DATA);
        }
    }

    if output.len() != size {
        log::error!("LZ4: frame ended after {} of {} bytes", output.len(), size);
        return Err(Status::COMPROMISED_DATA);
    }

    Ok(output)
}
