//! zstd frame decoding
//!
//! The frame header is parsed up front to size the output buffer from the
//! frame content size; the frame itself is decoded with ruzstd, streaming
//! from the chunked input.

use r_efi::efi::Status;
use ruzstd::{FrameDecoder, StreamingDecoder};
use ruzstd::io::Read;

use super::ChunkedInput;
use crate::buffer::Buffer;

/// zstd frame magic, little-endian
pub const ZSTD_MAGIC: u32 = 0xFD2F_B528;

/// Frame_Header_Descriptor bits
const FHD_SINGLE_SEGMENT: u8 = 1 << 5;
const FHD_RESERVED: u8 = 1 << 3;

/// Read the Frame_Content_Size from the frame header at the start of `data`
///
/// Frames without a content size or with a dictionary are unsupported.
pub fn frame_content_size(data: &[u8]) -> Result<u64, Status> {
    let magic = data
        .get(..4)
        .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    if magic != Some(ZSTD_MAGIC) {
        return Err(Status::UNSUPPORTED);
    }
    let descriptor = *data.get(4).ok_or(Status::COMPROMISED_DATA)?;
    if descriptor & FHD_RESERVED != 0 {
        log::error!("ZSTD: reserved frame header bit set");
        return Err(Status::COMPROMISED_DATA);
    }

    let single_segment = descriptor & FHD_SINGLE_SEGMENT != 0;
    let mut pos = 5;
    if !single_segment {
        // Window_Descriptor
        pos += 1;
    }

    let dict_id_size = match descriptor & 0x3 {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    };
    let dict_id = read_le(data, pos, dict_id_size)?;
    if dict_id != 0 {
        log::error!("ZSTD: frame requires dictionary {:#x}", dict_id);
        return Err(Status::UNSUPPORTED);
    }
    pos += dict_id_size;

    let fcs_size = match descriptor >> 6 {
        0 if single_segment => 1,
        0 => 0,
        1 => 2,
        2 => 4,
        _ => 8,
    };
    if fcs_size == 0 {
        log::error!("ZSTD: frame does not record its content size");
        return Err(Status::UNSUPPORTED);
    }

    let size = read_le(data, pos, fcs_size)?;
    Ok(if fcs_size == 2 { size + 256 } else { size })
}

fn read_le(data: &[u8], pos: usize, len: usize) -> Result<u64, Status> {
    let bytes = data.get(pos..pos + len).ok_or(Status::COMPROMISED_DATA)?;
    Ok(bytes
        .iter()
        .rev()
        .fold(0u64, |value, &byte| (value << 8) | u64::from(byte)))
}

/// Adapts the chunked input to ruzstd's reader trait
struct ZstdInput<'a, 'b>(&'a mut ChunkedInput<'b>);

impl Read for ZstdInput<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ruzstd::io::Error> {
        self.0.read(buf).map_err(|status| {
            self.0.error = Some(status);
            ruzstd::io::Error::from(ruzstd::io::ErrorKind::Other)
        })
    }
}

/// Decode one zstd frame into a buffer of exactly its content size
pub fn decompress(mut input: ChunkedInput<'_>) -> Result<Buffer, Status> {
    let content_size = frame_content_size(input.buffered())?;
    let size = usize::try_from(content_size).map_err(|_| Status::OUT_OF_RESOURCES)?;
    log::debug!("ZSTD: frame content size {}", size);

    let mut output = Buffer::with_capacity(size)?;
    let mut frame = FrameDecoder::new();

    let streamed = stream(&mut input, &mut frame, &mut output);
    if let Some(status) = input.error.take() {
        return Err(status);
    }
    streamed.map_err(|()| Status::COMPROMISED_DATA)?;

    if output.len() != size {
        log::error!(
            "ZSTD: frame ended after {} of {} bytes",
            output.len(),
            size
        );
        return Err(Status::COMPROMISED_DATA);
    }

    if let (Some(expected), Some(actual)) =
        (frame.get_checksum_from_data(), frame.get_calculated_checksum())
    {
        if expected != actual {
            log::error!(
                "ZSTD: content checksum mismatch ({:#010x} != {:#010x})",
                actual,
                expected
            );
            return Err(Status::COMPROMISED_DATA);
        }
    }

    Ok(output)
}

fn stream(
    input: &mut ChunkedInput<'_>,
    frame: &mut FrameDecoder,
    output: &mut Buffer,
) -> Result<(), ()> {
    let mut decoder = StreamingDecoder::new_with_decoder(ZstdInput(input), frame)
        .map_err(|err| log::error!("ZSTD: invalid frame header: {:?}", err))?;

    while !output.unfilled_mut().is_empty() {
        let count = decoder
            .read(output.unfilled_mut())
            .map_err(|_| log::error!("ZSTD: frame decoding failed"))?;
        if count == 0 {
            break;
        }
        output.commit(count).map_err(|_| ())?;
    }

    // Anything past the declared size means the header lied
    let mut probe = [0u8; 1];
    let extra = decoder
        .read(&mut probe)
        .map_err(|_| log::error!("ZSTD: frame decoding failed"))?;
    if extra != 0 {
        log::error!("ZSTD: frame holds more than its declared content size");
        return Err(());
    }
    Ok(())
}
