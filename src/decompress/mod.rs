//! Payload decompression
//!
//! Detects the container format from the first four bytes of a file and
//! streams it into a buffer sized for the full uncompressed content:
//!
//! - zstd frames ([`zstd`])
//! - LZ4 frames ([`lz4`])
//! - plain PE images, passed through unchanged
//!
//! Input is pulled from a [`ByteSource`] in chunks, so only one chunk of the
//! compressed file is resident at a time.

pub mod lz4;
pub mod zstd;

use r_efi::efi::Status;

use crate::buffer::Buffer;

/// Size of a single read from the input source
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Sequential byte source with a known total length
pub trait ByteSource {
    /// Total length in bytes
    fn len(&self) -> u64;

    /// Read up to `buf.len()` bytes, returning 0 at the end
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Status>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A byte source over borrowed memory
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl ByteSource for SliceSource<'_> {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        let count = buf.len().min(self.data.len() - self.pos);
        buf[..count].copy_from_slice(&self.data[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }
}

enum MagicNumber {
    Zstd,
    Lz4,
    Pe,
}

#[derive(Debug)]
struct InvalidMagicNumber;

impl TryFrom<&[u8]> for MagicNumber {
    type Error = InvalidMagicNumber;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        match *slice {
            [0x28, 0xB5, 0x2F, 0xFD, ..] => Ok(Self::Zstd),
            [0x04, 0x22, 0x4D, 0x18, ..] => Ok(Self::Lz4),
            [b'M', b'Z', ..] => Ok(Self::Pe),
            _ => Err(InvalidMagicNumber),
        }
    }
}

/// Compressed input: the current chunk plus the source it is refilled from
pub struct ChunkedInput<'a> {
    chunk: Buffer,
    source: &'a mut dyn ByteSource,
    /// Total input length
    total: u64,
    /// Bytes taken from the source so far, the first chunk included
    consumed: u64,
    /// Status of a failed source read, recorded for callers behind a codec
    pub error: Option<Status>,
}

impl<'a> ChunkedInput<'a> {
    /// `chunk` holds the first bytes of the input, `source` the rest
    pub fn new(chunk: Buffer, source: &'a mut dyn ByteSource, total: u64) -> Self {
        let consumed = chunk.len() as u64;
        Self {
            chunk,
            source,
            total,
            consumed,
            error: None,
        }
    }

    /// Unread bytes of the current chunk
    pub fn buffered(&self) -> &[u8] {
        self.chunk.remaining()
    }

    /// Total bytes taken from the source
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Refill the chunk if it has been read completely
    ///
    /// Returns `false` once the input is exhausted.
    fn refill(&mut self) -> Result<bool, Status> {
        if !self.chunk.remaining().is_empty() {
            return Ok(true);
        }
        if self.consumed >= self.total {
            return Ok(false);
        }

        self.chunk.clear();
        let count = self.source.read(self.chunk.unfilled_mut()).inspect_err(|status| {
            log::error!("Unable to read file: {:?}", status);
        })?;
        self.chunk.commit(count)?;
        self.consumed += count as u64;
        Ok(count > 0)
    }

    /// Read up to `buf.len()` bytes, returning 0 at the end of the input
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        if buf.is_empty() || !self.refill()? {
            return Ok(0);
        }
        let available = self.chunk.remaining();
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.chunk.advance(count)?;
        Ok(count)
    }

    /// Fill `buf` completely; running out of input is corruption
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Status> {
        let mut filled = 0;
        while filled < buf.len() {
            let count = self.read(&mut buf[filled..])?;
            if count == 0 {
                log::error!("Unexpected end of compressed stream");
                return Err(Status::COMPROMISED_DATA);
            }
            filled += count;
        }
        Ok(())
    }

    /// Read a little-endian u32
    pub fn read_u32(&mut self) -> Result<u32, Status> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }
}

/// Read from `source` into the free space of `buffer` until it is full or
/// the source ends
pub fn fill_buffer(source: &mut dyn ByteSource, buffer: &mut Buffer) -> Result<(), Status> {
    while !buffer.unfilled_mut().is_empty() {
        let count = source.read(buffer.unfilled_mut()).inspect_err(|status| {
            log::error!("Unable to read file: {:?}", status);
        })?;
        if count == 0 {
            break;
        }
        buffer.commit(count)?;
    }
    Ok(())
}

/// Decode the input starting with `input` and continuing in `source`
///
/// `total_size` is the full input length, `input` included.
pub fn decompress(
    input: Buffer,
    source: &mut dyn ByteSource,
    total_size: u64,
) -> Result<Buffer, Status> {
    if input.is_empty() {
        return Err(Status::INVALID_PARAMETER);
    }

    let magic = MagicNumber::try_from(input.remaining()).map_err(|_| {
        log::error!("Unknown payload format");
        Status::UNSUPPORTED
    })?;

    let output = match magic {
        MagicNumber::Pe => passthrough(input, source, total_size),
        MagicNumber::Zstd => zstd::decompress(ChunkedInput::new(input, source, total_size)),
        MagicNumber::Lz4 => lz4::decompress(ChunkedInput::new(input, source, total_size)),
    }?;

    log::info!(
        "Decompressed {} bytes into {} bytes",
        total_size,
        output.len()
    );
    Ok(output)
}

/// Read the start of `source` and decode the whole file
pub fn decompress_file(source: &mut dyn ByteSource) -> Result<Buffer, Status> {
    let file_size = source.len();
    if file_size == 0 {
        log::error!("Payload is empty");
        return Err(Status::INVALID_PARAMETER);
    }

    let chunk = usize::try_from(file_size).map_or(CHUNK_SIZE, |size| size.min(CHUNK_SIZE));
    log::debug!("buffer: {} file: {}", chunk, file_size);

    let mut input = Buffer::with_capacity(chunk)?;
    fill_buffer(source, &mut input)?;
    log::debug!("read: {}", input.len());

    decompress(input, source, file_size)
}

/// Hand an uncompressed image through, reading the rest into the same buffer
fn passthrough(
    mut input: Buffer,
    source: &mut dyn ByteSource,
    total_size: u64,
) -> Result<Buffer, Status> {
    let total = usize::try_from(total_size).map_err(|_| Status::OUT_OF_RESOURCES)?;
    if total > input.len() {
        input.grow_to(total)?;
        fill_buffer(source, &mut input)?;
    }
    if input.len() < total {
        log::warn!(
            "Image file ended after {} of {} bytes",
            input.len(),
            total
        );
    }
    log::debug!("Uncompressed image, {} bytes", input.len());
    Ok(input)
}
