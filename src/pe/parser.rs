//! PE header parser and validator
//!
//! Walks the DOS stub, COFF header and PE32/PE32+ optional header of a source
//! image and produces a [`LoaderContext`]. Every offset taken from the image
//! is checked against the source length with overflow-checked arithmetic
//! before it is used.

use r_efi::efi::Status;
use zerocopy::FromBytes;

use super::headers::*;
use crate::efi::PAGE_SIZE;

/// Default file alignment when the header declares 0
const DEFAULT_FILE_ALIGNMENT: u32 = 0x200;

/// Target an image must be built for to be loadable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// COFF machine type
    pub machine: u16,
    /// PE32+ (64-bit) instead of PE32
    pub pe32_plus: bool,
}

impl Platform {
    /// The platform this loader was built for
    pub const fn native() -> Self {
        let machine = if cfg!(target_arch = "x86_64") {
            IMAGE_FILE_MACHINE_AMD64
        } else if cfg!(target_arch = "x86") {
            IMAGE_FILE_MACHINE_I386
        } else if cfg!(target_arch = "aarch64") {
            IMAGE_FILE_MACHINE_ARM64
        } else if cfg!(target_arch = "arm") {
            IMAGE_FILE_MACHINE_ARMTHUMB_MIXED
        } else if cfg!(target_arch = "riscv64") {
            IMAGE_FILE_MACHINE_RISCV64
        } else if cfg!(target_arch = "riscv32") {
            IMAGE_FILE_MACHINE_RISCV32
        } else if cfg!(target_arch = "loongarch64") {
            IMAGE_FILE_MACHINE_LOONGARCH64
        } else {
            0
        };

        Self {
            machine,
            pe32_plus: cfg!(target_pointer_width = "64"),
        }
    }
}

/// Optional header as found on disk
#[derive(Clone, Copy)]
pub enum OptionalHeader {
    Hdr32(OptionalHeader32),
    Hdr64(OptionalHeader64),
}

impl OptionalHeader {
    /// Size of the fixed part, before the data directories
    pub fn fixed_size(&self) -> usize {
        match self {
            Self::Hdr32(_) => OPTIONAL_HEADER32_SIZE,
            Self::Hdr64(_) => OPTIONAL_HEADER64_SIZE,
        }
    }

    pub fn is_pe32_plus(&self) -> bool {
        matches!(self, Self::Hdr64(_))
    }

    fn fields(&self) -> HeaderFields {
        match *self {
            Self::Hdr32(h) => HeaderFields {
                image_base: h.image_base as u64,
                entry_point: h.address_of_entry_point,
                section_alignment: h.section_alignment,
                file_alignment: h.file_alignment,
                size_of_image: h.size_of_image,
                size_of_headers: h.size_of_headers,
                subsystem: h.subsystem,
                number_of_rva_and_sizes: h.number_of_rva_and_sizes,
            },
            Self::Hdr64(h) => HeaderFields {
                image_base: h.image_base,
                entry_point: h.address_of_entry_point,
                section_alignment: h.section_alignment,
                file_alignment: h.file_alignment,
                size_of_image: h.size_of_image,
                size_of_headers: h.size_of_headers,
                subsystem: h.subsystem,
                number_of_rva_and_sizes: h.number_of_rva_and_sizes,
            },
        }
    }
}

/// Optional header fields shared by both layouts
struct HeaderFields {
    image_base: u64,
    entry_point: u32,
    section_alignment: u32,
    file_alignment: u32,
    size_of_image: u32,
    size_of_headers: u32,
    subsystem: u16,
    number_of_rva_and_sizes: u32,
}

/// Validated image headers, independent of the PE32/PE32+ layout
#[derive(Clone, Copy)]
pub struct LoaderContext<'a> {
    /// Source image bytes
    pub source: &'a [u8],
    pub machine: u16,
    pub pe32_plus: bool,
    /// Preferred load address
    pub image_base: u64,
    /// Entry point RVA
    pub entry_point: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub number_of_sections: u16,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub subsystem: u16,
    pub number_of_rva_and_sizes: u32,
    /// Offset of the section table in the source
    pub section_table_offset: usize,
    /// Base relocation directory, if the directory array has the entry
    pub reloc_directory: Option<DataDirectory>,
    /// Resource directory, if the directory array has the entry
    pub resource_directory: Option<DataDirectory>,
}

impl<'a> LoaderContext<'a> {
    /// Read section header `index` from the source
    pub fn section(&self, index: u16) -> Result<SectionHeader, Status> {
        let offset = (index as usize)
            .checked_mul(SECTION_HEADER_SIZE)
            .and_then(|o| o.checked_add(self.section_table_offset))
            .ok_or(Status::LOAD_ERROR)?;
        let bytes = self.source.get(offset..).ok_or(Status::LOAD_ERROR)?;
        SectionHeader::read_from_prefix(bytes)
            .map(|(section, _)| section)
            .map_err(|_| Status::LOAD_ERROR)
    }

    /// Iterate over all section headers
    pub fn sections(&self) -> impl Iterator<Item = Result<SectionHeader, Status>> + '_ {
        (0..self.number_of_sections).map(move |i| self.section(i))
    }

    /// Base relocation directory if present and non-empty
    pub fn relocations(&self) -> Option<DataDirectory> {
        self.reloc_directory.filter(|dir| dir.size != 0)
    }
}

/// Parse and validate the headers of `source` for `platform`
///
/// Structural problems yield `LOAD_ERROR`; images that are well formed but
/// cannot run here (wrong machine, bit width, no relocations) yield
/// `UNSUPPORTED`.
pub fn parse_headers(source: &[u8], platform: Platform) -> Result<LoaderContext<'_>, Status> {
    // DOS stub
    let Ok((dos, _)) = DosHeader::read_from_prefix(source) else {
        log::error!("PE: Data too small for DOS header");
        return Err(Status::LOAD_ERROR);
    };
    let e_magic = dos.e_magic;
    if e_magic != DOS_MAGIC {
        log::error!("PE: Invalid DOS magic: {:#x}", e_magic);
        return Err(Status::LOAD_ERROR);
    }
    let pe_offset = dos.e_lfanew as usize;

    // PE signature, COFF header and the optional header magic
    let coff_offset = pe_offset.checked_add(4).ok_or(Status::LOAD_ERROR)?;
    let opt_offset = coff_offset
        .checked_add(COFF_HEADER_SIZE)
        .ok_or(Status::LOAD_ERROR)?;
    let minimal_end = opt_offset.checked_add(2).ok_or(Status::LOAD_ERROR)?;
    if minimal_end > source.len() {
        log::error!("PE: Invalid PE offset {:#x}", pe_offset);
        return Err(Status::LOAD_ERROR);
    }

    let signature = read_u32(source, pe_offset)?;
    if signature != PE_SIGNATURE {
        log::error!("PE: Invalid PE signature: {:#x}", signature);
        return Err(Status::LOAD_ERROR);
    }

    let (coff, _) =
        CoffHeader::read_from_prefix(&source[coff_offset..]).map_err(|_| Status::LOAD_ERROR)?;
    let opt_magic = read_u16(source, opt_offset)?;

    check_loadable(&coff, opt_magic, platform)?;

    let opt_bytes = &source[opt_offset..];
    let optional = match opt_magic {
        PE32_MAGIC => OptionalHeader32::read_from_prefix(opt_bytes)
            .map(|(h, _)| OptionalHeader::Hdr32(h))
            .ok(),
        _ => OptionalHeader64::read_from_prefix(opt_bytes)
            .map(|(h, _)| OptionalHeader::Hdr64(h))
            .ok(),
    };
    let Some(optional) = optional else {
        log::error!("PE: Optional header extends beyond data");
        return Err(Status::LOAD_ERROR);
    };
    let fields = optional.fields();

    // Alignment defaults
    let mut file_alignment = fields.file_alignment;
    if file_alignment % 2 != 0 {
        log::error!("PE: File alignment is odd ({})", file_alignment);
        return Err(Status::LOAD_ERROR);
    }
    if file_alignment == 0 {
        file_alignment = DEFAULT_FILE_ALIGNMENT;
        log::debug!("PE: File alignment is 0, using {:#x}", file_alignment);
    }
    let mut section_alignment = fields.section_alignment;
    if section_alignment == 0 {
        section_alignment = file_alignment.max(PAGE_SIZE as u32);
        log::debug!("PE: Section alignment is 0, using {:#x}", section_alignment);
    }

    // Directory array
    let dir_count = fields.number_of_rva_and_sizes;
    if dir_count > IMAGE_NUMBEROF_DIRECTORY_ENTRIES {
        log::error!("PE: Too many data directories: {}", dir_count);
        return Err(Status::LOAD_ERROR);
    }
    let opt_size = coff.size_of_optional_header as usize;
    let dirs_size = dir_count as usize * DATA_DIRECTORY_SIZE;
    if opt_size != optional.fixed_size() + dirs_size {
        log::error!(
            "PE: Optional header size {:#x} does not match {} directories",
            opt_size,
            dir_count
        );
        return Err(Status::LOAD_ERROR);
    }

    // Section table
    let number_of_sections = coff.number_of_sections;
    if number_of_sections > MAX_NUMBER_OF_SECTIONS {
        log::error!("PE: Too many sections: {}", number_of_sections);
        return Err(Status::LOAD_ERROR);
    }
    let section_table_offset = opt_offset
        .checked_add(opt_size)
        .ok_or(Status::LOAD_ERROR)?;
    let size_of_image = fields.size_of_image as usize;
    let size_of_headers = fields.size_of_headers as usize;
    let sections = number_of_sections as usize;

    let fits_in = |limit: usize| {
        limit
            .checked_sub(section_table_offset)
            .is_some_and(|room| room / SECTION_HEADER_SIZE >= sections)
    };
    if !fits_in(size_of_image) {
        log::error!("PE: Image section list overflows image size");
        return Err(Status::LOAD_ERROR);
    }
    if !fits_in(size_of_headers) {
        log::error!("PE: Image sections overflow section header");
        return Err(Status::LOAD_ERROR);
    }
    if size_of_image < size_of_headers {
        log::error!("PE: Header size exceeds image size");
        return Err(Status::LOAD_ERROR);
    }
    if size_of_headers > source.len() {
        log::error!(
            "PE: Header size {:#x} exceeds file size {:#x}",
            size_of_headers,
            source.len()
        );
        return Err(Status::LOAD_ERROR);
    }

    let dirs_offset = opt_offset + optional.fixed_size();
    let directory = |index: usize| -> Result<Option<DataDirectory>, Status> {
        if index >= dir_count as usize {
            return Ok(None);
        }
        let offset = dirs_offset + index * DATA_DIRECTORY_SIZE;
        let bytes = source.get(offset..).ok_or(Status::LOAD_ERROR)?;
        DataDirectory::read_from_prefix(bytes)
            .map(|(dir, _)| Some(dir))
            .map_err(|_| Status::LOAD_ERROR)
    };
    let reloc_directory = directory(IMAGE_DIRECTORY_ENTRY_BASERELOC)?;
    let resource_directory = directory(IMAGE_DIRECTORY_ENTRY_RESOURCE)?;

    log::debug!(
        "PE: image_base={:#x}, size={:#x}, entry_rva={:#x}, sections={}",
        fields.image_base,
        fields.size_of_image,
        fields.entry_point,
        number_of_sections
    );

    Ok(LoaderContext {
        source,
        machine: coff.machine,
        pe32_plus: optional.is_pe32_plus(),
        image_base: fields.image_base,
        entry_point: fields.entry_point,
        size_of_image: fields.size_of_image,
        size_of_headers: fields.size_of_headers,
        number_of_sections,
        section_alignment,
        file_alignment,
        subsystem: fields.subsystem,
        number_of_rva_and_sizes: dir_count,
        section_table_offset,
        reloc_directory,
        resource_directory,
    })
}

/// Check that an image with these headers can run on `platform`
fn check_loadable(coff: &CoffHeader, opt_magic: u16, platform: Platform) -> Result<(), Status> {
    let machine = coff.machine;
    let characteristics = coff.characteristics;

    if machine != platform.machine {
        log::error!(
            "PE: Unsupported machine type {:#x}, expected {:#x}",
            machine,
            platform.machine
        );
        return Err(Status::UNSUPPORTED);
    }
    if characteristics & (IMAGE_FILE_EXECUTABLE_IMAGE | IMAGE_FILE_DLL) == 0 {
        log::error!("PE: Not a loadable image ({:#x})", characteristics);
        return Err(Status::UNSUPPORTED);
    }
    if characteristics & IMAGE_FILE_RELOCS_STRIPPED != 0 {
        log::error!("PE: Image is stripped of relocations");
        return Err(Status::UNSUPPORTED);
    }
    if characteristics & (IMAGE_FILE_BYTES_REVERSED_LO | IMAGE_FILE_BYTES_REVERSED_HI) != 0 {
        log::error!("PE: Big endian image");
        return Err(Status::UNSUPPORTED);
    }

    let pe32_plus = match opt_magic {
        PE32_MAGIC => false,
        PE32_PLUS_MAGIC => true,
        _ => {
            log::error!("PE: Invalid optional header magic {:#x}", opt_magic);
            return Err(Status::UNSUPPORTED);
        }
    };
    if pe32_plus != platform.pe32_plus {
        log::error!(
            "PE: {}-bit image not supported",
            if pe32_plus { 64 } else { 32 }
        );
        return Err(Status::UNSUPPORTED);
    }

    Ok(())
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, Status> {
    offset
        .checked_add(2)
        .and_then(|end| data.get(offset..end))
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(Status::LOAD_ERROR)
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, Status> {
    offset
        .checked_add(4)
        .and_then(|end| data.get(offset..end))
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(Status::LOAD_ERROR)
}
