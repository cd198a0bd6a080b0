//! Test support: an in-memory firmware and a synthetic PE image builder

use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc::{Layout, alloc_zeroed, dealloc};

use r_efi::efi::{Guid, Handle, MemoryType, PhysicalAddress, Status, SystemTable};
use r_efi::protocols::device_path::Protocol as DevicePathProtocol;
use r_efi::protocols::loaded_image;
use spin::Mutex;

use crate::decompress::ByteSource;
use crate::efi::protocols::loaded_image::new_loaded_image;
use crate::efi::{Firmware, LOADED_IMAGE_PROTOCOL_GUID, PAGE_SIZE};
use crate::pe::headers::*;

static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(0x1000);

fn new_handle() -> usize {
    NEXT_HANDLE.fetch_add(0x10, Ordering::Relaxed)
}

static GLOBALS: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Serialize tests that touch the loader globals (firmware context, initrd)
pub fn serial() -> std::sync::MutexGuard<'static, ()> {
    GLOBALS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct HandleEntry {
    handle: usize,
    protocols: Vec<(Guid, usize)>,
}

#[derive(Default)]
struct Registry {
    pages: Vec<(u64, usize)>,
    handles: Vec<HandleEntry>,
    opened: Vec<(usize, Guid)>,
    transfers: Vec<(usize, u64)>,
    captured_options: Vec<u16>,
    firmware_images: Vec<usize>,
}

/// Firmware backed by host memory and an in-memory handle database
pub struct MockFirmware {
    registry: Mutex<Registry>,
    image_handle: usize,
    device_handle: usize,
    /// Bytes returned by `own_image`
    pub own_image: Vec<u8>,
    /// Options returned by `load_options`
    pub load_options: Vec<u16>,
    /// Files served by `open_file`
    pub files: Vec<(String, Vec<u8>)>,
    /// Every page allocation fails when set
    pub fail_allocations: bool,
    /// Interface installation fails with this status when set
    pub install_failure: Option<Status>,
    /// Result of `load_image_from_buffer`
    pub firmware_loader: Option<Status>,
    /// Status returned from started images
    pub exit_status: Status,
}

impl MockFirmware {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            image_handle: new_handle(),
            device_handle: new_handle(),
            own_image: Vec::new(),
            load_options: Vec::new(),
            files: Vec::new(),
            fail_allocations: false,
            install_failure: None,
            firmware_loader: Some(Status::UNSUPPORTED),
            exit_status: Status::SUCCESS,
        }
    }

    pub fn with_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.push((path.to_string(), data));
        self
    }

    /// Pages currently allocated and not freed
    pub fn allocated_page_count(&self) -> usize {
        self.registry.lock().pages.iter().map(|&(_, pages)| pages).sum()
    }

    /// Number of handles carrying at least one protocol
    pub fn handle_count(&self) -> usize {
        self.registry.lock().handles.len()
    }

    /// Interface installed for `guid` on `handle`
    pub fn interface(&self, handle: Handle, guid: &Guid) -> Option<*mut c_void> {
        let registry = self.registry.lock();
        registry
            .handles
            .iter()
            .find(|entry| entry.handle == handle as usize)
            .and_then(|entry| entry.protocols.iter().find(|(g, _)| g == guid))
            .map(|&(_, iface)| iface as *mut c_void)
    }

    /// Install an arbitrary interface, bypassing failure injection
    pub fn install_raw(&self, guid: Guid, interface: *mut c_void) -> Handle {
        let handle = new_handle();
        self.registry.lock().handles.push(HandleEntry {
            handle,
            protocols: vec![(guid, interface as usize)],
        });
        handle as Handle
    }

    /// Entry points transferred to, in order
    pub fn transfers(&self) -> Vec<(usize, u64)> {
        self.registry.lock().transfers.clone()
    }

    /// Load options seen by the last started image
    pub fn captured_options(&self) -> Vec<u16> {
        self.registry.lock().captured_options.clone()
    }

    fn capture_options(&self, handle: usize) {
        let Some(lp) = self.interface(handle as Handle, &LOADED_IMAGE_PROTOCOL_GUID) else {
            return;
        };
        let lp = lp as *const loaded_image::Protocol;
        let options = unsafe {
            let size = (*lp).load_options_size as usize / 2;
            let ptr = (*lp).load_options as *const u16;
            if ptr.is_null() {
                Vec::new()
            } else {
                std::slice::from_raw_parts(ptr, size).to_vec()
            }
        };
        self.registry.lock().captured_options = options;
    }
}

impl Drop for MockFirmware {
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        for &(address, pages) in &registry.pages {
            let layout = Layout::from_size_align(pages * PAGE_SIZE as usize, PAGE_SIZE as usize)
                .expect("page layout");
            unsafe { dealloc(address as usize as *mut u8, layout) };
        }
        for &handle in &registry.firmware_images {
            if let Some(entry) = registry.handles.iter().find(|e| e.handle == handle) {
                for &(_, iface) in &entry.protocols {
                    drop(unsafe { Box::from_raw(iface as *mut loaded_image::Protocol) });
                }
            }
        }
    }
}

impl Firmware for MockFirmware {
    fn allocate_pages(
        &self,
        _memory_type: MemoryType,
        pages: usize,
    ) -> Result<PhysicalAddress, Status> {
        if self.fail_allocations || pages == 0 {
            return Err(Status::OUT_OF_RESOURCES);
        }
        let layout = Layout::from_size_align(pages * PAGE_SIZE as usize, PAGE_SIZE as usize)
            .map_err(|_| Status::OUT_OF_RESOURCES)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Status::OUT_OF_RESOURCES);
        }
        let address = ptr as usize as u64;
        self.registry.lock().pages.push((address, pages));
        Ok(address)
    }

    fn free_pages(&self, address: PhysicalAddress, pages: usize) -> Status {
        let mut registry = self.registry.lock();
        let Some(index) = registry
            .pages
            .iter()
            .position(|&entry| entry == (address, pages))
        else {
            return Status::NOT_FOUND;
        };
        registry.pages.remove(index);
        let layout = Layout::from_size_align(pages * PAGE_SIZE as usize, PAGE_SIZE as usize)
            .expect("page layout");
        unsafe { dealloc(address as usize as *mut u8, layout) };
        Status::SUCCESS
    }

    fn install_protocol_interfaces(
        &self,
        handle: Handle,
        interfaces: &[(Guid, *mut c_void)],
    ) -> Result<Handle, Status> {
        if let Some(status) = self.install_failure {
            return Err(status);
        }
        let mut registry = self.registry.lock();
        let handle = if handle.is_null() {
            new_handle()
        } else {
            handle as usize
        };
        let index = match registry.handles.iter().position(|e| e.handle == handle) {
            Some(index) => index,
            None => {
                registry.handles.push(HandleEntry {
                    handle,
                    protocols: Vec::new(),
                });
                registry.handles.len() - 1
            }
        };
        let entry = &mut registry.handles[index];
        if interfaces
            .iter()
            .any(|(guid, _)| entry.protocols.iter().any(|(g, _)| g == guid))
        {
            if entry.protocols.is_empty() {
                registry.handles.remove(index);
            }
            return Err(Status::INVALID_PARAMETER);
        }
        entry
            .protocols
            .extend(interfaces.iter().map(|&(guid, iface)| (guid, iface as usize)));
        Ok(handle as Handle)
    }

    fn uninstall_protocol_interfaces(
        &self,
        handle: Handle,
        interfaces: &[(Guid, *mut c_void)],
    ) -> Status {
        let mut registry = self.registry.lock();
        let handle = handle as usize;
        if registry.opened.iter().any(|&(h, _)| h == handle) {
            return Status::ACCESS_DENIED;
        }
        let Some(index) = registry.handles.iter().position(|e| e.handle == handle) else {
            return Status::INVALID_PARAMETER;
        };
        let entry = &mut registry.handles[index];
        let all_present = interfaces.iter().all(|&(guid, iface)| {
            entry
                .protocols
                .iter()
                .any(|&(g, i)| g == guid && i == iface as usize)
        });
        if !all_present {
            return Status::NOT_FOUND;
        }
        entry.protocols.retain(|&(g, i)| {
            !interfaces
                .iter()
                .any(|&(guid, iface)| g == guid && i == iface as usize)
        });
        if entry.protocols.is_empty() {
            registry.handles.remove(index);
        }
        Status::SUCCESS
    }

    fn open_protocol_exclusive(&self, handle: Handle, guid: &Guid) -> Result<*mut c_void, Status> {
        let iface = self
            .interface(handle, guid)
            .ok_or(Status::UNSUPPORTED)?;
        let mut registry = self.registry.lock();
        if registry
            .opened
            .iter()
            .any(|&(h, g)| h == handle as usize && g == *guid)
        {
            return Err(Status::ACCESS_DENIED);
        }
        registry.opened.push((handle as usize, *guid));
        Ok(iface)
    }

    fn close_protocol(&self, handle: Handle, guid: &Guid) -> Status {
        let mut registry = self.registry.lock();
        let before = registry.opened.len();
        registry
            .opened
            .retain(|&(h, g)| !(h == handle as usize && g == *guid));
        if registry.opened.len() == before {
            Status::NOT_FOUND
        } else {
            Status::SUCCESS
        }
    }

    fn handle_protocol(&self, handle: Handle, guid: &Guid) -> Result<*mut c_void, Status> {
        self.interface(handle, guid).ok_or(Status::UNSUPPORTED)
    }

    fn locate_device_path(
        &self,
        guid: &Guid,
        path: *mut DevicePathProtocol,
    ) -> Result<Handle, Status> {
        let registry = self.registry.lock();
        registry
            .handles
            .iter()
            .find(|entry| {
                entry.protocols.iter().any(|(g, _)| g == guid)
                    && entry
                        .protocols
                        .iter()
                        .any(|&(g, iface)| g == r_efi::protocols::device_path::PROTOCOL_GUID && iface == path as usize)
            })
            .map(|entry| entry.handle as Handle)
            .ok_or(Status::NOT_FOUND)
    }

    fn transfer(&self, image: Handle, entry_point: u64) -> Status {
        self.capture_options(image as usize);
        self.registry
            .lock()
            .transfers
            .push((image as usize, entry_point));
        self.exit_status
    }

    fn load_image_from_buffer(&self, _data: &[u8]) -> Result<Handle, Status> {
        match self.firmware_loader {
            Some(status) => Err(status),
            None => {
                let protocol = Box::new(new_loaded_image(
                    self.image_handle(),
                    core::ptr::null_mut(),
                    self.device_handle(),
                    core::ptr::null_mut(),
                    0,
                    0,
                    None,
                ));
                let handle = self.install_raw(
                    LOADED_IMAGE_PROTOCOL_GUID,
                    Box::into_raw(protocol) as *mut c_void,
                );
                self.registry.lock().firmware_images.push(handle as usize);
                Ok(handle)
            }
        }
    }

    fn start_image(&self, image: Handle) -> Status {
        self.transfer(image, 0)
    }

    fn unload_image(&self, image: Handle) -> Status {
        let mut registry = self.registry.lock();
        let Some(index) = registry
            .firmware_images
            .iter()
            .position(|&h| h == image as usize)
        else {
            return Status::INVALID_PARAMETER;
        };
        registry.firmware_images.remove(index);
        if let Some(pos) = registry.handles.iter().position(|e| e.handle == image as usize) {
            let entry = registry.handles.remove(pos);
            for (_, iface) in entry.protocols {
                drop(unsafe { Box::from_raw(iface as *mut loaded_image::Protocol) });
            }
        }
        Status::SUCCESS
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn ByteSource>, Status> {
        self.files
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, data)| Box::new(VecSource::new(data.clone())) as Box<dyn ByteSource>)
            .ok_or(Status::NOT_FOUND)
    }

    fn image_handle(&self) -> Handle {
        self.image_handle as Handle
    }

    fn system_table(&self) -> *mut SystemTable {
        core::ptr::null_mut()
    }

    fn device_handle(&self) -> Handle {
        self.device_handle as Handle
    }

    fn own_image(&self) -> &[u8] {
        &self.own_image
    }

    fn load_options(&self) -> &[u16] {
        &self.load_options
    }
}

/// Owned byte source that hands out data in small reads
pub struct VecSource {
    data: Vec<u8>,
    pos: usize,
    /// Upper bound for a single read
    pub max_read: usize,
}

impl VecSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            max_read: usize::MAX,
        }
    }
}

impl ByteSource for VecSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        let count = buf.len().min(self.data.len() - self.pos).min(self.max_read);
        buf[..count].copy_from_slice(&self.data[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }
}

/// Bytes placed between guard bytes in a larger allocation
pub struct Guarded {
    backing: Vec<u8>,
    len: usize,
}

const GUARD: usize = 64;

impl Guarded {
    pub fn data(&self) -> &[u8] {
        &self.backing[GUARD..GUARD + self.len]
    }
}

/// Copy `data` into a buffer poisoned with guard bytes on both sides
pub fn guarded(data: &[u8]) -> Guarded {
    let mut backing = vec![0xA5; data.len() + 2 * GUARD];
    backing[GUARD..GUARD + data.len()].copy_from_slice(data);
    Guarded {
        backing,
        len: data.len(),
    }
}

/// Section characteristics used by the builder
pub const SCN_TEXT: u32 = 0x6000_0020;
pub const SCN_DATA: u32 = 0xC000_0040;
pub const SCN_BSS: u32 = 0xC000_0080;
pub const SCN_RELOC: u32 = 0x4200_0040;

/// Section description for [`PeBuilder`]
#[derive(Clone)]
pub struct SectionSpec {
    pub name: &'static str,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub data: Vec<u8>,
    /// Raw size, defaults to the data length rounded up to the file alignment
    pub raw_size: Option<u32>,
    /// Raw data pointer, defaults to the next free file offset
    pub raw_pointer: Option<u32>,
    pub characteristics: u32,
}

impl SectionSpec {
    pub fn new(name: &'static str, virtual_address: u32, virtual_size: u32, data: Vec<u8>) -> Self {
        Self {
            name,
            virtual_address,
            virtual_size,
            data,
            raw_size: None,
            raw_pointer: None,
            characteristics: SCN_DATA,
        }
    }

    pub fn text(virtual_address: u32, virtual_size: u32, data: Vec<u8>) -> Self {
        Self {
            characteristics: SCN_TEXT,
            ..Self::new(".text", virtual_address, virtual_size, data)
        }
    }

    pub fn data(virtual_address: u32, virtual_size: u32, data: Vec<u8>) -> Self {
        Self::new(".data", virtual_address, virtual_size, data)
    }

    pub fn bss(virtual_address: u32, virtual_size: u32) -> Self {
        Self {
            characteristics: SCN_BSS,
            raw_size: Some(0),
            ..Self::new(".bss", virtual_address, virtual_size, Vec::new())
        }
    }

    pub fn reloc(virtual_address: u32, table: Vec<u8>) -> Self {
        let size = table.len() as u32;
        Self {
            characteristics: SCN_RELOC,
            ..Self::new(".reloc", virtual_address, size, table)
        }
    }
}

/// Encode one base relocation block
pub fn reloc_block(page: u32, entries: &[u16]) -> Vec<u8> {
    let size = (BASE_RELOCATION_BLOCK_SIZE + entries.len() * 2) as u32;
    let mut block = Vec::with_capacity(size as usize);
    block.extend_from_slice(&page.to_le_bytes());
    block.extend_from_slice(&size.to_le_bytes());
    for entry in entries {
        block.extend_from_slice(&entry.to_le_bytes());
    }
    block
}

/// Relocation entry of `kind` at page offset `offset`
pub const fn reloc_entry(kind: u16, offset: u16) -> u16 {
    (kind << 12) | (offset & 0x0FFF)
}

/// Builder for small synthetic PE images
#[derive(Clone)]
pub struct PeBuilder {
    pub machine: u16,
    pub pe32_plus: bool,
    pub characteristics: u16,
    pub image_base: u64,
    pub entry_point: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub subsystem: u16,
    /// Overrides the declared directory count (16 are always written)
    pub number_of_rva_and_sizes: Option<u32>,
    /// Overrides the declared optional header size
    pub size_of_optional_header: Option<u16>,
    pub directories: [(u32, u32); 16],
    pub sections: Vec<SectionSpec>,
}

const PE_OFFSET: usize = 0x40;

impl PeBuilder {
    /// A native image with 0x3000 bytes of image and 0x400 bytes of headers
    pub fn new() -> Self {
        let platform = crate::pe::Platform::native();
        Self {
            machine: platform.machine,
            pe32_plus: platform.pe32_plus,
            characteristics: IMAGE_FILE_EXECUTABLE_IMAGE,
            image_base: if platform.pe32_plus {
                0x1_4000_0000
            } else {
                0x40_0000
            },
            entry_point: 0x1000,
            section_alignment: 0x1000,
            file_alignment: 0x200,
            size_of_image: 0x3000,
            size_of_headers: 0x400,
            subsystem: IMAGE_SUBSYSTEM_EFI_APPLICATION,
            number_of_rva_and_sizes: None,
            size_of_optional_header: None,
            directories: [(0, 0); 16],
            sections: Vec::new(),
        }
    }

    pub fn section(mut self, section: SectionSpec) -> Self {
        self.sections.push(section);
        self
    }

    pub fn directory(mut self, index: usize, virtual_address: u32, size: u32) -> Self {
        self.directories[index] = (virtual_address, size);
        self
    }

    /// Add a `.reloc` section at `virtual_address` and point the directory at it
    pub fn relocations(self, virtual_address: u32, table: Vec<u8>) -> Self {
        let size = table.len() as u32;
        self.section(SectionSpec::reloc(virtual_address, table))
            .directory(IMAGE_DIRECTORY_ENTRY_BASERELOC, virtual_address, size)
    }

    /// Raw data offset and size of each section
    pub fn layout(&self) -> Vec<(u32, u32)> {
        let alignment = self.effective_file_alignment();
        let mut offset = align_up(self.header_end(), alignment);
        self.sections
            .iter()
            .map(|s| {
                let raw_size = s
                    .raw_size
                    .unwrap_or(align_up(s.data.len(), alignment) as u32);
                let pointer = match s.raw_pointer {
                    Some(pointer) => pointer,
                    None if raw_size == 0 => 0,
                    None => {
                        let pointer = offset as u32;
                        offset += raw_size as usize;
                        pointer
                    }
                };
                (pointer, raw_size)
            })
            .collect()
    }

    fn effective_file_alignment(&self) -> usize {
        if self.file_alignment == 0 {
            0x200
        } else {
            self.file_alignment as usize
        }
    }

    fn optional_fixed_size(&self) -> usize {
        if self.pe32_plus {
            OPTIONAL_HEADER64_SIZE
        } else {
            OPTIONAL_HEADER32_SIZE
        }
    }

    fn optional_size(&self) -> usize {
        self.size_of_optional_header
            .map(usize::from)
            .unwrap_or(self.optional_fixed_size() + 16 * DATA_DIRECTORY_SIZE)
    }

    fn header_end(&self) -> usize {
        let table = PE_OFFSET + 4 + COFF_HEADER_SIZE + self.optional_size();
        let table_end = table + self.sections.len() * SECTION_HEADER_SIZE;
        let dirs_end = PE_OFFSET + 4 + COFF_HEADER_SIZE + self.optional_fixed_size() + 16 * 8;
        table_end.max(dirs_end).max(self.size_of_headers as usize)
    }

    /// Lay the built image out in memory at its virtual addresses
    pub fn build_mapped(&self) -> Vec<u8> {
        let file = self.build();
        let mut memory = vec![0u8; self.size_of_image as usize];
        let headers = self.size_of_headers as usize;
        memory[..headers].copy_from_slice(&file[..headers]);
        for (section, (pointer, _)) in self.sections.iter().zip(self.layout()) {
            let va = section.virtual_address as usize;
            let pointer = pointer as usize;
            let len = section.data.len();
            memory[va..va + len].copy_from_slice(&file[pointer..pointer + len]);
        }
        memory
    }

    pub fn build(&self) -> Vec<u8> {
        let layout = self.layout();
        let mut len = self.header_end();
        for (&(pointer, raw_size), section) in layout.iter().zip(&self.sections) {
            if raw_size != 0 && !section.data.is_empty() {
                len = len.max(pointer as usize + raw_size as usize);
            }
        }
        let mut image = vec![0u8; len];

        image[0..2].copy_from_slice(&DOS_MAGIC.to_le_bytes());
        image[0x3C..0x40].copy_from_slice(&(PE_OFFSET as u32).to_le_bytes());
        image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(&PE_SIGNATURE.to_le_bytes());

        let mut w = Writer {
            buf: &mut image,
            pos: PE_OFFSET + 4,
        };
        w.u16(self.machine);
        w.u16(self.sections.len() as u16);
        w.u32(0);
        w.u32(0);
        w.u32(0);
        w.u16(self.optional_size() as u16);
        w.u16(self.characteristics);

        // Optional header
        w.u16(if self.pe32_plus {
            PE32_PLUS_MAGIC
        } else {
            PE32_MAGIC
        });
        w.u8(14);
        w.u8(0);
        w.u32(0);
        w.u32(0);
        w.u32(0);
        w.u32(self.entry_point);
        w.u32(0);
        if self.pe32_plus {
            w.u64(self.image_base);
        } else {
            w.u32(0);
            w.u32(self.image_base as u32);
        }
        w.u32(self.section_alignment);
        w.u32(self.file_alignment);
        for _ in 0..6 {
            w.u16(0);
        }
        w.u32(0);
        w.u32(self.size_of_image);
        w.u32(self.size_of_headers);
        w.u32(0);
        w.u16(self.subsystem);
        w.u16(0);
        for _ in 0..4 {
            if self.pe32_plus {
                w.u64(0);
            } else {
                w.u32(0);
            }
        }
        w.u32(0);
        w.u32(self.number_of_rva_and_sizes.unwrap_or(16));
        for &(va, size) in &self.directories {
            w.u32(va);
            w.u32(size);
        }

        // Section table
        w.pos = PE_OFFSET + 4 + COFF_HEADER_SIZE + self.optional_size();
        for (section, &(pointer, raw_size)) in self.sections.iter().zip(&layout) {
            let mut name = [0u8; 8];
            let bytes = section.name.as_bytes();
            name[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
            w.bytes(&name);
            w.u32(section.virtual_size);
            w.u32(section.virtual_address);
            w.u32(raw_size);
            w.u32(pointer);
            w.u32(0);
            w.u32(0);
            w.u16(0);
            w.u16(0);
            w.u32(section.characteristics);
        }

        for (section, &(pointer, raw_size)) in self.sections.iter().zip(&layout) {
            let count = section.data.len().min(raw_size as usize);
            let start = pointer as usize;
            if count > 0 && start + count <= image.len() {
                image[start..start + count].copy_from_slice(&section.data[..count]);
            }
        }

        image
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn bytes(&mut self, data: &[u8]) {
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    fn u8(&mut self, value: u8) {
        self.bytes(&[value]);
    }

    fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }
}
