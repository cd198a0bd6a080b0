//! Boot flow
//!
//! Ties the pipeline together for one boot attempt:
//!
//! 1. Pick the payload: a configured path, the `.linux` section embedded in
//!    the loader image, or [`DEFAULT_IMAGE_PATH`](crate::config::DEFAULT_IMAGE_PATH)
//! 2. Decompress it
//! 3. Publish an initrd (configured path or embedded `.initrd`) over LoadFile2
//! 4. Load, relocate and start the image with the kernel command line
//! 5. Unload the image and withdraw the initrd when it returns

use alloc::vec::Vec;

use r_efi::efi::Status;
use r_efi::protocols::loaded_image;

use crate::buffer::Buffer;
use crate::config::{LoaderConfig, LoaderMode, encode_ucs2};
use crate::decompress::{self, ByteSource, SliceSource};
use crate::efi::protocols::loaded_image::set_load_options;
use crate::efi::{Firmware, LOADED_IMAGE_PROTOCOL_GUID};
use crate::image;
use crate::initrd;
use crate::pe::{self, Platform};
use crate::pe::sections::{EmbeddedSections, locate_sections};

/// Run one boot attempt, returning the started image's exit status
pub fn run(fw: &dyn Firmware, config: &LoaderConfig) -> Status {
    let embedded = match locate_sections(fw.own_image()) {
        Ok(sections) => sections,
        Err(status) => {
            log::debug!("No embedded sections in loader image: {:?}", status);
            EmbeddedSections::default()
        }
    };

    let payload = match load_payload(fw, config, embedded.linux) {
        Ok(payload) => payload,
        Err(status) => {
            log::error!("Failed to load payload: {:?}", status);
            return status;
        }
    };

    match load_initrd(fw, config, embedded.initrd) {
        Ok(Some(data)) => {
            if let Err(status) = initrd::register(fw, data) {
                return status;
            }
        }
        Ok(None) => {}
        Err(status) => {
            log::error!("Failed to load initrd: {:?}", status);
            return status;
        }
    }

    let options = kernel_options(config, embedded.cmdline);
    let status = execute(fw, config.mode, payload.as_slice(), &options);
    drop(payload);

    let deregistered = initrd::deregister(fw);
    if deregistered.is_error() {
        log::warn!("Failed to withdraw initrd: {:?}", deregistered);
    }
    status
}

/// Decompressed payload image
fn load_payload(
    fw: &dyn Firmware,
    config: &LoaderConfig,
    embedded: Option<&[u8]>,
) -> Result<Buffer, Status> {
    if let (true, Some(data)) = (config.image.is_empty(), embedded) {
        log::info!("Using embedded payload ({} bytes)", data.len());
        return decompress::decompress_file(&mut SliceSource::new(data));
    }

    let path = config.image_path();
    log::info!("Loading payload: {}", path);
    let mut file = fw.open_file(path)?;
    decompress::decompress_file(&mut *file)
}

/// initrd contents, if one is configured or embedded
fn load_initrd(
    fw: &dyn Firmware,
    config: &LoaderConfig,
    embedded: Option<&[u8]>,
) -> Result<Option<Buffer>, Status> {
    if let Some(path) = config.initrd_path() {
        log::info!("Loading initrd: {}", path);
        let mut file = fw.open_file(path)?;
        return read_all(&mut *file).map(Some);
    }

    match embedded {
        Some(data) => {
            log::info!("Using embedded initrd ({} bytes)", data.len());
            let mut buffer = Buffer::with_capacity(data.len())?;
            decompress::fill_buffer(&mut SliceSource::new(data), &mut buffer)?;
            Ok(Some(buffer))
        }
        None => Ok(None),
    }
}

fn read_all(source: &mut dyn ByteSource) -> Result<Buffer, Status> {
    let size = usize::try_from(source.len()).map_err(|_| Status::OUT_OF_RESOURCES)?;
    let mut buffer = Buffer::with_capacity(size)?;
    decompress::fill_buffer(source, &mut buffer)?;
    if buffer.len() < size {
        log::warn!("File ended after {} of {} bytes", buffer.len(), size);
    }
    Ok(buffer)
}

/// Kernel command line as NUL terminated UCS-2
///
/// Configured options take precedence over an embedded `.cmdline`.
fn kernel_options(config: &LoaderConfig, embedded: Option<&[u8]>) -> Vec<u16> {
    if !config.cmdline.is_empty() {
        return encode_ucs2(&config.cmdline);
    }

    let text = embedded
        .and_then(|bytes| match core::str::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                log::warn!("Embedded command line is not UTF-8, ignoring it");
                None
            }
        })
        .map(|text| text.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
        .unwrap_or("");
    encode_ucs2(text)
}

/// Start `data` with the selected loader
///
/// Only images the header checks reject as incompatible go to the firmware;
/// any later failure of the built-in loader is final.
fn execute(fw: &dyn Firmware, mode: LoaderMode, data: &[u8], options: &[u16]) -> Status {
    if mode == LoaderMode::Builtin {
        match pe::parse_headers(data, Platform::native()) {
            Ok(_) => return execute_builtin(fw, data, options),
            Err(Status::UNSUPPORTED) => {
                log::info!("Image not supported by the built-in loader, trying firmware");
            }
            Err(status) => {
                log::error!("Failed to load image: {:?}", status);
                return status;
            }
        }
    }

    execute_with_firmware(fw, data, options)
}

/// Load, start and unload `data` with the built-in loader
fn execute_builtin(fw: &dyn Firmware, data: &[u8], options: &[u16]) -> Status {
    let loaded = match pe::handle_image(fw, data) {
        Ok(loaded) => loaded,
        Err(status) => {
            log::error!("Failed to load image: {:?}", status);
            return status;
        }
    };

    let status = image::start(fw, &loaded, options);
    let unloaded = image::unload(fw, loaded.handle);
    if unloaded.is_error() {
        log::warn!("Failed to unload image: {:?}", unloaded);
    }
    status
}

/// Start `data` through the firmware's LoadImage/StartImage
fn execute_with_firmware(fw: &dyn Firmware, data: &[u8], options: &[u16]) -> Status {
    let handle = match fw.load_image_from_buffer(data) {
        Ok(handle) => handle,
        Err(status) => {
            log::error!("Firmware failed to load image: {:?}", status);
            return status;
        }
    };

    let protocol = fw
        .handle_protocol(handle, &LOADED_IMAGE_PROTOCOL_GUID)
        .map(|protocol| protocol as *mut loaded_image::Protocol);
    if let Ok(protocol) = protocol {
        // SAFETY: the firmware owns the record and keeps it alive until unload
        unsafe { set_load_options(protocol, options) };
    }

    log::info!("Starting image {:?} through firmware", handle);
    let status = fw.start_image(handle);
    log::info!("Image returned with status: {:?}", status);

    if let Ok(protocol) = protocol {
        // SAFETY: as above
        unsafe { set_load_options(protocol, &[]) };
    }
    let unloaded = fw.unload_image(handle);
    if unloaded.is_error() {
        log::warn!("Firmware failed to unload image: {:?}", unloaded);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_IMAGE_PATH;
    use crate::pe::fixup::IMAGE_REL_BASED_HIGHLOW;
    use crate::testing::{MockFirmware, PeBuilder, SectionSpec, reloc_block, reloc_entry, serial};

    fn payload() -> Vec<u8> {
        PeBuilder::new()
            .section(SectionSpec::text(0x1000, 0x1000, vec![0xC3; 0x100]))
            .build()
    }

    fn zstd(data: &[u8]) -> Vec<u8> {
        ::zstd::bulk::compress(data, 3).unwrap()
    }

    #[test]
    fn test_boot_compressed_payload() {
        let _guard = serial();
        let fw = MockFirmware::new().with_file(DEFAULT_IMAGE_PATH, zstd(&payload()));
        let config = LoaderConfig::parse("console=ttyS0 zloader.log=debug");

        assert_eq!(run(&fw, &config), Status::SUCCESS);
        let transfers = fw.transfers();
        assert_eq!(transfers.len(), 1);
        assert_ne!(transfers[0].1, 0);
        assert_eq!(fw.captured_options(), encode_ucs2("console=ttyS0"));
        assert_eq!(fw.allocated_page_count(), 0);
        assert_eq!(fw.handle_count(), 0);
    }

    #[test]
    fn test_boot_with_initrd() {
        let _guard = serial();
        let fw = MockFirmware::new()
            .with_file("\\EFI\\Linux\\vmlinuz", payload())
            .with_file("\\EFI\\Linux\\initrd.img", vec![0x30; 4096]);
        let config =
            LoaderConfig::parse("zloader.image=/EFI/Linux/vmlinuz zloader.initrd=/EFI/Linux/initrd.img");

        assert_eq!(run(&fw, &config), Status::SUCCESS);
        assert_eq!(fw.transfers().len(), 1);
        assert!(!initrd::is_registered());
        assert_eq!(fw.handle_count(), 0);
    }

    #[test]
    fn test_missing_files() {
        let _guard = serial();
        let fw = MockFirmware::new();
        assert_eq!(run(&fw, &LoaderConfig::new()), Status::NOT_FOUND);

        let fw = MockFirmware::new().with_file(DEFAULT_IMAGE_PATH, payload());
        let config = LoaderConfig::parse("zloader.initrd=\\missing.img");
        assert_eq!(run(&fw, &config), Status::NOT_FOUND);
        assert!(fw.transfers().is_empty());
        assert_eq!(fw.allocated_page_count(), 0);
    }

    #[test]
    fn test_embedded_sections() {
        let _guard = serial();
        let compressed = zstd(&payload());
        let cmdline = b"quiet\0".to_vec();
        let linux_size = compressed.len() as u32;
        let mut loader = PeBuilder::new()
            .section(SectionSpec::text(0x1000, 0x1000, vec![0xC3; 0x10]))
            .section(SectionSpec::new(".cmdline", 0x2000, cmdline.len() as u32, cmdline))
            .section(SectionSpec::new(".linux", 0x3000, linux_size, compressed));
        loader.size_of_image = 0x3000 + linux_size.next_multiple_of(0x1000);

        let mut fw = MockFirmware::new();
        fw.own_image = loader.build_mapped();

        assert_eq!(run(&fw, &LoaderConfig::new()), Status::SUCCESS);
        assert_eq!(fw.transfers().len(), 1);
        assert_eq!(fw.captured_options(), encode_ucs2("quiet"));
        assert_eq!(fw.allocated_page_count(), 0);
    }

    #[test]
    fn test_exit_status_is_returned() {
        let _guard = serial();
        let mut fw = MockFirmware::new().with_file(DEFAULT_IMAGE_PATH, payload());
        fw.exit_status = Status::ABORTED;
        assert_eq!(run(&fw, &LoaderConfig::new()), Status::ABORTED);
        assert_eq!(fw.handle_count(), 0);
    }

    #[test]
    fn test_firmware_fallback() {
        let _guard = serial();
        let mut foreign = PeBuilder::new()
            .section(SectionSpec::text(0x1000, 0x1000, vec![0xC3; 0x100]));
        foreign.machine = if foreign.machine == 0x8664 { 0xAA64 } else { 0x8664 };
        let mut fw = MockFirmware::new().with_file(DEFAULT_IMAGE_PATH, foreign.build());
        fw.firmware_loader = None;

        let config = LoaderConfig::parse("ro");
        assert_eq!(run(&fw, &config), Status::SUCCESS);
        assert_eq!(fw.transfers().len(), 1);
        assert_eq!(fw.transfers()[0].1, 0);
        assert_eq!(fw.captured_options(), encode_ucs2("ro"));
        assert_eq!(fw.allocated_page_count(), 0);
        assert_eq!(fw.handle_count(), 0);
    }

    #[test]
    fn test_rejected_relocation_is_not_started() {
        let _guard = serial();
        let table = reloc_block(
            0x1000,
            &[reloc_entry(IMAGE_REL_BASED_HIGHLOW, 0x10), reloc_entry(9, 0x20)],
        );
        let image = PeBuilder::new()
            .section(SectionSpec::text(0x1000, 0x1000, vec![0u8; 0x200]))
            .relocations(0x2000, table)
            .build();
        let mut fw = MockFirmware::new().with_file(DEFAULT_IMAGE_PATH, image);
        fw.firmware_loader = None;

        assert_eq!(run(&fw, &LoaderConfig::new()), Status::UNSUPPORTED);
        assert!(fw.transfers().is_empty());
        assert_eq!(fw.allocated_page_count(), 0);
        assert_eq!(fw.handle_count(), 0);
    }

    #[test]
    fn test_firmware_mode() {
        let _guard = serial();
        // The firmware loader refuses by default
        let fw = MockFirmware::new().with_file(DEFAULT_IMAGE_PATH, payload());
        let config = LoaderConfig::parse("zloader.loader=firmware");
        assert_eq!(run(&fw, &config), Status::UNSUPPORTED);
        assert!(fw.transfers().is_empty());
        assert_eq!(fw.allocated_page_count(), 0);
    }

    #[test]
    fn test_kernel_options() {
        let config = LoaderConfig::new();
        assert_eq!(kernel_options(&config, None), vec![0]);
        assert_eq!(
            kernel_options(&config, Some(b" root=/dev/sda1\n\0")),
            encode_ucs2("root=/dev/sda1")
        );
        assert_eq!(kernel_options(&config, Some(&[0xFF, 0xFE])), vec![0]);

        let config = LoaderConfig::parse("init=/bin/sh");
        assert_eq!(
            kernel_options(&config, Some(b"ignored")),
            encode_ucs2("init=/bin/sh")
        );
    }
}
