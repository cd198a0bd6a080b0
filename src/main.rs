//! zloader - UEFI application entry point
//!
//! Built for the `*-unknown-uefi` targets. On other targets the binary is an
//! empty stub so the library and its tests build on the host.

#![cfg_attr(target_os = "uefi", no_std, no_main)]

#[cfg(target_os = "uefi")]
mod entry {
    use log::LevelFilter;
    use r_efi::efi::{Handle, Status, SystemTable};
    use spin::Once;

    use zloader::config::LoaderConfig;
    use zloader::efi::Firmware;
    use zloader::efi::boot_services::UefiFirmware;
    use zloader::{LOADER_NAME, LOADER_VERSION, boot, heap, logger, state};

    static FIRMWARE: Once<UefiFirmware> = Once::new();

    /// Entry point called by the firmware image loader
    #[unsafe(no_mangle)]
    pub extern "efiapi" fn efi_main(image_handle: Handle, system_table: *mut SystemTable) -> Status {
        // SAFETY: the firmware hands us its system table with Boot Services
        // available
        let firmware = match unsafe { UefiFirmware::new(image_handle, system_table) } {
            Ok(firmware) => FIRMWARE.call_once(|| firmware),
            Err(status) => return status,
        };

        // SAFETY: Boot Services stay valid for as long as the loader runs
        unsafe { heap::init(firmware.boot_services()) };
        logger::init(firmware.con_out(), LevelFilter::Info);
        log::info!("{} {}", LOADER_NAME, LOADER_VERSION);

        let config = LoaderConfig::from_load_options(firmware.load_options());
        logger::set_level(config.log_level);
        log::debug!("Configuration: {:?}", config);

        state::init(firmware);
        let status = boot::run(firmware, &config);
        state::teardown();

        log::info!("Returning to firmware with status: {:?}", status);
        status
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        log::error!("PANIC: {}", info);
        loop {
            core::hint::spin_loop();
        }
    }
}

#[cfg(not(target_os = "uefi"))]
fn main() {
    eprintln!("zloader runs as a UEFI application; build it for a *-unknown-uefi target");
}
