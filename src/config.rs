//! Loader configuration
//!
//! The configuration comes from the load options the loader was started
//! with. Options are whitespace separated; `zloader.*` keys configure the
//! loader and everything else is passed on as the kernel command line.
//!
//! ```text
//! zloader.image=\EFI\Linux\Image.zst zloader.initrd=\EFI\Linux\initrd.img
//! zloader.log=debug zloader.loader=firmware console=ttyS0 root=/dev/vda2
//! ```

use alloc::string::String as AllocString;
use alloc::vec::Vec;
use core::str::FromStr;

use heapless::String;
use log::LevelFilter;

/// Maximum length for file paths
const MAX_PATH_LEN: usize = 128;
/// Maximum length for the kernel command line
const MAX_CMDLINE_LEN: usize = 1024;

/// Image loaded when neither an option nor an embedded payload names one
pub const DEFAULT_IMAGE_PATH: &str = "\\EFI\\Linux\\Image.zst";

/// Option key prefix
const KEY_PREFIX: &str = "zloader.";

/// Which PE loader starts the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoaderMode {
    /// The loader's own relocator, falling back to the firmware for images
    /// it does not support
    #[default]
    Builtin,
    /// The firmware's LoadImage/StartImage only
    Firmware,
}

/// Parsed loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Payload path on the boot volume (empty for the default)
    pub image: String<MAX_PATH_LEN>,
    /// initrd path on the boot volume (empty for none)
    pub initrd: String<MAX_PATH_LEN>,
    /// Kernel command line
    pub cmdline: String<MAX_CMDLINE_LEN>,
    /// Console log level
    pub log_level: LevelFilter,
    /// PE loader selection
    pub mode: LoaderMode,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderConfig {
    pub const fn new() -> Self {
        Self {
            image: String::new(),
            initrd: String::new(),
            cmdline: String::new(),
            log_level: LevelFilter::Info,
            mode: LoaderMode::Builtin,
        }
    }

    /// Parse UCS-2 load options, stopping at the first NUL
    pub fn from_load_options(options: &[u16]) -> Self {
        let end = options.iter().position(|&c| c == 0).unwrap_or(options.len());
        let text: AllocString = char::decode_utf16(options[..end].iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
        Self::parse(&text)
    }

    /// Parse the option string
    pub fn parse(options: &str) -> Self {
        let mut config = Self::new();
        let mut tokens = options.split_whitespace().peekable();

        // Firmware boot entries usually pass the loader's own path first
        if tokens.peek().is_some_and(|first| {
            first
                .rsplit_once('.')
                .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("efi"))
        }) {
            tokens.next();
        }

        for token in tokens {
            let Some(option) = token.strip_prefix(KEY_PREFIX) else {
                let separator = usize::from(!config.cmdline.is_empty());
                if config.cmdline.len() + separator + token.len() > config.cmdline.capacity() {
                    log::warn!("Kernel command line too long, dropping '{}'", token);
                    continue;
                }
                if separator == 1 {
                    let _ = config.cmdline.push(' ');
                }
                let _ = config.cmdline.push_str(token);
                continue;
            };

            let (key, value) = option.split_once('=').unwrap_or((option, ""));
            match key {
                "image" => set_path(&mut config.image, value),
                "initrd" => set_path(&mut config.initrd, value),
                "log" => match LevelFilter::from_str(value) {
                    Ok(level) => config.log_level = level,
                    Err(_) => log::warn!("Unknown log level '{}'", value),
                },
                "loader" => match value {
                    "builtin" => config.mode = LoaderMode::Builtin,
                    "firmware" => config.mode = LoaderMode::Firmware,
                    _ => log::warn!("Unknown loader '{}'", value),
                },
                _ => log::warn!("Unknown option '{}'", token),
            }
        }

        config
    }

    /// Payload path, or the default if none is configured
    pub fn image_path(&self) -> &str {
        if self.image.is_empty() {
            DEFAULT_IMAGE_PATH
        } else {
            &self.image
        }
    }

    /// initrd path, if one is configured
    pub fn initrd_path(&self) -> Option<&str> {
        (!self.initrd.is_empty()).then_some(self.initrd.as_str())
    }
}

/// Store `value` as an EFI path (backslash separated)
fn set_path(field: &mut String<MAX_PATH_LEN>, value: &str) {
    field.clear();
    for c in value.chars() {
        if field.push(if c == '/' { '\\' } else { c }).is_err() {
            log::warn!("Path too long: {}", value);
            field.clear();
            return;
        }
    }
}

/// Encode a command line as NUL terminated UCS-2
pub fn encode_ucs2(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(core::iter::once(0)).collect()
}
