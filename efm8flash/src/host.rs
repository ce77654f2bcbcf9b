//! Host-side utilities for bootloader discovery.

use crate::device::DeviceDescriptor;
#[cfg(feature = "hid")]
use {
    crate::{
        Efm8Flasher,
        error::Result,
        transport::{HidBootloaderInfo, HidTransport, hid},
    },
    log::warn,
};

/// A bootloader found on the host, with the part it identified as.
#[cfg(feature = "hid")]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiscoveredBootloader {
    /// Enumeration info.
    pub info: HidBootloaderInfo,
    /// Identified part, `None` if identification failed.
    pub device: Option<DeviceDescriptor>,
}

#[cfg(feature = "hid")]
impl DiscoveredBootloader {
    /// Multi-line description.
    pub fn description(&self) -> String {
        describe(
            self.info.vendor_id,
            self.info.product_id,
            &self.info.path,
            self.device.as_ref(),
            false,
        )
    }

    /// One-line description.
    pub fn short_description(&self) -> String {
        describe(
            self.info.vendor_id,
            self.info.product_id,
            &self.info.path,
            self.device.as_ref(),
            true,
        )
    }
}

/// Enumerate HID bootloaders and identify each one.
///
/// Every device is opened, identified and closed again. A device that fails
/// to identify is still listed, with `device` set to `None`.
#[cfg(feature = "hid")]
pub fn discover_bootloaders(vendor_id: u16, product_id: u16) -> Result<Vec<DiscoveredBootloader>> {
    let mut found = Vec::new();

    for info in hid::enumerate(vendor_id, product_id)? {
        let mut flasher = Efm8Flasher::new(HidTransport::new(info.clone()));
        let device = match flasher.connect() {
            Ok(device) => Some(device),
            Err(e) => {
                warn!("Could not identify {}: {e}", info.path);
                None
            },
        };
        if let Err(e) = flasher.disconnect() {
            warn!("Failed to close {}: {e}", info.path);
        }
        found.push(DiscoveredBootloader { info, device });
    }

    Ok(found)
}

/// Describe a bootloader.
///
/// The long form lists every descriptor field; the short form is one line
/// with the USB ids, path and part name.
pub fn describe(
    vendor_id: u16,
    product_id: u16,
    path: &str,
    device: Option<&DeviceDescriptor>,
    short: bool,
) -> String {
    let name = device.map_or("unknown", |d| d.name);
    if short {
        return format!("{vendor_id:04X}:{product_id:04X} ({path}) {name}");
    }

    let mut out = format!("{vendor_id:04X}:{product_id:04X} {{\n\tpath = {path}\n\tmcu = {name}\n");
    if let Some(d) = device {
        out.push_str(&format!(
            "\tchipID = 0x{:02X}\n\tflash = {}\n\tpageSize = {}\n\tbootloaderStart = 0x{:04X}\n",
            d.chip_id, d.flash_size, d.page_size, d.bootloader_start
        ));
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use {super::*, crate::device};

    #[test]
    fn test_describe_long() {
        let (_, part) = device::find_part("EFM8UB10F16G_QFN28").unwrap();
        let text = describe(0x10C4, 0xEAC9, "/dev/hidraw3", Some(part), false);
        assert_eq!(
            text,
            "10C4:EAC9 {\n\
             \tpath = /dev/hidraw3\n\
             \tmcu = EFM8UB10F16G_QFN28\n\
             \tchipID = 0x41\n\
             \tflash = 16384\n\
             \tpageSize = 512\n\
             \tbootloaderStart = 0x3A00\n\
             }"
        );
    }

    #[test]
    fn test_describe_short() {
        let (_, part) = device::find_part("EFM8UB20F64G_QFP48").unwrap();
        assert_eq!(
            describe(0x10C4, 0xEACA, "1-2:1.0", Some(part), true),
            "10C4:EACA (1-2:1.0) EFM8UB20F64G_QFP48"
        );
        assert_eq!(
            describe(0x10C4, 0xEACA, "1-2:1.0", None, true),
            "10C4:EACA (1-2:1.0) unknown"
        );
    }

    #[test]
    fn test_describe_unidentified_long() {
        let text = describe(0x10C4, 0xEACB, "p", None, false);
        assert!(text.contains("mcu = unknown"));
        assert!(!text.contains("chipID"));
    }
}
