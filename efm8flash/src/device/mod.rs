//! EFM8 part catalog.
//!
//! Each USB bootloader product id belongs to one device family. Within a
//! family the bootloader answers to a 16-bit id built from the family prefix
//! and the part's chip id; [`crate::flasher`] probes those ids in declaration
//! order to find out which part is connected.

use std::fmt;

/// Silicon Labs USB vendor ID.
pub const SILICON_LABS_VID: u16 = 0x10C4;

/// Flash page size shared by every cataloged part.
pub const EFM8_PAGE_SIZE: u32 = 512;

/// Static description of one EFM8 part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceDescriptor {
    /// Chip id, low byte of the identify id.
    pub chip_id: u8,
    /// Part name (e.g. "EFM8UB10F16G_QFN28").
    pub name: &'static str,
    /// Total flash size in bytes.
    pub flash_size: u32,
    /// Number of package pins.
    pub pin_count: u8,
    /// Package code (e.g. "qfn28").
    pub package: &'static str,
    /// Flash page size in bytes.
    pub page_size: u32,
    /// First address occupied by the bootloader; always page-aligned.
    pub bootloader_start: u32,
}

impl DeviceDescriptor {
    const fn new(
        chip_id: u8,
        name: &'static str,
        flash_kib: u32,
        pin_count: u8,
        package: &'static str,
        bootloader_start: u32,
    ) -> Self {
        Self {
            chip_id,
            name,
            flash_size: flash_kib * 1024,
            pin_count,
            package,
            page_size: EFM8_PAGE_SIZE,
            bootloader_start,
        }
    }

    /// Highest address an application image may occupy.
    pub fn max_app_address(&self) -> u32 {
        self.bootloader_start - 1
    }

    /// Start of the page containing `addr`.
    pub fn page_base(&self, addr: u32) -> u32 {
        addr - addr % self.page_size
    }

    /// Check if `addr` is a page boundary inside the application region.
    pub fn is_app_page(&self, addr: u32) -> bool {
        addr % self.page_size == 0 && addr < self.bootloader_start
    }

    /// Page addresses of the application region, ascending.
    pub fn app_pages(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.bootloader_start).step_by(self.page_size as usize)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A bootloader product id and the parts that may answer behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceFamily {
    /// Family name (e.g. "EFM8UB1").
    pub name: &'static str,
    /// USB product ID of the family's bootloader.
    pub product_id: u16,
    /// High byte of every identify id in this family.
    pub id_prefix: u16,
    /// Parts in probe order.
    pub devices: &'static [DeviceDescriptor],
}

impl DeviceFamily {
    /// Identify id of a part of this family.
    pub fn device_id(&self, device: &DeviceDescriptor) -> u16 {
        self.id_prefix | u16::from(device.chip_id)
    }

    /// Candidate identify ids with their descriptors, in probe order.
    pub fn candidates(&self) -> impl Iterator<Item = (u16, &'static DeviceDescriptor)> + '_ {
        self.devices
            .iter()
            .map(move |device| (self.device_id(device), device))
    }

    /// Look up a part by its full identify id.
    pub fn by_device_id(&self, device_id: u16) -> Option<&'static DeviceDescriptor> {
        self.devices
            .iter()
            .find(|device| self.device_id(device) == device_id)
    }

    /// Short family name as accepted on the command line (e.g. "ub1").
    pub fn short_name(&self) -> &'static str {
        self.name
            .strip_prefix("EFM8")
            .unwrap_or(self.name)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:04X})", self.name, self.product_id)
    }
}

const EFM8UB1_DEVICES: &[DeviceDescriptor] = &[
    DeviceDescriptor::new(0x41, "EFM8UB10F16G_QFN28", 16, 28, "qfn28", 0x3A00),
    DeviceDescriptor::new(0x43, "EFM8UB10F16G_QFN20", 16, 20, "qfn20", 0x3A00),
    DeviceDescriptor::new(0x45, "EFM8UB11F16G_QSOP24", 16, 24, "qsop24", 0x3A00),
    DeviceDescriptor::new(0x49, "EFM8UB10F8G_QFN20", 8, 20, "qfn20", 0x1A00),
    DeviceDescriptor::new(0x4A, "EFM8UB11F16G_QFN24", 16, 24, "qfn24", 0x3A00),
];

const EFM8UB2_DEVICES: &[DeviceDescriptor] = &[
    DeviceDescriptor::new(0x60, "EFM8UB20F64G_QFP48", 64, 48, "qfp48", 0xF600),
    DeviceDescriptor::new(0x61, "EFM8UB20F64G_QFP32", 64, 32, "qfp32", 0xF600),
    DeviceDescriptor::new(0x62, "EFM8UB20F64G_QFN32", 64, 32, "qfn32", 0xF600),
    DeviceDescriptor::new(0x63, "EFM8UB20F32G_QFP48", 32, 48, "qfp48", 0x7A00),
    DeviceDescriptor::new(0x64, "EFM8UB20F32G_QFP32", 32, 32, "qfp32", 0x7A00),
    DeviceDescriptor::new(0x65, "EFM8UB20F32G_QFN32", 32, 32, "qfn32", 0x7A00),
];

const EFM8UB3_DEVICES: &[DeviceDescriptor] = &[
    DeviceDescriptor::new(0x00, "EFM8UB30F40G_QFN20", 40, 20, "qfn20", 0x9A00),
    DeviceDescriptor::new(0x01, "EFM8UB31F40G_QFN24", 40, 24, "qfn24", 0x9A00),
    DeviceDescriptor::new(0x02, "EFM8UB31F40G_QSOP24", 40, 24, "qsop24", 0x9A00),
];

/// Every cataloged family.
pub const FAMILIES: &[DeviceFamily] = &[
    DeviceFamily {
        name: "EFM8UB1",
        product_id: 0xEAC9,
        id_prefix: 0x3200,
        devices: EFM8UB1_DEVICES,
    },
    DeviceFamily {
        name: "EFM8UB2",
        product_id: 0xEACA,
        id_prefix: 0x2800,
        devices: EFM8UB2_DEVICES,
    },
    DeviceFamily {
        name: "EFM8UB3",
        product_id: 0xEACB,
        id_prefix: 0x3600,
        devices: EFM8UB3_DEVICES,
    },
];

/// Find the family served by a bootloader product id.
pub fn family_by_product_id(product_id: u16) -> Option<&'static DeviceFamily> {
    FAMILIES
        .iter()
        .find(|family| family.product_id == product_id)
}

/// Find a family by name ("EFM8UB1", "ub1", case-insensitive).
pub fn family_by_name(name: &str) -> Option<&'static DeviceFamily> {
    FAMILIES.iter().find(|family| {
        family
            .name
            .eq_ignore_ascii_case(name)
            || family
                .short_name()
                .eq_ignore_ascii_case(name)
    })
}

/// Find a part by name (case-insensitive).
pub fn find_part(name: &str) -> Option<(&'static DeviceFamily, &'static DeviceDescriptor)> {
    FAMILIES.iter().find_map(|family| {
        family
            .devices
            .iter()
            .find(|device| {
                device
                    .name
                    .eq_ignore_ascii_case(name)
            })
            .map(|device| (family, device))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootloader_start_is_page_aligned() {
        for family in FAMILIES {
            for device in family.devices {
                assert_eq!(device.page_size, 512, "{}", device.name);
                assert_eq!(device.bootloader_start % device.page_size, 0, "{}", device.name);
                assert!(device.bootloader_start < device.flash_size, "{}", device.name);
            }
        }
    }

    #[test]
    fn test_device_ids_unique_within_family() {
        for family in FAMILIES {
            let mut ids: Vec<u16> = family
                .candidates()
                .map(|(id, _)| id)
                .collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), family.devices.len(), "{}", family.name);
        }
    }

    #[test]
    fn test_candidates_in_declaration_order() {
        let family = family_by_product_id(0xEAC9).unwrap();
        let ids: Vec<u16> = family
            .candidates()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![0x3241, 0x3243, 0x3245, 0x3249, 0x324A]);
    }

    #[test]
    fn test_family_by_name() {
        assert_eq!(family_by_name("ub2").unwrap().product_id, 0xEACA);
        assert_eq!(family_by_name("EFM8UB3").unwrap().product_id, 0xEACB);
        assert!(family_by_name("bb1").is_none());
    }

    #[test]
    fn test_find_part() {
        let (family, device) = find_part("efm8ub10f8g_qfn20").unwrap();
        assert_eq!(family.name, "EFM8UB1");
        assert_eq!(device.chip_id, 0x49);
        assert_eq!(device.bootloader_start, 0x1A00);
        assert!(find_part("EFM8BB10F8G").is_none());
    }

    #[test]
    fn test_app_pages() {
        let (_, device) = find_part("EFM8UB10F8G_QFN20").unwrap();
        let pages: Vec<u32> = device
            .app_pages()
            .collect();
        assert_eq!(pages.len(), 13);
        assert_eq!(pages.first(), Some(&0));
        assert_eq!(pages.last(), Some(&0x1800));
        assert!(device.is_app_page(0x0200));
        assert!(!device.is_app_page(0x0201));
        assert!(!device.is_app_page(0x1A00));
        assert_eq!(device.page_base(0x03FF), 0x0200);
        assert_eq!(device.max_app_address(), 0x19FF);
    }
}
