//! Image info and part catalog command implementations.

use {
    crate::{Cli, CliError, image::load_image},
    anyhow::Result,
    console::style,
    efm8flash::{
        DeviceDescriptor, DeviceFamily, FlashImage, SparseImage, crc16_xmodem,
        device::{self, EFM8_PAGE_SIZE, FAMILIES},
        flasher::plan_pages,
    },
    std::path::Path,
};

/// A contiguous run of image bytes with its CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentInfo {
    pub start: u32,
    pub end: u32,
    pub crc: u16,
}

/// Segments with the CRC the bootloader's Verify command would compute.
pub(crate) fn segment_crcs(image: &SparseImage) -> Vec<SegmentInfo> {
    image
        .populated_segments()
        .into_iter()
        .map(|(start, end)| SegmentInfo {
            start,
            end,
            crc: crc16_xmodem(&image.bytes_in_range(start, end)),
        })
        .collect()
}

/// Whether the image stays below the part's bootloader.
pub(crate) fn fits(image: &SparseImage, device: &DeviceDescriptor) -> bool {
    image
        .max_address()
        .is_none_or(|max| max < device.bootloader_start)
}

fn resolve_part(cli: &Cli) -> Result<Option<&'static DeviceDescriptor>> {
    cli.mcu
        .as_deref()
        .map(|name| {
            device::find_part(name)
                .map(|(_, part)| part)
                .ok_or_else(|| anyhow::Error::from(CliError::Usage(format!("Unknown part '{name}'"))))
        })
        .transpose()
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, file: &Path, base_address: Option<u32>, json: bool) -> Result<()> {
    let part = resolve_part(cli)?;
    let (format, image) = load_image(file, base_address)?;
    let segments = segment_crcs(&image);
    let pages = plan_pages(&image, EFM8_PAGE_SIZE);

    if json {
        let segments: Vec<serde_json::Value> = segments
            .iter()
            .map(|s| {
                serde_json::json!({
                    "start": format!("0x{:04X}", s.start),
                    "end": format!("0x{:04X}", s.end),
                    "length": s.end - s.start + 1,
                    "crc": format!("0x{:04X}", s.crc),
                })
            })
            .collect();
        let pages: Vec<String> = pages
            .iter()
            .map(|p| format!("0x{p:04X}"))
            .collect();
        let target = part.map(|p| {
            serde_json::json!({
                "mcu": p.name,
                "bootloader_start": format!("0x{:04X}", p.bootloader_start),
                "fits": fits(&image, p),
            })
        });
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "file": file.display().to_string(),
                "format": format.to_string(),
                "size": image.len(),
                "min_address": image.min_address().map(|a| format!("0x{a:04X}")),
                "max_address": image.max_address().map(|a| format!("0x{a:04X}")),
                "page_size": EFM8_PAGE_SIZE,
                "pages": pages,
                "segments": segments,
                "target": target,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{}",
        style(format!("Image {}", file.display()))
            .bold()
            .underlined()
    );
    println!("  Format: {format}");
    match (image.min_address(), image.max_address()) {
        (Some(min), Some(max)) => {
            println!("  Size: {} bytes (0x{min:04X}-0x{max:04X})", image.len());
        },
        _ => println!("  Size: empty"),
    }
    println!(
        "  Pages: {} x {EFM8_PAGE_SIZE} bytes{}",
        pages.len(),
        if pages.first() == Some(&0) {
            ", page 0 written last"
        } else {
            ""
        }
    );

    println!("\n{}", style("Segments").bold().underlined());
    for s in &segments {
        println!(
            "  0x{:04X}-0x{:04X}  {:>6} bytes  CRC {}",
            s.start,
            s.end,
            s.end - s.start + 1,
            style(format!("0x{:04X}", s.crc)).cyan()
        );
    }

    if let Some(part) = part {
        let verdict = if fits(&image, part) {
            style("fits").green()
        } else {
            style("does NOT fit").red().bold()
        };
        println!(
            "\n  {} {verdict} (bootloader at 0x{:04X})",
            part.name, part.bootloader_start
        );
    }
    Ok(())
}

fn selected_families(cli: &Cli) -> Result<Vec<&'static DeviceFamily>> {
    match cli.family.as_deref() {
        Some(name) => device::family_by_name(name)
            .map(|family| vec![family])
            .ok_or_else(|| {
                CliError::Usage(format!("Unknown device family '{name}'")).into()
            }),
        None => Ok(FAMILIES.iter().collect()),
    }
}

/// Parts command implementation.
pub(crate) fn cmd_parts(cli: &Cli, json: bool) -> Result<()> {
    let families = selected_families(cli)?;

    if json {
        let families: Vec<serde_json::Value> = families
            .iter()
            .map(|family| {
                let parts: Vec<serde_json::Value> = family
                    .candidates()
                    .map(|(device_id, part)| {
                        serde_json::json!({
                            "name": part.name,
                            "device_id": format!("0x{device_id:04X}"),
                            "chip_id": part.chip_id,
                            "flash_size": part.flash_size,
                            "pin_count": part.pin_count,
                            "package": part.package,
                            "page_size": part.page_size,
                            "bootloader_start": format!("0x{:04X}", part.bootloader_start),
                        })
                    })
                    .collect();
                serde_json::json!({
                    "name": family.name,
                    "product_id": format!("0x{:04X}", family.product_id),
                    "parts": parts,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "families": families,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for family in families {
        println!(
            "{} {}",
            style(family.name)
                .bold()
                .underlined(),
            style(format!("(PID {:04X})", family.product_id)).dim()
        );
        for (device_id, part) in family.candidates() {
            println!(
                "  {:<22} id 0x{device_id:04X}  {:>3} KiB  bootloader 0x{:04X}",
                style(part.name).cyan(),
                part.flash_size / 1024,
                part.bootloader_start
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_crcs() {
        let mut image = SparseImage::from_bytes(0, b"123456789").unwrap();
        image.add_data(0x100, &[0xFF]).unwrap();

        let segments = segment_crcs(&image);
        assert_eq!(segments.len(), 2);
        assert_eq!(
            segments[0],
            SegmentInfo {
                start: 0,
                end: 8,
                crc: 0x31C3
            }
        );
        assert_eq!(segments[1].start, 0x100);
        assert_eq!(segments[1].end, 0x100);
    }

    #[test]
    fn test_fits_against_bootloader_start() {
        let (_, part) = device::find_part("EFM8UB10F16G_QFN28").unwrap();

        assert!(fits(&SparseImage::from_bytes(0x39FF, &[0]).unwrap(), part));
        assert!(!fits(&SparseImage::from_bytes(0x3A00, &[0]).unwrap(), part));
        assert!(fits(&SparseImage::new(), part));
    }
}
