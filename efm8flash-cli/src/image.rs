//! Image file loading (Intel HEX and raw binary).

use {
    crate::CliError,
    anyhow::{Context, Result},
    efm8flash::SparseImage,
    ihex::Record,
    log::debug,
    std::{fmt, fs, path::Path},
};

/// On-disk image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageFormat {
    /// Intel HEX text.
    Hex,
    /// Raw bytes loaded at a base address.
    Binary,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hex => write!(f, "Intel HEX"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Pick the format from the extension, falling back to sniffing for a
/// leading ':' record mark.
pub(crate) fn detect_format(path: &Path, content: &[u8]) -> ImageFormat {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("hex" | "ihx" | "ihex") => ImageFormat::Hex,
        Some("bin") => ImageFormat::Binary,
        _ => {
            let first = content
                .iter()
                .find(|b| !b.is_ascii_whitespace());
            if first == Some(&b':') {
                ImageFormat::Hex
            } else {
                ImageFormat::Binary
            }
        },
    }
}

/// Load an image file.
///
/// `base_address` only applies to binary images and defaults to 0.
pub(crate) fn load_image(path: &Path, base_address: Option<u32>) -> Result<(ImageFormat, SparseImage)> {
    let content =
        fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;

    let format = detect_format(path, &content);
    debug!("Loading {} as {format}", path.display());

    let image = match format {
        ImageFormat::Hex => {
            if base_address.is_some() {
                return Err(CliError::Usage(
                    "--base-address only applies to binary images".to_string(),
                )
                .into());
            }
            let text = std::str::from_utf8(&content)
                .with_context(|| format!("{} is not a text file", path.display()))?;
            parse_hex(text).with_context(|| format!("Invalid Intel HEX file {}", path.display()))?
        },
        ImageFormat::Binary => parse_binary(&content, base_address.unwrap_or(0))
            .with_context(|| format!("Cannot place {} in flash", path.display()))?,
    };

    Ok((format, image))
}

/// Parse Intel HEX text into a sparse image.
pub(crate) fn parse_hex(text: &str) -> Result<SparseImage> {
    let mut image = SparseImage::new();
    let mut base_address = 0u32;

    for record in ihex::Reader::new(text) {
        match record? {
            Record::Data { offset, value } => {
                image.add_data(base_address + u32::from(offset), &value)?;
            },
            Record::EndOfFile => break,
            Record::ExtendedSegmentAddress(segment) => {
                base_address = u32::from(segment) * 16;
            },
            Record::ExtendedLinearAddress(upper) => {
                base_address = u32::from(upper) << 16;
            },
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {},
        }
    }

    Ok(image)
}

/// Place raw bytes at `base_address`.
pub(crate) fn parse_binary(data: &[u8], base_address: u32) -> Result<SparseImage> {
    Ok(SparseImage::from_bytes(base_address, data)?)
}
