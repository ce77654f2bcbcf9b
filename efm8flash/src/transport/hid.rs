//! USB HID transport using the `hidapi` crate.
//!
//! EFM8UB bootloaders enumerate as a vendor HID device and exchange records
//! through feature reports: up to 64 bytes out, up to 4 bytes in. Report id 0
//! is prepended on the way out and stripped on the way in.

use {
    crate::{
        device,
        error::{Error, Result},
        transport::{Transport, TransportKind},
    },
    hidapi::{HidApi, HidDevice},
    log::{debug, trace},
    std::{ffi::CString, io},
};

/// Largest feature report the bootloader accepts.
pub const HID_OUT_SIZE: usize = 64;

/// Largest feature report the bootloader returns.
pub const HID_IN_SIZE: usize = 4;

const REPORT_ID: u8 = 0x00;

/// A HID device that looks like an EFM8 bootloader.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HidBootloaderInfo {
    /// Platform device path.
    pub path: String,
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Serial number (if available).
    pub serial_number: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// List HID devices with `vendor_id` whose product id is a cataloged
/// bootloader family. A `product_id` of 0 matches any cataloged family.
pub fn enumerate(vendor_id: u16, product_id: u16) -> Result<Vec<HidBootloaderInfo>> {
    let api = HidApi::new()?;

    let devices: Vec<HidBootloaderInfo> = api
        .device_list()
        .filter(|info| info.vendor_id() == vendor_id)
        .filter(|info| product_id == 0 || info.product_id() == product_id)
        .filter(|info| device::family_by_product_id(info.product_id()).is_some())
        .map(|info| HidBootloaderInfo {
            path: info
                .path()
                .to_string_lossy()
                .into_owned(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            serial_number: info
                .serial_number()
                .map(str::to_owned),
            product: info
                .product_string()
                .map(str::to_owned),
        })
        .collect();

    debug!(
        "Found {} HID bootloader(s) for {vendor_id:04X}:{product_id:04X}",
        devices.len()
    );
    Ok(devices)
}

/// Transport over a USB HID bootloader.
pub struct HidTransport {
    info: HidBootloaderInfo,
    device: Option<HidDevice>,
}

impl HidTransport {
    /// Create a transport for an enumerated device. Nothing is opened yet.
    pub fn new(info: HidBootloaderInfo) -> Self {
        Self { info, device: None }
    }

    /// Get the enumeration info.
    pub fn info(&self) -> &HidBootloaderInfo {
        &self.info
    }

    fn device(&self) -> Result<&HidDevice> {
        self.device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "HID device closed").into())
    }
}

impl Transport for HidTransport {
    fn open(&mut self) -> Result<()> {
        if self
            .device
            .is_some()
        {
            return Ok(());
        }

        let path = CString::new(
            self.info
                .path
                .as_bytes(),
        )
        .map_err(|_| Error::DeviceNotFound)?;
        let api = HidApi::new()?;
        let device = api.open_path(&path)?;
        debug!("Opened HID bootloader {}", self.info.path);

        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self
            .device
            .take()
            .is_some()
        {
            debug!("Closed HID bootloader {}", self.info.path);
        }
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > HID_OUT_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "packet of {} bytes exceeds HID report size {HID_OUT_SIZE}",
                    packet.len()
                ),
            )
            .into());
        }

        let mut report = Vec::with_capacity(packet.len() + 1);
        report.push(REPORT_ID);
        report.extend_from_slice(packet);
        trace!("HID out: {packet:02X?}");

        self.device()?
            .send_feature_report(&report)?;
        Ok(())
    }

    fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
        let len = len.min(HID_IN_SIZE);
        let mut report = vec![0u8; len + 1];
        report[0] = REPORT_ID;

        let n = self
            .device()?
            .get_feature_report(&mut report)?;
        if n <= 1 {
            return Ok(Vec::new());
        }

        let data = report[1..n.min(len + 1)].to_vec();
        trace!("HID in: {data:02X?}");
        Ok(data)
    }

    fn max_packet_size(&self) -> usize {
        HID_OUT_SIZE
    }

    fn product_id(&self) -> u16 {
        self.info
            .product_id
    }

    fn name(&self) -> &str {
        &self
            .info
            .path
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Hid
    }

    fn mark_reset(&mut self) {
        // The bootloader detaches from USB on RunApp; the handle is dead.
        if self.device.take().is_some() {
            debug!("HID bootloader {} left bootloader mode", self.info.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> HidBootloaderInfo {
        HidBootloaderInfo {
            path: "/dev/hidraw-test".to_string(),
            vendor_id: device::SILICON_LABS_VID,
            product_id: 0xEAC9,
            serial_number: None,
            product: None,
        }
    }

    #[test]
    fn test_enumerate_does_not_panic() {
        let _ = enumerate(device::SILICON_LABS_VID, 0);
    }

    #[test]
    fn test_transport_properties() {
        let transport = HidTransport::new(info());
        assert_eq!(transport.max_packet_size(), HID_OUT_SIZE);
        assert_eq!(transport.product_id(), 0xEAC9);
        assert_eq!(transport.name(), "/dev/hidraw-test");
        assert_eq!(transport.kind(), TransportKind::Hid);
    }

    #[test]
    fn test_io_on_closed_transport_fails() {
        let mut transport = HidTransport::new(info());
        assert!(transport.send(&[0x24]).is_err());
        assert!(transport.recv(1).is_err());
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_mark_reset_leaves_transport_closed() {
        let mut transport = HidTransport::new(info());
        transport.mark_reset();
        assert!(transport.device.is_none());
        assert!(matches!(transport.send(&[0x24]), Err(Error::Io(_))));
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let mut transport = HidTransport::new(info());
        let packet = [0u8; HID_OUT_SIZE + 1];
        assert!(matches!(transport.send(&packet), Err(Error::Io(_))));
    }
}
