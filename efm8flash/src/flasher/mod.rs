//! EFM8 bootloader session.
//!
//! [`Efm8Flasher`] owns a [`Transport`] and sequences every record the
//! bootloader sees: identification at connect time, the modification bracket
//! around erases and writes, CRC verification and the final reset.
//!
//! ## Example
//!
//! ```rust,no_run
//! use efm8flash::{Efm8Flasher, SparseImage};
//! use efm8flash::transport::{HidTransport, hid};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let info = hid::enumerate(efm8flash::device::SILICON_LABS_VID, 0)?
//!         .into_iter()
//!         .next()
//!         .ok_or("no bootloader found")?;
//!
//!     let mut flasher = Efm8Flasher::new(HidTransport::new(info));
//!     let device = flasher.connect()?;
//!     println!("Connected to {}", device.name);
//!
//!     let image = SparseImage::from_bytes(0x0000, &[0x02, 0x00, 0x10])?;
//!     flasher.write_image_with_progress(&image, |phase, current, total| {
//!         println!("{phase}: {current}/{total}");
//!     })?;
//!
//!     flasher.reset_mcu()?;
//!     flasher.disconnect()?;
//!     Ok(())
//! }
//! ```

mod identify;
mod program;

pub use program::{PHASE_ERASE, PHASE_VERIFY, PHASE_WRITE, page_write_order, plan_pages};

use {
    crate::{
        device::DeviceDescriptor,
        error::{Error, Result},
        protocol::record::{LOCK_UNCHANGED, MAX_DATA_PER_RECORD, Record, Status},
        transport::Transport,
    },
    log::{debug, info, trace, warn},
};

/// Signature byte that makes the bootloader skip itself on the next reset.
const SIGNATURE_DISABLED: u8 = 0x00;

type InterruptChecker = Box<dyn Fn() -> bool + Send>;

/// A session with one EFM8 bootloader.
///
/// Generic over the transport type `T`, which must implement [`Transport`].
pub struct Efm8Flasher<T: Transport> {
    transport: T,
    connected: bool,
    device: Option<DeviceDescriptor>,
    modify_enabled: bool,
    reset_issued: bool,
    interrupt_checker: Option<InterruptChecker>,
}

impl<T: Transport> Efm8Flasher<T> {
    /// Create a session over a transport. Nothing is sent until [`Self::connect`].
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connected: false,
            device: None,
            modify_enabled: false,
            reset_issued: false,
            interrupt_checker: None,
        }
    }

    /// Use a session-local interruption checker instead of the global one.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.interrupt_checker = Some(Box::new(checker));
        self
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the session and return the underlying transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// The identified part, if any.
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    /// Check if the transport is open.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Check if flash modification is currently enabled.
    pub fn is_modify_enabled(&self) -> bool {
        self.modify_enabled
    }

    /// Check if the device has been told to run its application.
    pub fn is_reset_issued(&self) -> bool {
        self.reset_issued
    }

    /// Open the transport and identify the connected part.
    pub fn connect(&mut self) -> Result<DeviceDescriptor> {
        if self.reset_issued {
            return Err(Error::SessionEnded);
        }

        if !self.connected {
            self.transport.open()?;
            self.connected = true;
            info!("Connected to bootloader on {}", self.transport.name());
        }

        let device = self.identify()?;
        info!(
            "Identified {} (bootloader at 0x{:04X})",
            device.name, device.bootloader_start
        );
        Ok(device)
    }

    /// Close the transport.
    ///
    /// After a reset the bootloader has already left the bus, so the
    /// transport is not touched.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.modify_enabled = false;

        if self.reset_issued {
            debug!("Device was reset; skipping transport close");
            return Ok(());
        }
        self.transport.close()
    }

    /// Turn on flash erase/write.
    pub fn enable_modifications(&mut self) -> Result<()> {
        self.send_expect_ack(&Record::enable_modifications())?;
        self.modify_enabled = true;
        debug!("Flash modifications enabled");
        Ok(())
    }

    /// Turn off flash erase/write.
    pub fn disable_modifications(&mut self) -> Result<()> {
        self.send_expect_ack(&Record::disable_modifications())?;
        self.modify_enabled = false;
        debug!("Flash modifications disabled");
        Ok(())
    }

    /// Run `f` with modification enabled.
    ///
    /// Enables first only if currently disabled, and disables afterwards only
    /// in that case, so nested brackets leave the outer state untouched. An
    /// error from `f` wins over an error from the closing Setup record.
    pub fn with_modifications<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
    {
        let auto = !self.modify_enabled;
        if auto {
            self.enable_modifications()?;
        }

        let result = f(self);

        if auto && self.modify_enabled && !self.reset_issued {
            let closed = self.disable_modifications();
            return match (result, closed) {
                (Err(e), closed) => {
                    if let Err(close_err) = closed {
                        warn!("Failed to disable modifications after error: {close_err}");
                    }
                    Err(e)
                },
                (Ok(_), Err(e)) => Err(e),
                (Ok(value), Ok(())) => Ok(value),
            };
        }
        result
    }

    /// Erase one application page.
    pub fn erase_page(&mut self, addr: u32) -> Result<()> {
        let device = self.identified()?;
        let addr16 = page_address(&device, addr)?;

        debug!("Erasing page 0x{addr:04X}");
        self.with_modifications(|s| s.send_expect_ack(&Record::erase(addr16, &[])?))
    }

    /// Write one full page, optionally erasing it first.
    ///
    /// `data` must be exactly one page long. The page is sent in frames of at
    /// most 128 bytes; when `erase` is set only the first frame is an Erase
    /// record.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_page(&mut self, addr: u32, data: &[u8], erase: bool) -> Result<()> {
        let device = self.identified()?;
        let page_size = device.page_size as usize;
        if data.len() != page_size {
            return Err(Error::PageSize {
                expected: page_size,
                got: data.len(),
            });
        }
        let addr16 = page_address(&device, addr)?;

        debug!(
            "Writing page 0x{addr:04X} ({})",
            if erase { "erase" } else { "no erase" }
        );
        self.with_modifications(|s| {
            for (i, frame) in data
                .chunks(MAX_DATA_PER_RECORD)
                .enumerate()
            {
                // Safe cast: offsets stay inside a page below 64 KiB
                let frame_addr = addr16 + (i * MAX_DATA_PER_RECORD) as u16;
                let record = if erase && i == 0 {
                    Record::erase(frame_addr, frame)?
                } else {
                    Record::write(frame_addr, frame)?
                };
                s.send_expect_ack(&record)?;
            }
            Ok(())
        })
    }

    /// Ask the device to compare the CRC of `start..=end` with `crc`.
    pub fn verify(&mut self, start: u16, end: u16, crc: u16) -> Result<()> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }

        let record = Record::verify(start, end, crc);
        match self.send_record(&record)? {
            Status::Ack => {
                debug!("Verified 0x{start:04X}..=0x{end:04X} (CRC 0x{crc:04X})");
                Ok(())
            },
            Status::CrcError => Err(Error::VerificationFailed { start, end }),
            status => Err(status_error(&record, status)),
        }
    }

    /// Program the flash lock byte.
    pub fn lock(&mut self, lock_byte: u8) -> Result<()> {
        info!("Writing lock byte 0x{lock_byte:02X}");
        self.send_expect_ack(&Record::lock(LOCK_UNCHANGED, lock_byte))
    }

    /// Clear the bootloader signature so the application starts on reset.
    pub fn disable_bootloader(&mut self) -> Result<()> {
        info!("Disabling bootloader");
        self.send_expect_ack(&Record::lock(SIGNATURE_DISABLED, LOCK_UNCHANGED))
    }

    /// Reset the device into its application. Ends the session.
    pub fn reset_mcu(&mut self) -> Result<()> {
        info!("Resetting device into application");
        self.send_expect_ack(&Record::run_app(0))?;
        self.reset_issued = true;
        self.modify_enabled = false;
        self.transport.mark_reset();
        Ok(())
    }

    /// Send a record and return the device's status byte.
    pub fn send_record(&mut self, record: &Record) -> Result<Status> {
        if self.reset_issued {
            return Err(Error::SessionEnded);
        }

        let frame = record.encode()?;
        let max_packet = self
            .transport
            .max_packet_size()
            .max(1);
        trace!("TX {:?}: {frame:02X?}", record.command());

        for packet in frame.chunks(max_packet) {
            self.transport.send(packet)?;
        }

        let response = self
            .transport
            .recv(1)?;
        let byte = *response
            .first()
            .ok_or(Error::NoResponse)?;
        let status = Status::from(byte);
        trace!("RX {:?}: 0x{byte:02X} ({status})", record.command());
        Ok(status)
    }

    fn send_expect_ack(&mut self, record: &Record) -> Result<()> {
        match self.send_record(record)? {
            Status::Ack => Ok(()),
            status => Err(status_error(record, status)),
        }
    }

    fn identified(&self) -> Result<DeviceDescriptor> {
        self.device.ok_or(Error::NotIdentified)
    }

    fn interrupted(&self) -> bool {
        match &self.interrupt_checker {
            Some(checker) => checker(),
            None => crate::is_interrupted_requested(),
        }
    }
}

fn status_error(record: &Record, status: Status) -> Error {
    match status {
        Status::Unknown(byte) => Error::UnknownStatus {
            command: record.command(),
            byte,
        },
        status => Error::Protocol {
            command: record.command(),
            status,
        },
    }
}

fn page_address(device: &DeviceDescriptor, addr: u32) -> Result<u16> {
    if !device.is_app_page(addr) {
        return Err(Error::InvalidAddress { addr });
    }
    u16::try_from(addr).map_err(|_| Error::InvalidAddress { addr })
}
