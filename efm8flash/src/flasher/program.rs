//! Whole-image programming.
//!
//! Page 0 holds the reset vector and the bootloader treats a non-erased byte
//! at address 0 as "application present". It is erased before anything else
//! and written after everything else, so an update cut short at any point
//! leaves the device in the bootloader.

use {
    super::Efm8Flasher,
    crate::{
        error::{Error, Result},
        image::FlashImage,
        protocol::crc::crc16_xmodem,
        protocol::record::Record,
        transport::Transport,
    },
    log::{debug, info},
};

/// Progress phase reported while writing pages.
pub const PHASE_WRITE: &str = "Writing";

/// Progress phase reported while verifying segments.
pub const PHASE_VERIFY: &str = "Verifying";

/// Progress phase reported while erasing the application region.
pub const PHASE_ERASE: &str = "Erasing";

/// Page addresses that hold at least one populated byte, ascending.
pub fn plan_pages<I: FlashImage + ?Sized>(image: &I, page_size: u32) -> Vec<u32> {
    let mut pages: Vec<u32> = Vec::new();
    for (start, end) in image.populated_segments() {
        let mut page = start - start % page_size;
        while page <= end {
            if pages.last() != Some(&page) {
                pages.push(page);
            }
            match page.checked_add(page_size) {
                Some(next) => page = next,
                None => break,
            }
        }
    }
    pages
}

/// The order pages are written in: ascending, with page 0 moved to the end.
pub fn page_write_order(pages: &[u32]) -> Vec<u32> {
    let (zero, rest): (Vec<u32>, Vec<u32>) = pages
        .iter()
        .partition(|&&page| page == 0);
    rest.into_iter()
        .chain(zero)
        .collect()
}

impl<T: Transport> Efm8Flasher<T> {
    /// Program and verify an image.
    pub fn write_image<I: FlashImage + ?Sized>(&mut self, image: &I) -> Result<()> {
        self.write_image_with_progress(image, |_, _, _| {})
    }

    /// Program and verify an image, reporting `(phase, done, total)`.
    pub fn write_image_with_progress<I, F>(&mut self, image: &I, mut progress: F) -> Result<()>
    where
        I: FlashImage + ?Sized,
        F: FnMut(&str, usize, usize),
    {
        let device = self.identified()?;

        let Some(max_address) = image.max_address() else {
            debug!("Image is empty; nothing to write");
            return Ok(());
        };
        if max_address >= device.bootloader_start {
            return Err(Error::ImageTooLarge {
                max_allowed: device.max_app_address(),
                got: max_address,
            });
        }

        let pages = plan_pages(image, device.page_size);
        if pages.is_empty() {
            return Ok(());
        }
        let order = page_write_order(&pages);
        let has_page_zero = pages.first() == Some(&0);
        let page_size = device.page_size;

        info!(
            "Writing {} page(s) to {}{}",
            pages.len(),
            device.name,
            if has_page_zero { ", page 0 last" } else { "" }
        );

        self.with_modifications(|s| {
            if has_page_zero {
                debug!("Erasing page 0 before any other write");
                s.send_expect_ack(&Record::erase(0, &[])?)?;
            }

            let total = order.len();
            progress(PHASE_WRITE, 0, total);
            for (done, &page) in order
                .iter()
                .enumerate()
            {
                if s.interrupted() {
                    return Err(Error::Interrupted);
                }
                let data = image.bytes_in_range(page, page + page_size - 1);
                // Page 0 was erased up front
                s.write_page(page, &data, page != 0)?;
                progress(PHASE_WRITE, done + 1, total);
            }
            Ok(())
        })?;

        let segments = image.populated_segments();
        let total = segments.len();
        progress(PHASE_VERIFY, 0, total);
        for (done, &(start, end)) in segments
            .iter()
            .enumerate()
        {
            let crc = crc16_xmodem(&image.bytes_in_range(start, end));
            let start16 = u16::try_from(start).map_err(|_| Error::InvalidAddress { addr: start })?;
            let end16 = u16::try_from(end).map_err(|_| Error::InvalidAddress { addr: end })?;
            self.verify(start16, end16, crc)?;
            progress(PHASE_VERIFY, done + 1, total);
        }

        info!("Image written and verified");
        Ok(())
    }

    /// Erase every application page, page 0 first.
    pub fn erase_application(&mut self) -> Result<()> {
        self.erase_application_with_progress(|_, _, _| {})
    }

    /// Erase every application page, reporting `(phase, done, total)`.
    pub fn erase_application_with_progress<F>(&mut self, mut progress: F) -> Result<()>
    where
        F: FnMut(&str, usize, usize),
    {
        let device = self.identified()?;
        let pages: Vec<u32> = device
            .app_pages()
            .collect();
        let total = pages.len();
        info!("Erasing {total} application page(s) on {}", device.name);

        self.with_modifications(|s| {
            progress(PHASE_ERASE, 0, total);
            for (done, &page) in pages
                .iter()
                .enumerate()
            {
                if s.interrupted() {
                    return Err(Error::Interrupted);
                }
                s.erase_page(page)?;
                progress(PHASE_ERASE, done + 1, total);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            image::SparseImage,
            protocol::record::{Command, Request},
            testing::SimulatedDevice,
        },
        std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    // Session-local checker keeps these tests independent of the global one
    fn connected(device: SimulatedDevice) -> Efm8Flasher<SimulatedDevice> {
        let mut flasher = Efm8Flasher::new(device).with_interrupt_checker(|| false);
        flasher
            .connect()
            .unwrap();
        flasher
    }

    fn page_addresses(device: &SimulatedDevice) -> Vec<(Command, u16)> {
        device
            .page_records()
            .iter()
            .map(|record| match record.request().unwrap() {
                Request::Erase { addr, .. } | Request::Write { addr, .. } => {
                    (record.command(), addr)
                },
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_plan_pages_covers_populated_bytes() {
        let mut image = SparseImage::new();
        image.add_data(0x01F0, &[0xAA; 0x20]).unwrap();
        image.add_data(0x0A00, &[0xBB]).unwrap();
        image.add_data(0x0BFF, &[0xCC]).unwrap();

        let pages = plan_pages(&image, 512);
        assert_eq!(pages, vec![0x0000, 0x0200, 0x0A00]);

        for (start, end) in image.populated_segments() {
            for addr in start..=end {
                assert!(pages.contains(&(addr - addr % 512)));
            }
        }
    }

    #[test]
    fn test_plan_pages_skips_empty_pages() {
        let mut image = SparseImage::new();
        image.set(0x0000, 1);
        image.set(0x1000, 2);
        assert_eq!(plan_pages(&image, 512), vec![0x0000, 0x1000]);
        assert!(plan_pages(&SparseImage::new(), 512).is_empty());
    }

    #[test]
    fn test_page_write_order() {
        assert_eq!(page_write_order(&[0, 0x200, 0x600]), vec![0x200, 0x600, 0]);
        assert_eq!(page_write_order(&[0x200, 0x400]), vec![0x200, 0x400]);
        assert_eq!(page_write_order(&[0]), vec![0]);
    }

    #[test]
    fn test_page_zero_erased_first_and_written_last() {
        let mut image = SparseImage::new();
        image.add_data(0x0000, &[0x02, 0x01, 0x00]).unwrap();
        image.add_data(0x0400, &[0x55; 600]).unwrap();
        let mut flasher = connected(SimulatedDevice::ub1());

        flasher
            .write_image(&image)
            .unwrap();

        let device = flasher.transport();
        let records = page_addresses(device);
        assert_eq!(records.first(), Some(&(Command::Erase, 0x0000)));
        assert_eq!(
            device.page_records()[0].request().unwrap(),
            Request::Erase { addr: 0, data: &[] }
        );

        // Remaining records: pages 0x0400, 0x0600, then page 0 with writes only
        let expected: Vec<(Command, u16)> = vec![
            (Command::Erase, 0x0000),
            (Command::Erase, 0x0400),
            (Command::Write, 0x0480),
            (Command::Write, 0x0500),
            (Command::Write, 0x0580),
            (Command::Erase, 0x0600),
            (Command::Write, 0x0680),
            (Command::Write, 0x0700),
            (Command::Write, 0x0780),
            (Command::Write, 0x0000),
            (Command::Write, 0x0080),
            (Command::Write, 0x0100),
            (Command::Write, 0x0180),
        ];
        assert_eq!(records, expected);

        assert_eq!(&device.flash[..3], &[0x02, 0x01, 0x00]);
        assert!(device.flash[0x0400..0x0658].iter().all(|&b| b == 0x55));
        assert!(!device.modify_enabled);
    }

    #[test]
    fn test_pages_written_in_ascending_order_without_page_zero() {
        let mut image = SparseImage::new();
        image.add_data(0x1200, &[1; 4]).unwrap();
        image.add_data(0x0200, &[2; 4]).unwrap();
        image.add_data(0x0800, &[3; 4]).unwrap();
        let mut flasher = connected(SimulatedDevice::ub1());

        flasher
            .write_image(&image)
            .unwrap();

        let erases: Vec<u16> = page_addresses(flasher.transport())
            .into_iter()
            .filter(|(command, _)| *command == Command::Erase)
            .map(|(_, addr)| addr)
            .collect();
        assert_eq!(erases, vec![0x0200, 0x0800, 0x1200]);
    }

    #[test]
    fn test_bracket_and_verify_sequence() {
        let mut image = SparseImage::new();
        image.add_data(0x0010, &[0xA0; 16]).unwrap();
        image.add_data(0x0300, &[0xB0; 8]).unwrap();
        let mut flasher = connected(SimulatedDevice::ub1());

        flasher
            .write_image(&image)
            .unwrap();

        let device = flasher.transport();
        let commands = device.commands();
        let first_page = commands
            .iter()
            .position(|c| matches!(c, Command::Erase | Command::Write))
            .unwrap();
        assert_eq!(commands[first_page - 1], Command::Setup);

        let verifies: Vec<_> = device
            .records
            .iter()
            .filter_map(|r| match r.request() {
                Ok(Request::Verify { start, end, .. }) => Some((start, end)),
                _ => None,
            })
            .collect();
        assert_eq!(verifies, vec![(0x0010, 0x001F), (0x0300, 0x0307)]);

        let last_setup = commands
            .iter()
            .rposition(|c| *c == Command::Setup)
            .unwrap();
        let first_verify = commands
            .iter()
            .position(|c| *c == Command::Verify)
            .unwrap();
        assert!(last_setup < first_verify);
    }

    #[test]
    fn test_image_too_large_before_any_io() {
        let mut image = SparseImage::new();
        image.set(0x0000, 0x02);
        image.set(0x3A01, 0xFF);
        let mut flasher = connected(SimulatedDevice::ub1());
        let before = flasher
            .transport()
            .packets
            .len();

        assert!(matches!(
            flasher.write_image(&image),
            Err(Error::ImageTooLarge {
                max_allowed: 0x39FF,
                got: 0x3A01
            })
        ));
        assert_eq!(flasher.transport().packets.len(), before);
    }

    #[test]
    fn test_empty_image_is_a_no_op() {
        let mut flasher = connected(SimulatedDevice::ub1());
        let before = flasher
            .transport()
            .packets
            .len();

        flasher
            .write_image(&SparseImage::new())
            .unwrap();
        assert_eq!(flasher.transport().packets.len(), before);
    }

    #[test]
    fn test_verification_failure_aborts() {
        let image = SparseImage::from_bytes(0x0200, &[0x12; 32]).unwrap();
        let mut flasher =
            connected(SimulatedDevice::ub1().with_override(Command::Verify, 0x43));

        assert!(matches!(
            flasher.write_image(&image),
            Err(Error::VerificationFailed {
                start: 0x0200,
                end: 0x021F
            })
        ));
    }

    #[test]
    fn test_write_error_leaves_page_zero_erased() {
        let mut image = SparseImage::new();
        image.add_data(0x0000, &[0x02; 16]).unwrap();
        image.add_data(0x0200, &[0x33; 16]).unwrap();
        let mut device = SimulatedDevice::ub1();
        device.flash[..16].fill(0x00);
        let mut flasher = connected(device.with_override(Command::Write, 0x41));

        assert!(matches!(
            flasher.write_image(&image),
            Err(Error::Protocol {
                command: Command::Write,
                ..
            })
        ));
        let device = flasher.transport();
        assert!(device.flash[..512].iter().all(|&b| b == 0xFF));
        assert!(!flasher.is_modify_enabled());
    }

    #[test]
    fn test_interrupt_between_pages() {
        let mut image = SparseImage::new();
        image.add_data(0x0200, &[1; 4]).unwrap();
        image.add_data(0x0400, &[2; 4]).unwrap();
        image.add_data(0x0600, &[3; 4]).unwrap();

        let checks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&checks);
        let mut flasher = connected(SimulatedDevice::ub1())
            .with_interrupt_checker(move || counter.fetch_add(1, Ordering::SeqCst) >= 1);

        assert!(matches!(flasher.write_image(&image), Err(Error::Interrupted)));

        // Only the first page went out, and complete
        let pages = page_addresses(flasher.transport());
        assert_eq!(pages.len(), 4);
        assert!(pages.iter().all(|(_, addr)| (0x0200..0x0400).contains(addr)));
        assert!(!flasher.is_modify_enabled());
    }

    #[test]
    fn test_progress_reports_pages_and_segments() {
        let mut image = SparseImage::new();
        image.add_data(0x0000, &[1; 4]).unwrap();
        image.add_data(0x0200, &[2; 4]).unwrap();
        let mut flasher = connected(SimulatedDevice::ub1());

        let mut events = Vec::new();
        flasher
            .write_image_with_progress(&image, |phase, done, total| {
                events.push((phase.to_string(), done, total));
            })
            .unwrap();

        assert_eq!(events.first(), Some(&(PHASE_WRITE.to_string(), 0, 2)));
        assert!(events.contains(&(PHASE_WRITE.to_string(), 2, 2)));
        assert_eq!(events.last(), Some(&(PHASE_VERIFY.to_string(), 2, 2)));
    }

    #[test]
    fn test_erase_application() {
        let mut device = SimulatedDevice::new("EFM8UB10F8G_QFN20");
        device.flash[..0x1A00].fill(0x00);
        let mut flasher = connected(device);

        flasher
            .erase_application()
            .unwrap();

        let device = flasher.transport();
        let erased = page_addresses(device);
        assert_eq!(erased.len(), 13);
        assert_eq!(erased[0], (Command::Erase, 0x0000));
        assert_eq!(erased[12], (Command::Erase, 0x1800));
        assert!(device.flash[..0x1A00].iter().all(|&b| b == 0xFF));
        assert_eq!(device.commands().iter().filter(|c| **c == Command::Setup).count(), 2);
    }

    #[test]
    fn test_write_image_requires_identification() {
        let mut flasher = Efm8Flasher::new(SimulatedDevice::ub1());
        assert!(matches!(
            flasher.write_image(&SparseImage::from_bytes(0, &[1]).unwrap()),
            Err(Error::NotIdentified)
        ));
    }
}
