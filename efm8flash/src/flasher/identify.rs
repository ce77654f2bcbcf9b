//! Part identification.
//!
//! The bootloader cannot report its own id; it can only confirm or deny a
//! guess. Candidates are probed in catalog order and the first one that is
//! not answered with BADID wins.

use {
    super::Efm8Flasher,
    crate::{
        device::{self, DeviceDescriptor, DeviceFamily},
        error::{Error, Result},
        protocol::record::{Record, Status},
        transport::Transport,
    },
    log::{debug, warn},
};

impl<T: Transport> Efm8Flasher<T> {
    /// Identify the connected part using the transport's product id.
    pub fn identify(&mut self) -> Result<DeviceDescriptor> {
        let product_id = self
            .transport
            .product_id();
        let family =
            device::family_by_product_id(product_id).ok_or(Error::UnknownProduct { product_id })?;
        self.identify_in(family)
    }

    /// Identify the connected part among the members of `family`.
    pub fn identify_in(&mut self, family: &DeviceFamily) -> Result<DeviceDescriptor> {
        debug!("Probing {} candidates of {}", family.devices.len(), family.name);

        for (device_id, descriptor) in family.candidates() {
            match self.probe(device_id)? {
                Status::BadId => {
                    debug!("0x{device_id:04X}: BADID");
                },
                status => {
                    if status != Status::Ack {
                        warn!("0x{device_id:04X} answered {status}; treating as a match");
                    }
                    self.device = Some(*descriptor);
                    return Ok(*descriptor);
                },
            }
        }

        Err(Error::DeviceNotIdentified)
    }

    /// Send a single Identify record and return the raw status.
    pub fn probe(&mut self, device_id: u16) -> Result<Status> {
        self.send_record(&Record::identify(device_id))
    }
}
