//! Simulated EFM8 bootloader for unit tests.
//!
//! Reassembles packets into records, applies them to an in-memory flash
//! array and answers with the status byte a real bootloader would send.

use {
    crate::{
        device::{self, DeviceDescriptor},
        error::Result,
        protocol::{
            crc::crc16_xmodem,
            record::{Command, FLASH_KEYS, LOCK_UNCHANGED, Record, Request, Status},
        },
        transport::{Transport, TransportKind},
    },
    std::collections::{HashMap, VecDeque},
};

pub(crate) struct SimulatedDevice {
    pub product_id: u16,
    pub device_id: u16,
    pub descriptor: DeviceDescriptor,
    pub flash: Vec<u8>,
    pub modify_enabled: bool,
    pub max_packet: usize,
    /// Every packet handed to `send`, in order.
    pub packets: Vec<Vec<u8>>,
    /// Every complete record, in order.
    pub records: Vec<Record>,
    /// Forced status bytes per command, replacing the simulated result.
    pub overrides: HashMap<Command, u8>,
    /// Never answer.
    pub silent: bool,
    pub signature: u8,
    pub lock: u8,
    pub opened: usize,
    pub closed: usize,
    pub reset_marked: bool,
    pub ran_app: bool,
    pending: Vec<u8>,
    responses: VecDeque<u8>,
}

impl SimulatedDevice {
    /// A device answering as the named part.
    pub fn new(part: &str) -> Self {
        let (family, descriptor) = device::find_part(part).unwrap();
        Self {
            product_id: family.product_id,
            device_id: family.device_id(descriptor),
            descriptor: *descriptor,
            flash: vec![0xFF; descriptor.flash_size as usize],
            modify_enabled: false,
            max_packet: 64,
            packets: Vec::new(),
            records: Vec::new(),
            overrides: HashMap::new(),
            silent: false,
            signature: 0xA5,
            lock: 0xFF,
            opened: 0,
            closed: 0,
            reset_marked: false,
            ran_app: false,
            pending: Vec::new(),
            responses: VecDeque::new(),
        }
    }

    /// EFM8UB10F16G_QFN28: 16 KiB, bootloader at 0x3A00.
    pub fn ub1() -> Self {
        Self::new("EFM8UB10F16G_QFN28")
    }

    pub fn with_override(mut self, command: Command, status: u8) -> Self {
        self.overrides
            .insert(command, status);
        self
    }

    pub fn with_max_packet(mut self, max_packet: usize) -> Self {
        self.max_packet = max_packet;
        self
    }

    /// Erase and Write records only.
    pub fn page_records(&self) -> Vec<&Record> {
        self.records
            .iter()
            .filter(|record| matches!(record.command(), Command::Erase | Command::Write))
            .collect()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.records
            .iter()
            .map(Record::command)
            .collect()
    }

    fn process(&mut self, record: &Record) -> u8 {
        let status = self.apply(record);
        self.overrides
            .get(&record.command())
            .copied()
            .unwrap_or_else(|| status.code())
    }

    fn apply(&mut self, record: &Record) -> Status {
        let Ok(request) = record.request() else {
            return Status::RangeError;
        };

        match request {
            Request::Identify { device_id } => {
                if device_id == self.device_id {
                    Status::Ack
                } else {
                    Status::BadId
                }
            },
            Request::Setup { keys, .. } => {
                self.modify_enabled = keys == FLASH_KEYS;
                Status::Ack
            },
            Request::Erase { addr, data } => {
                let addr = u32::from(addr);
                if !self.writable(addr, data.len()) {
                    return Status::RangeError;
                }
                let base = self
                    .descriptor
                    .page_base(addr) as usize;
                let page = self
                    .descriptor
                    .page_size as usize;
                self.flash[base..base + page].fill(0xFF);
                self.program(addr, data);
                Status::Ack
            },
            Request::Write { addr, data } => {
                let addr = u32::from(addr);
                if !self.writable(addr, data.len()) {
                    return Status::RangeError;
                }
                self.program(addr, data);
                Status::Ack
            },
            Request::Verify { start, end, crc } => {
                let (start, end) = (usize::from(start), usize::from(end));
                if start > end || end >= self.flash.len() {
                    return Status::RangeError;
                }
                if crc16_xmodem(&self.flash[start..=end]) == crc {
                    Status::Ack
                } else {
                    Status::CrcError
                }
            },
            Request::Lock { signature, lock } => {
                if signature != LOCK_UNCHANGED {
                    self.signature = signature;
                }
                if lock != LOCK_UNCHANGED {
                    self.lock = lock;
                }
                Status::Ack
            },
            Request::RunApp { .. } => {
                self.ran_app = true;
                Status::Ack
            },
        }
    }

    fn writable(&self, addr: u32, len: usize) -> bool {
        self.modify_enabled && addr + len as u32 <= self.descriptor.bootloader_start
    }

    // Flash cells can only be cleared by a write.
    fn program(&mut self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        for (cell, byte) in self.flash[start..start + data.len()]
            .iter_mut()
            .zip(data)
        {
            *cell &= byte;
        }
    }
}

impl Transport for SimulatedDevice {
    fn open(&mut self) -> Result<()> {
        self.opened += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed += 1;
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        assert!(packet.len() <= self.max_packet, "packet exceeds max_packet_size");
        self.packets
            .push(packet.to_vec());
        self.pending
            .extend_from_slice(packet);

        if self.pending.len() >= 2 && self.pending.len() == usize::from(self.pending[1]) + 2 {
            let frame = std::mem::take(&mut self.pending);
            let record = Record::decode(&frame).unwrap();
            let status = self.process(&record);
            self.records
                .push(record);
            if !self.silent {
                self.responses
                    .push_back(status);
            }
        }
        Ok(())
    }

    fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
        let n = len.min(self.responses.len());
        Ok(self
            .responses
            .drain(..n)
            .collect())
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn name(&self) -> &str {
        "simulated"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Hid
    }

    fn mark_reset(&mut self) {
        self.reset_marked = true;
    }
}
