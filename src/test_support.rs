use std::{cell::RefCell, collections::VecDeque, rc::Rc, vec::Vec};

use crate::{
    objects::{info_crc, InfoBlock, OBJECT_ELEMENT_SIZE},
    platform::{BusOps, DelayOps, EventSink, PendingSignal},
    tracker::ContactBatch,
};

pub const FAMILY_ID: u8 = 0x82;
pub const VERSION: u8 = 0x10;
pub const BUILD: u8 = 0xAA;

pub const T5_ADDR: u16 = 0x0100;
pub const T6_ADDR: u16 = 0x0110;
pub const T7_ADDR: u16 = 0x0120;
pub const T8_ADDR: u16 = 0x0130;
pub const T9_ADDR: u16 = 0x0140;
pub const T100_ADDR: u16 = 0x0200;

pub const RID_T6: u8 = 1;
pub const RID_T9_BASE: u8 = 2;
pub const RID_T15: u8 = 12;
pub const RID_T25: u8 = 13;
pub const RID_T42: u8 = 14;
pub const RID_T57: u8 = 15;
pub const RID_T61: u8 = 16;
pub const RID_T62: u8 = 18;
pub const RID_T100_BASE: u8 = 19;
pub const RID_T46: u8 = 31;
pub const MAX_RID: u8 = 31;

const MEMORY_SIZE: usize = 0x0400;

/// `[type, addr_lo, addr_hi, size - 1, instances - 1, report_ids]`
pub const STANDARD_TABLE: [[u8; OBJECT_ELEMENT_SIZE]; 14] = [
    [5, 0x00, 0x01, 9, 0, 0],
    [6, 0x10, 0x01, 5, 0, 1],
    [7, 0x20, 0x01, 3, 0, 0],
    [8, 0x30, 0x01, 9, 0, 0],
    [9, 0x40, 0x01, 35, 0, 10],
    [15, 0x70, 0x01, 10, 0, 1],
    [25, 0x80, 0x01, 5, 0, 1],
    [42, 0x90, 0x01, 7, 0, 1],
    [57, 0xA0, 0x01, 2, 0, 1],
    [61, 0xB0, 0x01, 4, 1, 1],
    [62, 0xC0, 0x01, 19, 0, 1],
    [100, 0x00, 0x02, 59, 0, 12],
    [38, 0x40, 0x02, 7, 0, 0],
    [46, 0x50, 0x02, 9, 0, 1],
];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn standard_info() -> InfoBlock {
    InfoBlock {
        family_id: FAMILY_ID,
        variant_id: 0x1A,
        version: VERSION,
        build: BUILD,
        matrix_x: 24,
        matrix_y: 14,
        object_count: STANDARD_TABLE.len() as u8,
    }
}

pub fn flatten(elements: &[[u8; OBJECT_ELEMENT_SIZE]]) -> Vec<u8> {
    elements.iter().flatten().copied().collect()
}

/// Info block, object table and trailing CRC as the device exposes them.
pub fn encode_info_area(info: &InfoBlock, elements: &[[u8; OBJECT_ELEMENT_SIZE]]) -> Vec<u8> {
    let header = info.to_bytes();
    let table = flatten(elements);
    let crc = info_crc(&header, &table);
    let mut bytes = header.to_vec();
    bytes.extend_from_slice(&table);
    bytes.extend_from_slice(&crc.to_le_bytes()[..3]);
    bytes
}

#[derive(Debug)]
pub struct DeviceState {
    pub memory: Vec<u8>,
    pub messages: VecDeque<[u8; 9]>,
    pub writes: Vec<(u16, Vec<u8>)>,
    pub config_checksum: u32,
    pub read_failures: u8,
    pub write_failures: u8,
    pub answer_checksum: bool,
}

#[derive(Clone, Debug)]
pub struct MockDevice {
    state: Rc<RefCell<DeviceState>>,
}

impl MockDevice {
    pub fn standard() -> Self {
        Self::with_table(&standard_info(), &STANDARD_TABLE)
    }

    pub fn with_table(info: &InfoBlock, elements: &[[u8; OBJECT_ELEMENT_SIZE]]) -> Self {
        let mut memory = vec![0u8; MEMORY_SIZE];
        let area = encode_info_area(info, elements);
        memory[..area.len()].copy_from_slice(&area);
        Self {
            state: Rc::new(RefCell::new(DeviceState {
                memory,
                messages: VecDeque::new(),
                writes: Vec::new(),
                config_checksum: 0,
                read_failures: 0,
                write_failures: 0,
                answer_checksum: true,
            })),
        }
    }

    pub fn state(&self) -> std::cell::RefMut<'_, DeviceState> {
        self.state.borrow_mut()
    }

    pub fn push_message(&self, report_id: u8, payload: [u8; 8]) {
        let mut message = [0u8; 9];
        message[0] = report_id;
        message[1..].copy_from_slice(&payload);
        self.state.borrow_mut().messages.push_back(message);
    }

    pub fn set_config_checksum(&self, checksum: u32) {
        self.state.borrow_mut().config_checksum = checksum;
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.state.borrow().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.borrow_mut().writes.clear();
    }

    pub fn writes_to(&self, address: u16) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|(at, _)| *at == address)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    pub fn memory(&self, address: u16, len: usize) -> Vec<u8> {
        let start = usize::from(address);
        self.state.borrow().memory[start..start + len].to_vec()
    }

    pub fn pending(&self) -> MockPending {
        MockPending {
            state: Rc::clone(&self.state),
        }
    }
}

impl BusOps for MockDevice {
    type Error = MockBusError;

    fn read(&mut self, address: u16, buffer: &mut [u8]) -> Result<(), MockBusError> {
        let mut state = self.state.borrow_mut();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(MockBusError);
        }
        if address == T5_ADDR {
            let message = state.messages.pop_front().unwrap_or([0xFF; 9]);
            let len = buffer.len().min(message.len());
            buffer[..len].copy_from_slice(&message[..len]);
            return Ok(());
        }
        let start = usize::from(address);
        let end = start + buffer.len();
        if end > state.memory.len() {
            return Err(MockBusError);
        }
        buffer.copy_from_slice(&state.memory[start..end]);
        Ok(())
    }

    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), MockBusError> {
        let mut state = self.state.borrow_mut();
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(MockBusError);
        }
        let start = usize::from(address);
        let end = start + bytes.len();
        if end > state.memory.len() {
            return Err(MockBusError);
        }
        state.memory[start..end].copy_from_slice(bytes);
        state.writes.push((address, bytes.to_vec()));

        if address == T6_ADDR + 3 && bytes.first() == Some(&1) && state.answer_checksum {
            let checksum = state.config_checksum.to_le_bytes();
            let report = [
                RID_T6,
                0x00,
                checksum[0],
                checksum[1],
                checksum[2],
                0,
                0,
                0,
                0,
            ];
            state.messages.push_back(report);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MockBusError;

pub struct MockPending {
    state: Rc<RefCell<DeviceState>>,
}

impl PendingSignal for MockPending {
    fn is_pending(&mut self) -> bool {
        !self.state.borrow().messages.is_empty()
    }
}

#[derive(Default)]
pub struct NoDelay {
    pub total_ms: u32,
}

impl DelayOps for NoDelay {
    fn delay_ms(&mut self, millis: u32) {
        self.total_ms += millis;
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub batches: Vec<ContactBatch>,
    pub keys: Vec<(u8, bool)>,
}

impl EventSink for RecordingSink {
    fn report(&mut self, batch: &ContactBatch) {
        self.batches.push(batch.clone());
    }

    fn report_key(&mut self, key: u8, pressed: bool) {
        self.keys.push((key, pressed));
    }
}
