use std::{cell::RefCell, collections::VecDeque, fmt, mem, rc::Rc};

use anyhow::{Context, Result};
use mxt_touch::objects::{info_crc, ObjectKind, OBJECT_TABLE_START};
use mxt_touch::platform::{BusOps, DelayOps, PendingSignal};
use mxt_touch::router::MESSAGE_SIZE;

use crate::trace::Trace;

const ADDRESS_SPACE: usize = 0x1_0000;

struct DeviceState {
    memory: Vec<u8>,
    message_address: u16,
    messages: VecDeque<[u8; MESSAGE_SIZE]>,
    writes: Vec<(u16, Vec<u8>)>,
}

/// Register space rebuilt from the trace's object list. Message reads are
/// served from the queued pass; writes land in memory and are recorded.
#[derive(Clone)]
pub struct ReplayDevice {
    state: Rc<RefCell<DeviceState>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutOfRange {
    pub address: u16,
    pub len: usize,
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "access of {} bytes at {:#06x} outside register space",
            self.len, self.address
        )
    }
}

impl ReplayDevice {
    pub fn new(trace: &Trace) -> Result<Self> {
        let message_address = trace
            .objects
            .iter()
            .find(|object| ObjectKind::from_type(object.type_id) == ObjectKind::MessageProcessor)
            .map(|object| object.address)
            .context("trace has no message processor (T5) object")?;

        let header = trace.info.to_bytes();
        let table: Vec<u8> = trace
            .objects
            .iter()
            .flat_map(|object| object.element())
            .collect();
        let crc = info_crc(&header, &table);

        let mut memory = vec![0u8; ADDRESS_SPACE];
        let table_start = usize::from(OBJECT_TABLE_START);
        memory[..header.len()].copy_from_slice(&header);
        memory[table_start..table_start + table.len()].copy_from_slice(&table);
        let crc_start = table_start + table.len();
        memory[crc_start..crc_start + 3].copy_from_slice(&crc.to_le_bytes()[..3]);

        Ok(Self {
            state: Rc::new(RefCell::new(DeviceState {
                memory,
                message_address,
                messages: VecDeque::new(),
                writes: Vec::new(),
            })),
        })
    }

    pub fn queue(&self, messages: &[[u8; MESSAGE_SIZE]]) {
        self.state.borrow_mut().messages.extend(messages.iter().copied());
    }

    pub fn queued(&self) -> usize {
        self.state.borrow().messages.len()
    }

    pub fn take_writes(&self) -> Vec<(u16, Vec<u8>)> {
        mem::take(&mut self.state.borrow_mut().writes)
    }

    pub fn pending(&self) -> ReplayPending {
        ReplayPending {
            state: Rc::clone(&self.state),
        }
    }

    fn range(address: u16, len: usize) -> Result<std::ops::Range<usize>, OutOfRange> {
        let start = usize::from(address);
        let end = start + len;
        if end > ADDRESS_SPACE {
            return Err(OutOfRange { address, len });
        }
        Ok(start..end)
    }
}

impl BusOps for ReplayDevice {
    type Error = OutOfRange;

    fn read(&mut self, address: u16, buffer: &mut [u8]) -> Result<(), OutOfRange> {
        let mut state = self.state.borrow_mut();
        if address == state.message_address {
            let message = state
                .messages
                .pop_front()
                .unwrap_or([0xFF; MESSAGE_SIZE]);
            let len = buffer.len().min(MESSAGE_SIZE);
            buffer[..len].copy_from_slice(&message[..len]);
            return Ok(());
        }
        let range = Self::range(address, buffer.len())?;
        buffer.copy_from_slice(&state.memory[range]);
        Ok(())
    }

    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), OutOfRange> {
        let range = Self::range(address, bytes.len())?;
        let mut state = self.state.borrow_mut();
        state.memory[range].copy_from_slice(bytes);
        state.writes.push((address, bytes.to_vec()));
        Ok(())
    }
}

pub struct ReplayPending {
    state: Rc<RefCell<DeviceState>>,
}

impl PendingSignal for ReplayPending {
    fn is_pending(&mut self) -> bool {
        !self.state.borrow().messages.is_empty()
    }
}

/// Replay runs on trace time; waits return immediately.
pub struct NoDelay;

impl DelayOps for NoDelay {
    fn delay_ms(&mut self, _millis: u32) {}
}
