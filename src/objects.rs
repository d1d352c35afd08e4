use core::fmt;

use heapless::Vec;
use log::{debug, info};

use crate::{
    error::{Error, Result},
    platform::BusOps,
};

mod crc;

pub use crc::{crc24, info_crc};

pub const INFO_BLOCK_SIZE: usize = 7;
pub const OBJECT_ELEMENT_SIZE: usize = 6;
pub const INFO_CRC_SIZE: usize = 3;
pub const OBJECT_TABLE_START: u16 = INFO_BLOCK_SIZE as u16;
pub const MAX_OBJECTS: usize = 64;
/// Report-ID `0xFF` is the "no message" marker, so valid IDs stop at 254.
pub const MAX_REPORT_ID: u8 = 0xFE;
pub const NO_MESSAGE_REPORT_ID: u8 = 0xFF;

const REPORT_MAP_CAPACITY: usize = MAX_REPORT_ID as usize + 1;
const TABLE_BUFFER_SIZE: usize = MAX_OBJECTS * OBJECT_ELEMENT_SIZE + INFO_CRC_SIZE;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ObjectKind {
    MessageProcessor,
    CommandProcessor,
    PowerConfig,
    AcquisitionConfig,
    MultiTouchScreen,
    KeyArray,
    SelfTest,
    TouchSuppression,
    ExtraTouchData,
    Timer,
    NoiseSuppression,
    MultiTouchScreenV2,
    Unknown(u8),
}

impl ObjectKind {
    pub const fn from_type(type_id: u8) -> Self {
        match type_id {
            5 => Self::MessageProcessor,
            6 => Self::CommandProcessor,
            7 => Self::PowerConfig,
            8 => Self::AcquisitionConfig,
            9 => Self::MultiTouchScreen,
            15 => Self::KeyArray,
            25 => Self::SelfTest,
            42 => Self::TouchSuppression,
            57 => Self::ExtraTouchData,
            61 => Self::Timer,
            62 => Self::NoiseSuppression,
            100 => Self::MultiTouchScreenV2,
            other => Self::Unknown(other),
        }
    }

    pub const fn type_id(self) -> u8 {
        match self {
            Self::MessageProcessor => 5,
            Self::CommandProcessor => 6,
            Self::PowerConfig => 7,
            Self::AcquisitionConfig => 8,
            Self::MultiTouchScreen => 9,
            Self::KeyArray => 15,
            Self::SelfTest => 25,
            Self::TouchSuppression => 42,
            Self::ExtraTouchData => 57,
            Self::Timer => 61,
            Self::NoiseSuppression => 62,
            Self::MultiTouchScreenV2 => 100,
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.type_id())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InfoBlock {
    pub family_id: u8,
    pub variant_id: u8,
    pub version: u8,
    pub build: u8,
    pub matrix_x: u8,
    pub matrix_y: u8,
    pub object_count: u8,
}

impl InfoBlock {
    pub const fn from_bytes(bytes: [u8; INFO_BLOCK_SIZE]) -> Self {
        Self {
            family_id: bytes[0],
            variant_id: bytes[1],
            version: bytes[2],
            build: bytes[3],
            matrix_x: bytes[4],
            matrix_y: bytes[5],
            object_count: bytes[6],
        }
    }

    pub const fn to_bytes(&self) -> [u8; INFO_BLOCK_SIZE] {
        [
            self.family_id,
            self.variant_id,
            self.version,
            self.build,
            self.matrix_x,
            self.matrix_y,
            self.object_count,
        ]
    }

    pub const fn table_len(&self) -> usize {
        self.object_count as usize * OBJECT_ELEMENT_SIZE
    }

    /// Address of the 3-byte info CRC that trails the object table.
    pub const fn crc_address(&self) -> u16 {
        OBJECT_TABLE_START + self.table_len() as u16
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableError {
    Empty,
    TooManyObjects(u8),
    LengthMismatch { expected: usize, actual: usize },
    ReportIdOverflow(u32),
    CrcMismatch { device: u32, computed: u32 },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("object table is empty"),
            Self::TooManyObjects(count) => {
                write!(f, "{count} objects exceed capacity {MAX_OBJECTS}")
            }
            Self::LengthMismatch { expected, actual } => {
                write!(f, "table length {actual}, expected {expected}")
            }
            Self::ReportIdOverflow(total) => {
                write!(f, "{total} report ids exceed {MAX_REPORT_ID}")
            }
            Self::CrcMismatch { device, computed } => {
                write!(f, "crc device={device:#08x} computed={computed:#08x}")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObjectDescriptor {
    pub kind: ObjectKind,
    pub start_address: u16,
    /// Bytes per instance.
    pub size: u16,
    pub instances: u16,
    /// Report IDs owned by each instance.
    pub report_ids: u8,
    /// Highest report ID owned by this object, 0 when it owns none.
    pub max_report_id: u8,
}

impl ObjectDescriptor {
    fn from_element(element: &[u8]) -> Self {
        Self {
            kind: ObjectKind::from_type(element[0]),
            start_address: u16::from_le_bytes([element[1], element[2]]),
            size: u16::from(element[3]) + 1,
            instances: u16::from(element[4]) + 1,
            report_ids: element[5],
            max_report_id: 0,
        }
    }

    pub fn total_report_ids(&self) -> u16 {
        u16::from(self.report_ids) * self.instances
    }

    /// First report ID owned by this object.
    pub fn min_report_id(&self) -> Option<u8> {
        if self.max_report_id == 0 {
            return None;
        }
        let first = u16::from(self.max_report_id) + 1 - self.total_report_ids();
        u8::try_from(first).ok()
    }

    pub fn instance_address(&self, instance: u16) -> Option<u16> {
        if instance >= self.instances {
            return None;
        }
        self.start_address.checked_add(self.size.checked_mul(instance)?)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReportTarget {
    pub kind: ObjectKind,
    /// `instance * report_ids + n`; the contact slot for touch objects.
    pub index: u8,
}

#[derive(Clone, Debug, Default)]
pub struct ReportIdMap {
    entries: Vec<Option<ReportTarget>, REPORT_MAP_CAPACITY>,
}

impl ReportIdMap {
    fn build(objects: &mut [ObjectDescriptor]) -> core::result::Result<Self, TableError> {
        let total: u32 = objects
            .iter()
            .map(|object| u32::from(object.total_report_ids()))
            .sum();
        if total > u32::from(MAX_REPORT_ID) {
            return Err(TableError::ReportIdOverflow(total));
        }

        let mut entries = Vec::new();
        // Report ID 0 is reserved.
        let _ = entries.push(None);
        for object in objects.iter_mut() {
            let count = object.total_report_ids();
            for index in 0..count {
                let _ = entries.push(Some(ReportTarget {
                    kind: object.kind,
                    index: index as u8,
                }));
            }
            if count > 0 {
                object.max_report_id = (entries.len() - 1) as u8;
            }
        }
        Ok(Self { entries })
    }

    pub fn target(&self, report_id: u8) -> Option<ReportTarget> {
        self.entries.get(usize::from(report_id)).copied().flatten()
    }

    pub fn max_report_id(&self) -> u8 {
        self.entries.len().saturating_sub(1) as u8
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

/// Typed view of the device object table.
#[derive(Clone, Debug)]
pub struct ObjectDirectory {
    info: InfoBlock,
    objects: Vec<ObjectDescriptor, MAX_OBJECTS>,
    report_ids: ReportIdMap,
    info_crc: u32,
}

impl ObjectDirectory {
    /// Builds the directory from the raw table bytes (without the trailing
    /// CRC) and checks them against the CRC the device reported.
    pub fn build(
        info: InfoBlock,
        table: &[u8],
        device_crc: u32,
    ) -> core::result::Result<Self, TableError> {
        if info.object_count == 0 {
            return Err(TableError::Empty);
        }
        if usize::from(info.object_count) > MAX_OBJECTS {
            return Err(TableError::TooManyObjects(info.object_count));
        }
        if table.len() != info.table_len() {
            return Err(TableError::LengthMismatch {
                expected: info.table_len(),
                actual: table.len(),
            });
        }

        let computed = info_crc(&info.to_bytes(), table);
        if computed != device_crc {
            return Err(TableError::CrcMismatch {
                device: device_crc,
                computed,
            });
        }

        let mut objects: Vec<ObjectDescriptor, MAX_OBJECTS> = table
            .chunks_exact(OBJECT_ELEMENT_SIZE)
            .map(ObjectDescriptor::from_element)
            .collect();
        let report_ids = ReportIdMap::build(&mut objects)?;

        for object in &objects {
            debug!(
                "mxt: {} addr={:#06x} size={} instances={} max_rid={}",
                object.kind, object.start_address, object.size, object.instances, object.max_report_id
            );
        }

        Ok(Self {
            info,
            objects,
            report_ids,
            info_crc: computed,
        })
    }

    pub fn info(&self) -> &InfoBlock {
        &self.info
    }

    pub fn info_crc(&self) -> u32 {
        self.info_crc
    }

    pub fn objects(&self) -> &[ObjectDescriptor] {
        &self.objects
    }

    pub fn object(&self, kind: ObjectKind) -> Option<&ObjectDescriptor> {
        self.objects.iter().find(|object| object.kind == kind)
    }

    pub fn report_ids(&self) -> &ReportIdMap {
        &self.report_ids
    }

    pub fn target(&self, report_id: u8) -> Option<ReportTarget> {
        self.report_ids.target(report_id)
    }

    pub fn max_report_id(&self) -> u8 {
        self.report_ids.max_report_id()
    }

    pub fn instance_address(&self, kind: ObjectKind, instance: u16) -> Option<u16> {
        self.object(kind)?.instance_address(instance)
    }

    pub fn report_id_base(&self, kind: ObjectKind) -> Option<u8> {
        self.object(kind)?.min_report_id()
    }

    /// Address of `offset` inside the first instance of `kind`. An object too
    /// short to hold the field counts as missing.
    pub fn field_address(&self, kind: ObjectKind, offset: u16) -> Option<u16> {
        let object = self.object(kind)?;
        if offset >= object.size {
            return None;
        }
        Some(object.start_address + offset)
    }
}

/// Reads the info block, object table and CRC, then builds the directory.
pub fn read_directory<B: BusOps>(bus: &mut B) -> Result<ObjectDirectory, B::Error> {
    let mut header = [0u8; INFO_BLOCK_SIZE];
    bus.read(0, &mut header)?;
    let info = InfoBlock::from_bytes(header);
    info!(
        "mxt: family={:#04x} variant={:#04x} version={}.{} build={:#04x} matrix={}x{} objects={}",
        info.family_id,
        info.variant_id,
        info.version >> 4,
        info.version & 0x0F,
        info.build,
        info.matrix_x,
        info.matrix_y,
        info.object_count
    );

    if info.object_count == 0 {
        return Err(Error::MalformedDescriptor(TableError::Empty));
    }
    if usize::from(info.object_count) > MAX_OBJECTS {
        return Err(Error::MalformedDescriptor(TableError::TooManyObjects(
            info.object_count,
        )));
    }

    let table_len = info.table_len();
    let mut buffer = [0u8; TABLE_BUFFER_SIZE];
    let raw = &mut buffer[..table_len + INFO_CRC_SIZE];
    bus.read(OBJECT_TABLE_START, raw)?;

    let (table, crc) = raw.split_at(table_len);
    let device_crc = u32::from_le_bytes([crc[0], crc[1], crc[2], 0]);
    ObjectDirectory::build(info, table, device_crc).map_err(Error::from_table)
}
