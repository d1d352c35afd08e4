use log::{debug, warn};

use crate::{
    error::{Error, Result},
    objects::{ObjectDirectory, ObjectKind, NO_MESSAGE_REPORT_ID},
    platform::BusOps,
    router::{Message, MESSAGE_SIZE},
};

/// Command processor (T6) fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Reset,
    BackupNv,
    Calibrate,
    ReportAll,
}

impl Command {
    pub const fn offset(self) -> u16 {
        match self {
            Self::Reset => 0,
            Self::BackupNv => 1,
            Self::Calibrate => 2,
            Self::ReportAll => 3,
        }
    }
}

pub const RESET_VALUE: u8 = 0x01;
pub const BACKUP_VALUE: u8 = 0x55;
/// Written to the backup field to stop message generation while the
/// configuration is rewritten.
pub const STOP_EVENTS_VALUE: u8 = 0x33;
pub const CALIBRATE_VALUE: u8 = 0x01;
pub const REPORT_ALL_VALUE: u8 = 0x01;

/// Acquisition config (T8) auto-calibration field.
const AUTO_CALIBRATION_OFFSET: u16 = 4;

pub fn write_command<B: BusOps>(
    bus: &mut B,
    directory: &ObjectDirectory,
    command: Command,
    value: u8,
) -> Result<(), B::Error> {
    let address = directory
        .field_address(ObjectKind::CommandProcessor, command.offset())
        .ok_or(Error::<B::Error>::MissingObject(ObjectKind::CommandProcessor))?;
    debug!("mxt: T6 {:?} <- {:#04x}", command, value);
    bus.write(address, &[value])?;
    Ok(())
}

pub fn write_auto_calibration<B: BusOps>(
    bus: &mut B,
    directory: &ObjectDirectory,
    value: u8,
) -> Result<(), B::Error> {
    let address = directory
        .field_address(ObjectKind::AcquisitionConfig, AUTO_CALIBRATION_OFFSET)
        .ok_or(Error::<B::Error>::MissingObject(ObjectKind::AcquisitionConfig))?;
    debug!("mxt: T8 auto calibration <- {}", value);
    bus.write(address, &[value])?;
    Ok(())
}

pub fn read_message<B: BusOps>(
    bus: &mut B,
    directory: &ObjectDirectory,
) -> Result<Message, B::Error> {
    let address = directory
        .instance_address(ObjectKind::MessageProcessor, 0)
        .ok_or(Error::<B::Error>::MissingObject(ObjectKind::MessageProcessor))?;
    let mut raw = [0u8; MESSAGE_SIZE];
    bus.read(address, &mut raw)?;
    Ok(Message::from_bytes(raw))
}

/// Asks the device to report all states and waits for the command
/// processor's answer, which carries the live configuration checksum.
pub fn read_config_checksum<B: BusOps>(
    bus: &mut B,
    directory: &ObjectDirectory,
) -> Result<u32, B::Error> {
    let command_id = directory
        .report_id_base(ObjectKind::CommandProcessor)
        .ok_or(Error::<B::Error>::MissingObject(ObjectKind::CommandProcessor))?;

    write_command(bus, directory, Command::ReportAll, REPORT_ALL_VALUE)?;

    let attempts = u16::from(directory.max_report_id()) * 2;
    for _ in 0..attempts {
        let message = read_message(bus, directory)?;
        if message.report_id == NO_MESSAGE_REPORT_ID {
            continue;
        }
        if message.report_id == command_id {
            let checksum = u32::from_le_bytes([
                message.payload[1],
                message.payload[2],
                message.payload[3],
                0,
            ]);
            debug!("mxt: device config checksum {:#08x}", checksum);
            return Ok(checksum);
        }
    }

    warn!("mxt: no checksum report after {} reads", attempts);
    Err(Error::ChecksumUnavailable)
}

/// Reads and discards messages until the queue reports empty, so the
/// pending line deasserts.
pub fn drain_pending<B: BusOps>(bus: &mut B, directory: &ObjectDirectory) -> Result<(), B::Error> {
    let attempts = u16::from(directory.max_report_id()) * 2;
    for _ in 0..attempts {
        let message = read_message(bus, directory)?;
        if message.report_id == NO_MESSAGE_REPORT_ID {
            return Ok(());
        }
        debug!("mxt: discarded message rid={}", message.report_id);
    }
    warn!("mxt: message queue still busy after {} reads", attempts);
    Err(Error::PendingStuck)
}
