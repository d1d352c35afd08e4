use core::fmt;

use log::{info, warn};

use crate::{
    commands::{self, Command, STOP_EVENTS_VALUE},
    error::{Error, Mismatch, Result},
    objects::{ObjectDirectory, ObjectKind},
    platform::BusOps,
};

mod image;
#[cfg(test)]
mod tests;

pub use image::{ConfigImage, ImageError, ParsedImage, IMAGE_HEADER_LEN, IMAGE_MAGIC};

/// `[object_type, instance, size]` ahead of every record payload.
pub const RECORD_HEADER_LEN: usize = 3;
const ZERO_FILL_CHUNK: usize = 32;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PowerProfile {
    #[default]
    Battery,
    Charger,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Profiles<'a> {
    Single(&'a [u8]),
    Dual { battery: &'a [u8], charger: &'a [u8] },
}

/// Configuration shipped for one device firmware revision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConfigBlob<'a> {
    pub firmware_version: u8,
    pub build_version: u8,
    pub checksum: u32,
    profiles: Profiles<'a>,
}

impl<'a> ConfigBlob<'a> {
    pub const fn single(
        firmware_version: u8,
        build_version: u8,
        checksum: u32,
        records: &'a [u8],
    ) -> Self {
        Self {
            firmware_version,
            build_version,
            checksum,
            profiles: Profiles::Single(records),
        }
    }

    pub const fn dual(
        firmware_version: u8,
        build_version: u8,
        checksum: u32,
        battery: &'a [u8],
        charger: &'a [u8],
    ) -> Self {
        Self {
            firmware_version,
            build_version,
            checksum,
            profiles: Profiles::Dual { battery, charger },
        }
    }

    pub const fn profile_count(&self) -> u8 {
        match self.profiles {
            Profiles::Single(_) => 1,
            Profiles::Dual { .. } => 2,
        }
    }

    /// Record stream for `profile`; a single-profile blob ignores it.
    pub const fn records(&self, profile: PowerProfile) -> &'a [u8] {
        match (self.profiles, profile) {
            (Profiles::Single(records), _) => records,
            (Profiles::Dual { battery, .. }, PowerProfile::Battery) => battery,
            (Profiles::Dual { charger, .. }, PowerProfile::Charger) => charger,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordError {
    HeaderOverflow { offset: usize, len: usize },
    PayloadOverflow { end: usize, len: usize },
    UnknownObject(ObjectKind),
    SizeExceeded { size: u16, object_size: u16 },
    InstanceOutOfRange { instance: u8, instances: u16 },
    AddressOverflow { address: u16, object_size: u16 },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeaderOverflow { offset, len } => {
                write!(f, "header at {offset} overruns {len} bytes")
            }
            Self::PayloadOverflow { end, len } => {
                write!(f, "payload ends at {end}, beyond {len} bytes")
            }
            Self::UnknownObject(kind) => write!(f, "{kind} not in object table"),
            Self::SizeExceeded { size, object_size } => {
                write!(f, "{size} bytes exceed object size {object_size}")
            }
            Self::InstanceOutOfRange {
                instance,
                instances,
            } => write!(f, "instance {instance} of {instances}"),
            Self::AddressOverflow {
                address,
                object_size,
            } => write!(
                f,
                "{object_size} bytes at {address:#06x} run past the register space"
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConfigRecord<'a> {
    pub kind: ObjectKind,
    pub instance: u8,
    pub payload: &'a [u8],
}

/// Walks `[type, instance, size, payload..]` records. Stops after the first
/// framing error.
pub struct RecordIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    index: usize,
    failed: bool,
}

impl<'a> RecordIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            index: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = core::result::Result<(usize, ConfigRecord<'a>), (usize, RecordError)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        let index = self.index;
        let len = self.bytes.len();
        if self.offset + RECORD_HEADER_LEN > len {
            self.failed = true;
            return Some(Err((
                index,
                RecordError::HeaderOverflow {
                    offset: self.offset,
                    len,
                },
            )));
        }

        let header = &self.bytes[self.offset..self.offset + RECORD_HEADER_LEN];
        let start = self.offset + RECORD_HEADER_LEN;
        let end = start + usize::from(header[2]);
        if end > len {
            self.failed = true;
            return Some(Err((index, RecordError::PayloadOverflow { end, len })));
        }

        self.offset = end;
        self.index += 1;
        Some(Ok((
            index,
            ConfigRecord {
                kind: ObjectKind::from_type(header[0]),
                instance: header[1],
                payload: &self.bytes[start..end],
            },
        )))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    Applied { records: usize },
    Skipped { checksum: u32 },
}

/// Keeps the device configuration equal to a blob, writing only when the
/// live checksum differs.
pub struct ConfigSynchronizer<S> {
    selector: S,
}

impl<S> ConfigSynchronizer<S>
where
    S: Fn() -> PowerProfile,
{
    pub fn new(selector: S) -> Self {
        Self { selector }
    }

    fn selected(&self, blob: &ConfigBlob<'_>) -> PowerProfile {
        if blob.profile_count() > 1 {
            (self.selector)()
        } else {
            PowerProfile::Battery
        }
    }

    pub fn sync<B: BusOps>(
        &self,
        bus: &mut B,
        directory: &ObjectDirectory,
        blob: &ConfigBlob<'_>,
    ) -> Result<SyncOutcome, B::Error> {
        let device_checksum = commands::read_config_checksum(bus, directory)?;

        check_versions::<B::Error>(directory, blob)?;

        if device_checksum == blob.checksum {
            info!("mxt: config checksum {:#08x} up to date", device_checksum);
            return Ok(SyncOutcome::Skipped {
                checksum: device_checksum,
            });
        }

        let profile = self.selected(blob);
        info!(
            "mxt: config checksum device={:#08x} blob={:#08x}, writing {:?} profile",
            device_checksum, blob.checksum, profile
        );
        commands::write_command(bus, directory, Command::BackupNv, STOP_EVENTS_VALUE)?;
        let records = write_records(bus, directory, blob.records(profile))?;
        Ok(SyncOutcome::Applied { records })
    }
}

/// Extracts the configuration blob from a firmware image. Raw firmware
/// without a container header carries no configuration.
pub fn blob_from_image<E>(bytes: &[u8], profiles: u8) -> Result<Option<ConfigBlob<'_>>, E> {
    match ConfigImage::parse(bytes).map_err(Error::<E>::MalformedImage)? {
        ParsedImage::RawFirmware(firmware) => {
            info!("mxt: image of {} bytes has no config area", firmware.len());
            Ok(None)
        }
        ParsedImage::Packaged(image) => image
            .blob(profiles)
            .map(Some)
            .map_err(Error::MalformedImage),
    }
}

/// Writes `profile` without comparing checksums; the device checksum
/// reflects whichever profile was written last.
pub fn apply_profile<B: BusOps>(
    bus: &mut B,
    directory: &ObjectDirectory,
    blob: &ConfigBlob<'_>,
    profile: PowerProfile,
) -> Result<usize, B::Error> {
    check_versions::<B::Error>(directory, blob)?;
    info!("mxt: switching to {:?} profile", profile);
    write_records(bus, directory, blob.records(profile))
}

fn check_versions<E>(directory: &ObjectDirectory, blob: &ConfigBlob<'_>) -> Result<(), E> {
    let info = directory.info();
    let mismatch = if info.version != blob.firmware_version {
        Some(Mismatch::FirmwareVersion {
            device: info.version,
            blob: blob.firmware_version,
        })
    } else if info.build != blob.build_version {
        Some(Mismatch::BuildVersion {
            device: info.build,
            blob: blob.build_version,
        })
    } else {
        None
    };

    match mismatch {
        Some(mismatch) => {
            warn!("mxt: config not applied, {}", mismatch);
            Err(Error::ProtocolMismatch(mismatch))
        }
        None => Ok(()),
    }
}

/// Validates each record before writing it. A record shorter than its object
/// zero-fills the rest of the instance.
fn write_records<B: BusOps>(
    bus: &mut B,
    directory: &ObjectDirectory,
    records: &[u8],
) -> Result<usize, B::Error> {
    let mut written = 0;
    for record in RecordIter::new(records) {
        let (index, record) = record
            .map_err(|(index, reason)| Error::<B::Error>::MalformedConfigRecord { index, reason })?;
        let address = record_address(directory, &record)
            .map_err(|reason| Error::<B::Error>::MalformedConfigRecord { index, reason })?;
        let object_size = directory
            .object(record.kind)
            .map(|object| object.size)
            .unwrap_or_default();

        bus.write(address, record.payload)?;

        let size = record.payload.len() as u16;
        if size < object_size {
            warn!(
                "mxt: {} instance {} short by {} bytes, zero filling",
                record.kind,
                record.instance,
                object_size - size
            );
            let fill_start = address.checked_add(size).ok_or(
                Error::<B::Error>::MalformedConfigRecord {
                    index,
                    reason: RecordError::AddressOverflow {
                        address,
                        object_size,
                    },
                },
            )?;
            zero_fill(bus, fill_start, usize::from(object_size - size))?;
        }
        written += 1;
    }
    info!("mxt: wrote {} config records", written);
    Ok(written)
}

fn record_address(
    directory: &ObjectDirectory,
    record: &ConfigRecord<'_>,
) -> core::result::Result<u16, RecordError> {
    let object = directory
        .object(record.kind)
        .ok_or(RecordError::UnknownObject(record.kind))?;
    let size = record.payload.len() as u16;
    if size > object.size {
        return Err(RecordError::SizeExceeded {
            size,
            object_size: object.size,
        });
    }
    let address = object
        .instance_address(u16::from(record.instance))
        .ok_or(RecordError::InstanceOutOfRange {
            instance: record.instance,
            instances: object.instances,
        })?;
    if u32::from(address) + u32::from(object.size) > 0x1_0000 {
        return Err(RecordError::AddressOverflow {
            address,
            object_size: object.size,
        });
    }
    Ok(address)
}

/// `address + len` must not pass the end of the register space.
fn zero_fill<B: BusOps>(bus: &mut B, address: u16, len: usize) -> Result<(), B::Error> {
    let zeros = [0u8; ZERO_FILL_CHUNK];
    let mut offset = 0;
    while offset < len {
        let chunk = (len - offset).min(ZERO_FILL_CHUNK);
        bus.write(address.wrapping_add(offset as u16), &zeros[..chunk])?;
        offset += chunk;
    }
    Ok(())
}
