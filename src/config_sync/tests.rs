use std::vec::Vec;

use super::*;
use crate::{
    objects::{info_crc, read_directory, InfoBlock},
    test_support::{
        flatten, init_logging, standard_info, MockDevice, BUILD, T6_ADDR, T7_ADDR, T8_ADDR,
        VERSION,
    },
};

const BLOB_CHECKSUM: u32 = 0x0022_3344;

/// T7 full record plus a short T8 record.
const RECORDS: [u8; 14] = [
    7, 0, 4, 0x20, 0x0A, 0x32, 0x00, //
    8, 0, 4, 0x1E, 0x00, 0x05, 0x0A,
];

const CHARGER_RECORDS: [u8; 7] = [7, 0, 4, 0xFF, 0xFF, 0x32, 0x00];

fn attach() -> (MockDevice, ObjectDirectory) {
    init_logging();
    let mut device = MockDevice::standard();
    let directory = read_directory(&mut device).expect("attach");
    device.clear_writes();
    (device, directory)
}

fn battery() -> PowerProfile {
    PowerProfile::Battery
}

fn config_writes(device: &MockDevice) -> Vec<(u16, Vec<u8>)> {
    device
        .writes()
        .into_iter()
        .filter(|(address, _)| !(T6_ADDR..T6_ADDR + 6).contains(address))
        .collect()
}

#[test]
fn matching_checksum_skips_writes() {
    let (mut device, directory) = attach();
    device.set_config_checksum(BLOB_CHECKSUM);
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &RECORDS);

    let outcome = ConfigSynchronizer::new(battery)
        .sync(&mut device, &directory, &blob)
        .expect("sync");

    assert_eq!(
        outcome,
        SyncOutcome::Skipped {
            checksum: BLOB_CHECKSUM
        }
    );
    assert_eq!(device.writes(), std::vec![(T6_ADDR + 3, std::vec![1])]);
}

#[test]
fn second_sync_after_apply_writes_nothing() {
    let (mut device, directory) = attach();
    device.set_config_checksum(0x0011_1111);
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &RECORDS);
    let synchronizer = ConfigSynchronizer::new(battery);

    let first = synchronizer
        .sync(&mut device, &directory, &blob)
        .expect("first sync");
    assert_eq!(first, SyncOutcome::Applied { records: 2 });
    assert_eq!(
        device.writes_to(T6_ADDR + 1),
        std::vec![std::vec![STOP_EVENTS_VALUE]]
    );
    assert_eq!(device.memory(T7_ADDR, 4), RECORDS[3..7].to_vec());

    // The device recomputes its checksum once the new config is live.
    device.set_config_checksum(BLOB_CHECKSUM);
    device.clear_writes();

    let second = synchronizer
        .sync(&mut device, &directory, &blob)
        .expect("second sync");
    assert!(matches!(second, SyncOutcome::Skipped { .. }));
    assert!(config_writes(&device).is_empty());
    assert_eq!(device.writes(), std::vec![(T6_ADDR + 3, std::vec![1])]);
}

#[test]
fn short_record_zero_fills_the_instance() {
    let (mut device, directory) = attach();
    device.state().memory[usize::from(T8_ADDR)..usize::from(T8_ADDR) + 10].fill(0xEE);
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &RECORDS);

    ConfigSynchronizer::new(battery)
        .sync(&mut device, &directory, &blob)
        .expect("sync");

    assert_eq!(
        device.memory(T8_ADDR, 10),
        std::vec![0x1E, 0x00, 0x05, 0x0A, 0, 0, 0, 0, 0, 0]
    );
    assert_eq!(device.writes_to(T8_ADDR + 4), std::vec![std::vec![0u8; 6]]);
}

#[test]
fn version_mismatch_never_writes_config() {
    let (mut device, directory) = attach();
    let blob = ConfigBlob::single(VERSION + 1, BUILD, BLOB_CHECKSUM, &RECORDS);

    let err = ConfigSynchronizer::new(battery)
        .sync(&mut device, &directory, &blob)
        .expect_err("mismatch");

    assert_eq!(
        err,
        Error::ProtocolMismatch(Mismatch::FirmwareVersion {
            device: VERSION,
            blob: VERSION + 1,
        })
    );
    assert!(config_writes(&device).is_empty());
    assert!(device.writes_to(T6_ADDR + 1).is_empty());
}

#[test]
fn build_mismatch_is_reported() {
    let (mut device, directory) = attach();
    let blob = ConfigBlob::single(VERSION, BUILD ^ 0x01, BLOB_CHECKSUM, &RECORDS);

    let err = ConfigSynchronizer::new(battery)
        .sync(&mut device, &directory, &blob)
        .expect_err("mismatch");
    assert!(matches!(
        err,
        Error::ProtocolMismatch(Mismatch::BuildVersion { .. })
    ));
}

#[test]
fn oversized_first_record_aborts_before_any_config_write() {
    let (mut device, directory) = attach();
    // T7 holds 4 bytes per instance.
    let records = [7, 0, 5, 1, 2, 3, 4, 5, 8, 0, 1, 0x1E];
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &records);

    let err = ConfigSynchronizer::new(battery)
        .sync(&mut device, &directory, &blob)
        .expect_err("malformed");

    assert_eq!(
        err,
        Error::MalformedConfigRecord {
            index: 0,
            reason: RecordError::SizeExceeded {
                size: 5,
                object_size: 4,
            },
        }
    );
    assert!(config_writes(&device).is_empty());
}

#[test]
fn object_at_top_of_register_space_is_rejected() {
    init_logging();
    // T7 with 10 bytes per instance starting 8 bytes below the end.
    let table = flatten(&[[7, 0xF8, 0xFF, 9, 0, 0]]);
    let info = InfoBlock {
        object_count: 1,
        ..standard_info()
    };
    let crc = info_crc(&info.to_bytes(), &table);
    let directory = ObjectDirectory::build(info, &table, crc).expect("directory");
    let mut device = MockDevice::standard();

    let err = write_records(&mut device, &directory, &[7, 0, 4, 1, 2, 3, 4])
        .expect_err("overflow");

    assert_eq!(
        err,
        Error::MalformedConfigRecord {
            index: 0,
            reason: RecordError::AddressOverflow {
                address: 0xFFF8,
                object_size: 10,
            },
        }
    );
    assert!(device.writes().is_empty());
}

#[test]
fn malformed_later_record_keeps_earlier_writes() {
    let (mut device, directory) = attach();
    let records = [7, 0, 4, 1, 2, 3, 4, 99, 0, 1, 0];
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &records);

    let err = ConfigSynchronizer::new(battery)
        .sync(&mut device, &directory, &blob)
        .expect_err("malformed");

    assert_eq!(
        err,
        Error::MalformedConfigRecord {
            index: 1,
            reason: RecordError::UnknownObject(ObjectKind::Unknown(99)),
        }
    );
    assert_eq!(config_writes(&device), std::vec![(T7_ADDR, std::vec![1, 2, 3, 4])]);
}

#[test]
fn record_framing_errors() {
    let (mut device, directory) = attach();
    let truncated_header = [7, 0, 4, 1, 2, 3, 4, 8, 0];
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &truncated_header);
    assert_eq!(
        ConfigSynchronizer::new(battery)
            .sync(&mut device, &directory, &blob)
            .expect_err("header"),
        Error::MalformedConfigRecord {
            index: 1,
            reason: RecordError::HeaderOverflow { offset: 7, len: 9 },
        }
    );

    let truncated_payload = [8, 0, 6, 1, 2];
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &truncated_payload);
    assert_eq!(
        ConfigSynchronizer::new(battery)
            .sync(&mut device, &directory, &blob)
            .expect_err("payload"),
        Error::MalformedConfigRecord {
            index: 0,
            reason: RecordError::PayloadOverflow { end: 9, len: 5 },
        }
    );

    let bad_instance = [7, 1, 1, 0];
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &bad_instance);
    assert_eq!(
        ConfigSynchronizer::new(battery)
            .sync(&mut device, &directory, &blob)
            .expect_err("instance"),
        Error::MalformedConfigRecord {
            index: 0,
            reason: RecordError::InstanceOutOfRange {
                instance: 1,
                instances: 1,
            },
        }
    );
}

#[test]
fn header_ending_exactly_at_blob_end_is_an_empty_record() {
    let records = [7, 0, 0];
    let mut iter = RecordIter::new(&records);
    let (index, record) = iter.next().expect("record").expect("valid");
    assert_eq!(index, 0);
    assert_eq!(record.kind, ObjectKind::PowerConfig);
    assert!(record.payload.is_empty());
    assert!(iter.next().is_none());
}

#[test]
fn dual_blob_follows_selector() {
    let (mut device, directory) = attach();
    let blob = ConfigBlob::dual(VERSION, BUILD, BLOB_CHECKSUM, &RECORDS, &CHARGER_RECORDS);

    let outcome = ConfigSynchronizer::new(|| PowerProfile::Charger)
        .sync(&mut device, &directory, &blob)
        .expect("sync");

    assert_eq!(outcome, SyncOutcome::Applied { records: 1 });
    assert_eq!(device.memory(T7_ADDR, 4), CHARGER_RECORDS[3..].to_vec());
}

#[test]
fn single_blob_ignores_selector() {
    let blob = ConfigBlob::single(VERSION, BUILD, BLOB_CHECKSUM, &RECORDS);
    assert_eq!(blob.profile_count(), 1);
    assert_eq!(blob.records(PowerProfile::Charger), &RECORDS[..]);
}

#[test]
fn apply_profile_skips_checksum_request() {
    let (mut device, directory) = attach();
    let blob = ConfigBlob::dual(VERSION, BUILD, BLOB_CHECKSUM, &RECORDS, &CHARGER_RECORDS);

    let written = apply_profile(&mut device, &directory, &blob, PowerProfile::Charger)
        .expect("apply");

    assert_eq!(written, 1);
    assert!(device.writes_to(T6_ADDR + 3).is_empty());
    assert_eq!(device.memory(T7_ADDR, 4), CHARGER_RECORDS[3..].to_vec());
}

fn packaged(config: &[u8], firmware: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&(IMAGE_HEADER_LEN as u32).to_le_bytes());
    bytes.extend_from_slice(&(config.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(firmware.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&BLOB_CHECKSUM.to_le_bytes());
    bytes.push(VERSION);
    bytes.push(BUILD);
    bytes.extend_from_slice(config);
    bytes.extend_from_slice(firmware);
    bytes
}

#[test]
fn image_without_magic_is_raw_firmware() {
    let firmware = [0x01, 0x02, 0x03, 0x04, 0x05];
    assert_eq!(
        ConfigImage::parse(&firmware),
        Ok(ParsedImage::RawFirmware(&firmware[..]))
    );
    assert_eq!(blob_from_image::<()>(&firmware, 1), Ok(None));
}

#[test]
fn packaged_image_splits_profiles() {
    let mut config = RECORDS.to_vec();
    config.extend_from_slice(&RECORDS);
    let bytes = packaged(&config, &[0xAA; 16]);

    let ParsedImage::Packaged(image) = ConfigImage::parse(&bytes).expect("parse") else {
        panic!("expected packaged image");
    };
    assert_eq!(image.firmware_version, VERSION);
    assert_eq!(image.build_version, BUILD);
    assert_eq!(image.config_checksum, BLOB_CHECKSUM);
    assert_eq!(image.firmware.len(), 16);

    let blob = image.blob(2).expect("dual");
    assert_eq!(blob.records(PowerProfile::Battery), &RECORDS[..]);
    assert_eq!(blob.records(PowerProfile::Charger), &RECORDS[..]);

    let single = blob_from_image::<()>(&bytes, 1)
        .expect("image")
        .expect("config");
    assert_eq!(single.records(PowerProfile::Battery).len(), 28);
}

#[test]
fn malformed_images_are_rejected() {
    let good = packaged(&RECORDS, &[0xAA; 4]);

    let mut bad_header = good.clone();
    bad_header[4] = 21;
    assert_eq!(
        ConfigImage::parse(&bad_header),
        Err(ImageError::HeaderLength(21))
    );

    let truncated = &good[..good.len() - 1];
    assert_eq!(
        ConfigImage::parse(truncated),
        Err(ImageError::SizeMismatch {
            declared: good.len(),
            actual: good.len() - 1,
        })
    );

    assert_eq!(
        ConfigImage::parse(&good[..10]),
        Err(ImageError::TooShort(10))
    );

    let no_firmware = packaged(&RECORDS, &[]);
    assert_eq!(
        ConfigImage::parse(&no_firmware),
        Err(ImageError::EmptyFirmware)
    );

    let no_config = packaged(&[], &[0xAA; 4]);
    assert_eq!(ConfigImage::parse(&no_config), Err(ImageError::EmptyConfig));

    let odd = packaged(&RECORDS[..7], &[0xAA; 4]);
    assert_eq!(
        blob_from_image::<()>(&odd, 2),
        Err(Error::MalformedImage(ImageError::UnevenProfiles(7)))
    );
}
