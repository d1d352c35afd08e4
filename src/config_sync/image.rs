use core::fmt;

use super::ConfigBlob;

/// "MITF" read as a little-endian word.
pub const IMAGE_MAGIC: u32 = 0x4D49_5446;
pub const IMAGE_HEADER_LEN: usize = 22;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageError {
    TooShort(usize),
    HeaderLength(u32),
    SizeMismatch { declared: usize, actual: usize },
    EmptyConfig,
    EmptyFirmware,
    UnevenProfiles(usize),
    ProfileCount(u8),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "{len} bytes is shorter than the header"),
            Self::HeaderLength(len) => write!(f, "header length {len}"),
            Self::SizeMismatch { declared, actual } => {
                write!(f, "declared {declared} bytes, image has {actual}")
            }
            Self::EmptyConfig => f.write_str("no configuration area"),
            Self::EmptyFirmware => f.write_str("no firmware area"),
            Self::UnevenProfiles(len) => write!(f, "{len} config bytes cannot split in two"),
            Self::ProfileCount(count) => write!(f, "{count} profiles"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParsedImage<'a> {
    /// No container header; the bytes are firmware only.
    RawFirmware(&'a [u8]),
    Packaged(ConfigImage<'a>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConfigImage<'a> {
    pub firmware_version: u8,
    pub build_version: u8,
    pub config_checksum: u32,
    pub config: &'a [u8],
    pub firmware: &'a [u8],
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl<'a> ConfigImage<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<ParsedImage<'a>, ImageError> {
        if bytes.len() < 4 || read_u32(bytes, 0) != IMAGE_MAGIC {
            return Ok(ParsedImage::RawFirmware(bytes));
        }
        if bytes.len() < IMAGE_HEADER_LEN {
            return Err(ImageError::TooShort(bytes.len()));
        }

        let header_len = read_u32(bytes, 4);
        if header_len as usize != IMAGE_HEADER_LEN {
            return Err(ImageError::HeaderLength(header_len));
        }
        let config_len = read_u32(bytes, 8) as usize;
        let firmware_len = read_u32(bytes, 12) as usize;
        let declared = IMAGE_HEADER_LEN
            .saturating_add(config_len)
            .saturating_add(firmware_len);
        if declared != bytes.len() {
            return Err(ImageError::SizeMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        if config_len == 0 {
            return Err(ImageError::EmptyConfig);
        }
        if firmware_len == 0 {
            return Err(ImageError::EmptyFirmware);
        }

        let config_end = IMAGE_HEADER_LEN + config_len;
        Ok(ParsedImage::Packaged(Self {
            firmware_version: bytes[20],
            build_version: bytes[21],
            config_checksum: read_u32(bytes, 16),
            config: &bytes[IMAGE_HEADER_LEN..config_end],
            firmware: &bytes[config_end..],
        }))
    }

    /// Splits the config area into `profiles` record streams, battery first.
    pub fn blob(&self, profiles: u8) -> Result<ConfigBlob<'a>, ImageError> {
        match profiles {
            1 => Ok(ConfigBlob::single(
                self.firmware_version,
                self.build_version,
                self.config_checksum,
                self.config,
            )),
            2 => {
                if self.config.len() % 2 != 0 {
                    return Err(ImageError::UnevenProfiles(self.config.len()));
                }
                let (battery, charger) = self.config.split_at(self.config.len() / 2);
                Ok(ConfigBlob::dual(
                    self.firmware_version,
                    self.build_version,
                    self.config_checksum,
                    battery,
                    charger,
                ))
            }
            other => Err(ImageError::ProfileCount(other)),
        }
    }
}
