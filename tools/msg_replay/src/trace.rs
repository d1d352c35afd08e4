use std::{fs, path::Path};

use anyhow::{bail, ensure, Context, Result};
use mxt_touch::objects::{InfoBlock, OBJECT_ELEMENT_SIZE};
use mxt_touch::router::{MESSAGE_SIZE, PAYLOAD_SIZE};

/// `object <type> <address> <size> <instances> <report_ids>`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObjectLine {
    pub type_id: u8,
    pub address: u16,
    pub size: u16,
    pub instances: u16,
    pub report_ids: u8,
}

impl ObjectLine {
    /// Object table element as the device stores it.
    pub fn element(&self) -> [u8; OBJECT_ELEMENT_SIZE] {
        let address = self.address.to_le_bytes();
        [
            self.type_id,
            address[0],
            address[1],
            (self.size - 1) as u8,
            (self.instances - 1) as u8,
            self.report_ids,
        ]
    }
}

/// Messages captured in one interrupt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pass {
    pub t_ms: u64,
    pub messages: Vec<[u8; MESSAGE_SIZE]>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Trace {
    pub info: InfoBlock,
    pub objects: Vec<ObjectLine>,
    pub passes: Vec<Pass>,
}

pub fn load(path: &Path) -> Result<Trace> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse(&text).with_context(|| format!("invalid trace {}", path.display()))
}

pub fn parse(text: &str) -> Result<Trace> {
    let mut info = InfoBlock {
        family_id: 0x82,
        variant_id: 0x00,
        version: 0x10,
        build: 0xAA,
        matrix_x: 24,
        matrix_y: 14,
        object_count: 0,
    };
    let mut objects = Vec::new();
    let mut passes: Vec<Pass> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields[0] {
            "info" => {
                info = parse_info(&fields[1..]).with_context(|| format!("line {line_no}"))?;
            }
            "object" => {
                objects.push(parse_object(&fields[1..]).with_context(|| format!("line {line_no}"))?);
            }
            _ => {
                let (t_ms, message) =
                    parse_message(&fields).with_context(|| format!("line {line_no}"))?;
                match passes.last().map(|pass| pass.t_ms) {
                    Some(previous) if previous > t_ms => {
                        bail!("line {line_no}: time {t_ms} ms before {previous} ms")
                    }
                    Some(previous) if previous == t_ms => {
                        if let Some(pass) = passes.last_mut() {
                            pass.messages.push(message);
                        }
                    }
                    _ => passes.push(Pass {
                        t_ms,
                        messages: vec![message],
                    }),
                }
            }
        }
    }

    ensure!(!objects.is_empty(), "trace declares no objects");
    info.object_count = u8::try_from(objects.len()).context("too many objects")?;
    Ok(Trace {
        info,
        objects,
        passes,
    })
}

fn parse_info(fields: &[&str]) -> Result<InfoBlock> {
    ensure!(
        fields.len() == 6,
        "info takes family variant version build matrix_x matrix_y"
    );
    Ok(InfoBlock {
        family_id: parse_number(fields[0], "family")?,
        variant_id: parse_number(fields[1], "variant")?,
        version: parse_number(fields[2], "version")?,
        build: parse_number(fields[3], "build")?,
        matrix_x: parse_number(fields[4], "matrix_x")?,
        matrix_y: parse_number(fields[5], "matrix_y")?,
        object_count: 0,
    })
}

fn parse_object(fields: &[&str]) -> Result<ObjectLine> {
    ensure!(
        fields.len() == 5,
        "object takes type address size instances report_ids"
    );
    let object = ObjectLine {
        type_id: parse_number(fields[0], "type")?,
        address: parse_number(fields[1], "address")?,
        size: parse_number(fields[2], "size")?,
        instances: parse_number(fields[3], "instances")?,
        report_ids: parse_number(fields[4], "report_ids")?,
    };
    ensure!(
        (1..=256).contains(&object.size),
        "object size {} outside 1..=256",
        object.size
    );
    ensure!(
        (1..=256).contains(&object.instances),
        "instance count {} outside 1..=256",
        object.instances
    );
    Ok(object)
}

/// `<t_ms> <report_id> <b0> .. <b7>`, payload bytes in hex.
fn parse_message(fields: &[&str]) -> Result<(u64, [u8; MESSAGE_SIZE])> {
    ensure!(
        fields.len() == 2 + PAYLOAD_SIZE,
        "message takes time, report id and {PAYLOAD_SIZE} payload bytes, got {} fields",
        fields.len()
    );
    let t_ms = parse_number(fields[0], "time")?;
    let mut message = [0u8; MESSAGE_SIZE];
    message[0] = parse_number(fields[1], "report id")?;
    for (slot, field) in message[1..].iter_mut().zip(&fields[2..]) {
        *slot = u8::from_str_radix(field, 16)
            .with_context(|| format!("invalid payload byte '{field}'"))?;
    }
    Ok((t_ms, message))
}

/// Decimal, or hex with a `0x` prefix.
fn parse_number<T>(raw: &str, field: &str) -> Result<T>
where
    T: TryFrom<u64>,
{
    let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    }
    .with_context(|| format!("invalid {field} '{raw}'"))?;
    T::try_from(value).map_err(|_| anyhow::anyhow!("{field} {value} out of range"))
}
