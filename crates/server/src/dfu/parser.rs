//! Parser for `dfu-util --list` output
//!
//! Parsing happens in two stages. [`parse_line`] turns one output line into a
//! [`DescriptorLine`], including the DfuSe memory layout carried in the
//! `name` property. [`group_devices`] then folds the lines of one snapshot
//! into [`Device`] records keyed by serial number.
//!
//! Lines that do not look like device lines are skipped. A device line with a
//! malformed property, a malformed memory layout, or attributes contradicting
//! an earlier line for the same serial aborts the whole parse.

use common::{Error, Result};
use protocol::{AlternateSetting, Device, MemoryBlock, Permission, Sector, Unit};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

/// `<message>: [<vendor>:<product>] <properties>`
static DEVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<msg>.*?): \[(?P<vid>[^\]:]*):(?P<pid>[^\]]*)\] (?P<props>.*)$")
        .expect("device line pattern is valid")
});

/// One `key=value` property followed by a separator or the end of input
static PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<key>\w+)=(?:"(?P<quoted>[^"]*)"|(?P<bare>[^,"]*))(?:, |$)"#)
        .expect("property pattern is valid")
});

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^0x[0-9a-f]+$").expect("address pattern is valid")
});

/// A single parsed device line: one alternate setting of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorLine {
    /// Leading message, e.g. `Found DFU`
    pub message: String,
    pub vendor_id: String,
    pub product_id: String,
    pub version: u32,
    pub device_number: u32,
    pub configuration: u32,
    pub interface: u32,
    pub bus_path: Option<String>,
    pub serial: String,
    pub alt: AlternateSetting,
}

#[derive(Debug)]
enum Value<'a> {
    Text(&'a str),
    Integer(u32),
}

struct Properties<'a> {
    values: HashMap<&'a str, Value<'a>>,
}

impl<'a> Properties<'a> {
    fn parse(props: &'a str) -> Result<Self> {
        let mut values = HashMap::new();
        let mut expected_start = 0;

        for caps in PROPERTY.captures_iter(props) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            if whole.start != expected_start {
                return Err(Error::Parse(format!(
                    "Unexpected text in property list: {:?}",
                    &props[expected_start..whole.start]
                )));
            }
            expected_start = whole.end;

            let key = caps.name("key").map_or("", |m| m.as_str());
            let value = if let Some(text) = caps.name("quoted") {
                Value::Text(text.as_str())
            } else {
                let bare = caps.name("bare").map_or("", |m| m.as_str());
                Value::Integer(bare.parse().map_err(|_| {
                    Error::Parse(format!("Property '{}' is not an integer: {:?}", key, bare))
                })?)
            };

            if values.insert(key, value).is_some() {
                return Err(Error::Parse(format!("Duplicate property '{}'", key)));
            }
        }

        if expected_start != props.len() {
            return Err(Error::Parse(format!(
                "Malformed property list: {:?}",
                &props[expected_start..]
            )));
        }

        Ok(Self { values })
    }

    fn integer(&self, key: &str) -> Result<u32> {
        match self.values.get(key) {
            Some(Value::Integer(n)) => Ok(*n),
            Some(Value::Text(_)) => Err(Error::Parse(format!(
                "Property '{}' must be an integer",
                key
            ))),
            None => Err(Error::Parse(format!("Missing property '{}'", key))),
        }
    }

    fn text(&self, key: &str) -> Result<&'a str> {
        self.optional_text(key)?
            .ok_or_else(|| Error::Parse(format!("Missing property '{}'", key)))
    }

    fn optional_text(&self, key: &str) -> Result<Option<&'a str>> {
        match self.values.get(key) {
            Some(Value::Text(text)) => Ok(Some(*text)),
            Some(Value::Integer(_)) => Err(Error::Parse(format!(
                "Property '{}' must be a quoted string",
                key
            ))),
            None => Ok(None),
        }
    }
}

/// Parse one output line
///
/// Returns `Ok(None)` for lines that are not device lines (banners, notes).
pub fn parse_line(line: &str) -> Result<Option<DescriptorLine>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(caps) = DEVICE_LINE.captures(line) else {
        debug!("Skipping non-device line: {}", line);
        return Ok(None);
    };

    let field = |name: &str| caps.name(name).map_or("", |m| m.as_str());
    let props = Properties::parse(field("props"))?;

    let alt_id = props.integer("alt")?;
    let alt = parse_alt_setting(alt_id, props.text("name")?)?;

    Ok(Some(DescriptorLine {
        message: field("msg").to_string(),
        vendor_id: field("vid").to_string(),
        product_id: field("pid").to_string(),
        version: props.integer("ver")?,
        device_number: props.integer("devnum")?,
        configuration: props.integer("cfg")?,
        interface: props.integer("intf")?,
        bus_path: props.optional_text("path")?.map(str::to_string),
        serial: props.text("serial")?.to_string(),
        alt,
    }))
}

/// Parse an alternate setting name carrying a DfuSe memory layout
///
/// `@<name>/<address>/<sector>[,<sector>...][/<address>/<sector>...]`.
/// Names without the leading `@` carry no layout and are kept verbatim.
pub fn parse_alt_setting(id: u32, descriptor: &str) -> Result<AlternateSetting> {
    let Some(layout) = descriptor.strip_prefix('@') else {
        return Ok(AlternateSetting {
            id,
            name: descriptor.trim().to_string(),
            sectors: Vec::new(),
        });
    };

    let mut parts = layout.split('/');
    let name = parts.next().unwrap_or_default().trim().to_string();
    let groups: Vec<&str> = parts.collect();

    if groups.len() % 2 != 0 {
        return Err(Error::Parse(format!(
            "Memory layout of '{}' has an address without sectors: {:?}",
            name, descriptor
        )));
    }

    let sectors = groups
        .chunks(2)
        .map(|pair| parse_sector(pair[0], pair[1]))
        .collect::<Result<Vec<_>>>()?;

    Ok(AlternateSetting { id, name, sectors })
}

fn parse_sector(address: &str, specs: &str) -> Result<Sector> {
    if !ADDRESS.is_match(address) {
        return Err(Error::Parse(format!(
            "Invalid sector address: {:?}",
            address
        )));
    }

    let blocks = specs
        .split(',')
        .map(parse_memory_block)
        .collect::<Result<Vec<_>>>()?;

    Ok(Sector {
        address: address.to_string(),
        blocks,
    })
}

/// Parse `<count>*<size><unit><permission>`, e.g. `04*016Kg`
pub fn parse_memory_block(spec: &str) -> Result<MemoryBlock> {
    let malformed = || Error::Parse(format!("Malformed sector specification: {:?}", spec));

    let (count, rest) = spec.split_once('*').ok_or_else(malformed)?;

    let mut tail = rest.chars().rev();
    let permission = tail.next().ok_or_else(malformed)?;
    let unit = tail.next().ok_or_else(malformed)?;
    let size = &rest[..rest.len() - permission.len_utf8() - unit.len_utf8()];

    let count: u32 = parse_digits(count).ok_or_else(malformed)?;
    if count == 0 {
        return Err(Error::Parse(format!("Sector count must be positive: {:?}", spec)));
    }

    Ok(MemoryBlock {
        count,
        block_size: parse_digits(size).ok_or_else(malformed)?,
        unit: Unit::try_from(unit)?,
        permission: Permission::try_from(permission)?,
    })
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Group parsed lines into devices, in order of first appearance
///
/// Every line for a serial must agree with the first one on all device
/// attributes. Alternate settings are sorted by id and must be unique.
pub fn group_devices<I>(lines: I) -> Result<Vec<Device>>
where
    I: IntoIterator<Item = DescriptorLine>,
{
    let mut devices: Vec<Device> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for line in lines {
        match index.get(&line.serial) {
            Some(&i) => {
                let device = &mut devices[i];
                check_consistent(device, &line)?;
                if device.alt_setting(line.alt.id).is_some() {
                    return Err(Error::Parse(format!(
                        "Device {} lists alternate setting {} twice",
                        line.serial, line.alt.id
                    )));
                }
                device.alt_settings.push(line.alt);
            }
            None => {
                index.insert(line.serial.clone(), devices.len());
                devices.push(Device {
                    serial: line.serial,
                    vendor_id: line.vendor_id,
                    product_id: line.product_id,
                    version: line.version,
                    device_number: line.device_number,
                    configuration: line.configuration,
                    interface: line.interface,
                    bus_path: line.bus_path,
                    alt_settings: vec![line.alt],
                });
            }
        }
    }

    for device in &mut devices {
        device.alt_settings.sort_by_key(|alt| alt.id);
    }

    Ok(devices)
}

fn check_consistent(device: &Device, line: &DescriptorLine) -> Result<()> {
    let mismatch = |field: &str, seen: String, found: String| {
        Err(Error::Parse(format!(
            "Device {} reports inconsistent {}: {} then {}",
            device.serial, field, seen, found
        )))
    };

    if device.vendor_id != line.vendor_id {
        return mismatch("vendor id", device.vendor_id.clone(), line.vendor_id.clone());
    }
    if device.product_id != line.product_id {
        return mismatch("product id", device.product_id.clone(), line.product_id.clone());
    }
    if device.version != line.version {
        return mismatch("version", device.version.to_string(), line.version.to_string());
    }
    if device.device_number != line.device_number {
        return mismatch(
            "device number",
            device.device_number.to_string(),
            line.device_number.to_string(),
        );
    }
    if device.configuration != line.configuration {
        return mismatch(
            "configuration",
            device.configuration.to_string(),
            line.configuration.to_string(),
        );
    }
    if device.interface != line.interface {
        return mismatch(
            "interface",
            device.interface.to_string(),
            line.interface.to_string(),
        );
    }
    if device.bus_path != line.bus_path {
        return mismatch(
            "bus path",
            format!("{:?}", device.bus_path),
            format!("{:?}", line.bus_path),
        );
    }
    Ok(())
}

/// Parse a whole snapshot of data lines into devices
pub fn parse_devices<I, S>(lines: I) -> Result<Vec<Device>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = Vec::new();
    for line in lines {
        if let Some(line) = parse_line(line.as_ref())? {
            parsed.push(line);
        }
    }
    group_devices(parsed)
}
