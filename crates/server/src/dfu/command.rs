//! Argument builder for the `dfu-util` command line
//!
//! A [`Request`] accumulates arguments in call order and performs no I/O;
//! the same sequence of calls always yields the same argument vector.
//! Identifier filters and DfuSe modifiers are validated as they are added,
//! so a malformed request never reaches the subprocess.
//!
//! ```
//! use server::dfu::command;
//!
//! let request = command::upload("backup.bin")
//!     .verbosity(2)
//!     .device("0483:df11,*")
//!     .unwrap();
//! assert_eq!(
//!     request.args(),
//!     ["-U", "backup.bin", "-v", "-v", "-d", "0483:df11,*"]
//! );
//! ```

use common::{Error, Result};
use regex::Regex;
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

/// Default executable name
pub const DEFAULT_PROGRAM: &str = "dfu-util";

/// Highest verbosity the tool distinguishes
pub const MAX_VERBOSITY: u8 = 3;

/// `<vendor>?:<product>?` or a wildcard, optionally paired run-time,DFU-mode
static DEVICE_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\*|-|[0-9a-f]*:[0-9a-f]*)?(,(\*|-|[0-9a-f]*:[0-9a-f]*)?)?$")
        .expect("device filter pattern is valid")
});

/// Same as [`DEVICE_FILTER`], but each half may also be a literal serial number
static SERIAL_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(\*|-|[0-9a-f]*:[0-9a-f]*|[0-9a-z][0-9a-z_.-]*)?(,(\*|-|[0-9a-f]*:[0-9a-f]*|[0-9a-z][0-9a-z_.-]*)?)?$",
    )
    .expect("serial filter pattern is valid")
});

static HEX_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^0x[0-9a-f]+$").expect("hex literal pattern is valid")
});

/// Marker for enumeration requests (`-l`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum List {}

/// Marker for upload/download requests (`-U`/`-D`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {}

/// DfuSe address modifiers accepted by `-s`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DfuseModifier {
    /// Skip safety checks
    Force,
    /// Leave DFU mode (jump to application)
    Leave,
    /// Erase the whole device (requires `force`)
    MassErase,
    /// Erase a read-protected device (requires `force`)
    Unprotect,
    /// Expect the device to reset (e.g. option bytes write)
    WillReset,
}

impl DfuseModifier {
    pub fn as_str(self) -> &'static str {
        match self {
            DfuseModifier::Force => "force",
            DfuseModifier::Leave => "leave",
            DfuseModifier::MassErase => "mass-erase",
            DfuseModifier::Unprotect => "unprotect",
            DfuseModifier::WillReset => "will-reset",
        }
    }
}

impl FromStr for DfuseModifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "force" => Ok(DfuseModifier::Force),
            "leave" => Ok(DfuseModifier::Leave),
            "mass-erase" => Ok(DfuseModifier::MassErase),
            "unprotect" => Ok(DfuseModifier::Unprotect),
            "will-reset" => Ok(DfuseModifier::WillReset),
            other => Err(Error::Validation(format!(
                "Unknown DfuSe modifier '{}', expected one of: force, leave, mass-erase, unprotect, will-reset",
                other
            ))),
        }
    }
}

/// An accumulated `dfu-util` invocation
///
/// The type parameter restricts transfer-only options (`-w`, `-R`, `-t`,
/// `-Z`, `-s`) to upload and download requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<K> {
    program: String,
    args: Vec<String>,
    _kind: PhantomData<K>,
}

/// Enumerate the currently attached DFU-capable devices
pub fn enumerate() -> Request<List> {
    Request::new(["-l".to_string()])
}

/// Read device memory into `file`
pub fn upload(file: impl AsRef<Path>) -> Request<Transfer> {
    Request::new(["-U".to_string(), file.as_ref().display().to_string()])
}

/// Flash `file` (`.dfu` or raw `.bin`) into device memory
pub fn download(file: impl AsRef<Path>) -> Request<Transfer> {
    Request::new(["-D".to_string(), file.as_ref().display().to_string()])
}

/// Check a `-d` device identifier filter
pub fn validate_device_filter(identifiers: &str) -> Result<()> {
    if DEVICE_FILTER.is_match(identifiers) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Invalid device filter '{}', expected '<vid>:<pid>[,<vid>:<pid>]' with hex IDs, '*' or '-'",
            identifiers
        )))
    }
}

/// Check a `-S` serial filter
pub fn validate_serial_filter(serial: &str) -> Result<()> {
    if SERIAL_FILTER.is_match(serial) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Invalid serial filter '{}', expected '<serial>[,<serial>]'",
            serial
        )))
    }
}

fn validate_hex(value: &str, what: &str) -> Result<()> {
    if HEX_LITERAL.is_match(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Invalid {} '{}', expected a hex literal like 0x08000000",
            what, value
        )))
    }
}

impl<K> Request<K> {
    fn new<const N: usize>(operation: [String; N]) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: operation.into(),
            _kind: PhantomData,
        }
    }

    fn push(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.into());
        self
    }

    /// Use a different executable (path or name)
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Add up to three `-v` flags
    pub fn verbosity(mut self, level: u8) -> Self {
        for _ in 0..level.min(MAX_VERBOSITY) {
            self.args.push("-v".to_string());
        }
        self
    }

    /// Restrict to devices matching `<run-time IDs>[,<DFU mode IDs>]`
    pub fn device(self, identifiers: &str) -> Result<Self> {
        validate_device_filter(identifiers)?;
        Ok(self.push("-d", identifiers))
    }

    /// Restrict to the device at bus/port path `bus_port`
    pub fn path(self, bus_port: &str) -> Self {
        self.push("-p", bus_port)
    }

    pub fn config(self, configuration: u32) -> Self {
        self.push("-c", configuration.to_string())
    }

    pub fn interface(self, interface: u32) -> Self {
        self.push("-i", interface.to_string())
    }

    /// Select an alternate setting by number
    pub fn alt_setting(self, alt: u32) -> Self {
        self.push("-a", alt.to_string())
    }

    /// Select an alternate setting by name
    pub fn alt_name(self, name: &str) -> Self {
        self.push("-a", name)
    }

    /// Restrict to devices with the given serial number(s)
    pub fn serial(self, serial: &str) -> Result<Self> {
        validate_serial_filter(serial)?;
        Ok(self.push("-S", serial))
    }

    pub fn program_name(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Full command line, program first
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl Request<Transfer> {
    /// Wait for the device to appear
    pub fn wait(mut self) -> Self {
        self.args.push("-w".to_string());
        self
    }

    /// Issue a USB reset when done
    pub fn reset(mut self) -> Self {
        self.args.push("-R".to_string());
        self
    }

    pub fn transfer_size(self, size: u32) -> Self {
        self.push("-t", size.to_string())
    }

    /// Expected upload size in bytes
    pub fn upload_size(self, size: u64) -> Self {
        self.push("-Z", size.to_string())
    }

    /// DfuSe target: `-s <address>[:<length>][:<modifier>...]`
    pub fn dfuse_address(
        self,
        address: &str,
        length: Option<&str>,
        modifiers: &[&str],
    ) -> Result<Self> {
        validate_hex(address, "DfuSe address")?;

        let mut target = vec![address.to_string()];
        if let Some(length) = length {
            validate_hex(length, "DfuSe length")?;
            target.push(length.to_string());
        }
        for modifier in modifiers {
            let modifier: DfuseModifier = modifier.parse()?;
            target.push(modifier.as_str().to_string());
        }

        Ok(self.push("-s", target.join(":")))
    }
}
