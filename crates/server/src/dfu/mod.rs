//! `dfu-util` integration
//!
//! Builds command lines ([`command`]), runs the tool with incremental output
//! ([`exec`]) and turns enumeration output into the device model
//! ([`parser`]). [`DfuUtil`] ties the three together with the configured
//! program path, verbosity and error-stream policy.

pub mod command;
pub mod exec;
pub mod parser;

use command::{List, Request, Transfer};
use common::Result;
use exec::{ExecOptions, OutputLines};
use protocol::{Device, TransferDirection, TransferRequest};
use std::path::Path;
use tracing::{debug, info};

pub use exec::StderrPolicy;

/// Configured entry point for running `dfu-util`
#[derive(Debug, Clone)]
pub struct DfuUtil {
    program: String,
    verbosity: u8,
    options: ExecOptions,
}

impl Default for DfuUtil {
    fn default() -> Self {
        Self::new(command::DEFAULT_PROGRAM, 0, ExecOptions::default())
    }
}

impl DfuUtil {
    pub fn new(program: impl Into<String>, verbosity: u8, options: ExecOptions) -> Self {
        Self {
            program: program.into(),
            verbosity,
            options,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Enumeration request with the configured program and verbosity
    pub fn enumerate(&self) -> Request<List> {
        command::enumerate()
            .program(self.program.clone())
            .verbosity(self.verbosity)
    }

    pub fn upload(&self, file: &Path) -> Request<Transfer> {
        command::upload(file)
            .program(self.program.clone())
            .verbosity(self.verbosity)
    }

    pub fn download(&self, file: &Path) -> Request<Transfer> {
        command::download(file)
            .program(self.program.clone())
            .verbosity(self.verbosity)
    }

    /// Start a request; output is available before the tool exits
    pub fn run<K>(&self, request: &Request<K>) -> Result<OutputLines> {
        exec::spawn(request.program_name(), request.args(), self.options)
    }

    /// Enumerate attached devices
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let lines = self.run(&self.enumerate())?.collect().await?;
        let devices = parser::parse_devices(&lines)?;
        info!("Enumerated {} DFU device(s)", devices.len());
        Ok(devices)
    }

    /// Enumerate and pick the device with `serial`
    pub async fn find_device(&self, serial: &str) -> Result<Option<Device>> {
        Ok(self
            .list_devices()
            .await?
            .into_iter()
            .find(|device| device.serial == serial))
    }

    /// Build the transfer command for one device
    pub fn transfer_request(
        &self,
        direction: TransferDirection,
        file: &Path,
        serial: &str,
        request: &TransferRequest,
    ) -> Result<Request<Transfer>> {
        let base = match direction {
            TransferDirection::Upload => self.upload(file),
            TransferDirection::Download => self.download(file),
        };

        base.serial(serial)?
            .alt_setting(request.alt)
            .dfuse_address(&request.address, None, &[])
    }

    /// Start a firmware transfer; the returned lines report progress
    pub fn transfer(
        &self,
        direction: TransferDirection,
        file: &Path,
        serial: &str,
        request: &TransferRequest,
    ) -> Result<OutputLines> {
        let command = self.transfer_request(direction, file, serial, request)?;
        debug!("Transfer command: {:?}", command.command_line());
        self.run(&command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Error;

    fn request(address: &str) -> TransferRequest {
        TransferRequest {
            filename: "fw.bin".to_string(),
            alt: 0,
            address: address.to_string(),
        }
    }

    #[test]
    fn test_transfer_request_arguments() {
        let dfu = DfuUtil::new("/usr/bin/dfu-util", 1, ExecOptions::default());
        let command = dfu
            .transfer_request(
                TransferDirection::Download,
                Path::new("/images/fw.bin"),
                "319235713237",
                &request("0x08000000"),
            )
            .unwrap();

        assert_eq!(command.program_name(), "/usr/bin/dfu-util");
        assert_eq!(
            command.args(),
            [
                "-D",
                "/images/fw.bin",
                "-v",
                "-S",
                "319235713237",
                "-a",
                "0",
                "-s",
                "0x08000000"
            ]
        );
    }

    #[test]
    fn test_transfer_rejects_bad_address() {
        let dfu = DfuUtil::default();
        let result = dfu.transfer_request(
            TransferDirection::Upload,
            Path::new("dump.bin"),
            "319235713237",
            &request("08000000"),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_devices_from_fake_tool() {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path().join("list.txt");
        std::fs::write(&sample, common::test_utils::SAMPLE_LIST_OUTPUT).unwrap();

        let tool = dir.path().join("fake-dfu-util");
        std::fs::write(&tool, format!("#!/bin/sh\ncat '{}'\n", sample.display())).unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dfu = DfuUtil::new(tool.display().to_string(), 0, ExecOptions::default());
        let devices = dfu.list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "319235713237");

        let found = dfu.find_device("3262355B3231").await.unwrap().unwrap();
        assert_eq!(found.alt_settings.len(), 1);
        assert!(dfu.find_device("missing").await.unwrap().is_none());
    }
}
