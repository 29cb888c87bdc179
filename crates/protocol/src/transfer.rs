//! Firmware transfer request bodies

use serde::{Deserialize, Serialize};

/// Direction of a firmware transfer, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Read device memory into a file
    Upload,
    /// Flash a file into device memory
    Download,
}

/// Parameters of a firmware transfer to or from one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Image file name, relative to the image directory
    pub filename: String,
    /// Alternate setting to transfer through
    pub alt: u32,
    /// DfuSe target address (e.g. `0x08000000`)
    pub address: String,
}

/// A stored firmware image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub filename: String,
    pub size: u64,
}
