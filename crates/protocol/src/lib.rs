//! Data model for dfu-server
//!
//! This crate defines the types exchanged between the server and its HTTP
//! clients: the device model rebuilt from every enumeration pass, hot-plug
//! event payloads, and firmware transfer requests. All types serialize to
//! the JSON shapes served over HTTP.
//!
//! # Example
//!
//! ```
//! use protocol::{MemoryBlock, Permission, Unit};
//!
//! let block = MemoryBlock {
//!     count: 4,
//!     block_size: 16,
//!     unit: Unit::try_from('K').unwrap(),
//!     permission: Permission::try_from('g').unwrap(),
//! };
//! assert_eq!(block.len_bytes(), 64 * 1024);
//! assert!(block.permission.writable());
//! ```

pub mod error;
pub mod events;
pub mod model;
pub mod transfer;

pub use error::{ProtocolError, Result};
pub use events::{HotplugAction, HotplugEvent, UsbDeviceInfo};
pub use model::{AlternateSetting, Device, MemoryBlock, Permission, Sector, Unit};
pub use transfer::{ImageInfo, TransferDirection, TransferRequest};
