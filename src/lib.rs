//! An async BLE GATT client over the Attribute Protocol.
//!
//! This crate drives the client half of a Bluetooth Low Energy link: discovering the
//! remote attribute database, reading and writing characteristic values (including long
//! values spanning multiple PDUs), and receiving notifications and indications. It owns
//! the ATT connection multiplexer, the GATT discovery sub-procedures, and the long-value
//! transfer protocols; everything below the L2CAP fixed channel (HCI, the radio, pairing)
//! is an external collaborator.
#![no_std]

pub mod att;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod discovery;
pub mod error;
#[cfg(feature = "gatt")]
pub mod gatt;
pub mod transfer;
pub mod uuid;

pub use connection::{AttConnection, ServerEvent};
pub use error::{BleHostError, Error};
#[cfg(feature = "gatt")]
pub use gatt::{Characteristic, Descriptor, GattClient, Notification, Service};
pub use uuid::BluetoothUuid;
