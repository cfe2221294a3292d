use std::io;

use thiserror::Error;
use uuid::Uuid;


#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("heart rate payload too short: {len} byte(s), need {needed}")]
    TooShort { len: usize, needed: usize },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error("Bluetooth adapters not found")]
    NoAdapter,
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("Peripheral disconnected")]
    Disconnected,
    #[error("{0}")]
    Simulated(String),
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("no device selected")]
    NoDeviceSelected,
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),
    #[error("connect attempt cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("scan failed: {0}")]
    TransportFailure(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum LogWriteError {
    #[error("could not append heart rate log: {0}")]
    IoFailure(#[from] io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device address must not be empty")]
    EmptyAddress,
}
