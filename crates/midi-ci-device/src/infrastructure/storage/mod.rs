//! Storage infrastructure: device configuration persistence.
//!
//! The `config` sub-module reads and writes [`config::DeviceConfig`] as TOML
//! and supplies defaults when no file exists.  The engine itself never
//! touches the file system; embedders load a config here and hand it to
//! `MidiCiDevice::new`.

pub mod config;
