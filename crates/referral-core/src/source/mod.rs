// # Trigger Source Implementations
//
// This module provides implementations of the TriggerSource trait for
// different transports.

pub mod json_lines;

pub use json_lines::JsonLinesTriggerSource;
