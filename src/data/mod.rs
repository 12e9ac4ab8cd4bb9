//! Data structures for device specs and observed status.
//!
//! This module contains the declarative device description, the status
//! model it is reconciled into, and payload conversion.

pub mod converter;
pub mod device_spec;
pub mod status;

pub use converter::{DataConverter, DataConverterKind, LayoutConverter, Operation, OperationType};
pub use device_spec::{AccessMode, DeviceSpec, PropertyDefinition, PropertyVisitor, ProtocolIdentity};
pub use status::{StatusEntry, StatusSnapshot, StatusStore};
