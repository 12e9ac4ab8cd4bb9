//! Conversion of raw characteristic payloads into numeric readings.
//!
//! A property declares how its bytes are laid out through a
//! [`DataConverterKind`]. The [`DataConverter`] trait is the seam the
//! characteristic processor goes through; [`LayoutConverter`] is the
//! implementation shipped with the crate.

use tracing::trace;

use crate::error::{Error, Result};

/// Arithmetic applied to a reading after its bytes are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum OperationType {
    /// Add a constant.
    Add,
    /// Subtract a constant.
    Subtract,
    /// Multiply by a constant.
    Multiply,
    /// Divide by a constant.
    Divide,
}

/// One step of post-processing.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Operation {
    /// What to do.
    pub operation_type: OperationType,
    /// The constant operand.
    pub operation_value: f64,
}

impl Operation {
    /// Create a new operation.
    pub fn new(operation_type: OperationType, operation_value: f64) -> Self {
        Self {
            operation_type,
            operation_value,
        }
    }

    fn apply(&self, value: f64) -> Result<f64> {
        match self.operation_type {
            OperationType::Add => Ok(value + self.operation_value),
            OperationType::Subtract => Ok(value - self.operation_value),
            OperationType::Multiply => Ok(value * self.operation_value),
            OperationType::Divide if self.operation_value == 0.0 => Err(Error::InvalidData {
                context: "division by zero in converter operations".to_string(),
            }),
            OperationType::Divide => Ok(value / self.operation_value),
        }
    }
}

/// Byte layout of a characteristic payload.
///
/// Bytes `start_index..=end_index` are taken in order and assembled
/// big-endian. When `start_index > end_index` the bytes are walked
/// backwards, which reads a little-endian field.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct DataConverterKind {
    /// Index of the first byte to take.
    pub start_index: usize,
    /// Index of the last byte to take.
    pub end_index: usize,
    /// Left shift applied to the assembled integer.
    pub shift_left: u32,
    /// Right shift applied to the assembled integer (ignored if `shift_left` is set).
    pub shift_right: u32,
    /// Operations applied in order to the shifted value.
    pub order_of_operations: Vec<Operation>,
}

impl DataConverterKind {
    /// Layout reading the byte range `start..=end`.
    pub fn range(start_index: usize, end_index: usize) -> Self {
        Self {
            start_index,
            end_index,
            ..Self::default()
        }
    }

    /// Append an operation.
    pub fn with_operation(mut self, operation_type: OperationType, value: f64) -> Self {
        self.order_of_operations
            .push(Operation::new(operation_type, value));
        self
    }

    /// Number of bytes this layout selects.
    pub fn width(&self) -> usize {
        self.start_index.abs_diff(self.end_index) + 1
    }
}

/// Converts raw characteristic bytes into a numeric reading.
#[cfg_attr(test, mockall::automock)]
pub trait DataConverter: Send + Sync {
    /// Convert `raw` according to `kind`.
    fn convert(&self, kind: &DataConverterKind, raw: &[u8]) -> Result<f64>;
}

/// Integer-layout converter driven entirely by [`DataConverterKind`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutConverter;

impl LayoutConverter {
    /// Largest field that fits the intermediate integer.
    pub const MAX_WIDTH: usize = 8;

    fn select(kind: &DataConverterKind, raw: &[u8]) -> Result<u64> {
        let last = kind.start_index.max(kind.end_index);
        if last >= raw.len() {
            return Err(Error::InvalidData {
                context: format!(
                    "byte index {} out of range for {}-byte payload",
                    last,
                    raw.len()
                ),
            });
        }

        if kind.width() > Self::MAX_WIDTH {
            return Err(Error::InvalidData {
                context: format!(
                    "field of {} bytes exceeds {} byte limit",
                    kind.width(),
                    Self::MAX_WIDTH
                ),
            });
        }

        let assemble = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
        let value = if kind.start_index <= kind.end_index {
            raw[kind.start_index..=kind.end_index]
                .iter()
                .fold(0, assemble)
        } else {
            raw[kind.end_index..=kind.start_index]
                .iter()
                .rev()
                .fold(0, assemble)
        };

        Ok(value)
    }
}

impl DataConverter for LayoutConverter {
    fn convert(&self, kind: &DataConverterKind, raw: &[u8]) -> Result<f64> {
        let selected = Self::select(kind, raw)?;

        let shifted = if kind.shift_left != 0 {
            selected.checked_shl(kind.shift_left).unwrap_or(0)
        } else if kind.shift_right != 0 {
            selected.checked_shr(kind.shift_right).unwrap_or(0)
        } else {
            selected
        };

        let value = kind
            .order_of_operations
            .iter()
            .try_fold(shifted as f64, |acc, op| op.apply(acc))?;

        trace!("Converted {:02X?} to {}", raw, value);

        Ok(value)
    }
}
