//! Type definitions shared by the engine crates.
//!
//! Values are dense `f64` matrices; scalars are represented as `1x1`
//! tensors. Nodes are addressed by dense integer handles that index the
//! registry's arenas.

use nalgebra::DMatrix;
use std::fmt;

/// Runtime value carried by a value node.
pub type Tensor = DMatrix<f64>;

/// Shape of a tensor as `(rows, cols)`.
pub type Shape = (usize, usize);

/// Handle of a registered value node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueId(usize);

impl ValueId {
    /// Creates a handle from a dense arena index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the dense arena index.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value{}", self.0)
    }
}

/// Handle of a registered operation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpId(usize);

impl OpId {
    /// Creates a handle from a dense arena index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the dense arena index.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Op{}", self.0)
    }
}

/// Creates a `1x1` tensor holding `value`.
pub fn scalar(value: f64) -> Tensor {
    Tensor::from_element(1, 1, value)
}

/// Returns the shape of a tensor.
pub fn shape_of(tensor: &Tensor) -> Shape {
    (tensor.nrows(), tensor.ncols())
}
