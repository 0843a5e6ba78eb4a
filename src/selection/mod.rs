//! Axis subset selection.
//!
//! A [`SelectionSpec`] is what the caller asks for; [`resolve`] checks it
//! against a source's [`AxisMetadata`](crate::axes::AxisMetadata) and
//! produces the [`IterationPlan`] the export pipeline walks.

mod resolver;
mod spec;

pub use resolver::{resolve, IterationPlan};
pub use spec::{AxisSelection, SelectionSpec};
