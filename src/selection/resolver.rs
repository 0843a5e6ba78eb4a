use tracing::debug;

use crate::axes::{AxisKind, AxisMetadata, IndexTuple};
use crate::error::ExportError;

use super::spec::{AxisSelection, SelectionSpec};

// =============================================================================
// IterationPlan
// =============================================================================

/// Ordered, finite list of index tuples to export.
///
/// Units are the Cartesian product of the selected indices of every present
/// axis, in canonical axis order with the innermost axis (Z) varying
/// fastest. Units are generated on demand; the plan itself only stores the
/// per-axis index lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationPlan {
    axes: Vec<(AxisKind, Vec<usize>)>,
    len: usize,
}

impl IterationPlan {
    fn new(axes: Vec<(AxisKind, Vec<usize>)>) -> Self {
        let len = axes.iter().map(|(_, indices)| indices.len()).product();
        Self { axes, len }
    }

    /// Number of units in the plan.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the plan has no units.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Selected source indices along an axis, ascending.
    ///
    /// Returns `None` if the source has no such axis.
    pub fn selected(&self, kind: AxisKind) -> Option<&[usize]> {
        self.axes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, indices)| indices.as_slice())
    }

    /// Number of selected indices along an axis (1 when the axis is absent).
    pub fn selected_count(&self, kind: AxisKind) -> usize {
        self.selected(kind).map_or(1, <[usize]>::len)
    }

    /// Axes of the plan with their selected indices, in canonical order.
    pub fn axes(&self) -> impl Iterator<Item = (AxisKind, &[usize])> {
        self.axes
            .iter()
            .map(|(kind, indices)| (*kind, indices.as_slice()))
    }

    /// The unit at position `n` in plan order.
    pub fn unit(&self, n: usize) -> Option<IndexTuple> {
        if n >= self.len {
            return None;
        }

        // Mixed-radix decomposition, innermost axis first
        let mut remainder = n;
        let mut entries = Vec::with_capacity(self.axes.len());
        for (kind, indices) in self.axes.iter().rev() {
            let radix = indices.len();
            entries.push((*kind, indices[remainder % radix]));
            remainder /= radix;
        }

        Some(IndexTuple::new(entries))
    }

    /// Iterate over all units in plan order.
    pub fn units(&self) -> impl Iterator<Item = IndexTuple> + '_ {
        (0..self.len).filter_map(move |n| self.unit(n))
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve a selection against source metadata.
///
/// Present axes that the selection omits, or selects with [`AxisSelection::All`],
/// contribute every index. Explicit indices and ranges are checked against the
/// axis extent before anything is expanded, then sorted and deduplicated.
/// Resolution is atomic: the first invalid axis fails the whole call and no
/// partial plan is returned.
///
/// # Errors
///
/// - [`ExportError::UnknownAxis`] if the selection names an axis the source lacks
/// - [`ExportError::InvalidSelection`] for an index outside `[0, extent)`; for
///   a range, the reported index is its upper bound
/// - [`ExportError::EmptySelection`] if an axis selects no index
pub fn resolve(
    metadata: &AxisMetadata,
    spec: &SelectionSpec,
) -> Result<IterationPlan, ExportError> {
    if let Some((kind, _)) = spec.iter().find(|(kind, _)| !metadata.has_axis(*kind)) {
        return Err(ExportError::UnknownAxis(kind));
    }

    let mut axes = Vec::with_capacity(metadata.axes().len());
    for axis in metadata.axes() {
        let mut indices: Vec<usize> = match spec.get(axis.kind) {
            None | Some(AxisSelection::All) => (0..axis.extent).collect(),
            Some(AxisSelection::Indices(requested)) => {
                if let Some(&index) = requested.iter().find(|&&i| i >= axis.extent) {
                    return Err(ExportError::InvalidSelection {
                        axis: axis.kind,
                        index,
                        extent: axis.extent,
                    });
                }
                requested.clone()
            }
            Some(AxisSelection::Ranges(ranges)) => {
                // Bounds first: an unchecked range may span the whole of usize
                if let Some(range) = ranges.iter().find(|r| *r.end() >= axis.extent) {
                    return Err(ExportError::InvalidSelection {
                        axis: axis.kind,
                        index: *range.end(),
                        extent: axis.extent,
                    });
                }
                ranges.iter().cloned().flatten().collect()
            }
        };

        indices.sort_unstable();
        indices.dedup();
        if indices.is_empty() {
            return Err(ExportError::EmptySelection(axis.kind));
        }
        axes.push((axis.kind, indices));
    }

    let plan = IterationPlan::new(axes);
    debug!(units = plan.len(), "Resolved selection");
    Ok(plan)
}
