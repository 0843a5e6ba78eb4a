use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::axes::AxisKind;
use crate::error::SelectionParseError;

/// Selection for a single axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisSelection {
    /// Every index along the axis
    All,

    /// Explicit source indices. Order and duplicates do not matter; the
    /// resolver sorts and deduplicates them.
    Indices(Vec<usize>),

    /// Inclusive index ranges, as parsed from `0-4,7`. Ranges are only
    /// expanded once the resolver has checked them against the axis extent.
    Ranges(Vec<RangeInclusive<usize>>),
}

impl AxisSelection {
    /// Parse a selection string.
    ///
    /// Accepted forms: `all`, a single index `3`, an inclusive range `0-2`,
    /// a comma list `0,5,9`, and mixtures such as `0-2,7`. An empty string
    /// selects nothing. Every token becomes one [`AxisSelection::Ranges`]
    /// entry; a single index `n` is the range `n..=n`.
    pub fn parse(input: &str) -> Result<Self, SelectionParseError> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(AxisSelection::All);
        }

        let mut ranges = Vec::new();
        for token in trimmed.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.split_once('-') {
                Some((start, end)) => {
                    let start = parse_index(start.trim())
                        .map_err(|_| SelectionParseError::InvalidRange(token.to_string()))?;
                    let end = parse_index(end.trim())
                        .map_err(|_| SelectionParseError::InvalidRange(token.to_string()))?;
                    if start > end {
                        return Err(SelectionParseError::InvalidRange(token.to_string()));
                    }
                    ranges.push(start..=end);
                }
                None => {
                    let index = parse_index(token)?;
                    ranges.push(index..=index);
                }
            }
        }

        Ok(AxisSelection::Ranges(ranges))
    }
}

impl FromStr for AxisSelection {
    type Err = SelectionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AxisSelection::parse(s)
    }
}

fn parse_index(token: &str) -> Result<usize, SelectionParseError> {
    token
        .parse::<usize>()
        .map_err(|_| SelectionParseError::InvalidIndex(token.to_string()))
}

/// Caller-built mapping from axis to requested indices.
///
/// Axes that are not mentioned mean "all indices" at resolution time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSpec {
    axes: BTreeMap<AxisKind, AxisSelection>,
}

impl SelectionSpec {
    /// A selection that exports everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Set the selection for one axis.
    pub fn with(mut self, kind: AxisKind, selection: AxisSelection) -> Self {
        self.axes.insert(kind, selection);
        self
    }

    /// Set explicit indices for one axis.
    pub fn with_indices(self, kind: AxisKind, indices: impl IntoIterator<Item = usize>) -> Self {
        self.with(kind, AxisSelection::Indices(indices.into_iter().collect()))
    }

    /// Set the selection for one axis in place.
    pub fn set(&mut self, kind: AxisKind, selection: AxisSelection) {
        self.axes.insert(kind, selection);
    }

    /// Selection for an axis, if the caller mentioned it.
    pub fn get(&self, kind: AxisKind) -> Option<&AxisSelection> {
        self.axes.get(&kind)
    }

    /// Mentioned axes in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (AxisKind, &AxisSelection)> {
        self.axes.iter().map(|(kind, selection)| (*kind, selection))
    }

    /// Whether the selection mentions no axis at all.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}
