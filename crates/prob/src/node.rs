//! Discrete random variables.
//!
//! A [`Node`] owns its conditional probability table (CPT) and the
//! observation counts the table is learned from. CPT rows enumerate the
//! joint parent-value combinations in row-major order (first parent most
//! significant); columns are the node's own values. The observation table
//! has the same rows and, when the node has missing samples, a leading
//! [`NA`] column.

use causal_core::{CausalError, LabeledMatrix, NA};

/// One discrete random variable of a [`crate::Network`].
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: u32,
    name: String,
    /// Own value labels, in column order.
    values: Vec<String>,
    /// Parents the CPT is laid out over.
    parent_ids: Vec<u32>,
    /// Number of values for each parent.
    parent_states: Vec<usize>,
    cpt: LabeledMatrix<f32>,
    observations: LabeledMatrix<f32>,
    /// Raw counts, restored after every M-phase.
    backup: LabeledMatrix<f32>,
    /// Value forced by an active do-intervention.
    forced: Option<usize>,
}

impl Node {
    /// Create a node without a value domain or tables.
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            values: Vec::new(),
            parent_ids: Vec::new(),
            parent_states: Vec::new(),
            cpt: LabeledMatrix::empty(),
            observations: LabeledMatrix::empty(),
            backup: LabeledMatrix::empty(),
            forced: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Own value labels, excluding [`NA`].
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Column of the value labelled `label`.
    pub fn value_index(&self, label: &str) -> Option<usize> {
        self.values.iter().position(|v| v == label)
    }

    /// Parents in CPT layout order.
    pub fn parent_ids(&self) -> &[u32] {
        &self.parent_ids
    }

    pub fn number_of_parents(&self) -> usize {
        self.parent_ids.len()
    }

    pub fn parent_states(&self) -> &[usize] {
        &self.parent_states
    }

    /// Number of parent-value combinations (CPT rows).
    pub fn number_of_parent_values(&self) -> usize {
        self.cpt.rows()
    }

    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    pub fn cpt(&self) -> &LabeledMatrix<f32> {
        &self.cpt
    }

    pub fn observations(&self) -> &LabeledMatrix<f32> {
        &self.observations
    }

    pub fn observations_mut(&mut self) -> &mut LabeledMatrix<f32> {
        &mut self.observations
    }

    /// True if the observation table carries a missing-value column.
    pub fn has_missing(&self) -> bool {
        self.observations.has_na_col()
    }

    /// P(value = `col` | parents = combination `row`).
    pub fn probability(&self, row: usize, col: usize) -> Result<f32, CausalError> {
        self.cpt.get(row, col).copied()
    }

    pub fn set_probability(&mut self, row: usize, col: usize, p: f32) -> Result<(), CausalError> {
        self.cpt.set(row, col, p)
    }

    /// Overwrite a whole CPT row.
    pub fn set_distribution(&mut self, row: usize, dist: &[f32]) -> Result<(), CausalError> {
        if dist.len() != self.cpt.cols() {
            return Err(CausalError::IndexOutOfRange {
                row,
                col: dist.len(),
                rows: self.cpt.rows(),
                cols: self.cpt.cols(),
            });
        }
        for (col, &p) in dist.iter().enumerate() {
            self.cpt.set(row, col, p)?;
        }
        Ok(())
    }

    pub(crate) fn replace_cpt(&mut self, cpt: LabeledMatrix<f32>) {
        self.cpt = cpt;
    }

    /// Lay out empty CPT and observation tables.
    ///
    /// `parents` pairs each parent id with that parent's value labels. Row
    /// names join the parent labels with `,`; a root gets the single row
    /// [`NA`]. With `with_missing` the observation table gains a leading
    /// [`NA`] column.
    pub fn shape_tables(
        &mut self,
        values: Vec<String>,
        parents: &[(u32, &[String])],
        with_missing: bool,
    ) -> Result<(), CausalError> {
        let mut row_names = vec![String::new()];
        for (_, labels) in parents {
            row_names = row_names
                .iter()
                .flat_map(|prefix| {
                    labels.iter().map(move |label| {
                        if prefix.is_empty() {
                            label.clone()
                        } else {
                            format!("{},{}", prefix, label)
                        }
                    })
                })
                .collect();
        }
        if parents.is_empty() {
            row_names = vec![NA.to_string()];
        }

        let mut obs_cols = Vec::with_capacity(values.len() + 1);
        if with_missing {
            obs_cols.push(NA.to_string());
        }
        obs_cols.extend(values.iter().cloned());

        self.parent_ids = parents.iter().map(|(id, _)| *id).collect();
        self.parent_states = parents.iter().map(|(_, labels)| labels.len()).collect();
        self.cpt = LabeledMatrix::with_names(row_names.clone(), values.clone(), 0.0)?;
        self.observations = LabeledMatrix::with_names(row_names, obs_cols, 0.0)?;
        self.backup = self.observations.clone();
        self.values = values;
        Ok(())
    }

    /// Encode parent value indices into a CPT row (row-major).
    ///
    /// For parents with states [s0, s1], values [v0, v1] encode as
    /// `v0 * s1 + v1`.
    pub fn encode_parents(&self, parent_values: &[usize]) -> usize {
        let mut idx = 0;
        for (i, &val) in parent_values.iter().enumerate() {
            idx *= self.parent_states[i];
            idx += val;
        }
        idx
    }

    /// Decode a CPT row into one value index per parent.
    pub fn decode_parents(&self, mut row: usize) -> Vec<usize> {
        let mut values = vec![0; self.parent_states.len()];
        for i in (0..self.parent_states.len()).rev() {
            values[i] = row % self.parent_states[i];
            row /= self.parent_states[i];
        }
        values
    }

    /// Snapshot the current observation counts.
    pub fn save_backup(&mut self) {
        self.backup = self.observations.clone();
    }

    /// Restore the counts taken by [`Node::save_backup`].
    pub fn load_backup(&mut self) {
        self.observations = self.backup.clone();
    }

    /// Value forced by an active do-intervention.
    pub fn forced(&self) -> Option<usize> {
        self.forced
    }

    pub(crate) fn set_forced(&mut self, value: Option<usize>) {
        self.forced = value;
    }

    /// Rename and re-parent a copy of this node for the hypothetical side
    /// of a twin network.
    pub(crate) fn twin(&self, id: u32, name: String, parent_ids: Vec<u32>) -> Self {
        Self {
            id,
            name,
            parent_ids,
            forced: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_root_tables() {
        let mut n = Node::new(1, "Cloudy");
        n.shape_tables(labels(&["0", "1"]), &[], false).unwrap();
        assert!(n.is_root());
        assert_eq!(n.number_of_parent_values(), 1);
        assert_eq!(n.cpt().row_names(), &labels(&["NA"])[..]);
        assert!(!n.has_missing());
    }

    #[test]
    fn test_row_layout_and_encoding() {
        let a = labels(&["0", "1"]);
        let b = labels(&["x", "y", "z"]);
        let mut n = Node::new(3, "C");
        n.shape_tables(labels(&["0", "1"]), &[(1, &a), (2, &b)], true).unwrap();

        assert_eq!(n.number_of_parent_values(), 6);
        assert_eq!(n.cpt().row_names()[4], "1,y");
        assert_eq!(n.observations().col_names(), &labels(&["NA", "0", "1"])[..]);
        assert!(n.has_missing());

        assert_eq!(n.encode_parents(&[1, 1]), 4);
        assert_eq!(n.decode_parents(4), vec![1, 1]);
        for row in 0..6 {
            assert_eq!(n.encode_parents(&n.decode_parents(row)), row);
        }
    }

    #[test]
    fn test_backup_restores_counts() {
        let mut n = Node::new(1, "A");
        n.shape_tables(labels(&["0", "1"]), &[], true).unwrap();
        n.observations_mut().set(0, 1, 4.0).unwrap();
        n.save_backup();
        n.observations_mut().set(0, 1, 9.5).unwrap();
        n.load_backup();
        assert_eq!(*n.observations().get(0, 1).unwrap(), 4.0);
    }

    #[test]
    fn test_set_distribution_checks_width() {
        let mut n = Node::new(1, "A");
        n.shape_tables(labels(&["0", "1"]), &[], false).unwrap();
        n.set_distribution(0, &[0.3, 0.7]).unwrap();
        assert_eq!(n.probability(0, 1).unwrap(), 0.7);
        assert!(n.set_distribution(0, &[1.0]).is_err());
    }
}
