//! # Labeled Matrices
//!
//! A dense 2-D container addressable by `(row, col)` index or by row/column
//! name. Adjacency, conditional probability tables and observation counts
//! are all `LabeledMatrix` values.
//!
//! ## Invariants
//!
//! - Storage is row-major: cell `(row, col)` lives at `row * cols + col`.
//! - Each axis keeps its names in insertion order plus a name → index map
//!   that is rebuilt whenever the names are replaced. An axis is either
//!   unnamed or has exactly one distinct name per index.
//! - [`LabeledMatrix::resize`] only grows; existing values keep their
//!   coordinates.
//!
//! ```rust
//! use causal_core::LabeledMatrix;
//!
//! let mut m = LabeledMatrix::new(2, 2, 0u32);
//! m.set_row_names(vec!["1".into(), "2".into()]).unwrap();
//! m.set_col_names(vec!["1".into(), "2".into()]).unwrap();
//! m.set_by_names("2", "1", 1).unwrap();
//! assert_eq!(*m.get(1, 0).unwrap(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::iter::Sum;
use std::path::Path;
use std::str::FromStr;

use crate::error::CausalError;

/// Name of the row or column holding missing-value counts.
pub const NA: &str = "NA";

/// Dense row-major matrix with optional row and column names.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix<T> {
    rows: usize,
    cols: usize,
    row_names: Vec<String>,
    col_names: Vec<String>,
    row_index: HashMap<String, usize>,
    col_index: HashMap<String, usize>,
    data: Vec<T>,
}

impl<T> Default for LabeledMatrix<T> {
    fn default() -> Self {
        Self {
            rows: 0,
            cols: 0,
            row_names: Vec::new(),
            col_names: Vec::new(),
            row_index: HashMap::new(),
            col_index: HashMap::new(),
            data: Vec::new(),
        }
    }
}

impl<T: Clone> LabeledMatrix<T> {
    /// Create an unnamed `rows x cols` matrix filled with `initial`.
    pub fn new(rows: usize, cols: usize, initial: T) -> Self {
        Self {
            rows,
            cols,
            data: vec![initial; rows * cols],
            ..Self::default()
        }
    }

    /// Create a matrix sized by its name vectors.
    ///
    /// # Errors
    ///
    /// [`CausalError::InvalidNames`] if either vector repeats a name.
    pub fn with_names(
        row_names: Vec<String>,
        col_names: Vec<String>,
        initial: T,
    ) -> Result<Self, CausalError> {
        let mut m = Self::new(row_names.len(), col_names.len(), initial);
        m.set_row_names(row_names)?;
        m.set_col_names(col_names)?;
        Ok(m)
    }

    /// Grow the matrix to `rows x cols`, filling new cells with `initial`.
    ///
    /// # Errors
    ///
    /// [`CausalError::ShrinkRejected`] if either dimension would shrink.
    pub fn resize(&mut self, rows: usize, cols: usize, initial: T) -> Result<(), CausalError> {
        if rows < self.rows || cols < self.cols {
            return Err(CausalError::ShrinkRejected {
                rows: self.rows,
                cols: self.cols,
                new_rows: rows,
                new_cols: cols,
            });
        }
        if cols == self.cols {
            self.data.resize(rows * cols, initial);
        } else {
            let mut data = Vec::with_capacity(rows * cols);
            for row in 0..rows {
                for col in 0..cols {
                    if row < self.rows && col < self.cols {
                        data.push(self.data[row * self.cols + col].clone());
                    } else {
                        data.push(initial.clone());
                    }
                }
            }
            self.data = data;
        }
        self.rows = rows;
        self.cols = cols;
        Ok(())
    }
}

impl<T> LabeledMatrix<T> {
    /// An empty 0x0 matrix.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize, CausalError> {
        if row >= self.rows || col >= self.cols {
            return Err(CausalError::IndexOutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    /// Value at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Result<&T, CausalError> {
        let at = self.offset(row, col)?;
        Ok(&self.data[at])
    }

    /// Store `value` at `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<(), CausalError> {
        let at = self.offset(row, col)?;
        self.data[at] = value;
        Ok(())
    }

    /// A full row as a slice.
    pub fn row(&self, row: usize) -> Result<&[T], CausalError> {
        if row >= self.rows {
            return Err(CausalError::IndexOutOfRange {
                row,
                col: 0,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(&self.data[row * self.cols..(row + 1) * self.cols])
    }

    fn named(&self, row_name: &str, col_name: &str) -> Result<(usize, usize), CausalError> {
        let row = self.find_row(row_name).ok_or_else(|| CausalError::NameNotFound {
            name: row_name.to_string(),
        })?;
        let col = self.find_col(col_name).ok_or_else(|| CausalError::NameNotFound {
            name: col_name.to_string(),
        })?;
        Ok((row, col))
    }

    /// Value at the cell named by `row_name` and `col_name`.
    pub fn get_by_names(&self, row_name: &str, col_name: &str) -> Result<&T, CausalError> {
        let (row, col) = self.named(row_name, col_name)?;
        self.get(row, col)
    }

    /// Store `value` at the cell named by `row_name` and `col_name`.
    pub fn set_by_names(
        &mut self,
        row_name: &str,
        col_name: &str,
        value: T,
    ) -> Result<(), CausalError> {
        let (row, col) = self.named(row_name, col_name)?;
        self.set(row, col, value)
    }

    /// Replace the row names and rebuild the row lookup.
    ///
    /// `names` is either empty or holds one distinct name per row.
    pub fn set_row_names(&mut self, names: Vec<String>) -> Result<(), CausalError> {
        self.row_index = index_names("row", &names, self.rows)?;
        self.row_names = names;
        Ok(())
    }

    /// Replace the column names and rebuild the column lookup.
    ///
    /// `names` is either empty or holds one distinct name per column.
    pub fn set_col_names(&mut self, names: Vec<String>) -> Result<(), CausalError> {
        self.col_index = index_names("column", &names, self.cols)?;
        self.col_names = names;
        Ok(())
    }

    pub fn row_names(&self) -> &[String] {
        &self.row_names
    }

    pub fn col_names(&self) -> &[String] {
        &self.col_names
    }

    /// Index of the row called `name`, if any.
    pub fn find_row(&self, name: &str) -> Option<usize> {
        self.row_index.get(name).copied()
    }

    /// Index of the column called `name`, if any.
    pub fn find_col(&self, name: &str) -> Option<usize> {
        self.col_index.get(name).copied()
    }

    /// True if a column is named [`NA`].
    pub fn has_na_col(&self) -> bool {
        self.find_col(NA).is_some()
    }

    /// True if a row is named [`NA`].
    pub fn has_na_row(&self) -> bool {
        self.find_row(NA).is_some()
    }

    /// Reset to an empty 0x0 matrix without names.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn column(&self, col: usize) -> Result<impl Iterator<Item = &T>, CausalError> {
        if col >= self.cols {
            return Err(CausalError::IndexOutOfRange {
                row: 0,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(self.data.iter().skip(col).step_by(self.cols))
    }
}

impl<T: PartialEq> LabeledMatrix<T> {
    /// True if any cell equals `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.data.iter().any(|v| v == value)
    }

    pub fn contains_in_row(&self, row: usize, value: &T) -> Result<bool, CausalError> {
        Ok(self.row(row)?.iter().any(|v| v == value))
    }

    pub fn contains_in_col(&self, col: usize, value: &T) -> Result<bool, CausalError> {
        Ok(self.column(col)?.any(|v| v == value))
    }

    /// Number of cells in `row` equal to `value`.
    pub fn count_in_row(&self, row: usize, value: &T) -> Result<usize, CausalError> {
        Ok(self.row(row)?.iter().filter(|v| *v == value).count())
    }

    /// Number of cells in `col` equal to `value`.
    pub fn count_in_col(&self, col: usize, value: &T) -> Result<usize, CausalError> {
        Ok(self.column(col)?.filter(|v| *v == value).count())
    }
}

impl<T: Clone + PartialOrd> LabeledMatrix<T> {
    /// Distinct values of `row` in ascending order, optionally skipping `exclude`.
    pub fn unique_row_values(&self, row: usize, exclude: Option<&T>) -> Result<Vec<T>, CausalError> {
        Ok(unique_sorted(self.row(row)?.iter(), exclude))
    }

    /// Distinct values of `col` in ascending order, optionally skipping `exclude`.
    pub fn unique_col_values(&self, col: usize, exclude: Option<&T>) -> Result<Vec<T>, CausalError> {
        Ok(unique_sorted(self.column(col)?, exclude))
    }
}

impl<T: Copy + Sum<T>> LabeledMatrix<T> {
    pub fn row_sum(&self, row: usize) -> Result<T, CausalError> {
        Ok(self.row(row)?.iter().copied().sum())
    }

    pub fn col_sum(&self, col: usize) -> Result<T, CausalError> {
        Ok(self.column(col)?.copied().sum())
    }
}

impl<T: FromStr> LabeledMatrix<T> {
    /// Parse a whitespace-delimited matrix.
    ///
    /// With `has_col_names` the first line is a header; with `has_row_names`
    /// every line starts with a label, and the header's first token is the
    /// corner cell. Every data row must match the header's cell count.
    pub fn parse_str(text: &str, has_col_names: bool, has_row_names: bool) -> Result<Self, CausalError> {
        Self::parse_selected(text, has_col_names, has_row_names, &[])
    }

    /// Read a matrix file, see [`LabeledMatrix::parse_str`].
    pub fn from_file(
        path: impl AsRef<Path>,
        has_col_names: bool,
        has_row_names: bool,
    ) -> Result<Self, CausalError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| CausalError::unreadable(path, &e))?;
        tracing::debug!("Reading matrix from {:?}", path);
        Self::parse_str(&text, has_col_names, has_row_names)
    }

    /// Read a matrix file, dropping the sample columns at the given
    /// zero-based positions.
    pub fn from_file_without_samples(
        path: impl AsRef<Path>,
        has_col_names: bool,
        has_row_names: bool,
        deleted: &[usize],
    ) -> Result<Self, CausalError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| CausalError::unreadable(path, &e))?;
        let m = Self::parse_selected(&text, has_col_names, has_row_names, deleted)?;
        if m.rows == 0 || m.cols == 0 {
            return Err(CausalError::MissingPrerequisite {
                reason: format!("{:?} contains no features or no samples", path),
            });
        }
        Ok(m)
    }

    fn parse_selected(
        text: &str,
        has_col_names: bool,
        has_row_names: bool,
        deleted: &[usize],
    ) -> Result<Self, CausalError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
            .filter(|(_, tokens)| !tokens.is_empty())
            .peekable();

        let label_width = usize::from(has_row_names);
        let mut col_names = Vec::new();
        let width = match lines.peek() {
            None => return Ok(Self::default()),
            Some((_, tokens)) => tokens.len().saturating_sub(label_width),
        };
        let mut deleted = deleted.to_vec();
        deleted.sort_unstable();
        deleted.dedup();
        if deleted.len() > width {
            return Err(CausalError::MissingPrerequisite {
                reason: format!(
                    "attempted to delete {} samples from a matrix with {}",
                    deleted.len(),
                    width
                ),
            });
        }
        if let Some(&col) = deleted.iter().find(|&&col| col >= width) {
            return Err(CausalError::IndexOutOfRange {
                row: 0,
                col,
                rows: 0,
                cols: width,
            });
        }
        let keep = |col: usize| deleted.binary_search(&col).is_err();

        if has_col_names {
            if let Some((_, header)) = lines.next() {
                col_names = header[label_width..]
                    .iter()
                    .enumerate()
                    .filter(|(col, _)| keep(*col))
                    .map(|(_, name)| name.to_string())
                    .collect();
            }
        }

        let mut row_names = Vec::new();
        let mut data = Vec::new();
        let mut rows = 0;
        for (line_no, tokens) in lines {
            let got = tokens.len().saturating_sub(label_width);
            if tokens.len() < label_width || got != width {
                return Err(CausalError::RowLengthMismatch {
                    row: line_no,
                    expected: width,
                    got,
                });
            }
            if has_row_names {
                row_names.push(tokens[0].to_string());
            }
            for (col, token) in tokens[label_width..].iter().enumerate() {
                if !keep(col) {
                    continue;
                }
                let value = token.parse::<T>().map_err(|_| CausalError::ParseCell {
                    row: line_no,
                    token: token.to_string(),
                })?;
                data.push(value);
            }
            rows += 1;
        }

        let mut m = Self {
            rows,
            cols: width - deleted.len(),
            data,
            ..Self::default()
        };
        m.set_row_names(row_names)?;
        m.set_col_names(col_names)?;
        Ok(m)
    }
}

impl<T: fmt::Display> fmt::Display for LabeledMatrix<T> {
    /// Tab-separated dump: the column names first, then one line per row
    /// prefixed by its name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\t")?;
        for name in &self.col_names {
            write!(f, "{}\t", name)?;
        }
        writeln!(f)?;
        for row in 0..self.rows {
            let name = self.row_names.get(row).map(String::as_str).unwrap_or("");
            write!(f, "{}\t", name)?;
            for value in &self.data[row * self.cols..(row + 1) * self.cols] {
                write!(f, "{}\t", value)?;
            }
            if row + 1 < self.rows {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

fn index_names(
    axis: &'static str,
    names: &[String],
    len: usize,
) -> Result<HashMap<String, usize>, CausalError> {
    if !names.is_empty() && names.len() != len {
        return Err(CausalError::InvalidNames {
            axis,
            reason: format!("{} names for {} entries", names.len(), len),
        });
    }
    let mut index = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        if index.insert(name.clone(), i).is_some() {
            return Err(CausalError::InvalidNames {
                axis,
                reason: format!("{:?} appears more than once", name),
            });
        }
    }
    Ok(index)
}

fn unique_sorted<'a, T, I>(values: I, exclude: Option<&T>) -> Vec<T>
where
    T: Clone + PartialOrd + 'a,
    I: Iterator<Item = &'a T>,
{
    let mut out: Vec<T> = values
        .filter(|v| exclude.map_or(true, |x| *v != x))
        .cloned()
        .collect();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    out.dedup_by(|a, b| a == b);
    out
}
