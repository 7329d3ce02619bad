//! CSV ingest for the mixture parameters and pre-recorded rating panels.
//!
//! The format is deliberately rigid: one row per group, comma-separated
//! floats, and a required trailing newline. Rating panels are stored negated
//! on disk and carry their samples-per-group count in the filename, as
//! `<anything>_N.csv`.

use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::mixture::{MAX_NUM_GROUPS, MAX_NUM_ITEMS};

#[derive(Debug)]
pub enum CsvError {
    Io(io::Error),
    /// The file does not end in a newline, so the last row may be truncated.
    MissingNewline(String),
    InconsistentRow {
        file: String,
        row: usize,
        expected: usize,
        found: usize,
    },
    BadFloat {
        file: String,
        row: usize,
        column: usize,
    },
    TooManyRows {
        file: String,
        max: usize,
    },
    TooManyColumns {
        file: String,
        max: usize,
    },
    /// A ratings panel filename must end in `_N.csv` with N >= 1.
    BadPanelName(String),
    PanelShape {
        file: String,
        expected_rows: usize,
        found_rows: usize,
        expected_cols: usize,
        found_cols: usize,
    },
}

impl fmt::Display for CsvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CsvError::Io(err) => write!(f, "{}", err),
            CsvError::MissingNewline(file) => {
                write!(f, "{}: missing trailing newline", file)
            }
            CsvError::InconsistentRow {
                file,
                row,
                expected,
                found,
            } => write!(
                f,
                "{}: row {} has {} values, expected {}",
                file,
                row + 1,
                found,
                expected
            ),
            CsvError::BadFloat { file, row, column } => write!(
                f,
                "{}: row {}, column {} is not a number",
                file,
                row + 1,
                column + 1
            ),
            CsvError::TooManyRows { file, max } => {
                write!(f, "{}: more than {} rows", file, max)
            }
            CsvError::TooManyColumns { file, max } => {
                write!(f, "{}: more than {} columns", file, max)
            }
            CsvError::BadPanelName(file) => write!(
                f,
                "{}: ratings panel filename must look like name_N.csv",
                file
            ),
            CsvError::PanelShape {
                file,
                expected_rows,
                found_rows,
                expected_cols,
                found_cols,
            } => write!(
                f,
                "{}: panel is {}x{}, expected {}x{}",
                file, found_rows, found_cols, expected_rows, expected_cols
            ),
        }
    }
}

impl error::Error for CsvError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            CsvError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CsvError {
    fn from(err: io::Error) -> CsvError {
        CsvError::Io(err)
    }
}

/// A dense matrix read from CSV, row per group.
#[derive(Debug)]
pub struct Matrix {
    pub rows: Vec<Vec<f64>>,
    pub num_cols: usize,
}

impl Matrix {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Read a group-by-item parameter matrix, enforcing the compile-time caps.
pub fn read_matrix(path: &Path) -> Result<Matrix, CsvError> {
    let contents = fs::read_to_string(path)?;
    parse_matrix(&contents, &path.display().to_string(), MAX_NUM_GROUPS, MAX_NUM_ITEMS)
}

pub(crate) fn parse_matrix(
    contents: &str,
    file: &str,
    max_rows: usize,
    max_cols: usize,
) -> Result<Matrix, CsvError> {
    if !contents.ends_with('\n') {
        return Err(CsvError::MissingNewline(file.to_string()));
    }
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut num_cols = 0;
    for (row, line) in contents.lines().enumerate() {
        if rows.len() == max_rows {
            return Err(CsvError::TooManyRows {
                file: file.to_string(),
                max: max_rows,
            });
        }
        let mut values = Vec::with_capacity(num_cols);
        for (column, field) in line.split(',').enumerate() {
            if column == max_cols {
                return Err(CsvError::TooManyColumns {
                    file: file.to_string(),
                    max: max_cols,
                });
            }
            let value: f64 = field.trim().parse().map_err(|_| CsvError::BadFloat {
                file: file.to_string(),
                row,
                column,
            })?;
            values.push(value);
        }
        if row == 0 {
            num_cols = values.len();
        } else if values.len() != num_cols {
            return Err(CsvError::InconsistentRow {
                file: file.to_string(),
                row,
                expected: num_cols,
                found: values.len(),
            });
        }
        rows.push(values);
    }
    Ok(Matrix { rows, num_cols })
}

/// Pre-recorded user ratings: `num_groups` blocks of `samples_per_group`
/// users, each row holding one rating per item.
#[derive(Debug)]
pub struct RatingsPanel {
    pub num_groups: usize,
    pub samples_per_group: usize,
    pub num_items: usize,
    rows: Vec<Vec<f64>>,
}

impl RatingsPanel {
    /// Validate the block layout and flip the on-disk negation.
    pub fn from_matrix(
        matrix: Matrix,
        file: &str,
        num_groups: usize,
        samples_per_group: usize,
        num_items: usize,
    ) -> Result<RatingsPanel, CsvError> {
        let expected_rows = num_groups * samples_per_group;
        if matrix.num_rows() != expected_rows || matrix.num_cols != num_items {
            return Err(CsvError::PanelShape {
                file: file.to_string(),
                expected_rows,
                found_rows: matrix.num_rows(),
                expected_cols: num_items,
                found_cols: matrix.num_cols,
            });
        }
        let mut rows = matrix.rows;
        for row in &mut rows {
            for value in row {
                *value = -*value;
            }
        }
        Ok(RatingsPanel {
            num_groups,
            samples_per_group,
            num_items,
            rows,
        })
    }

    #[inline]
    pub fn rating(&self, group: usize, user: usize, item: usize) -> f64 {
        debug_assert!(group < self.num_groups);
        debug_assert!(user < self.samples_per_group);
        self.rows[group * self.samples_per_group + user][item]
    }
}

/// Read a `*_N.csv` ratings panel for a model of the given shape.
pub fn read_ratings_panel(
    path: &Path,
    num_groups: usize,
    num_items: usize,
) -> Result<RatingsPanel, CsvError> {
    let file = path.display().to_string();
    let samples_per_group = samples_from_name(path)?;
    let contents = fs::read_to_string(path)?;
    let matrix = parse_matrix(&contents, &file, num_groups * samples_per_group, num_items)?;
    RatingsPanel::from_matrix(matrix, &file, num_groups, samples_per_group, num_items)
}

/// Extract N from a `name_N.csv` filename.
fn samples_from_name(path: &Path) -> Result<usize, CsvError> {
    let bad_name = || CsvError::BadPanelName(path.display().to_string());
    let name = path.file_name().and_then(|name| name.to_str()).ok_or_else(bad_name)?;
    let after_underscore = &name[name.rfind('_').ok_or_else(bad_name)? + 1..];
    let digits = &after_underscore[..after_underscore.find('.').ok_or_else(bad_name)?];
    match digits.parse() {
        Ok(samples) if samples > 0 => Ok(samples),
        _ => Err(bad_name()),
    }
}
