//! Saving and loading assembled reduced operators,
//! so that an offline stage can be skipped when its results already exist.
//!
//! Operators are stored as JSON, one file per projection strategy and set of mode counts,
//! named e.g. `supremizer_U3_P2_S2_N2.json`.

use std::{
    fs,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{basis::ModeCounts, reduced::Projection, reduction::ReducedOperatorSet};

/// Error in saving or loading reduced operators.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    /// Error reading or writing the file.
    #[error("I/O error on {path:?}")]
    Io {
        /// The file or folder being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file contents couldn't be (de)serialized.
    #[error("Invalid operator data in {path:?}")]
    Format {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The file contains operators for a different reduction than requested.
    #[error("{path:?} contains {found_projection} operators for {found}, expected {expected_projection} operators for {expected}")]
    CountMismatch {
        /// The file being accessed.
        path: PathBuf,
        /// Requested strategy.
        expected_projection: Projection,
        /// Requested mode counts.
        expected: ModeCounts,
        /// Strategy stored in the file.
        found_projection: Projection,
        /// Mode counts stored in the file.
        found: ModeCounts,
    },
}

impl PersistError {
    /// Whether the error is caused by the file not existing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Name of the file operators for the given reduction are stored in.
pub fn operator_file_name(projection: Projection, counts: &ModeCounts) -> String {
    format!(
        "{}_U{}_P{}_S{}_N{}.json",
        projection.label(),
        counts.velocity,
        counts.pressure,
        counts.supremizer,
        counts.nut
    )
}

/// Write operators into `folder`, creating it if needed.
/// Returns the path of the written file.
pub fn save_operators(
    folder: impl AsRef<Path>,
    operators: &ReducedOperatorSet,
) -> Result<PathBuf, PersistError> {
    let folder = folder.as_ref();
    fs::create_dir_all(folder).map_err(|source| PersistError::Io {
        path: folder.to_path_buf(),
        source,
    })?;
    let path = folder.join(operator_file_name(
        operators.projection(),
        &operators.counts(),
    ));
    let file = fs::File::create(&path).map_err(|source| PersistError::Io {
        path: path.clone(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, operators).map_err(|source| PersistError::Format {
        path: path.clone(),
        source,
    })?;
    writer.flush().map_err(|source| PersistError::Io {
        path: path.clone(),
        source,
    })?;
    log::info!("Saved reduced operators to {}", path.display());
    Ok(path)
}

/// Read operators for the given reduction from `folder`.
pub fn load_operators(
    folder: impl AsRef<Path>,
    projection: Projection,
    counts: &ModeCounts,
) -> Result<ReducedOperatorSet, PersistError> {
    let path = folder
        .as_ref()
        .join(operator_file_name(projection, counts));
    let file = fs::File::open(&path).map_err(|source| PersistError::Io {
        path: path.clone(),
        source,
    })?;
    let operators: ReducedOperatorSet = serde_json::from_reader(BufReader::new(file))
        .map_err(|source| PersistError::Format {
            path: path.clone(),
            source,
        })?;
    if operators.projection() != projection || operators.counts() != *counts {
        return Err(PersistError::CountMismatch {
            path,
            expected_projection: projection,
            expected: *counts,
            found_projection: operators.projection(),
            found: operators.counts(),
        });
    }
    log::info!("Loaded reduced operators from {}", path.display());
    Ok(operators)
}
