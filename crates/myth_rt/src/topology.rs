//! Topology-weighted victim selection: parsing a CPU-hierarchy descriptor
//! or probability-matrix file into an `N`-worker cumulative distribution
//! table, and drawing a victim from it.
//!
//! In-memory representation follows the source design directly: row `i`,
//! column `j` holds `floor(2^31 * sum_{k<j} p[i,k])`, with an implicit
//! column `N` of exactly `2^31`; a steal draws 31 random bits and
//! binary-searches the row.

use std::path::{Path, PathBuf};

use crate::error::RuntimeError;

const SCALE: f64 = (1u64 << 31) as f64;

/// Where to source the topology-weighted steal policy's probability table
/// from, resolved at [`crate::RuntimeBuilder::build`].
#[derive(Debug, Clone)]
pub(crate) enum TopologySource {
    Uniform,
    Descriptor(String),
    File(PathBuf),
}

/// An `N x N` steal-probability table: row `i` is worker `i`'s cumulative
/// distribution over victims.
pub(crate) struct ProbTable {
    rows: Vec<Vec<i64>>,
}

impl ProbTable {
    pub fn build(source: &TopologySource, workers: usize) -> Result<Self, RuntimeError> {
        let base = match source {
            TopologySource::Uniform => vec![vec![1.0; workers]; workers],
            TopologySource::Descriptor(descriptor) => {
                let levels = parse_descriptor(descriptor)?;
                build_base_matrix(&levels)
            }
            TopologySource::File(path) => read_prob_file(path)?,
        };
        Ok(Self { rows: tile_and_normalize(&base, workers) })
    }

    /// Binary-searches worker `rank`'s row for the victim a 31-bit draw
    /// `x` selects: the unique `j` with `row[j] <= x < row[j+1]`.
    pub fn victim(&self, rank: usize, draw: u32) -> usize {
        let row = &self.rows[rank];
        let x = i64::from(draw);
        let idx = row.partition_point(|&boundary| boundary <= x);
        idx.saturating_sub(1).min(row.len() - 2)
    }

    #[cfg(test)]
    pub(crate) fn row(&self, rank: usize) -> &[i64] {
        &self.rows[rank]
    }
}

fn parse_descriptor(descriptor: &str) -> Result<Vec<(usize, f64)>, RuntimeError> {
    descriptor
        .split('x')
        .map(|segment| {
            let segment = segment.trim();
            let (n, p) = segment
                .split_once(',')
                .ok_or_else(|| RuntimeError::InvalidTopologyDescriptor(descriptor.to_owned(), format!("segment {segment:?} is missing a comma")))?;
            let n: usize = n
                .trim()
                .parse()
                .map_err(|_| RuntimeError::InvalidTopologyDescriptor(descriptor.to_owned(), format!("{n:?} is not a partition count")))?;
            let p: f64 = p
                .trim()
                .parse()
                .map_err(|_| RuntimeError::InvalidTopologyDescriptor(descriptor.to_owned(), format!("{p:?} is not a weight")))?;
            if n == 0 {
                return Err(RuntimeError::InvalidTopologyDescriptor(descriptor.to_owned(), "partition count must be positive".to_owned()));
            }
            Ok((n, p))
        })
        .collect()
}

/// Recursively expands a topology descriptor into its base weight matrix:
/// the `n` partitions at the outermost level form an `n x n` grid of
/// sub-matrices, diagonal blocks recurse into the remaining levels and
/// off-diagonal blocks are filled with that level's cross-partition weight.
fn build_base_matrix(levels: &[(usize, f64)]) -> Vec<Vec<f64>> {
    let Some((&(n, p), rest)) = levels.split_first() else {
        return vec![vec![0.0]];
    };
    let sub = build_base_matrix(rest);
    let block = sub.len();
    let size = n * block;
    let mut matrix = vec![vec![0.0; size]; size];
    for a in 0..n {
        for b in 0..n {
            for i in 0..block {
                for j in 0..block {
                    matrix[a * block + i][b * block + j] = if a == b { sub[i][j] } else { p };
                }
            }
        }
    }
    matrix
}

fn read_prob_file(path: &Path) -> Result<Vec<Vec<f64>>, RuntimeError> {
    let text = std::fs::read_to_string(path).map_err(|source| RuntimeError::ProbFileIo { path: path.to_owned(), source })?;
    let mut tokens = text.split_ascii_whitespace();

    let n: usize = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| RuntimeError::InvalidProbFile(path.to_owned(), "missing or invalid worker count".to_owned()))?;

    let mut matrix = vec![vec![0.0; n]; n];
    for row in matrix.iter_mut() {
        for cell in row.iter_mut() {
            let weight: f64 = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| RuntimeError::InvalidProbFile(path.to_owned(), "matrix is truncated".to_owned()))?;
            if weight < 0.0 {
                return Err(RuntimeError::InvalidProbFile(path.to_owned(), "weights must be non-negative".to_owned()));
            }
            *cell = weight;
        }
    }
    Ok(matrix)
}

/// Tiles `base` modulo its own size up to `workers` (a no-op when they
/// already match), zeroes the diagonal, and row-normalizes into the
/// 2^31-scaled cumulative representation `victim` searches.
fn tile_and_normalize(base: &[Vec<f64>], workers: usize) -> Vec<Vec<i64>> {
    let base_size = base.len().max(1);
    let mut rows = Vec::with_capacity(workers);

    for i in 0..workers {
        let mut weights: Vec<f64> = (0..workers).map(|j| base[i % base_size][j % base_size]).collect();
        weights[i] = 0.0;

        let total: f64 = weights.iter().sum();
        let mut cumulative = Vec::with_capacity(workers + 1);
        cumulative.push(0i64);
        let mut acc = 0.0;
        for (j, &w) in weights.iter().enumerate() {
            let share = if total > 0.0 {
                w / total
            } else if workers > 1 {
                // No reachable victim carries any weight (a fully isolated
                // row); degrade to uniform over everyone but self rather
                // than leaving the row un-stealable.
                if j == i { 0.0 } else { 1.0 / (workers - 1) as f64 }
            } else {
                0.0
            };
            acc += share;
            cumulative.push((acc * SCALE).floor() as i64);
        }
        *cumulative.last_mut().expect("cumulative row is non-empty") = 1i64 << 31;
        rows.push(cumulative);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_socket_and_core_weights() {
        let table = ProbTable::build(&TopologySource::Descriptor("2,1.0x4,5.0".to_owned()), 8).unwrap();
        let row0 = table.row(0);
        let expected = 5.0 / (3.0 * 5.0 + 4.0);
        let p1 = (row0[2] - row0[1]) as f64 / SCALE;
        assert!((p1 - expected).abs() < 1e-6, "got {p1}, expected {expected}");
    }

    #[test]
    fn rows_are_normalized_and_monotonic() {
        let table = ProbTable::build(&TopologySource::Descriptor("2,1.0x4,5.0".to_owned()), 8).unwrap();
        for i in 0..8 {
            let row = table.row(i);
            assert_eq!(*row.last().unwrap(), 1i64 << 31);
            assert!(row.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(row[i], row[i + 1], "self-probability must be zero");
        }
    }

    #[test]
    fn binary_search_returns_consistent_victim() {
        let table = ProbTable::build(&TopologySource::Descriptor("2,1.0x4,5.0".to_owned()), 8).unwrap();
        for draw in [0u32, 1, 1 << 20, (1 << 31) - 1] {
            let victim = table.victim(0, draw);
            let row = table.row(0);
            assert!(row[victim] as i64 <= i64::from(draw));
            assert!(i64::from(draw) < row[victim + 1]);
        }
    }

    #[test]
    fn uniform_topology_never_picks_self() {
        let table = ProbTable::build(&TopologySource::Uniform, 4).unwrap();
        for rank in 0..4 {
            for draw in [0u32, 500_000_000, (1 << 31) - 1] {
                assert_ne!(table.victim(rank, draw), rank);
            }
        }
    }

    #[test]
    fn rejects_malformed_descriptor() {
        assert!(ProbTable::build(&TopologySource::Descriptor("2,1.0x".to_owned()), 8).is_err());
        assert!(ProbTable::build(&TopologySource::Descriptor("0,1.0".to_owned()), 4).is_err());
    }
}
