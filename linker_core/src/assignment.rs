//! Sparse linear assignment: cost matrix, solver contract, and the default
//! Hungarian solver.
//!
//! # Algorithm pipeline (default solver)
//! 1. Validate the sparse matrix (indices, finite non-negative costs).
//! 2. Partition rows and columns into **connected components** using
//!    union-find over the matrix entries. Components are independent: they
//!    are solved in parallel.
//! 3. For each component of `r` rows and `c` columns build the square
//!    `(r + c) × (r + c)` linking matrix:
//!
//!    ```text
//!    | costs (r×c)        | row alternatives (r×r, diagonal) |
//!    | col alternatives   | transposed links at min cost     |
//!    |  (c×c, diagonal)   |  (c×r)                           |
//!    ```
//!
//!    Every row can fall back to its alternative cost, every column to its
//!    own, so a finite perfect matching always exists. Forbidden cells hold a
//!    cost larger than any finite matching.
//! 4. Solve with the **Hungarian algorithm** (Kuhn-Munkres, O(n³)) and keep
//!    the pairs that landed in the top-left block.

use crate::error::SolverError;
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Sparse cost matrix
// ---------------------------------------------------------------------------

/// One allowed (row, col) assignment and its cost.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostEntry {
    pub row: usize,
    pub col: usize,
    pub cost: f64,
}

impl CostEntry {
    pub fn new(row: usize, col: usize, cost: f64) -> Self {
        Self { row, col, cost }
    }
}

/// Sparse assignment problem: allowed entries plus one alternative
/// (unassigned) cost per row and per column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseCostMatrix {
    n_rows: usize,
    n_cols: usize,
    /// Sorted by (row, col)
    entries: Vec<CostEntry>,
    row_alternative: Vec<f64>,
    col_alternative: Vec<f64>,
}

impl SparseCostMatrix {
    /// Build a matrix; entries are sorted by (row, col). Consistency is
    /// checked by the solver, not here.
    pub fn new(
        n_rows: usize,
        n_cols: usize,
        mut entries: Vec<CostEntry>,
        row_alternative: Vec<f64>,
        col_alternative: Vec<f64>,
    ) -> Self {
        entries.sort_by_key(|e| (e.row, e.col));
        Self {
            n_rows,
            n_cols,
            entries,
            row_alternative,
            col_alternative,
        }
    }

    /// Same alternative cost for every row and column.
    pub fn with_uniform_alternative(
        n_rows: usize,
        n_cols: usize,
        entries: Vec<CostEntry>,
        alternative: f64,
    ) -> Self {
        Self::new(
            n_rows,
            n_cols,
            entries,
            vec![alternative; n_rows],
            vec![alternative; n_cols],
        )
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    pub fn row_alternative(&self) -> &[f64] {
        &self.row_alternative
    }

    pub fn col_alternative(&self) -> &[f64] {
        &self.col_alternative
    }

    /// True when there is nothing to assign.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cost(&self, row: usize, col: usize) -> Option<f64> {
        self.entries
            .binary_search_by_key(&(row, col), |e| (e.row, e.col))
            .ok()
            .map(|i| self.entries[i].cost)
    }

    /// Check everything the solver relies on.
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.row_alternative.len() != self.n_rows {
            return Err(SolverError::invalid(format!(
                "{} row alternative costs for {} rows",
                self.row_alternative.len(),
                self.n_rows
            )));
        }
        if self.col_alternative.len() != self.n_cols {
            return Err(SolverError::invalid(format!(
                "{} column alternative costs for {} columns",
                self.col_alternative.len(),
                self.n_cols
            )));
        }
        let bad_alt = self
            .row_alternative
            .iter()
            .chain(&self.col_alternative)
            .find(|c| !c.is_finite() || **c < 0.0);
        if let Some(c) = bad_alt {
            return Err(SolverError::invalid(format!(
                "alternative cost {c} is not a finite non-negative number"
            )));
        }
        for pair in self.entries.windows(2) {
            if (pair[0].row, pair[0].col) == (pair[1].row, pair[1].col) {
                return Err(SolverError::invalid(format!(
                    "duplicate entry ({}, {})",
                    pair[0].row, pair[0].col
                )));
            }
        }
        for e in &self.entries {
            if e.row >= self.n_rows || e.col >= self.n_cols {
                return Err(SolverError::invalid(format!(
                    "entry ({}, {}) outside a {}×{} matrix",
                    e.row, e.col, self.n_rows, self.n_cols
                )));
            }
            if !e.cost.is_finite() || e.cost < 0.0 {
                return Err(SolverError::invalid(format!(
                    "entry ({}, {}) has cost {}",
                    e.row, e.col, e.cost
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Solver contract
// ---------------------------------------------------------------------------

/// Assignment result: (row, col) matched pairs, in ascending order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignment {
    pub pairs: Vec<(usize, usize)>,
    /// Rows left to their alternative cost
    pub unassigned_rows: Vec<usize>,
    /// Columns left to their alternative cost
    pub unassigned_cols: Vec<usize>,
}

/// Solves a [`SparseCostMatrix`]. Implementations must be usable from
/// several worker threads at once.
pub trait AssignmentSolver: Send + Sync {
    fn solve(&self, matrix: &SparseCostMatrix) -> Result<Assignment, SolverError>;
}

/// Default solver: union-find partitioning + Hungarian per component.
#[derive(Clone, Copy, Debug, Default)]
pub struct HungarianSolver;

impl AssignmentSolver for HungarianSolver {
    fn solve(&self, matrix: &SparseCostMatrix) -> Result<Assignment, SolverError> {
        matrix.validate()?;

        let components = partition_components(matrix);
        let solved: Vec<Vec<(usize, usize)>> = components
            .par_iter()
            .map(|comp| solve_component(comp, matrix))
            .collect::<Result<_, _>>()?;

        let mut pairs: Vec<(usize, usize)> = solved.into_iter().flatten().collect();
        pairs.sort_unstable();

        let assigned_rows: BTreeSet<usize> = pairs.iter().map(|&(r, _)| r).collect();
        let assigned_cols: BTreeSet<usize> = pairs.iter().map(|&(_, c)| c).collect();
        Ok(Assignment {
            unassigned_rows: (0..matrix.n_rows)
                .filter(|r| !assigned_rows.contains(r))
                .collect(),
            unassigned_cols: (0..matrix.n_cols)
                .filter(|c| !assigned_cols.contains(c))
                .collect(),
            pairs,
        })
    }
}

// ---------------------------------------------------------------------------
// Row/column connectivity
// ---------------------------------------------------------------------------

/// Disjoint sets over the row and column nodes of a sparse matrix. Two nodes
/// share a set when a chain of entries connects them.
struct NodeSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl NodeSets {
    fn new(nodes: usize) -> Self {
        Self {
            parent: (0..nodes).collect(),
            size: vec![1; nodes],
        }
    }

    fn root(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // point the whole walked path at the root
        let mut current = node;
        while self.parent[current] != root {
            let up = self.parent[current];
            self.parent[current] = root;
            current = up;
        }
        root
    }

    /// Merge the sets of `a` and `b`, hanging the smaller under the larger.
    fn join(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// A connected block of the sparse matrix.
#[derive(Clone, Debug)]
pub struct Component {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub entries: Vec<CostEntry>,
}

/// Partition the matrix into connected components, ordered by their first row.
///
/// Rows and columns are nodes of one combined graph:
/// - row i → node i
/// - col j → node n_rows + j
///
/// Rows and columns without any entry belong to no component: they are
/// trivially left to their alternative cost.
pub fn partition_components(matrix: &SparseCostMatrix) -> Vec<Component> {
    let mut sets = NodeSets::new(matrix.n_rows + matrix.n_cols);
    for e in &matrix.entries {
        sets.join(e.row, matrix.n_rows + e.col);
    }

    let mut by_root: BTreeMap<usize, Component> = BTreeMap::new();
    for e in &matrix.entries {
        let root = sets.root(e.row);
        by_root
            .entry(root)
            .or_insert_with(|| Component {
                rows: Vec::new(),
                cols: Vec::new(),
                entries: Vec::new(),
            })
            .entries
            .push(*e);
    }

    let mut components: Vec<Component> = by_root
        .into_values()
        .map(|mut comp| {
            comp.rows = comp.entries.iter().map(|e| e.row).collect();
            comp.rows.sort_unstable();
            comp.rows.dedup();
            comp.cols = comp.entries.iter().map(|e| e.col).collect();
            comp.cols.sort_unstable();
            comp.cols.dedup();
            comp
        })
        .collect();
    components.sort_by_key(|c| c.rows.first().copied());
    components
}

/// Solve one component; returns global (row, col) pairs.
fn solve_component(
    comp: &Component,
    matrix: &SparseCostMatrix,
) -> Result<Vec<(usize, usize)>, SolverError> {
    let r = comp.rows.len();
    let c = comp.cols.len();
    let n = r + c;

    let row_local: BTreeMap<usize, usize> =
        comp.rows.iter().enumerate().map(|(i, &g)| (g, i)).collect();
    let col_local: BTreeMap<usize, usize> =
        comp.cols.iter().enumerate().map(|(j, &g)| (g, j)).collect();

    let min_cost = comp
        .entries
        .iter()
        .map(|e| e.cost)
        .fold(f64::INFINITY, f64::min);
    let max_cost = comp
        .entries
        .iter()
        .map(|e| e.cost)
        .chain(comp.rows.iter().map(|&g| matrix.row_alternative[g]))
        .chain(comp.cols.iter().map(|&g| matrix.col_alternative[g]))
        .fold(0.0f64, f64::max);
    // strictly worse than any matching made of finite cells
    let blocked = (max_cost + 1.0) * (n as f64 + 1.0);
    if !blocked.is_finite() {
        return Err(SolverError::failed(format!(
            "costs too large to solve a {n}×{n} block (max cost {max_cost})"
        )));
    }

    let mut cost = DMatrix::from_element(n, n, blocked);
    for e in &comp.entries {
        let i = row_local[&e.row];
        let j = col_local[&e.col];
        cost[(i, j)] = e.cost;
        cost[(r + j, c + i)] = min_cost;
    }
    for (i, &g) in comp.rows.iter().enumerate() {
        cost[(i, c + i)] = matrix.row_alternative[g];
    }
    for (j, &g) in comp.cols.iter().enumerate() {
        cost[(r + j, j)] = matrix.col_alternative[g];
    }

    let row_assign = solve_block(&cost);

    let mut pairs = Vec::new();
    for (i, &j) in row_assign.iter().enumerate().take(r) {
        if j < c {
            if cost[(i, j)] >= blocked {
                return Err(SolverError::failed(format!(
                    "no feasible assignment for row {}",
                    comp.rows[i]
                )));
            }
            pairs.push((comp.rows[i], comp.cols[j]));
        }
    }
    Ok(pairs)
}

// ---------------------------------------------------------------------------
// Dense block solver
// ---------------------------------------------------------------------------

/// Minimum-cost perfect matching of a square block (Kuhn-Munkres with row and
/// column potentials, O(n³)). Returns the column matched to each row.
///
/// Rows are added one at a time; each addition grows a shortest augmenting
/// path over reduced costs. Column slot 0 is a virtual column that roots every
/// search, so real rows and columns are 1-based inside the loop.
fn solve_block(block: &DMatrix<f64>) -> Vec<usize> {
    let n = block.nrows();
    let mut row_potential = vec![0.0f64; n + 1];
    let mut col_potential = vec![0.0f64; n + 1];
    // row owning each column slot, 0 when the column is free
    let mut owner = vec![0usize; n + 1];
    // column visited just before each column on the current search tree
    let mut came_from = vec![0usize; n + 1];

    for row in 1..=n {
        owner[0] = row;
        let mut col = 0usize;
        let mut slack = vec![f64::INFINITY; n + 1];
        let mut visited = vec![false; n + 1];

        // grow the search tree until it reaches a free column
        loop {
            visited[col] = true;
            let from_row = owner[col];
            let mut delta = f64::INFINITY;
            let mut closest = 0;
            for j in 1..=n {
                if visited[j] {
                    continue;
                }
                let reduced =
                    block[(from_row - 1, j - 1)] - row_potential[from_row] - col_potential[j];
                if reduced < slack[j] {
                    slack[j] = reduced;
                    came_from[j] = col;
                }
                if slack[j] < delta {
                    delta = slack[j];
                    closest = j;
                }
            }
            for j in 0..=n {
                if visited[j] {
                    row_potential[owner[j]] += delta;
                    col_potential[j] -= delta;
                } else {
                    slack[j] -= delta;
                }
            }
            col = closest;
            if owner[col] == 0 {
                break;
            }
        }

        // flip the matching along the path back to the virtual column
        while col != 0 {
            let prev = came_from[col];
            owner[col] = owner[prev];
            col = prev;
        }
    }

    let mut matched = vec![0usize; n];
    for (j, &row) in owner.iter().enumerate().skip(1) {
        if row != 0 {
            matched[row - 1] = j - 1;
        }
    }
    matched
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
