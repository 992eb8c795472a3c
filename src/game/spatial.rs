//! Static spatial grid for point-contact queries
//!
//! Built once per resolve pass over the bounding box of all entity
//! positions. Each entity registers a visibility circle; the circle is
//! inserted into every cell its bounding square overlaps, so a point query
//! only has to inspect the single cell containing the point and still finds
//! every circle that contains it. The grid is never mutated after build.

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::game::world::EntityId;
use crate::util::vec2::Vec2;

/// Initial capacity for grid cells (number of expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 256;

/// Initial capacity for entry lists within cells
const CELL_INITIAL_CAPACITY: usize = 8;

/// Most cells along either axis; sparse, far-flung snapshots get wider cells
const MAX_GRID_DIMENSION: f32 = 1024.0;

/// Grid cell key - (column, row) relative to the grid origin
pub type CellKey = (i32, i32);

/// One entity registered in the grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridEntry {
    pub id: EntityId,
    pub center: Vec2,
    pub radius: f32,
}

impl GridEntry {
    /// Whether the entry's circle contains `point` (boundary inclusive)
    #[inline]
    pub fn contains(&self, point: Vec2) -> bool {
        self.center.distance_sq_to(point) <= self.radius * self.radius
    }
}

/// Axis-aligned bounds of a set of points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds {
    /// Bounds of all finite points, None if there are none
    pub fn from_points(points: impl IntoIterator<Item = Vec2>) -> Option<Self> {
        let mut bounds: Option<Bounds> = None;
        for point in points.into_iter().filter(Vec2::is_finite) {
            bounds = Some(match bounds {
                None => Bounds { min: point, max: point },
                Some(b) => Bounds {
                    min: b.min.min(point),
                    max: b.max.max(point),
                },
            });
        }
        bounds
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// Fewer than two distinct points contributed to these bounds
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 && self.height() <= 0.0
    }
}

/// Immutable uniform grid over visibility circles
#[derive(Debug, Clone)]
pub struct StaticGrid {
    /// Lower corner of the grid
    origin: Vec2,
    /// Cell size in world units
    cell_size: f32,
    /// Inverse cell size for fast position-to-cell conversion
    inv_cell_size: f32,
    /// Number of columns and rows; cell indices are clamped into this range
    columns: i32,
    rows: i32,
    /// All registered entries
    entries: Vec<GridEntry>,
    /// Map from cell key to indices into `entries`
    cells: HashMap<CellKey, Vec<u32>, FxBuildHasher>,
}

impl StaticGrid {
    /// Build a grid over the given entities
    ///
    /// Returns None when fewer than two distinct finite positions exist or
    /// the cell size is not positive; the caller keeps whatever index it had.
    /// A snapshot that is collinear along one axis still gets a grid one cell
    /// thick in that axis.
    pub fn build(entries: impl IntoIterator<Item = GridEntry>, cell_size: f32) -> Option<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return None;
        }

        let entries: Vec<GridEntry> = entries
            .into_iter()
            .filter(|e| e.center.is_finite() && e.radius.is_finite() && e.radius >= 0.0)
            .collect();

        let bounds = Bounds::from_points(entries.iter().map(|e| e.center))?;
        if bounds.is_degenerate() {
            return None;
        }

        let span = bounds.width().max(bounds.height());
        let cell_size = cell_size.max(span / MAX_GRID_DIMENSION);
        let inv_cell_size = 1.0 / cell_size;
        let columns = ((bounds.width() * inv_cell_size).floor() as i32 + 1).max(1);
        let rows = ((bounds.height() * inv_cell_size).floor() as i32 + 1).max(1);

        let mut grid = Self {
            origin: bounds.min,
            cell_size,
            inv_cell_size,
            columns,
            rows,
            entries: Vec::with_capacity(entries.len()),
            cells: HashMap::with_capacity_and_hasher(GRID_INITIAL_CAPACITY, FxBuildHasher),
        };

        for entry in entries {
            grid.insert(entry);
        }

        Some(grid)
    }

    /// Convert a world position to its clamped cell key
    #[inline]
    fn position_to_cell(&self, position: Vec2) -> CellKey {
        let local = position - self.origin;
        (
            self.clamp_column((local.x * self.inv_cell_size).floor()),
            self.clamp_row((local.y * self.inv_cell_size).floor()),
        )
    }

    #[inline]
    fn clamp_column(&self, column: f32) -> i32 {
        column.clamp(0.0, (self.columns - 1) as f32) as i32
    }

    #[inline]
    fn clamp_row(&self, row: f32) -> i32 {
        row.clamp(0.0, (self.rows - 1) as f32) as i32
    }

    /// Register an entry in every cell its bounding square overlaps
    ///
    /// Clamping is monotone, so a point outside the grid maps to the same
    /// edge cell that any circle covering it was clamped into.
    fn insert(&mut self, entry: GridEntry) {
        let index = self.entries.len() as u32;
        let reach = Vec2::new(entry.radius, entry.radius);
        let (min_col, min_row) = self.position_to_cell(entry.center - reach);
        let (max_col, max_row) = self.position_to_cell(entry.center + reach);

        for column in min_col..=max_col {
            for row in min_row..=max_row {
                self.cells
                    .entry((column, row))
                    .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
                    .push(index);
            }
        }
        self.entries.push(entry);
    }

    /// Entries whose visibility circle contains `point`
    pub fn contact(&self, point: Vec2) -> impl Iterator<Item = &GridEntry> + '_ {
        let cell = if point.is_finite() {
            self.cells.get(&self.position_to_cell(point))
        } else {
            None
        };

        cell.into_iter()
            .flat_map(|indices| indices.iter())
            .map(move |&index| &self.entries[index as usize])
            .filter(move |entry| entry.contains(point))
    }

    /// Ids of entries whose visibility circle contains `point`
    pub fn contact_ids(&self, point: Vec2) -> impl Iterator<Item = EntityId> + '_ {
        self.contact(point).map(|entry| entry.id)
    }

    /// Cell size actually used, at least the requested one
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Grid dimensions in cells (columns, rows)
    pub fn dimensions(&self) -> (i32, i32) {
        (self.columns, self.rows)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> GridStats {
        let non_empty_cells = self.cells.values().filter(|c| !c.is_empty()).count();
        let total_cell_entries: usize = self.cells.values().map(|c| c.len()).sum();
        let max_per_cell = self.cells.values().map(|c| c.len()).max().unwrap_or(0);

        GridStats {
            entities: self.entries.len(),
            non_empty_cells,
            total_cell_entries,
            max_per_cell,
            avg_per_cell: if non_empty_cells > 0 {
                total_cell_entries as f32 / non_empty_cells as f32
            } else {
                0.0
            },
        }
    }
}

/// Statistics about a built grid
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GridStats {
    pub entities: usize,
    pub non_empty_cells: usize,
    /// Sum of per-cell entry counts (an entity spanning k cells counts k times)
    pub total_cell_entries: usize,
    pub max_per_cell: usize,
    pub avg_per_cell: f32,
}
