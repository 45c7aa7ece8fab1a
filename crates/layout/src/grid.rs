use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Shape of a placement grid.
///
/// Rows run along +Y and columns along +X; every placement shares the same
/// Z (`base_depth`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub rows: u32,
    pub columns: u32,
    pub spacing: f32,
    pub base_depth: f32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: 6,
            columns: 15,
            spacing: 1.5,
            base_depth: -5.0,
        }
    }
}

impl GridSpec {
    pub fn new(rows: u32, columns: u32, spacing: f32, base_depth: f32) -> Self {
        Self {
            rows,
            columns,
            spacing,
            base_depth,
        }
    }

    /// Number of placements this spec produces.
    pub fn len(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Horizontal shift that centers the columns on x = 0.
    pub fn offset_x(&self) -> f32 {
        (self.columns.saturating_sub(1)) as f32 * self.spacing / 2.0
    }

    /// Vertical shift that centers the rows on y = 0.
    pub fn offset_y(&self) -> f32 {
        (self.rows.saturating_sub(1)) as f32 * self.spacing / 2.0
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.rows == 0 {
            return Err(LayoutError::InvalidSpec("rows must be positive".into()));
        }
        if self.columns == 0 {
            return Err(LayoutError::InvalidSpec("columns must be positive".into()));
        }
        if !self.spacing.is_finite() || self.spacing <= 0.0 {
            return Err(LayoutError::InvalidSpec(format!(
                "spacing must be a positive finite number, got {}",
                self.spacing
            )));
        }
        if !self.base_depth.is_finite() {
            return Err(LayoutError::InvalidSpec("base_depth must be finite".into()));
        }
        Ok(())
    }

    /// Position of a single cell. Does not check bounds.
    pub fn position_of(&self, row: u32, column: u32) -> Vec3 {
        Vec3::new(
            column as f32 * self.spacing - self.offset_x(),
            row as f32 * self.spacing - self.offset_y(),
            self.base_depth,
        )
    }
}

/// One grid cell and its world-space position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub row: u32,
    pub column: u32,
    pub position: Vec3,
}

/// Errors from grid layout.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("invalid grid spec: {0}")]
    InvalidSpec(String),
}

/// Compute every placement of `spec`, ordered by (row, column) ascending.
pub fn compute_grid(spec: &GridSpec) -> Result<Vec<Placement>, LayoutError> {
    spec.validate()?;

    let mut placements = Vec::with_capacity(spec.len());
    for row in 0..spec.rows {
        for column in 0..spec.columns {
            placements.push(Placement {
                row,
                column,
                position: spec.position_of(row, column),
            });
        }
    }

    tracing::debug!(
        rows = spec.rows,
        columns = spec.columns,
        spacing = spec.spacing,
        count = placements.len(),
        "computed grid layout"
    );
    Ok(placements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn centroid(placements: &[Placement]) -> (f32, f32) {
        let n = placements.len() as f32;
        let sx: f32 = placements.iter().map(|p| p.position.x).sum();
        let sy: f32 = placements.iter().map(|p| p.position.y).sum();
        (sx / n, sy / n)
    }

    #[test]
    fn six_by_fifteen_offsets_and_corners() {
        let spec = GridSpec::new(6, 15, 1.5, -5.0);
        assert_eq!(spec.offset_x(), 10.5);
        assert_eq!(spec.offset_y(), 3.75);

        let grid = compute_grid(&spec).unwrap();
        assert_eq!(grid.len(), 90);

        let first = grid.first().unwrap();
        assert_eq!((first.row, first.column), (0, 0));
        assert_eq!(first.position, Vec3::new(-10.5, -3.75, -5.0));

        let last = grid.last().unwrap();
        assert_eq!((last.row, last.column), (5, 14));
        assert_eq!(last.position, Vec3::new(10.5, 3.75, -5.0));
    }

    #[test]
    fn count_uniqueness_and_centroid() {
        for (rows, columns, spacing) in [(1, 1, 1.0), (2, 3, 0.5), (7, 4, 2.25), (6, 15, 1.5)] {
            let spec = GridSpec::new(rows, columns, spacing, 0.0);
            let grid = compute_grid(&spec).unwrap();
            assert_eq!(grid.len(), (rows * columns) as usize);

            let cells: HashSet<(u32, u32)> = grid.iter().map(|p| (p.row, p.column)).collect();
            assert_eq!(cells.len(), grid.len());

            let (cx, cy) = centroid(&grid);
            assert!(cx.abs() < 1e-4, "cx={cx} for {rows}x{columns}");
            assert!(cy.abs() < 1e-4, "cy={cy} for {rows}x{columns}");
        }
    }

    #[test]
    fn ordered_row_major() {
        let grid = compute_grid(&GridSpec::new(3, 4, 1.0, 0.0)).unwrap();
        let order: Vec<(u32, u32)> = grid.iter().map(|p| (p.row, p.column)).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
        assert_eq!(order[4], (1, 0));
    }

    #[test]
    fn base_depth_applies_to_every_placement() {
        let grid = compute_grid(&GridSpec::new(2, 2, 1.0, -7.5)).unwrap();
        assert!(grid.iter().all(|p| p.position.z == -7.5));
    }

    #[test]
    fn deterministic() {
        let spec = GridSpec::default();
        assert_eq!(compute_grid(&spec).unwrap(), compute_grid(&spec).unwrap());
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert!(matches!(
            compute_grid(&GridSpec::new(0, 3, 1.0, 0.0)),
            Err(LayoutError::InvalidSpec(_))
        ));
        assert!(matches!(
            compute_grid(&GridSpec::new(3, 0, 1.0, 0.0)),
            Err(LayoutError::InvalidSpec(_))
        ));
    }

    #[test]
    fn rejects_bad_spacing() {
        assert!(compute_grid(&GridSpec::new(2, 2, 0.0, 0.0)).is_err());
        assert!(compute_grid(&GridSpec::new(2, 2, -1.0, 0.0)).is_err());
        assert!(compute_grid(&GridSpec::new(2, 2, f32::NAN, 0.0)).is_err());
    }
}
