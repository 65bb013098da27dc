use std::collections::HashMap;

use crate::error::AppError;
use crate::models::contract::GeoPoint;
use crate::models::filter::Viewport;

pub const DEFAULT_CELL_DEGREES: f64 = 0.25;

type Cell = (i32, i32);

/// Grid-bucketed index from contract id to pickup coordinate.
#[derive(Debug, Clone)]
pub struct LocationIndex {
    cell_degrees: f64,
    cells: HashMap<Cell, Vec<i64>>,
    points: HashMap<i64, GeoPoint>,
}

impl Default for LocationIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_DEGREES)
    }
}

impl LocationIndex {
    pub fn new(cell_degrees: f64) -> Self {
        let cell_degrees = if cell_degrees.is_finite() && cell_degrees > 0.0 {
            cell_degrees
        } else {
            DEFAULT_CELL_DEGREES
        };

        Self {
            cell_degrees,
            cells: HashMap::new(),
            points: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.points.clear();
    }

    pub fn insert(&mut self, id: i64, point: GeoPoint) -> Result<(), AppError> {
        if !point.is_valid() {
            return Err(AppError::InvalidLocation(format!(
                "contract {id} has coordinates ({}, {})",
                point.lat, point.lng
            )));
        }

        self.remove(id);
        let cell = self.cell_of(&point);
        self.cells.entry(cell).or_default().push(id);
        self.points.insert(id, point);
        Ok(())
    }

    pub fn remove(&mut self, id: i64) -> Option<GeoPoint> {
        let point = self.points.remove(&id)?;
        let cell = self.cell_of(&point);
        if let Some(ids) = self.cells.get_mut(&cell) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.cells.remove(&cell);
            }
        }
        Some(point)
    }

    /// Ids of all indexed points inside `viewport`, ascending.
    pub fn query(&self, viewport: &Viewport) -> Vec<i64> {
        let rows = self.row(viewport.south)..=self.row(viewport.north);
        let spans = if viewport.crosses_antimeridian() {
            vec![(viewport.west, 180.0), (-180.0, viewport.east)]
        } else {
            vec![(viewport.west, viewport.east)]
        };

        let column_count: i64 = spans
            .iter()
            .map(|(west, east)| i64::from(self.column(*east) - self.column(*west) + 1))
            .sum();
        let cell_count = i64::from(rows.end() - rows.start() + 1) * column_count;

        let mut hits: Vec<i64> = if cell_count > self.cells.len() as i64 {
            // Viewport spans more cells than are occupied; walk the occupied ones.
            self.cells
                .iter()
                .filter(|((row, _), _)| rows.contains(row))
                .flat_map(|(_, ids)| ids.iter().copied())
                .collect()
        } else {
            let mut found = Vec::new();
            for row in rows.clone() {
                for (west, east) in &spans {
                    for column in self.column(*west)..=self.column(*east) {
                        if let Some(ids) = self.cells.get(&(row, column)) {
                            found.extend(ids.iter().copied());
                        }
                    }
                }
            }
            found
        };

        hits.retain(|id| {
            self.points
                .get(id)
                .is_some_and(|point| viewport.contains(point))
        });
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    fn cell_of(&self, point: &GeoPoint) -> Cell {
        (self.row(point.lat), self.column(point.lng))
    }

    fn row(&self, lat: f64) -> i32 {
        (lat / self.cell_degrees).floor() as i32
    }

    fn column(&self, lng: f64) -> i32 {
        (lng / self.cell_degrees).floor() as i32
    }
}
