//! Row-major coordinate grids for store locator sweeps.
//!
//! Points are derived from their row and column index rather than by
//! accumulating steps, so the same index always maps to the same coordinate
//! and a saved coordinate can be located again on the next run.

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinate::{Coordinate, CoordinateError};

// fraction of a step treated as "the same" point
const EPSILON: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
    #[error("region is empty: {axis} min {min} is above max {max}")]
    Empty { axis: &'static str, min: f64, max: f64 },
    #[error("{axis} step must be positive, got {step}")]
    Step { axis: &'static str, step: f64 },
    #[error("steps of {lat} by {lon} degrees give too many points")]
    TooLarge { lat: f64, lon: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Region {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Region {
    /// Mainland Australia and Tasmania.
    pub fn australia() -> Self {
        Self {
            min_lat: -44.0,
            max_lat: -10.0,
            min_lon: 112.0,
            max_lon: 154.0,
        }
    }

    fn validate(&self) -> Result<(), GridError> {
        Coordinate::new(self.min_lat, self.min_lon)?;
        Coordinate::new(self.max_lat, self.max_lon)?;
        if self.min_lat > self.max_lat {
            return Err(GridError::Empty {
                axis: "latitude",
                min: self.min_lat,
                max: self.max_lat,
            });
        }
        if self.min_lon > self.max_lon {
            return Err(GridError::Empty {
                axis: "longitude",
                min: self.min_lon,
                max: self.max_lon,
            });
        }
        Ok(())
    }
}

/// Distance between neighbouring grid points, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub lat: f64,
    pub lon: f64,
}

impl Step {
    pub fn uniform(degrees: f64) -> Self {
        Self {
            lat: degrees,
            lon: degrees,
        }
    }

    fn validate(&self) -> Result<(), GridError> {
        for (axis, step) in [("latitude", self.lat), ("longitude", self.lon)] {
            if !(step.is_finite() && step > 0.0) {
                return Err(GridError::Step { axis, step });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Grid {
    region: Region,
    step: Step,
    rows: usize,
    cols: usize,
}

impl Grid {
    pub fn new(region: Region, step: Step) -> Result<Self, GridError> {
        region.validate()?;
        step.validate()?;

        let too_large = GridError::TooLarge {
            lat: step.lat,
            lon: step.lon,
        };
        let (Some(rows), Some(cols)) = (
            axis_len(region.min_lat, region.max_lat, step.lat),
            axis_len(region.min_lon, region.max_lon, step.lon),
        ) else {
            return Err(too_large);
        };
        if rows.checked_mul(cols).is_none() {
            return Err(too_large);
        }

        Ok(Self {
            rows,
            cols,
            region,
            step,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The point at a row-major index, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<Coordinate> {
        if index >= self.len() {
            return None;
        }
        Coordinate::new(self.lat(index / self.cols), self.lon(index % self.cols)).ok()
    }

    pub fn iter(&self) -> Points<'_> {
        self.iter_from(0)
    }

    pub fn iter_from(&self, index: usize) -> Points<'_> {
        Points {
            grid: self,
            next: index.min(self.len()),
        }
    }

    /// Index of the first point at or after `at` in row-major order: any
    /// later row, or the same row with a longitude at or past `at`.
    ///
    /// Returns [`Grid::len`] when every point comes before `at`.
    pub fn resume_at(&self, at: Coordinate) -> usize {
        self.resume_at_within(at, 0.0)
    }

    /// Index of the point following the one `at` refers to.
    ///
    /// `slack` is how far a saved coordinate may sit from the point it was
    /// taken from, e.g. half a unit when checkpoints are rounded. A
    /// coordinate that doesn't match any point falls back to
    /// [`Grid::resume_at`], which never skips a point after it.
    pub fn resume_after(&self, at: Coordinate, slack: f64) -> usize {
        let index = self.resume_at_within(at, slack);
        match self.get(index) {
            Some(point) if self.same_point(point, at, slack) => index + 1,
            _ => index,
        }
    }

    /// Ground distance between neighbouring points at the region's minimum
    /// corner, in metres, as `(north, east)`.
    pub fn spacing_metres(&self) -> (f64, f64) {
        let origin = Point::new(self.region.min_lon, self.region.min_lat);
        let north = Point::new(self.region.min_lon, self.region.min_lat + self.step.lat);
        let east = Point::new(self.region.min_lon + self.step.lon, self.region.min_lat);
        (
            origin.haversine_distance(&north),
            origin.haversine_distance(&east),
        )
    }

    fn resume_at_within(&self, at: Coordinate, slack: f64) -> usize {
        let lat_tol = self.step.lat * EPSILON + slack;
        let lon_tol = self.step.lon * EPSILON + slack;

        let Some(row) = (0..self.rows).find(|&row| self.lat(row) >= at.lat() - lat_tol) else {
            return self.len();
        };
        if (self.lat(row) - at.lat()).abs() > lat_tol {
            // row strictly after the saved one
            return row * self.cols;
        }

        let col = (0..self.cols)
            .find(|&col| self.lon(col) >= at.lon() - lon_tol)
            .unwrap_or(self.cols);
        row * self.cols + col
    }

    fn same_point(&self, point: Coordinate, at: Coordinate, slack: f64) -> bool {
        (point.lat() - at.lat()).abs() <= self.step.lat * EPSILON + slack
            && (point.lon() - at.lon()).abs() <= self.step.lon * EPSILON + slack
    }

    fn lat(&self, row: usize) -> f64 {
        (self.region.min_lat + row as f64 * self.step.lat).min(self.region.max_lat)
    }

    fn lon(&self, col: usize) -> f64 {
        (self.region.min_lon + col as f64 * self.step.lon).min(self.region.max_lon)
    }
}

/// Points along one axis, or `None` when they can't be counted in a `usize`.
fn axis_len(min: f64, max: f64, step: f64) -> Option<usize> {
    let steps = ((max - min) / step + EPSILON).floor();
    // `as` saturates instead of failing
    if steps >= usize::MAX as f64 {
        return None;
    }
    (steps as usize).checked_add(1)
}

pub struct Points<'a> {
    grid: &'a Grid,
    next: usize,
}

impl Iterator for Points<'_> {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        let point = self.grid.get(self.next)?;
        self.next += 1;
        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Points<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sydney() -> Grid {
        Grid::new(
            Region {
                min_lat: -34.0,
                max_lat: -33.9,
                min_lon: 151.0,
                max_lon: 151.1,
            },
            Step::uniform(0.05),
        )
        .unwrap()
    }

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn rounded(points: impl Iterator<Item = Coordinate>) -> Vec<(i64, i64)> {
        points
            .map(|x| {
                (
                    (x.lat() * 1000.0).round() as i64,
                    (x.lon() * 1000.0).round() as i64,
                )
            })
            .collect()
    }

    #[test]
    fn row_major_order() {
        let grid = sydney();
        assert_eq!(grid.len(), 9);
        assert_eq!(
            rounded(grid.iter()),
            vec![
                (-34000, 151000),
                (-34000, 151050),
                (-34000, 151100),
                (-33950, 151000),
                (-33950, 151050),
                (-33950, 151100),
                (-33900, 151000),
                (-33900, 151050),
                (-33900, 151100),
            ]
        );
    }

    #[test]
    fn points_stay_in_region() {
        let grid = Grid::new(
            Region {
                min_lat: -10.0,
                max_lat: -9.0,
                min_lon: 0.0,
                max_lon: 1.0,
            },
            Step::uniform(0.1),
        )
        .unwrap();
        assert_eq!(grid.len(), 121);
        for p in grid.iter() {
            assert!(p.lat() >= -10.0 && p.lat() <= -9.0);
            assert!(p.lon() >= 0.0 && p.lon() <= 1.0);
        }
    }

    #[test]
    fn uneven_step_stops_before_max() {
        let grid = Grid::new(
            Region {
                min_lat: 0.0,
                max_lat: 1.0,
                min_lon: 0.0,
                max_lon: 0.0,
            },
            Step::uniform(0.3),
        )
        .unwrap();
        // 0.0, 0.3, 0.6, 0.9
        assert_eq!(grid.len(), 4);
    }

    #[test]
    fn single_point_region() {
        let grid = Grid::new(
            Region {
                min_lat: -33.9,
                max_lat: -33.9,
                min_lon: 151.2,
                max_lon: 151.2,
            },
            Step::uniform(1.0),
        )
        .unwrap();
        assert_eq!(grid.iter().collect::<Vec<_>>(), vec![c(-33.9, 151.2)]);
    }

    #[test]
    fn invalid_grids() {
        let region = Region {
            min_lat: -33.0,
            max_lat: -34.0,
            min_lon: 151.0,
            max_lon: 151.1,
        };
        assert!(matches!(
            Grid::new(region, Step::uniform(0.1)),
            Err(GridError::Empty { axis: "latitude", .. })
        ));
        assert!(matches!(
            Grid::new(Region::australia(), Step { lat: 0.1, lon: 0.0 }),
            Err(GridError::Step { axis: "longitude", .. })
        ));
        assert!(matches!(
            Grid::new(Region::australia(), Step::uniform(f64::NAN)),
            Err(GridError::Step { .. })
        ));
        let region = Region {
            max_lat: 95.0,
            ..Region::australia()
        };
        assert!(matches!(
            Grid::new(region, Step::uniform(1.0)),
            Err(GridError::Coordinate(_))
        ));
        assert!(matches!(
            Grid::new(Region::australia(), Step::uniform(1e-9)),
            Err(GridError::TooLarge { .. })
        ));
        assert!(matches!(
            Grid::new(Region::australia(), Step::uniform(1e-300)),
            Err(GridError::TooLarge { .. })
        ));
        assert!(matches!(
            Grid::new(Region::australia(), Step { lat: 1.0, lon: f64::MIN_POSITIVE }),
            Err(GridError::TooLarge { .. })
        ));
    }

    #[test]
    fn resume_at_is_inclusive() {
        let grid = sydney();
        // every grid point resumes at itself
        for (index, point) in grid.iter().enumerate() {
            assert_eq!(grid.resume_at(point), index);
            let rest = rounded(grid.iter_from(grid.resume_at(point)));
            let expected = rounded(grid.iter().filter(|p| {
                p.lat() > point.lat() + 1e-9
                    || ((p.lat() - point.lat()).abs() < 1e-9 && p.lon() >= point.lon() - 1e-9)
            }));
            assert_eq!(rest, expected);
        }
    }

    #[test]
    fn resume_at_between_points() {
        let grid = sydney();
        // mid-row: next longitude on the same row
        assert_eq!(grid.resume_at(c(-33.95, 151.02)), 4);
        // past the last longitude: start of next row
        assert_eq!(grid.resume_at(c(-33.95, 151.2)), 6);
        // between rows: start of the next row
        assert_eq!(grid.resume_at(c(-33.97, 151.07)), 3);
        // before and after the region
        assert_eq!(grid.resume_at(c(-35.0, 151.05)), 0);
        assert_eq!(grid.resume_at(c(-33.0, 151.0)), grid.len());
    }

    #[test]
    fn resume_after_skips_saved_point() {
        let grid = sydney();
        assert_eq!(grid.resume_after(c(-34.0, 151.0), 0.0), 1);
        assert_eq!(grid.resume_after(c(-33.95, 151.0), 0.0), 4);
        // end of row wraps
        assert_eq!(grid.resume_after(c(-34.0, 151.1), 0.0), 3);
        assert_eq!(grid.resume_after(c(-33.9, 151.1), 0.0), grid.len());
        // off-grid coordinates don't skip anything
        assert_eq!(grid.resume_after(c(-33.95, 151.02), 0.0), 4);
    }

    #[test]
    fn resume_after_rounded_checkpoint() {
        let grid = Grid::new(
            Region {
                min_lat: -34.0,
                max_lat: -33.9,
                min_lon: 151.0,
                max_lon: 151.1,
            },
            Step::uniform(0.025),
        )
        .unwrap();
        // the second point, 151.025, rounds to 151.03 (or 151.02 after float error)
        let index = 1;
        assert!((grid.get(index).unwrap().lon() - 151.025).abs() < 1e-9);
        assert_eq!(grid.resume_after(c(-34.0, 151.03), 0.005), index + 1);
        assert_eq!(grid.resume_after(c(-34.0, 151.02), 0.005), index + 1);
        // without slack the rounded value looks off-grid
        assert_eq!(grid.resume_after(c(-34.0, 151.02), 0.0), index);
    }

    #[test]
    fn spacing() {
        let grid = Grid::new(
            Region {
                min_lat: 0.0,
                max_lat: 10.0,
                min_lon: 0.0,
                max_lon: 10.0,
            },
            Step::uniform(1.0),
        )
        .unwrap();
        let (north, east) = grid.spacing_metres();
        assert!((north - 111_195.0).abs() < 100.0, "{north}");
        assert!((east - north).abs() < 1.0);

        // east-west spacing shrinks away from the equator
        let (north, east) = sydney().spacing_metres();
        assert!(east < north);
    }

    #[test]
    fn iter_from_past_end() {
        let grid = sydney();
        assert_eq!(grid.iter_from(100).count(), 0);
        assert_eq!(grid.iter_from(7).len(), 2);
    }
}
