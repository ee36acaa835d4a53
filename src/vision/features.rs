//! Good-features-to-track corner selection.

use crate::filter::{box_sum_plane, sobel_3x3};

/// Sub-pixel image location.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CornerParams {
    pub max_corners: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    pub block_size: u32,
    pub use_harris: bool,
    pub k: f32,
}

/// Strongest corners of `plane`, strongest first.
///
/// Response is the smaller eigenvalue of the local structure tensor (or the Harris
/// measure). Candidates below `quality_level * best` or not a 3x3 local maximum are
/// discarded, then accepted greedily while keeping `min_distance` between corners.
pub(crate) fn detect_corners(plane: &[f32], width: usize, height: usize, params: &CornerParams) -> Vec<Point2> {
    if width < 3 || height < 3 || params.max_corners == 0 {
        return Vec::new();
    }
    let response = corner_response(plane, width, height, params);
    let best = response.iter().copied().fold(0.0f32, f32::max);
    if best <= 0.0 {
        return Vec::new();
    }
    let threshold = best * params.quality_level;

    let mut candidates = Vec::new();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let r = response[y * width + x];
            if r <= threshold {
                continue;
            }
            let is_peak = (y - 1..=y + 1)
                .flat_map(|ny| (x - 1..=x + 1).map(move |nx| (nx, ny)))
                .all(|(nx, ny)| response[ny * width + nx] <= r);
            if is_peak {
                candidates.push((r, x, y));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut grid = SpacingGrid::new(width, height, params.min_distance);
    let mut corners = Vec::new();
    for (_, x, y) in candidates {
        let p = Point2::new(x as f32, y as f32);
        if grid.try_insert(p) {
            corners.push(p);
            if corners.len() >= params.max_corners {
                break;
            }
        }
    }
    corners
}

fn corner_response(plane: &[f32], width: usize, height: usize, params: &CornerParams) -> Vec<f32> {
    let (dx, dy) = sobel_3x3(plane, width, height);
    let xx: Vec<f32> = dx.iter().map(|v| v * v).collect();
    let xy: Vec<f32> = dx.iter().zip(&dy).map(|(a, b)| a * b).collect();
    let yy: Vec<f32> = dy.iter().map(|v| v * v).collect();
    let sxx = box_sum_plane(&xx, width, height, params.block_size);
    let sxy = box_sum_plane(&xy, width, height, params.block_size);
    let syy = box_sum_plane(&yy, width, height, params.block_size);

    sxx.iter()
        .zip(&sxy)
        .zip(&syy)
        .map(|((&a, &b), &c)| {
            if params.use_harris {
                let det = a * c - b * b;
                let trace = a + c;
                det - params.k * trace * trace
            } else {
                let half_trace = (a + c) * 0.5;
                let disc = ((a - c) * 0.5).powi(2) + b * b;
                half_trace - disc.sqrt()
            }
        })
        .collect()
}

/// Bucketed acceptance test for the minimum corner spacing.
struct SpacingGrid {
    cell: f32,
    cols: usize,
    rows: usize,
    buckets: Vec<Vec<Point2>>,
    min_distance: f32,
}

impl SpacingGrid {
    fn new(width: usize, height: usize, min_distance: f32) -> Self {
        let cell = min_distance.max(1.0);
        let cols = (width as f32 / cell).ceil() as usize + 1;
        let rows = (height as f32 / cell).ceil() as usize + 1;
        Self {
            cell,
            cols,
            rows,
            buckets: vec![Vec::new(); cols * rows],
            min_distance,
        }
    }

    fn try_insert(&mut self, p: Point2) -> bool {
        let cx = (p.x / self.cell) as usize;
        let cy = (p.y / self.cell) as usize;
        if self.min_distance > 0.0 {
            for ny in cy.saturating_sub(1)..=(cy + 1).min(self.rows - 1) {
                for nx in cx.saturating_sub(1)..=(cx + 1).min(self.cols - 1) {
                    if self.buckets[ny * self.cols + nx]
                        .iter()
                        .any(|q| q.distance(p) < self.min_distance)
                    {
                        return false;
                    }
                }
            }
        }
        self.buckets[cy * self.cols + cx].push(p);
        true
    }
}
