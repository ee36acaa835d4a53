//! Pyramidal Lucas-Kanade point tracking.

use crate::filter::{pyr_down, sample_bilinear, scharr_3x3};
use crate::vision::features::Point2;

#[derive(Clone, Copy, Debug)]
pub(crate) struct LkParams {
    pub win_size: u32,
    pub max_level: u32,
    pub max_iterations: u32,
    pub epsilon: f32,
    pub min_eig_threshold: f32,
}

struct Level {
    plane: Vec<f32>,
    width: usize,
    height: usize,
}

/// Image pyramid, finest level first. Levels stop once a side would drop below 8 px.
pub(crate) struct Pyramid {
    levels: Vec<Level>,
}

impl Pyramid {
    pub(crate) fn build(plane: Vec<f32>, width: usize, height: usize, max_level: u32) -> Self {
        let mut levels = vec![Level {
            plane,
            width,
            height,
        }];
        for _ in 0..max_level {
            let Some(last) = levels.last() else { break };
            if last.width < 16 || last.height < 16 {
                break;
            }
            let (plane, width, height) = pyr_down(&last.plane, last.width, last.height);
            levels.push(Level {
                plane,
                width,
                height,
            });
        }
        Self { levels }
    }

    fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Result of tracking one point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Tracked {
    pub from: Point2,
    pub to: Point2,
    pub ok: bool,
}

impl Tracked {
    pub fn displacement(&self) -> f32 {
        self.from.distance(self.to)
    }
}

/// Track `points` from `prev` into `next`.
///
/// Both pyramids must be built from same-sized frames. A point fails when its
/// structure tensor is too weak on the finest level or when it leaves the image.
pub(crate) fn track(prev: &Pyramid, next: &Pyramid, points: &[Point2], params: &LkParams) -> Vec<Tracked> {
    let top = prev
        .depth()
        .min(next.depth())
        .min(params.max_level as usize + 1);
    let gradients: Vec<(Vec<f32>, Vec<f32>)> = prev.levels[..top]
        .iter()
        .map(|l| scharr_3x3(&l.plane, l.width, l.height))
        .collect();
    let half = (params.win_size / 2) as i32;

    points
        .iter()
        .map(|&from| {
            let mut guess = (0.0f32, 0.0f32);
            let mut ok = true;
            for level in (0..top).rev() {
                let scale = 1.0 / (1u32 << level) as f32;
                let (dx, dy) = &gradients[level];
                let step = track_level(
                    &prev.levels[level],
                    &next.levels[level],
                    dx,
                    dy,
                    (from.x * scale, from.y * scale),
                    guess,
                    half,
                    params,
                );
                match step {
                    Some(d) => guess = d,
                    None if level == 0 => ok = false,
                    None => {}
                }
                if level > 0 {
                    guess = (guess.0 * 2.0, guess.1 * 2.0);
                }
            }

            let to = Point2::new(from.x + guess.0, from.y + guess.1);
            let base = &prev.levels[0];
            let inside = to.x >= 0.0
                && to.y >= 0.0
                && to.x <= (base.width - 1) as f32
                && to.y <= (base.height - 1) as f32;
            Tracked {
                from,
                to,
                ok: ok && inside && to.x.is_finite() && to.y.is_finite(),
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn track_level(
    prev: &Level,
    next: &Level,
    dx: &[f32],
    dy: &[f32],
    at: (f32, f32),
    guess: (f32, f32),
    half: i32,
    params: &LkParams,
) -> Option<(f32, f32)> {
    let (w, h) = (prev.width, prev.height);
    let mut window = Vec::with_capacity(((2 * half + 1) * (2 * half + 1)) as usize);
    let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);
    for oy in -half..=half {
        for ox in -half..=half {
            let x = at.0 + ox as f32;
            let y = at.1 + oy as f32;
            let ix = sample_bilinear(dx, w, h, x, y);
            let iy = sample_bilinear(dy, w, h, x, y);
            let i = sample_bilinear(&prev.plane, w, h, x, y);
            gxx += ix * ix;
            gxy += ix * iy;
            gyy += iy * iy;
            window.push((ox as f32, oy as f32, i, ix, iy));
        }
    }

    let area = window.len() as f32;
    let det = gxx * gyy - gxy * gxy;
    let min_eig = ((gxx + gyy) - ((gxx - gyy).powi(2) + 4.0 * gxy * gxy).sqrt()) * 0.5;
    if min_eig / area < params.min_eig_threshold || det < f32::EPSILON {
        return None;
    }

    let mut d = guess;
    for _ in 0..params.max_iterations {
        let cx = at.0 + d.0;
        let cy = at.1 + d.1;
        let margin = half as f32;
        if cx < -margin || cy < -margin || cx > w as f32 + margin || cy > h as f32 + margin {
            return None;
        }
        let (mut bx, mut by) = (0.0f32, 0.0f32);
        for &(ox, oy, i, ix, iy) in &window {
            let j = sample_bilinear(&next.plane, next.width, next.height, cx + ox, cy + oy);
            let diff = i - j;
            bx += diff * ix;
            by += diff * iy;
        }
        let delta_x = (gyy * bx - gxy * by) / det;
        let delta_y = (gxx * by - gxy * bx) / det;
        d.0 += delta_x;
        d.1 += delta_y;
        if delta_x * delta_x + delta_y * delta_y < params.epsilon * params.epsilon {
            break;
        }
    }
    Some(d)
}
