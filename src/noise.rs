//! Deterministic noise for turbulence.
//!
//! Everything here is a pure function of its inputs: the same position and
//! phase always produce the same value on every platform, which keeps cached
//! and live frames in agreement.
//!
//! # Functions
//!
//! - [`hash`] / [`hash3`] - integer avalanche hashes
//! - [`noise3`] - 3D gradient noise in roughly [-1, 1]
//! - [`vector_noise`] - three decorrelated `noise3` channels
//! - [`octave_noise`] - base octave plus `level` extra octaves weighted by `ratio^k`

use glam::Vec3;

/// Offsets used to decorrelate the three channels of [`vector_noise`].
const CHANNEL_OFFSETS: [Vec3; 3] = [
    Vec3::new(0.0, 0.0, 0.0),
    Vec3::new(100.0, 0.0, 0.0),
    Vec3::new(0.0, 100.0, 0.0),
];

/// Twelve cube-edge gradients.
const GRADIENTS: [Vec3; 12] = [
    Vec3::new(1.0, 1.0, 0.0),
    Vec3::new(-1.0, 1.0, 0.0),
    Vec3::new(1.0, -1.0, 0.0),
    Vec3::new(-1.0, -1.0, 0.0),
    Vec3::new(1.0, 0.0, 1.0),
    Vec3::new(-1.0, 0.0, 1.0),
    Vec3::new(1.0, 0.0, -1.0),
    Vec3::new(-1.0, 0.0, -1.0),
    Vec3::new(0.0, 1.0, 1.0),
    Vec3::new(0.0, -1.0, 1.0),
    Vec3::new(0.0, 1.0, -1.0),
    Vec3::new(0.0, -1.0, -1.0),
];

/// Integer avalanche hash.
#[inline]
pub fn hash(n: u32) -> u32 {
    let mut x = n;
    x ^= x >> 17;
    x = x.wrapping_mul(0xed5a_d4bb);
    x ^= x >> 11;
    x = x.wrapping_mul(0xac4c_1b51);
    x ^= x >> 15;
    x = x.wrapping_mul(0x3184_8bab);
    x ^= x >> 14;
    x
}

/// Hash of a lattice cell.
#[inline]
pub fn hash3(x: i32, y: i32, z: i32) -> u32 {
    hash((x as u32).wrapping_add(hash((y as u32).wrapping_add(hash(z as u32)))))
}

#[inline]
fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
fn corner(cell: (i32, i32, i32), offset: Vec3) -> f32 {
    let g = GRADIENTS[(hash3(cell.0, cell.1, cell.2) % 12) as usize];
    g.dot(offset)
}

/// 3D gradient noise. Zero at lattice points, roughly within [-1, 1].
pub fn noise3(p: Vec3) -> f32 {
    if !p.is_finite() {
        return 0.0;
    }
    let cell = p.floor();
    let (ix, iy, iz) = (cell.x as i32, cell.y as i32, cell.z as i32);
    let f = p - cell;
    let (u, v, w) = (fade(f.x), fade(f.y), fade(f.z));

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;

    let c000 = corner((ix, iy, iz), f);
    let c100 = corner((ix + 1, iy, iz), f - Vec3::X);
    let c010 = corner((ix, iy + 1, iz), f - Vec3::Y);
    let c110 = corner((ix + 1, iy + 1, iz), f - Vec3::new(1.0, 1.0, 0.0));
    let c001 = corner((ix, iy, iz + 1), f - Vec3::Z);
    let c101 = corner((ix + 1, iy, iz + 1), f - Vec3::new(1.0, 0.0, 1.0));
    let c011 = corner((ix, iy + 1, iz + 1), f - Vec3::new(0.0, 1.0, 1.0));
    let c111 = corner((ix + 1, iy + 1, iz + 1), f - Vec3::ONE);

    let x00 = lerp(c000, c100, u);
    let x10 = lerp(c010, c110, u);
    let x01 = lerp(c001, c101, u);
    let x11 = lerp(c011, c111, u);
    let y0 = lerp(x00, x10, v);
    let y1 = lerp(x01, x11, v);
    lerp(y0, y1, w)
}

/// Three decorrelated noise channels sampled at `p`.
pub fn vector_noise(p: Vec3) -> Vec3 {
    Vec3::new(
        noise3(p + CHANNEL_OFFSETS[0]),
        noise3(p + CHANNEL_OFFSETS[1]),
        noise3(p + CHANNEL_OFFSETS[2]),
    )
}

/// Octave-summed vector noise.
///
/// Octave `k` samples at frequency `2^k` with weight `ratio^k`. The sum is
/// normalised by the total weight so raising `level` adds detail without
/// raising the overall amplitude.
pub fn octave_noise(p: Vec3, level: u32, ratio: f32) -> Vec3 {
    let mut sum = vector_noise(p);
    let mut total = 1.0;
    let mut weight = 1.0;
    let mut frequency = 1.0;
    for _ in 0..level {
        weight *= ratio;
        frequency *= 2.0;
        sum += vector_noise(p * frequency) * weight;
        total += weight;
    }
    if total > 0.0 {
        sum / total
    } else {
        sum
    }
}
