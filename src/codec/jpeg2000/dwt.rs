//! Forward discrete wavelet transforms.
//!
//! Each decomposition level transforms columns then rows of the current
//! low-pass region, leaving low-pass samples in the first half and high-pass
//! samples in the second half of each line. Boundaries use whole-sample
//! symmetric extension.

const ALPHA: f32 = -1.586_134_3;
const BETA: f32 = -0.052_980_118;
const GAMMA: f32 = 0.882_911_1;
const DELTA: f32 = 0.443_506_85;
const K: f32 = 1.230_174_1;

/// Reversible 5/3 transform of a `width` x `height` plane, in place.
pub fn forward_53(plane: &mut [i32], width: usize, height: usize, levels: u8) {
    forward(plane, width, height, levels, lift_53);
}

/// Irreversible 9/7 transform of a `width` x `height` plane, in place.
pub fn forward_97(plane: &mut [f32], width: usize, height: usize, levels: u8) {
    forward(plane, width, height, levels, lift_97);
}

fn forward<T: Copy + Default>(
    plane: &mut [T],
    width: usize,
    height: usize,
    levels: u8,
    lift: fn(&[T], &mut [T]),
) {
    let (mut w, mut h) = (width, height);
    let mut line = vec![T::default(); width.max(height)];
    let mut out = vec![T::default(); width.max(height)];

    for _ in 0..levels {
        for x in 0..w {
            for y in 0..h {
                line[y] = plane[y * width + x];
            }
            lift(&line[..h], &mut out[..h]);
            for y in 0..h {
                plane[y * width + x] = out[y];
            }
        }
        for y in 0..h {
            let row = &mut plane[y * width..y * width + w];
            line[..w].copy_from_slice(row);
            lift(&line[..w], &mut out[..w]);
            row.copy_from_slice(&out[..w]);
        }
        w = w.div_ceil(2);
        h = h.div_ceil(2);
    }
}

/// Split `x` into even (low) and odd (high) samples.
fn deinterleave<T: Copy>(x: &[T], out: &mut [T]) -> usize {
    let low = x.len().div_ceil(2);
    for (i, &v) in x.iter().enumerate() {
        if i % 2 == 0 {
            out[i / 2] = v;
        } else {
            out[low + i / 2] = v;
        }
    }
    low
}

fn lift_53(x: &[i32], out: &mut [i32]) {
    let low = deinterleave(x, out);
    if x.len() < 2 {
        return;
    }
    let (s, d) = out.split_at_mut(low);
    let (sn, dn) = (s.len(), d.len());

    for i in 0..dn {
        d[i] -= (s[i] + s[(i + 1).min(sn - 1)]) >> 1;
    }
    for i in 0..sn {
        let left = d[i.saturating_sub(1).min(dn - 1)];
        let right = d[i.min(dn - 1)];
        s[i] += (left + right + 2) >> 2;
    }
}

fn lift_97(x: &[f32], out: &mut [f32]) {
    let low = deinterleave(x, out);
    if x.len() < 2 {
        return;
    }
    let (s, d) = out.split_at_mut(low);

    predict(s, d, ALPHA);
    update(s, d, BETA);
    predict(s, d, GAMMA);
    update(s, d, DELTA);

    s.iter_mut().for_each(|v| *v /= K);
    d.iter_mut().for_each(|v| *v *= K);
}

fn predict(s: &[f32], d: &mut [f32], weight: f32) {
    let sn = s.len();
    for (i, v) in d.iter_mut().enumerate() {
        *v += weight * (s[i] + s[(i + 1).min(sn - 1)]);
    }
}

fn update(s: &mut [f32], d: &[f32], weight: f32) {
    let dn = d.len();
    for (i, v) in s.iter_mut().enumerate() {
        *v += weight * (d[i.saturating_sub(1).min(dn - 1)] + d[i.min(dn - 1)]);
    }
}
