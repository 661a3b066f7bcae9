//! 64-bit perceptual hash (pHash) over the low-frequency DCT of a
//! normalized image.
//!
//! The image is resized to 32×32 with bilinear interpolation, reduced to
//! luminance, transformed with a separable 2-D DCT-II, and the top-left
//! 8×8 coefficient block is thresholded against the mean of its 63 AC
//! coefficients. Small Hamming distance between two hashes implies
//! visual similarity; the hash survives re-encoding and rescaling but is
//! not rotation-invariant.

use image::{imageops::FilterType, DynamicImage};

use crate::error::Result;

const SIZE: usize = 32;
const BLOCK: usize = 8;

/// Decode an in-memory image buffer and compute its perceptual hash.
///
/// Returns 16 lowercase hex characters encoding a 64-bit big-endian
/// value; the most significant bit corresponds to the DC coefficient.
pub fn phash(bytes: &[u8]) -> Result<String> {
    let img = image::load_from_memory(bytes)?;
    Ok(phash_image(&img))
}

/// Compute the perceptual hash of an already-decoded image.
pub fn phash_image(img: &DynamicImage) -> String {
    let small = img
        .resize_exact(SIZE as u32, SIZE as u32, FilterType::Triangle)
        .to_luma8();

    let mut matrix = [[0f64; SIZE]; SIZE];
    for (y, row) in matrix.iter_mut().enumerate() {
        for (x, cell) in row.iter_mut().enumerate() {
            *cell = f64::from(small.get_pixel(x as u32, y as u32)[0]);
        }
    }

    let freq = dct_2d(&matrix);

    let mut coefficients = [0f64; BLOCK * BLOCK];
    for y in 0..BLOCK {
        for x in 0..BLOCK {
            coefficients[y * BLOCK + x] = freq[y][x];
        }
    }

    // Threshold against the AC mean; the DC coefficient dominates the
    // average and must stay out of it, but it still emits a bit.
    let ac_mean = coefficients[1..].iter().sum::<f64>() / (BLOCK * BLOCK - 1) as f64;

    let mut bits: u64 = 0;
    for &c in &coefficients {
        bits = (bits << 1) | u64::from(c > ac_mean);
    }
    format!("{bits:016x}")
}

/// Separable 2-D DCT-II: 1-D transform over rows, transpose, rows again,
/// transpose back.
fn dct_2d(input: &[[f64; SIZE]; SIZE]) -> [[f64; SIZE]; SIZE] {
    let mut pass = [[0f64; SIZE]; SIZE];
    for (y, row) in input.iter().enumerate() {
        pass[y] = dct_1d(row);
    }
    let mut transposed = transpose(&pass);
    for row in transposed.iter_mut() {
        *row = dct_1d(row);
    }
    transpose(&transposed)
}

/// Orthonormal 1-D DCT-II of length 32.
fn dct_1d(input: &[f64; SIZE]) -> [f64; SIZE] {
    let n = SIZE as f64;
    let scale = (2.0 / n).sqrt();
    let mut output = [0f64; SIZE];
    for (k, out) in output.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (i, &value) in input.iter().enumerate() {
            let angle = std::f64::consts::PI * (2.0 * i as f64 + 1.0) * k as f64 / (2.0 * n);
            sum += value * angle.cos();
        }
        let c = if k == 0 {
            std::f64::consts::FRAC_1_SQRT_2
        } else {
            1.0
        };
        *out = scale * c * sum;
    }
    output
}

fn transpose(input: &[[f64; SIZE]; SIZE]) -> [[f64; SIZE]; SIZE] {
    let mut out = [[0f64; SIZE]; SIZE];
    for y in 0..SIZE {
        for x in 0..SIZE {
            out[x][y] = input[y][x];
        }
    }
    out
}
