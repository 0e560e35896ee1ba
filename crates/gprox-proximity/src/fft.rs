//! Zero-padded "same" 2-D convolution in the frequency domain.
//!
//! The input and kernel are padded to at least the full linear convolution
//! size, so the circular convolution computed by the DFT equals the linear
//! one and nothing wraps around the edges. The centre crop of that result
//! is the "same"-shaped output.
//!
//! Inputs and kernels are real, so two inputs share one complex transform:
//! the first rides in the real part and the second in the imaginary part,
//! and because the kernel spectrum is that of a real kernel the two results
//! come back in the real and imaginary parts of the inverse.

use crate::{ProximityError, Result};
use ndarray::{Array2, ArrayBase, Data, Ix2};
use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// A kernel prepared for repeated convolution over inputs of one shape.
///
/// The kernel spectrum is computed once in [`FftConvolver::new`], so
/// convolving the numerator and denominator rasters together with
/// [`FftConvolver::convolve_pair`] costs one forward and one inverse
/// transform in total.
pub struct FftConvolver {
    shape: (usize, usize),
    kernel_shape: (usize, usize),
    padded: (usize, usize),
    forward_rows: Arc<dyn Fft<f64>>,
    forward_cols: Arc<dyn Fft<f64>>,
    inverse_rows: Arc<dyn Fft<f64>>,
    inverse_cols: Arc<dyn Fft<f64>>,
    /// Column-major (transposed) spectrum of the padded kernel.
    kernel_spectrum: Vec<Complex<f64>>,
}

impl std::fmt::Debug for FftConvolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftConvolver")
            .field("shape", &self.shape)
            .field("kernel_shape", &self.kernel_shape)
            .field("padded", &self.padded)
            .finish()
    }
}

impl FftConvolver {
    /// Prepare `kernel` for inputs of `shape` (rows, cols).
    pub fn new<S>(kernel: &ArrayBase<S, Ix2>, shape: (usize, usize)) -> Result<Self>
    where
        S: Data<Elem = f64>,
    {
        let kernel_shape = kernel.dim();
        if shape.0 == 0 || shape.1 == 0 || kernel_shape.0 == 0 || kernel_shape.1 == 0 {
            return Err(ProximityError::ShapeMismatch {
                expected: shape,
                actual: kernel_shape,
            });
        }

        let padded = (
            fast_len(shape.0 + kernel_shape.0 - 1),
            fast_len(shape.1 + kernel_shape.1 - 1),
        );

        let mut planner = FftPlanner::new();
        let forward_rows = planner.plan_fft_forward(padded.1);
        let forward_cols = planner.plan_fft_forward(padded.0);
        let inverse_rows = planner.plan_fft_inverse(padded.1);
        let inverse_cols = planner.plan_fft_inverse(padded.0);

        let mut convolver = Self {
            shape,
            kernel_shape,
            padded,
            forward_rows,
            forward_cols,
            inverse_rows,
            inverse_cols,
            kernel_spectrum: Vec::new(),
        };
        convolver.kernel_spectrum = convolver.forward(kernel, None::<&Array2<f64>>);
        Ok(convolver)
    }

    /// Input shape this convolver was prepared for.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Padded transform size.
    pub fn padded_shape(&self) -> (usize, usize) {
        self.padded
    }

    /// Convolve `input` with the kernel, returning an array of the input's shape.
    pub fn convolve<S>(&self, input: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
    where
        S: Data<Elem = f64>,
    {
        self.check_shape(input.dim())?;
        let full = self.apply_kernel(self.forward(input, None::<&Array2<f64>>));
        Ok(self.crop(&full, |z| z.re))
    }

    /// Convolve two inputs of the prepared shape in a single transform pair.
    pub fn convolve_pair<S, T>(
        &self,
        first: &ArrayBase<S, Ix2>,
        second: &ArrayBase<T, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)>
    where
        S: Data<Elem = f64>,
        T: Data<Elem = f64>,
    {
        self.check_shape(first.dim())?;
        self.check_shape(second.dim())?;
        let full = self.apply_kernel(self.forward(first, Some(second)));
        Ok((self.crop(&full, |z| z.re), self.crop(&full, |z| z.im)))
    }

    fn check_shape(&self, actual: (usize, usize)) -> Result<()> {
        if actual == self.shape {
            Ok(())
        } else {
            Err(ProximityError::ShapeMismatch {
                expected: self.shape,
                actual,
            })
        }
    }

    /// Multiply by the kernel spectrum and transform back.
    fn apply_kernel(&self, mut spectrum: Vec<Complex<f64>>) -> Vec<Complex<f64>> {
        spectrum
            .par_iter_mut()
            .zip(self.kernel_spectrum.par_iter())
            .for_each(|(a, k)| *a *= *k);
        self.inverse(spectrum)
    }

    /// Scaled "same" crop of a full inverse transform.
    fn crop(&self, full: &[Complex<f64>], part: impl Fn(&Complex<f64>) -> f64) -> Array2<f64> {
        let (pr, pc) = self.padded;
        let scale = 1.0 / (pr * pc) as f64;

        // kernel centre offset into the full convolution
        let (oy, ox) = (self.kernel_shape.0 / 2, self.kernel_shape.1 / 2);
        Array2::from_shape_fn(self.shape, |(i, j)| part(&full[(i + oy) * pc + j + ox]) * scale)
    }

    /// Zero-pad `real` (plus `imag` in the imaginary part) and return the
    /// 2-D DFT in column-major order.
    fn forward<S, T>(&self, real: &ArrayBase<S, Ix2>, imag: Option<&ArrayBase<T, Ix2>>) -> Vec<Complex<f64>>
    where
        S: Data<Elem = f64>,
        T: Data<Elem = f64>,
    {
        let (pr, pc) = self.padded;
        let mut buffer = vec![Complex::new(0.0, 0.0); pr * pc];
        for ((i, j), &v) in real.indexed_iter() {
            buffer[i * pc + j].re = v;
        }
        if let Some(imag) = imag {
            for ((i, j), &v) in imag.indexed_iter() {
                buffer[i * pc + j].im = v;
            }
        }

        buffer
            .par_chunks_mut(pc)
            .for_each(|row| self.forward_rows.process(row));
        let mut transposed = transpose(&buffer, pr, pc);
        drop(buffer);
        transposed
            .par_chunks_mut(pr)
            .for_each(|col| self.forward_cols.process(col));
        transposed
    }

    /// Inverse of [`FftConvolver::forward`], unnormalised, back in row-major order.
    fn inverse(&self, mut spectrum: Vec<Complex<f64>>) -> Vec<Complex<f64>> {
        let (pr, pc) = self.padded;
        spectrum
            .par_chunks_mut(pr)
            .for_each(|col| self.inverse_cols.process(col));
        let mut buffer = transpose(&spectrum, pc, pr);
        drop(spectrum);
        buffer
            .par_chunks_mut(pc)
            .for_each(|row| self.inverse_rows.process(row));
        buffer
    }
}

/// "Same" convolution of `input` with `kernel` via FFT.
pub fn convolve_fft<S, T>(input: &ArrayBase<S, Ix2>, kernel: &ArrayBase<T, Ix2>) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
    T: Data<Elem = f64>,
{
    FftConvolver::new(kernel, input.dim())?.convolve(input)
}

/// Spatial-domain "same" convolution with zero padding.
///
/// O(N · k²); kept as the reference the FFT path is checked against.
pub fn convolve_direct<S, T>(input: &ArrayBase<S, Ix2>, kernel: &ArrayBase<T, Ix2>) -> Array2<f64>
where
    S: Data<Elem = f64>,
    T: Data<Elem = f64>,
{
    let (rows, cols) = input.dim();
    let (kr, kc) = kernel.dim();
    let (oy, ox) = ((kr / 2) as i64, (kc / 2) as i64);

    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let mut acc = 0.0;
        for ((a, b), &w) in kernel.indexed_iter() {
            if w == 0.0 {
                continue;
            }
            let y = i as i64 + oy - a as i64;
            let x = j as i64 + ox - b as i64;
            if y >= 0 && x >= 0 && (y as usize) < rows && (x as usize) < cols {
                acc += input[[y as usize, x as usize]] * w;
            }
        }
        acc
    })
}

fn transpose(data: &[Complex<f64>], rows: usize, cols: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    out.par_chunks_mut(rows).enumerate().for_each(|(c, column)| {
        for (r, value) in column.iter_mut().enumerate() {
            *value = data[r * cols + c];
        }
    });
    out
}

/// Smallest 5-smooth number (2^a·3^b·5^c) not below `n`.
fn fast_len(n: usize) -> usize {
    let mut candidate = n.max(1);
    loop {
        let mut m = candidate;
        for p in [2, 3, 5] {
            while m % p == 0 {
                m /= p;
            }
        }
        if m == 1 {
            return candidate;
        }
        candidate += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_fast_len() {
        assert_eq!(fast_len(1), 1);
        assert_eq!(fast_len(7), 8);
        assert_eq!(fast_len(11), 12);
        assert_eq!(fast_len(97), 100);
        assert_eq!(fast_len(128), 128);
    }

    #[test]
    fn test_identity_kernel() {
        let input = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let kernel = array![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        let out = convolve_fft(&input, &kernel).unwrap();
        for (a, b) in out.iter().zip(input.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_box_sum_zero_padded() {
        let input = Array2::<f64>::ones((3, 3));
        let kernel = Array2::<f64>::ones((3, 3));
        let out = convolve_fft(&input, &kernel).unwrap();
        // corners see 4 cells, edges 6, centre 9
        assert_abs_diff_eq!(out[[0, 0]], 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[[0, 1]], 6.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[[1, 1]], 9.0, epsilon = 1e-9);
    }

    #[test]
    fn test_asymmetric_kernel_orientation() {
        // a single impulse reproduces the kernel around it, unflipped
        let mut input = Array2::<f64>::zeros((5, 5));
        input[[2, 2]] = 1.0;
        let kernel = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];

        let fft = convolve_fft(&input, &kernel).unwrap();
        let direct = convolve_direct(&input, &kernel);
        assert_abs_diff_eq!(direct[[1, 1]], 1.0);
        assert_abs_diff_eq!(direct[[3, 3]], 9.0);
        for (a, b) in fft.iter().zip(direct.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_kernel_larger_than_input() {
        let input = array![[1.0, 0.0], [0.0, 1.0]];
        let kernel = Array2::<f64>::ones((7, 7));
        let fft = convolve_fft(&input, &kernel).unwrap();
        let direct = convolve_direct(&input, &kernel);
        for (a, b) in fft.iter().zip(direct.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        assert_abs_diff_eq!(fft[[0, 0]], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pair_matches_separate_convolutions() {
        let a = Array2::from_shape_fn((9, 7), |(i, j)| ((i * 7 + j) % 5) as f64);
        let b = Array2::from_shape_fn((9, 7), |(i, j)| if (i + j) % 3 == 0 { 1.0 } else { 0.0 });
        let kernel = array![[0.0, 1.0, 0.0], [1.0, 2.0, 1.0], [0.0, 1.0, 3.0]];
        let convolver = FftConvolver::new(&kernel, (9, 7)).unwrap();

        let (pa, pb) = convolver.convolve_pair(&a, &b).unwrap();
        let (da, db) = (convolve_direct(&a, &kernel), convolve_direct(&b, &kernel));
        for (x, y) in pa.iter().zip(da.iter()).chain(pb.iter().zip(db.iter())) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-9);
        }
        assert!(convolver.convolve_pair(&a, &Array2::<f64>::zeros((9, 8))).is_err());
    }

    #[test]
    fn test_transpose() {
        let data: Vec<Complex<f64>> = (0..6).map(|v| Complex::new(v as f64, 0.0)).collect();
        let out: Vec<f64> = transpose(&data, 2, 3).iter().map(|z| z.re).collect();
        assert_eq!(out, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_shape_mismatch() {
        let kernel = Array2::<f64>::ones((3, 3));
        let convolver = FftConvolver::new(&kernel, (4, 4)).unwrap();
        let wrong = Array2::<f64>::zeros((4, 5));
        assert_eq!(
            convolver.convolve(&wrong).unwrap_err(),
            ProximityError::ShapeMismatch {
                expected: (4, 4),
                actual: (4, 5)
            }
        );
        assert!(FftConvolver::new(&kernel, (0, 4)).is_err());
    }
}
