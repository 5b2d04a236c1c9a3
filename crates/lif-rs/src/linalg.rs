//! Complex linear algebra on population-sized matrices.
//!
//! Arrays live in `ndarray`; decompositions go through `nalgebra`.

use meanfield_core::{Complex, KernelError};
use nalgebra::{DMatrix, DVector, Schur};
use ndarray::{Array1, Array2};

const SCHUR_MAX_ITERATIONS: usize = 10_000;
const INVERSE_ITERATION_STEPS: usize = 3;

pub fn to_nalgebra(a: &Array2<Complex>) -> DMatrix<Complex> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub fn from_nalgebra(m: &DMatrix<Complex>) -> Array2<Complex> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

pub fn inverse(a: &Array2<Complex>, what: &str) -> Result<Array2<Complex>, KernelError> {
    to_nalgebra(a)
        .try_inverse()
        .map(|inv| from_nalgebra(&inv))
        .ok_or_else(|| KernelError::SingularMatrix(what.to_string()))
}

pub fn identity(n: usize) -> Array2<Complex> {
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            Complex::new(1.0, 0.0)
        } else {
            Complex::new(0.0, 0.0)
        }
    })
}

/// `(1 - W)^-1`
pub fn resolvent(w: &Array2<Complex>) -> Result<Array2<Complex>, KernelError> {
    inverse(&(identity(w.nrows()) - w), "(1 - W)")
}

/// Propagator `(1 - W)^-1 W`
pub fn propagator(w: &Array2<Complex>) -> Result<Array2<Complex>, KernelError> {
    Ok(resolvent(w)?.dot(w))
}

/// Eigenvalues with right and left eigenvectors.
///
/// Column `k` of `right` satisfies `M r = lambda_k r` with unit norm; column `k`
/// of `left` satisfies `l^T M = lambda_k l^T` and `l^T r_k = 1`.
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    pub values: Array1<Complex>,
    pub right: Array2<Complex>,
    pub left: Array2<Complex>,
}

/// Eigenvalues only; no eigenvector matrix has to be inverted
pub fn eigenvalues(a: &Array2<Complex>) -> Result<Array1<Complex>, KernelError> {
    let values = schur_eigenvalues(to_nalgebra(a))?;
    Ok(Array1::from_iter(values.iter().copied()))
}

fn schur_eigenvalues(m: DMatrix<Complex>) -> Result<DVector<Complex>, KernelError> {
    let schur = Schur::try_new(m, f64::EPSILON, SCHUR_MAX_ITERATIONS).ok_or(
        KernelError::NonConvergence {
            iterations: SCHUR_MAX_ITERATIONS,
            residual: f64::NAN,
        },
    )?;
    schur
        .eigenvalues()
        .ok_or_else(|| KernelError::InvalidInput("Schur form did not yield eigenvalues".into()))
}

pub fn eigen_decomposition(a: &Array2<Complex>) -> Result<EigenDecomposition, KernelError> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(KernelError::ShapeMismatch {
            what: "eigen decomposition".into(),
            expected: n,
            got: a.ncols(),
        });
    }
    let m = to_nalgebra(a);
    let values = schur_eigenvalues(m.clone())?;

    let mut right = DMatrix::<Complex>::zeros(n, n);
    for (k, lambda) in values.iter().enumerate() {
        let v = null_vector(&m, *lambda)?;
        right.set_column(k, &v);
    }
    let left = right
        .clone()
        .try_inverse()
        .ok_or_else(|| KernelError::SingularMatrix("eigenvector matrix".into()))?
        .transpose();

    Ok(EigenDecomposition {
        values: Array1::from_iter(values.iter().copied()),
        right: from_nalgebra(&right),
        left: from_nalgebra(&left),
    })
}

/// Inverse iteration for the eigenvector belonging to `lambda`
fn null_vector(m: &DMatrix<Complex>, lambda: Complex) -> Result<DVector<Complex>, KernelError> {
    let n = m.nrows();
    let shift = lambda + Complex::new(1e-10 * (1.0 + lambda.norm()), 0.0);
    let shifted = m - DMatrix::<Complex>::identity(n, n) * shift;
    let lu = shifted.lu();
    let mut x = DVector::<Complex>::from_element(n, Complex::new(1.0, 0.0));
    for _ in 0..INVERSE_ITERATION_STEPS {
        let y = lu
            .solve(&x)
            .ok_or_else(|| KernelError::SingularMatrix("shifted eigenproblem".into()))?;
        let norm = y.norm();
        if !(norm > 0.0) || !norm.is_finite() {
            return Err(KernelError::SingularMatrix("shifted eigenproblem".into()));
        }
        x = y.unscale(norm);
    }
    Ok(x)
}

/// Links eigenvalues across neighbouring frequencies.
///
/// `eigenvalues` has shape `(n_freqs, n_modes)`. Whenever a mode jumps by
/// more than `margin` between two frequencies, the jumping modes are
/// reassigned to their nearest successors. Returns the resorted eigenvalues
/// and the index mask used for the resorting.
pub fn match_eigenvalues_across_frequencies(
    eigenvalues: &Array2<Complex>,
    margin: f64,
) -> (Array2<Complex>, Array2<usize>) {
    let (n_freqs, n_modes) = eigenvalues.dim();
    let mut mask = Array2::from_shape_fn((n_freqs, n_modes), |(_, k)| k);
    let mut resorted = eigenvalues.clone();

    for i in 1..n_freqs {
        // carry the previous assignment forward
        for k in 0..n_modes {
            mask[[i, k]] = mask[[i - 1, k]];
            resorted[[i, k]] = eigenvalues[[i, mask[[i, k]]]];
        }
        let jumping: Vec<usize> = (0..n_modes)
            .filter(|&k| (resorted[[i, k]] - resorted[[i - 1, k]]).norm() > margin)
            .collect();
        if jumping.len() < 2 {
            continue;
        }
        let mut candidates: Vec<usize> = jumping.iter().map(|&k| mask[[i, k]]).collect();
        for &k in &jumping {
            let previous = resorted[[i - 1, k]];
            let (pos, _) = candidates
                .iter()
                .enumerate()
                .map(|(pos, &c)| (pos, (eigenvalues[[i, c]] - previous).norm()))
                .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best });
            let chosen = candidates.remove(pos);
            mask[[i, k]] = chosen;
            resorted[[i, k]] = eigenvalues[[i, chosen]];
        }
    }
    (resorted, mask)
}
