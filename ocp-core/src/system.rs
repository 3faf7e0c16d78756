//! Continuous-to-discrete conversion of linear time-invariant systems.
//!
//! A continuous system
//!
//! ```text
//! ẋ = Ac x + Bc u + b
//! ```
//!
//! is sampled with period `Ts` under a zero-order hold:
//!
//! ```text
//! A = expm(Ac Ts)
//! B = Ac⁻¹ (A − I) Bc      (solved by LU, never by forming Ac⁻¹)
//! ```
//!
//! The constant forcing `b` is passed through unchanged as the discrete
//! affine offset. This matches the mass-spring test problem, where `b` is a
//! small constant already expressed per sampling interval. It is *not* the
//! exact ZOH image `∫₀^Ts expm(Ac s) ds · b` and must not be relied on as a
//! general discretization rule.

use nalgebra::{DMatrix, DVector};

use crate::error::{OcpError, OcpResult};
use crate::linalg::dense::{self, Mat, Vector};

/// Continuous-time LTI system `ẋ = Ac x + Bc u + b`.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)] // Ac, Bc are standard state-space notation
pub struct ContinuousSystem {
    /// State matrix (nx × nx)
    pub Ac: Mat,
    /// Input matrix (nx × nu)
    pub Bc: Mat,
    /// Constant forcing term (nx)
    pub b: Vector,
}

/// Discrete-time LTI system `x⁺ = A x + B u + b`.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct DiscreteSystem {
    /// Sampling period used to produce this model
    pub ts: f64,
    /// State transition matrix (nx × nx)
    pub A: Mat,
    /// Input matrix (nx × nu)
    pub B: Mat,
    /// Affine offset (nx), copied from the continuous forcing term
    pub b: Vector,
}

impl ContinuousSystem {
    /// Create a system with zero forcing term.
    #[allow(non_snake_case)]
    pub fn new(Ac: Mat, Bc: Mat) -> OcpResult<Self> {
        let nx = Ac.nrows();
        if nx == 0 || Ac.ncols() != nx {
            return Err(OcpError::InvalidSystem(format!(
                "Ac must be square and non-empty, got {}x{}",
                Ac.nrows(),
                Ac.ncols()
            )));
        }
        if Bc.nrows() != nx {
            return Err(OcpError::InvalidSystem(format!(
                "Bc has {} rows, expected {}",
                Bc.nrows(),
                nx
            )));
        }
        Ok(Self {
            Ac,
            Bc,
            b: DVector::zeros(nx),
        })
    }

    /// Replace the constant forcing term.
    pub fn with_offset(mut self, b: Vector) -> OcpResult<Self> {
        if b.len() != self.nx() {
            return Err(OcpError::InvalidSystem(format!(
                "offset has length {}, expected {}",
                b.len(),
                self.nx()
            )));
        }
        self.b = b;
        Ok(self)
    }

    /// Chain of `nx/2` unit masses linked by unit springs, with a wall at
    /// each end. The first `nu` masses are actuated.
    ///
    /// The state is ordered `[positions; velocities]`, so
    ///
    /// ```text
    /// Ac = [0  I]      Bc = [   0   ]
    ///      [T  0]           [ I_nu  ]
    ///                       [   0   ]
    /// ```
    ///
    /// where `T` is tridiagonal with −2 on the diagonal and +1 beside it.
    pub fn mass_spring(nx: usize, nu: usize) -> OcpResult<Self> {
        if nx == 0 || nx % 2 != 0 {
            return Err(OcpError::InvalidSystem(format!(
                "mass-spring state dimension must be even and positive, got {}",
                nx
            )));
        }
        let pp = nx / 2;
        if nu == 0 || nu > pp {
            return Err(OcpError::InvalidSystem(format!(
                "mass-spring input dimension must be in 1..={}, got {}",
                pp, nu
            )));
        }

        let mut t = DMatrix::zeros(pp, pp);
        for i in 0..pp {
            t[(i, i)] = -2.0;
            if i + 1 < pp {
                t[(i, i + 1)] = 1.0;
                t[(i + 1, i)] = 1.0;
            }
        }

        let mut ac = DMatrix::zeros(nx, nx);
        ac.view_mut((0, pp), (pp, pp)).fill_with_identity();
        ac.view_mut((pp, 0), (pp, pp)).copy_from(&t);

        let mut bc = DMatrix::zeros(nx, nu);
        bc.view_mut((pp, 0), (nu, nu)).fill_with_identity();

        Self::new(ac, bc)
    }

    /// State dimension.
    pub fn nx(&self) -> usize {
        self.Ac.nrows()
    }

    /// Input dimension.
    pub fn nu(&self) -> usize {
        self.Bc.ncols()
    }

    /// Zero-order-hold discretization with sampling period `ts`.
    ///
    /// Fails with `SingularSystem` when `Ac` cannot be factored, since the
    /// input matrix is recovered from `Ac B = (A − I) Bc`.
    pub fn discretize(&self, ts: f64) -> OcpResult<DiscreteSystem> {
        if !ts.is_finite() || ts <= 0.0 {
            return Err(OcpError::InvalidSystem(format!(
                "sampling period must be positive and finite, got {}",
                ts
            )));
        }
        let nx = self.nx();

        let a = (&self.Ac * ts).exp();

        let mut rhs = &a - DMatrix::identity(nx, nx);
        rhs = rhs * &self.Bc;

        let b_mat = self
            .Ac
            .clone()
            .lu()
            .solve(&rhs)
            .ok_or_else(|| OcpError::SingularSystem("Ac has a zero pivot".to_string()))?;

        if b_mat.iter().any(|v| !v.is_finite()) || a.iter().any(|v| !v.is_finite()) {
            return Err(OcpError::SingularSystem(
                "discretization produced non-finite entries".to_string(),
            ));
        }

        Ok(DiscreteSystem {
            ts,
            A: a,
            B: b_mat,
            b: self.b.clone(),
        })
    }
}

impl DiscreteSystem {
    /// State dimension.
    pub fn nx(&self) -> usize {
        self.A.nrows()
    }

    /// Input dimension.
    pub fn nu(&self) -> usize {
        self.B.ncols()
    }

    /// One step of the model: `A x + B u + b`.
    pub fn step(&self, x: &Vector, u: &Vector) -> Vector {
        let mut next = self.b.clone();
        next.gemv(1.0, &self.A, x, 1.0);
        next.gemv(1.0, &self.B, u, 1.0);
        next
    }
}

/// Initial state used by the mass-spring test problem.
///
/// Four states get the fixed state `[5, 10, 15, 20]`; every other size
/// starts at all ones.
pub fn default_initial_state(nx: usize) -> Vector {
    if nx == 4 {
        DVector::from_vec(vec![5.0, 10.0, 15.0, 20.0])
    } else {
        DVector::from_element(nx, 1.0)
    }
}

/// Discretized mass-spring system and its default initial state.
pub fn mass_spring_system(ts: f64, nx: usize, nu: usize) -> OcpResult<(DiscreteSystem, Vector)> {
    let sys = ContinuousSystem::mass_spring(nx, nu)?.discretize(ts)?;
    Ok((sys, default_initial_state(nx)))
}

/// Check that a discrete system's matrices are consistent.
pub(crate) fn check_discrete(sys: &DiscreteSystem) -> OcpResult<()> {
    let nx = sys.nx();
    dense::check_shape(0, "A", &sys.A, nx, nx)?;
    dense::check_shape(0, "B", &sys.B, nx, sys.nu())?;
    dense::check_len(0, "b", &sys.b, nx)
}
