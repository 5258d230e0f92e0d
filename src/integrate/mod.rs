//! Integrands and the Simpson integration kernel
//!
//! The function being integrated is opaque to the rest of the crate: anything
//! implementing [`Integrand`] can be handed to the worker executor. Closures
//! `Fn(f64) -> f64 + Send + Sync` implement it automatically.
//!
//! Coordinator and workers must agree on the integrand out of band. The CLI
//! and config file select one by name through [`FunctionKind`].

pub mod kernel;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use kernel::{simpson_naive, simpson_slice};

/// A real-valued function of one real variable
pub trait Integrand: Send + Sync {
    fn eval(&self, x: f64) -> f64;
}

impl<F> Integrand for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    #[inline]
    fn eval(&self, x: f64) -> f64 {
        self(x)
    }
}

/// Shared handle to an integrand, cloned into every integration thread
pub type SharedIntegrand = Arc<dyn Integrand>;

/// Named integrands selectable from the CLI or config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionKind {
    /// x^2
    Square,
    /// x^3
    Cube,
    /// sin(x)
    Sine,
    /// e^x
    Exp,
    /// 1 / sqrt(x)
    InverseSquareRoot,
    /// x^3 / (x^2 + x + 1/x - 2)
    Rational,
}

impl Default for FunctionKind {
    fn default() -> Self {
        Self::Square
    }
}

impl FunctionKind {
    /// Build the integrand for this function
    pub fn integrand(self) -> SharedIntegrand {
        match self {
            Self::Square => Arc::new(|x: f64| x * x),
            Self::Cube => Arc::new(|x: f64| x * x * x),
            Self::Sine => Arc::new(f64::sin),
            Self::Exp => Arc::new(f64::exp),
            Self::InverseSquareRoot => Arc::new(|x: f64| 1.0 / x.sqrt()),
            Self::Rational => Arc::new(|x: f64| x * x * x / (x * x + x + 1.0 / x - 2.0)),
        }
    }

    /// Closed-form value of the integral over `[a, b]`, where one exists
    pub fn antiderivative_delta(self, a: f64, b: f64) -> Option<f64> {
        match self {
            Self::Square => Some((b * b * b - a * a * a) / 3.0),
            Self::Cube => Some((b.powi(4) - a.powi(4)) / 4.0),
            Self::Sine => Some(a.cos() - b.cos()),
            Self::Exp => Some(b.exp() - a.exp()),
            Self::InverseSquareRoot => Some(2.0 * (b.sqrt() - a.sqrt())),
            Self::Rational => None,
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Square => "x^2",
            Self::Cube => "x^3",
            Self::Sine => "sin(x)",
            Self::Exp => "exp(x)",
            Self::InverseSquareRoot => "1/sqrt(x)",
            Self::Rational => "x^3/(x^2 + x + 1/x - 2)",
        };
        write!(f, "{}", name)
    }
}
