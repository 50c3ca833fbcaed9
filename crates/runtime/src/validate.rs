// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Equivalence checking between a reference graph and a rewritten one.
//!
//! Both graphs run on the same inputs (cast to each graph's declared input
//! types) on separate rayon workers. Every output name present in both
//! graphs is compared element-wise in `f64`:
//!
//! ```text
//! |a - b| <= atol + rtol * |b|        (b = reference value)
//! ```

use crate::{Executor, RuntimeError, TensorMap};
use model_ir::Graph;
use std::fmt;
use tensor_core::{DType, Tensor};

/// Relative and absolute tolerance for output comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerance {
    /// Tolerance used when the candidate computes in f16 or bf16.
    pub const HALF_PRECISION: Tolerance = Tolerance { rtol: 1e-2, atol: 1e-2 };

    pub fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    /// The looser of `self` and the half-precision default when `dtype` is
    /// a 16-bit float.
    pub fn for_dtype(self, dtype: DType) -> Self {
        match dtype {
            DType::F16 | DType::BF16 => Self {
                rtol: self.rtol.max(Self::HALF_PRECISION.rtol),
                atol: self.atol.max(Self::HALF_PRECISION.atol),
            },
            _ => self,
        }
    }

    #[inline]
    pub fn close(&self, actual: f64, expected: f64) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return actual.is_nan() && expected.is_nan();
        }
        if actual == expected {
            return true;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { rtol: 1e-3, atol: 1e-4 }
    }
}

/// One output that differs beyond tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub output: String,
    /// Largest absolute difference; infinite when shapes disagree or only
    /// one side is NaN.
    pub max_abs_diff: f64,
    pub rtol: f64,
    pub atol: f64,
    /// Number of elements outside tolerance.
    pub mismatched: usize,
    pub total: usize,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "output '{}': {}/{} elements differ, max |diff| = {:.3e} (rtol {}, atol {})",
            self.output, self.mismatched, self.total, self.max_abs_diff, self.rtol, self.atol
        )
    }
}

/// Outcome of one validation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Outputs compared, in reference order.
    pub compared: Vec<String>,
    /// Reference outputs the candidate no longer exposes.
    pub skipped: Vec<String>,
    pub mismatches: Vec<Mismatch>,
}

impl ValidationReport {
    pub fn is_equivalent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_equivalent() {
            write!(f, "{} output(s) match", self.compared.len())?;
        } else {
            write!(
                f,
                "{} of {} output(s) differ",
                self.mismatches.len(),
                self.compared.len()
            )?;
            for m in &self.mismatches {
                write!(f, "\n  {m}")?;
            }
        }
        if !self.skipped.is_empty() {
            write!(f, "\n  not compared: {}", self.skipped.join(", "))?;
        }
        Ok(())
    }
}

/// Feeds restricted to `graph`'s inputs and cast to their declared types.
fn feeds_for(graph: &Graph, feeds: &TensorMap) -> TensorMap {
    graph
        .inputs()
        .iter()
        .filter_map(|name| {
            let t = feeds.get(name)?;
            let t = match graph.dtype_of(name) {
                Some(d) if d != t.dtype() => t.cast(d),
                _ => t.clone(),
            };
            Some((name.clone(), t))
        })
        .collect()
}

/// Compares one output pair.
pub fn compare_tensors(output: &str, actual: &Tensor, expected: &Tensor, tol: Tolerance) -> Option<Mismatch> {
    let total = expected.num_elements();
    let mismatch = |max_abs_diff: f64, mismatched: usize| Mismatch {
        output: output.to_owned(),
        max_abs_diff,
        rtol: tol.rtol,
        atol: tol.atol,
        mismatched,
        total,
    };
    if actual.shape() != expected.shape() {
        return Some(mismatch(f64::INFINITY, total));
    }
    let a = actual.to_f64_vec();
    let b = expected.to_f64_vec();
    let mut max_abs_diff = 0.0f64;
    let mut mismatched = 0;
    for (&x, &y) in a.iter().zip(&b) {
        if !tol.close(x, y) {
            mismatched += 1;
        }
        let diff = if x.is_nan() || y.is_nan() {
            if x.is_nan() && y.is_nan() {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            (x - y).abs()
        };
        max_abs_diff = max_abs_diff.max(diff);
    }
    (mismatched > 0).then(|| mismatch(max_abs_diff, mismatched))
}

/// Runs both graphs on `feeds` and compares their shared outputs.
///
/// # Errors
/// Any execution error from either graph. Numeric differences are not
/// errors; they are reported as [`Mismatch`]es.
pub fn validate(
    reference: &Graph,
    candidate: &Graph,
    feeds: &TensorMap,
    tol: Tolerance,
) -> Result<ValidationReport, RuntimeError> {
    let ref_feeds = feeds_for(reference, feeds);
    let cand_feeds = feeds_for(candidate, feeds);
    let (expected, actual) = rayon::join(
        || Executor::new(reference).and_then(|e| e.run(&ref_feeds)),
        || Executor::new(candidate).and_then(|e| e.run(&cand_feeds)),
    );
    let (expected, actual) = (expected?, actual?);

    let mut report = ValidationReport::default();
    for name in reference.outputs() {
        let (Some(exp), Some(act)) = (expected.get(name), actual.get(name)) else {
            report.skipped.push(name.clone());
            continue;
        };
        report.compared.push(name.clone());
        if let Some(m) = compare_tensors(name, act, exp, tol) {
            tracing::warn!("{m}");
            report.mismatches.push(m);
        }
    }
    tracing::info!("validation: {report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Node, OpKind, ValueInfo};
    use tensor_core::{DynShape, Shape};

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn scaled(factor: f32, dtype: DType) -> Graph {
        let mut g = Graph::new("scaled");
        g.add_input("x", ValueInfo::new(dtype, Some(DynShape::fixed(&[3]))));
        g.add_initializer("k", Tensor::from_f32(Shape::vector(1), &[factor]).unwrap().cast(dtype))
            .unwrap();
        g.add_node(Node::new("mul", OpKind::Mul, vec![s("x"), s("k")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("y")]);
        g
    }

    fn feeds() -> TensorMap {
        TensorMap::from([(s("x"), Tensor::from_f32(Shape::vector(3), &[0.1, 0.5, 0.9]).unwrap())])
    }

    #[test]
    fn test_identical_graphs_match() {
        let g = scaled(2.0, DType::F32);
        let report = validate(&g, &g.clone(), &feeds(), Tolerance::default()).unwrap();
        assert!(report.is_equivalent());
        assert_eq!(report.compared, vec![s("y")]);
    }

    #[test]
    fn test_different_graphs_mismatch() {
        let report = validate(&scaled(2.0, DType::F32), &scaled(2.5, DType::F32), &feeds(), Tolerance::default())
            .unwrap();
        assert_eq!(report.mismatches.len(), 1);
        let m = &report.mismatches[0];
        assert_eq!(m.output, "y");
        assert!((m.max_abs_diff - 0.45).abs() < 1e-6);
        assert_eq!(m.mismatched, 3);
    }

    #[test]
    fn test_half_precision_candidate_within_tolerance() {
        let reference = scaled(1.1, DType::F32);
        let candidate = scaled(1.1, DType::F16);
        let tol = Tolerance::default().for_dtype(DType::F16);
        let report = validate(&reference, &candidate, &feeds(), tol).unwrap();
        assert!(report.is_equivalent(), "{report}");
    }

    #[test]
    fn test_missing_output_is_skipped() {
        let reference = scaled(2.0, DType::F32);
        let mut candidate = reference.clone();
        candidate.set_outputs(vec![s("x")]);
        let report = validate(&reference, &candidate, &feeds(), Tolerance::default()).unwrap();
        assert_eq!(report.skipped, vec![s("y")]);
        assert!(report.compared.is_empty());
    }

    #[test]
    fn test_tolerance_nan_and_shape() {
        let tol = Tolerance::default();
        assert!(tol.close(f64::NAN, f64::NAN));
        assert!(!tol.close(f64::NAN, 1.0));
        assert!(tol.close(1.00005, 1.0));

        let a = Tensor::zeros(Shape::vector(2), DType::F32);
        let b = Tensor::zeros(Shape::vector(3), DType::F32);
        let m = compare_tensors("o", &a, &b, tol).unwrap();
        assert!(m.max_abs_diff.is_infinite());
    }
}
