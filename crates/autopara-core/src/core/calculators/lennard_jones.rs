//! The Lennard-Jones pair potential, used as the reference backend.

use super::{Calculator, CalculatorError, CalculatorSpec, Computed, LennardJonesParams};
use crate::core::models::record::Property;
use crate::core::models::structure::Structure;
use nalgebra::{Matrix3, Vector3};
use std::path::Path;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy)]
pub struct LennardJones {
    epsilon: f64,
    sigma: f64,
    cutoff: Option<f64>,
    min_distance: f64,
}

impl LennardJones {
    pub fn from_spec(
        params: &LennardJonesParams,
        spec: &CalculatorSpec,
    ) -> Result<Self, CalculatorError> {
        if !(params.epsilon.is_finite() && params.sigma > 0.0 && params.sigma.is_finite()) {
            return Err(CalculatorError::InvalidParameters(format!(
                "lennard-jones requires finite epsilon and positive sigma (got epsilon={}, sigma={})",
                params.epsilon, params.sigma
            )));
        }
        if let Some(cutoff) = params.cutoff {
            if !(cutoff > 0.0) {
                return Err(CalculatorError::InvalidParameters(format!(
                    "lennard-jones cutoff must be positive (got {cutoff})"
                )));
            }
        }
        if !spec.args.is_empty() {
            return Err(CalculatorError::InvalidParameters(
                "lennard-jones takes no positional arguments".to_string(),
            ));
        }
        for key in spec.passthrough.keys() {
            warn!("lennard-jones ignores passthrough parameter '{}'", key);
        }
        Ok(Self {
            epsilon: params.epsilon,
            sigma: params.sigma,
            cutoff: params.cutoff,
            min_distance: params.min_distance,
        })
    }

    // vij
    fn pair_energy(&self, r: f64) -> f64 {
        let s6 = (self.sigma / r).powi(6);
        4.0 * self.epsilon * (s6 * s6 - s6)
    }

    // dvij/dr
    fn pair_gradient(&self, r: f64) -> f64 {
        let s6 = (self.sigma / r).powi(6);
        24.0 * self.epsilon * (s6 - 2.0 * s6 * s6) / r
    }

    fn evaluate(&self, structure: &Structure) -> Result<Computed, CalculatorError> {
        let images = MinimumImage::for_structure(structure)?;
        let positions: Vec<Vector3<f64>> =
            structure.positions.iter().map(|p| Vector3::from(*p)).collect();
        let n = positions.len();

        let mut energy = 0.0;
        let mut forces = vec![Vector3::zeros(); n];
        let mut virial = Matrix3::zeros();

        for i in 0..n {
            for j in 0..i {
                let d = images.wrap(positions[j] - positions[i]);
                let r = d.norm();
                if r < self.min_distance {
                    return Err(CalculatorError::Evaluation(format!(
                        "atoms {j} and {i} are {r:.4} apart, closer than min-distance {}",
                        self.min_distance
                    )));
                }
                if self.cutoff.is_some_and(|c| r > c) {
                    continue;
                }
                energy += self.pair_energy(r);
                let g = self.pair_gradient(r) / r;
                forces[i] += g * d;
                forces[j] -= g * d;
                virial += g * d * d.transpose();
            }
        }
        trace!(natoms = n, energy, "lennard-jones evaluation done");

        let stress = structure.volume().filter(|v| *v > 0.0).map(|volume| {
            let s = virial / volume;
            [s[(0, 0)], s[(1, 1)], s[(2, 2)], s[(1, 2)], s[(0, 2)], s[(0, 1)]]
        });

        Ok(Computed {
            energy: Some(energy),
            forces: Some(forces.iter().map(|f| [f.x, f.y, f.z]).collect()),
            stress,
            ..Default::default()
        })
    }
}

impl Calculator for LennardJones {
    fn name(&self) -> &str {
        "lennard-jones"
    }

    fn calculate(
        &mut self,
        structure: &Structure,
        properties: &[Property],
        _workdir: &Path,
    ) -> Result<Computed, CalculatorError> {
        if properties.contains(&Property::Stress) && !structure.is_periodic() {
            return Err(CalculatorError::Unsupported {
                calculator: self.name().to_string(),
                property: Property::Stress,
            });
        }
        self.evaluate(structure)
    }
}

/// Applies the minimum-image convention along periodic directions.
struct MinimumImage {
    cell: Option<(Matrix3<f64>, Matrix3<f64>)>,
    pbc: [bool; 3],
}

impl MinimumImage {
    fn for_structure(structure: &Structure) -> Result<Self, CalculatorError> {
        let cell = match structure.cell {
            Some(rows) if structure.is_periodic() => {
                // columns are lattice vectors
                let h = Matrix3::from_columns(&[
                    Vector3::from(rows[0]),
                    Vector3::from(rows[1]),
                    Vector3::from(rows[2]),
                ]);
                let inverse = h.try_inverse().ok_or_else(|| {
                    CalculatorError::Evaluation("cell matrix is singular".to_string())
                })?;
                Some((h, inverse))
            }
            _ => None,
        };
        Ok(Self {
            cell,
            pbc: structure.pbc,
        })
    }

    fn wrap(&self, d: Vector3<f64>) -> Vector3<f64> {
        match &self.cell {
            Some((h, inverse)) => {
                let mut frac = inverse * d;
                for k in 0..3 {
                    if self.pbc[k] {
                        frac[k] -= frac[k].round();
                    }
                }
                h * frac
            }
            None => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calculators::BackendConfig;

    fn lj() -> LennardJones {
        let params = LennardJonesParams::default();
        let spec = CalculatorSpec::new(BackendConfig::LennardJones(params.clone()));
        LennardJones::from_spec(&params, &spec).unwrap()
    }

    fn r_min() -> f64 {
        2f64.powf(1.0 / 6.0)
    }

    #[test]
    fn dimer_at_minimum_has_energy_minus_epsilon_and_no_force() {
        let s = Structure::new(
            vec!["Ar".into(), "Ar".into()],
            vec![[0.0; 3], [r_min(), 0.0, 0.0]],
        )
        .unwrap();
        let computed = lj()
            .calculate(&s, &[Property::Energy, Property::Forces], Path::new("."))
            .unwrap();
        assert!((computed.energy.unwrap() + 1.0).abs() < 1e-10);
        for f in computed.forces.unwrap() {
            assert!(f.iter().all(|x| x.abs() < 1e-10));
        }
    }

    #[test]
    fn equilateral_trimer_has_energy_minus_three() {
        let a = r_min();
        let s = Structure::new(
            vec!["Ar".into(); 3],
            vec![[0.0; 3], [a, 0.0, 0.0], [a / 2.0, a * 3f64.sqrt() / 2.0, 0.0]],
        )
        .unwrap();
        let computed = lj().calculate(&s, &[Property::Energy], Path::new(".")).unwrap();
        assert!((computed.energy.unwrap() + 3.0).abs() < 1e-10);
    }

    #[test]
    fn compressed_dimer_pushes_atoms_apart() {
        let s = Structure::new(
            vec!["Ar".into(), "Ar".into()],
            vec![[0.0; 3], [1.0, 0.0, 0.0]],
        )
        .unwrap();
        let forces = lj()
            .calculate(&s, &[Property::Forces], Path::new("."))
            .unwrap()
            .forces
            .unwrap();
        assert!(forces[0][0] < 0.0);
        assert!(forces[1][0] > 0.0);
        assert!((forces[0][0] + forces[1][0]).abs() < 1e-12);
    }

    #[test]
    fn overlapping_atoms_fail_the_evaluation() {
        let s = Structure::new(
            vec!["Ar".into(), "Ar".into()],
            vec![[0.0; 3], [0.1, 0.0, 0.0]],
        )
        .unwrap();
        let err = lj().calculate(&s, &[Property::Energy], Path::new(".")).unwrap_err();
        assert!(matches!(err, CalculatorError::Evaluation(_)));
    }

    #[test]
    fn minimum_image_sees_neighbor_across_the_boundary() {
        let box_len = 10.0;
        let s = Structure::new(
            vec!["Ar".into(), "Ar".into()],
            vec![[0.2, 0.0, 0.0], [box_len - r_min() + 0.2, 0.0, 0.0]],
        )
        .unwrap()
        .with_cell([[box_len, 0.0, 0.0], [0.0, box_len, 0.0], [0.0, 0.0, box_len]]);

        let computed = lj()
            .calculate(&s, &[Property::Energy, Property::Stress], Path::new("."))
            .unwrap();
        assert!((computed.energy.unwrap() + 1.0).abs() < 1e-10);
        let stress = computed.stress.unwrap();
        assert!(stress.iter().all(|x| x.abs() < 1e-10));
    }

    #[test]
    fn stress_requires_a_periodic_cell() {
        let s = Structure::new(vec!["Ar".into()], vec![[0.0; 3]]).unwrap();
        let err = lj().calculate(&s, &[Property::Stress], Path::new(".")).unwrap_err();
        assert!(matches!(
            err,
            CalculatorError::Unsupported {
                property: Property::Stress,
                ..
            }
        ));
    }

    #[test]
    fn cutoff_drops_distant_pairs() {
        let params = LennardJonesParams {
            cutoff: Some(2.5),
            ..LennardJonesParams::default()
        };
        let spec = CalculatorSpec::new(BackendConfig::LennardJones(params.clone()));
        let mut calc = LennardJones::from_spec(&params, &spec).unwrap();
        let s = Structure::new(
            vec!["Ar".into(), "Ar".into()],
            vec![[0.0; 3], [3.0, 0.0, 0.0]],
        )
        .unwrap();
        let computed = calc.calculate(&s, &[Property::Energy], Path::new(".")).unwrap();
        assert_eq!(computed.energy, Some(0.0));
    }
}
