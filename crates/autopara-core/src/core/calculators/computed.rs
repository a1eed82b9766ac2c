use super::CalculatorError;
use crate::core::models::record::Property;
use crate::core::models::structure::Structure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Properties computed by a calculator for one structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Computed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forces: Option<Vec<[f64; 3]>>,
    /// Voigt order `xx yy zz yz xz xy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress: Option<[f64; 6]>,
    /// Any further backend-specific results, stored as metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Computed {
    /// Return true if there is no useful property.
    pub fn is_empty(&self) -> bool {
        self.energy.is_none() && self.forces.is_none() && self.stress.is_none()
    }

    fn check_finite(&self) -> Result<(), CalculatorError> {
        if self.energy.is_some_and(|e| !e.is_finite()) {
            return Err(CalculatorError::NonFinite(Property::Energy));
        }
        if let Some(forces) = &self.forces {
            if forces.iter().flatten().any(|f| !f.is_finite()) {
                return Err(CalculatorError::NonFinite(Property::Forces));
            }
        }
        if self.stress.is_some_and(|s| s.iter().any(|x| !x.is_finite())) {
            return Err(CalculatorError::NonFinite(Property::Stress));
        }
        Ok(())
    }

    fn provides(&self, property: Property) -> bool {
        match property {
            Property::Energy => self.energy.is_some(),
            Property::Forces => self.forces.is_some(),
            Property::Stress => self.stress.is_some(),
        }
    }

    /// Stores the computed values on `structure` under keys starting with `prefix`.
    ///
    /// Per-configuration values land in `info`, per-atom values in `arrays`.
    ///
    /// # Errors
    ///
    /// Fails if a requested property is missing, per-atom data has the wrong length, or a
    /// value is NaN or infinite (JSON has no representation for those).
    pub fn annotate(
        self,
        mut structure: Structure,
        prefix: &str,
        properties: &[Property],
    ) -> Result<Structure, CalculatorError> {
        if let Some(missing) = properties.iter().find(|p| !self.provides(**p)) {
            return Err(CalculatorError::MissingProperty(*missing));
        }
        self.check_finite()?;

        if let Some(energy) = self.energy {
            structure
                .info
                .insert(format!("{prefix}{}", Property::Energy), Value::from(energy));
        }
        if let Some(forces) = self.forces {
            if forces.len() != structure.natoms() {
                return Err(CalculatorError::PropertyShape {
                    property: Property::Forces,
                    len: forces.len(),
                    natoms: structure.natoms(),
                });
            }
            structure
                .arrays
                .insert(format!("{prefix}{}", Property::Forces), forces);
        }
        if let Some(stress) = self.stress {
            structure.info.insert(
                format!("{prefix}{}", Property::Stress),
                Value::from(stress.to_vec()),
            );
        }
        for (key, value) in self.extra {
            structure.info.insert(format!("{prefix}{key}"), value);
        }
        Ok(structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom_pair() -> Structure {
        Structure::new(
            vec!["He".into(), "He".into()],
            vec![[0.0; 3], [2.0, 0.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn annotate_writes_prefixed_keys() {
        let mut computed = Computed {
            energy: Some(-0.25),
            forces: Some(vec![[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]]),
            ..Default::default()
        };
        computed.extra.insert("scf_iterations".into(), Value::from(12));

        let annotated = computed
            .annotate(
                atom_pair(),
                "psi4_",
                &[Property::Energy, Property::Forces],
            )
            .unwrap();

        assert_eq!(annotated.info["psi4_energy"], -0.25);
        assert_eq!(annotated.info["psi4_scf_iterations"], 12);
        assert_eq!(annotated.arrays["psi4_forces"][1], [-0.1, 0.0, 0.0]);
        assert!(!annotated.info.contains_key("psi4_stress"));
    }

    #[test]
    fn annotate_fails_when_requested_property_is_missing() {
        let computed = Computed {
            energy: Some(1.0),
            ..Default::default()
        };
        let err = computed
            .annotate(atom_pair(), "", &[Property::Energy, Property::Stress])
            .unwrap_err();
        assert!(matches!(
            err,
            CalculatorError::MissingProperty(Property::Stress)
        ));
    }

    #[test]
    fn annotate_rejects_forces_of_wrong_length() {
        let computed = Computed {
            forces: Some(vec![[0.0; 3]]),
            ..Default::default()
        };
        let err = computed
            .annotate(atom_pair(), "x_", &[Property::Forces])
            .unwrap_err();
        assert!(matches!(
            err,
            CalculatorError::PropertyShape { len: 1, natoms: 2, .. }
        ));
    }

    #[test]
    fn annotate_rejects_non_finite_values() {
        let nan_forces = Computed {
            energy: Some(-1.0),
            forces: Some(vec![[f64::NAN, 0.0, 0.0], [0.0; 3]]),
            ..Default::default()
        };
        assert!(matches!(
            nan_forces.annotate(atom_pair(), "", &[Property::Energy, Property::Forces]),
            Err(CalculatorError::NonFinite(Property::Forces))
        ));

        let infinite_energy = Computed {
            energy: Some(f64::INFINITY),
            ..Default::default()
        };
        assert!(matches!(
            infinite_energy.annotate(atom_pair(), "", &[Property::Energy]),
            Err(CalculatorError::NonFinite(Property::Energy))
        ));

        let bad_stress = Computed {
            energy: Some(0.0),
            stress: Some([0.0, 0.0, f64::NEG_INFINITY, 0.0, 0.0, 0.0]),
            ..Default::default()
        };
        assert!(matches!(
            bad_stress.annotate(atom_pair(), "", &[Property::Energy]),
            Err(CalculatorError::NonFinite(Property::Stress))
        ));
    }
}
