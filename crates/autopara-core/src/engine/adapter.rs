use super::config::EvaluationSettings;
use super::error::EngineError;
use super::rundir::RunDirectory;
use crate::core::calculators::{
    Calculator, CalculatorError, CalculatorFactory, CalculatorSpec, ResourceHints,
};
use crate::core::models::record::ResultRecord;
use crate::core::models::structure::Structure;
use tracing::{debug, warn};

/// Evaluates single structures with one calculator, each inside its own run directory.
///
/// The calculator is built on the first evaluation and reused for every later one, so a
/// worker process constructs its backend exactly once.
pub struct CalculatorAdapter<'a> {
    factory: &'a dyn CalculatorFactory,
    spec: CalculatorSpec,
    settings: EvaluationSettings,
    resources: ResourceHints,
    calculator: Option<Box<dyn Calculator>>,
}

impl<'a> CalculatorAdapter<'a> {
    pub fn new(
        factory: &'a dyn CalculatorFactory,
        spec: CalculatorSpec,
        settings: EvaluationSettings,
        resources: ResourceHints,
    ) -> Self {
        Self {
            factory,
            spec,
            settings,
            resources,
            calculator: None,
        }
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    fn ensure_calculator(&mut self) -> Result<(), EngineError> {
        if self.calculator.is_none() {
            let calculator = self
                .factory
                .create(&self.spec, &self.resources)
                .map_err(|source| EngineError::CalculatorConstruction {
                    backend: self.spec.backend_name().to_string(),
                    source,
                })?;
            debug!("Constructed calculator '{}'", calculator.name());
            self.calculator = Some(calculator);
        }
        Ok(())
    }

    /// Evaluates the structure at global position `index`.
    ///
    /// Calculator failures and invalid structures yield a [`ResultRecord::Failed`].
    ///
    /// # Errors
    ///
    /// Only run-level problems are errors: the calculator cannot be constructed, or the
    /// run directory cannot be created or torn down.
    pub fn evaluate(
        &mut self,
        index: usize,
        structure: Structure,
    ) -> Result<ResultRecord, EngineError> {
        if let Err(e) = structure.validate() {
            let error = CalculatorError::from(e);
            warn!("Skipping invalid structure {}: {}", index, error);
            return Ok(ResultRecord::Failed {
                index,
                structure,
                error: error.to_string(),
            });
        }

        self.ensure_calculator()?;
        let calculator = self
            .calculator
            .as_mut()
            .ok_or_else(|| EngineError::Internal("calculator missing after construction".into()))?;

        let rundir = RunDirectory::setup(&self.settings.rundir)?;
        let outcome = calculator
            .calculate(&structure, &self.settings.properties, rundir.working_path())
            .and_then(|computed| {
                computed.annotate(
                    structure.clone(),
                    &self.settings.output_prefix,
                    &self.settings.properties,
                )
            });

        let default_keep = calculator.default_keep_files();
        let report = rundir.teardown(
            &self.settings.rundir.keep_files,
            &default_keep,
            outcome.is_ok(),
        )?;
        debug!(index, ?report, "evaluation finished");

        Ok(match outcome {
            Ok(annotated) => ResultRecord::Computed {
                index,
                structure: annotated,
            },
            Err(e) => {
                warn!("Calculation for item {} failed: {}", index, e);
                ResultRecord::Failed {
                    index,
                    structure,
                    error: e.to_string(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calculators::{
        BackendConfig, BuiltinCalculators, Computed, LennardJonesParams,
    };
    use crate::core::models::record::Property;
    use crate::engine::rundir::{KeepFiles, RunDirConfig};
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;

    fn settings(workdir: &Path, keep_files: KeepFiles) -> EvaluationSettings {
        EvaluationSettings {
            properties: vec![Property::Energy, Property::Forces],
            output_prefix: "lj_".to_string(),
            rundir: RunDirConfig {
                workdir: Some(workdir.to_path_buf()),
                keep_files,
                ..RunDirConfig::default()
            },
        }
    }

    fn lj_spec() -> CalculatorSpec {
        CalculatorSpec::new(BackendConfig::LennardJones(LennardJonesParams::default()))
    }

    fn dimer(distance: f64) -> Structure {
        Structure::new(
            vec!["Ar".into(), "Ar".into()],
            vec![[0.0; 3], [distance, 0.0, 0.0]],
        )
        .unwrap()
    }

    fn run_dirs(workdir: &Path) -> usize {
        fs::read_dir(workdir).unwrap().count()
    }

    /// Writes two files per calculation and counts how often it is constructed.
    struct FileWritingFactory {
        created: Cell<usize>,
    }

    struct FileWriter;

    impl Calculator for FileWriter {
        fn name(&self) -> &str {
            "file-writer"
        }

        fn calculate(
            &mut self,
            structure: &Structure,
            _properties: &[Property],
            workdir: &Path,
        ) -> Result<Computed, CalculatorError> {
            fs::write(workdir.join("calc.out"), "done")?;
            fs::write(workdir.join("wavefunction.tmp"), "big")?;
            Ok(Computed {
                energy: Some(0.0),
                forces: Some(vec![[0.0; 3]; structure.natoms()]),
                ..Default::default()
            })
        }

        fn default_keep_files(&self) -> Vec<String> {
            vec!["calc.out".to_string()]
        }
    }

    impl CalculatorFactory for FileWritingFactory {
        fn create(
            &self,
            _spec: &CalculatorSpec,
            _resources: &ResourceHints,
        ) -> Result<Box<dyn Calculator>, CalculatorError> {
            self.created.set(self.created.get() + 1);
            Ok(Box::new(FileWriter))
        }
    }

    #[test]
    fn successful_evaluation_annotates_under_prefix() {
        let workdir = tempfile::tempdir().unwrap();
        let mut adapter = CalculatorAdapter::new(
            &BuiltinCalculators,
            lj_spec(),
            settings(workdir.path(), KeepFiles::None),
            ResourceHints::default(),
        );

        let record = adapter.evaluate(3, dimer(1.5)).unwrap();

        assert_eq!(record.index(), 3);
        assert!(!record.is_failed());
        assert!(record.structure().info.contains_key("lj_energy"));
        assert_eq!(record.structure().arrays["lj_forces"].len(), 2);
        assert_eq!(run_dirs(workdir.path()), 0);
    }

    #[test]
    fn calculator_failure_becomes_a_failed_record_and_keeps_the_directory() {
        let workdir = tempfile::tempdir().unwrap();
        let mut adapter = CalculatorAdapter::new(
            &BuiltinCalculators,
            lj_spec(),
            settings(workdir.path(), KeepFiles::None),
            ResourceHints::default(),
        );

        let record = adapter.evaluate(7, dimer(0.1)).unwrap();

        assert!(record.is_failed());
        assert_eq!(record.index(), 7);
        assert!(record.error().unwrap().contains("closer than"));
        assert!(record.structure().info.is_empty());
        assert_eq!(run_dirs(workdir.path()), 1);
    }

    #[test]
    fn non_finite_result_becomes_a_failed_record() {
        let workdir = tempfile::tempdir().unwrap();
        let unguarded = CalculatorSpec::new(BackendConfig::LennardJones(LennardJonesParams {
            min_distance: 0.0,
            ..LennardJonesParams::default()
        }));
        let mut adapter = CalculatorAdapter::new(
            &BuiltinCalculators,
            unguarded,
            settings(workdir.path(), KeepFiles::None),
            ResourceHints::default(),
        );

        let record = adapter.evaluate(0, dimer(0.0)).unwrap();

        assert!(record.is_failed());
        assert!(record.error().unwrap().contains("non-finite"));
        assert!(record.structure().arrays.is_empty());
    }

    #[test]
    fn invalid_structure_fails_without_a_run_directory() {
        let workdir = tempfile::tempdir().unwrap();
        let mut adapter = CalculatorAdapter::new(
            &BuiltinCalculators,
            lj_spec(),
            settings(workdir.path(), KeepFiles::All),
            ResourceHints::default(),
        );
        let mut broken = dimer(1.5);
        broken.positions[1][2] = f64::NAN;

        let record = adapter.evaluate(0, broken).unwrap();

        assert!(record.is_failed());
        assert_eq!(run_dirs(workdir.path()), 0);
    }

    #[test]
    fn calculator_is_constructed_once_per_adapter() {
        let workdir = tempfile::tempdir().unwrap();
        let factory = FileWritingFactory {
            created: Cell::new(0),
        };
        let mut adapter = CalculatorAdapter::new(
            &factory,
            lj_spec(),
            settings(workdir.path(), KeepFiles::Default),
            ResourceHints::default(),
        );

        for index in 0..3 {
            assert!(!adapter.evaluate(index, dimer(1.5)).unwrap().is_failed());
        }

        assert_eq!(factory.created.get(), 1);
        for entry in fs::read_dir(workdir.path()).unwrap() {
            let kept: Vec<_> = fs::read_dir(entry.unwrap().path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(kept, vec!["calc.out"]);
        }
    }

    #[test]
    fn construction_error_is_fatal() {
        let workdir = tempfile::tempdir().unwrap();
        let bad = CalculatorSpec::new(BackendConfig::LennardJones(LennardJonesParams {
            sigma: 0.0,
            ..LennardJonesParams::default()
        }));
        let mut adapter = CalculatorAdapter::new(
            &BuiltinCalculators,
            bad,
            settings(workdir.path(), KeepFiles::None),
            ResourceHints::default(),
        );

        assert!(matches!(
            adapter.evaluate(0, dimer(1.5)),
            Err(EngineError::CalculatorConstruction { .. })
        ));
        assert_eq!(run_dirs(workdir.path()), 0);
    }
}
