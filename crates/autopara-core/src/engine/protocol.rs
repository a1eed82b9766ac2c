//! The line-oriented JSON protocol spoken between the dispatcher and worker processes.
//!
//! Every message is one JSON object on its own line. The worker's standard input carries
//! [`WorkerRequest`]s and its standard output carries [`WorkerResponse`]s; anything a
//! worker wants to log goes to standard error.
//!
//! A session is `Init` → `Ready`, then any number of `Chunk` → `ChunkDone` round trips,
//! ended by `Shutdown` or end of input. A worker that hits a run-level error answers with
//! `Fatal` and exits.

use super::adapter::CalculatorAdapter;
use super::chunker::Chunk;
use super::config::EvaluationSettings;
use super::error::EngineError;
use crate::core::calculators::{CalculatorFactory, CalculatorSpec, ResourceHints};
use crate::core::models::record::ResultRecord;
use crate::core::models::structure::Structure;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::{debug, error, info};

/// Everything a worker needs to rebuild the calculator on its side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerJob {
    /// [`CalculatorFactory::factory_id`] of the caller's factory; the worker refuses the
    /// job unless it serves the same one.
    pub factory: String,
    pub calculator: CalculatorSpec,
    pub settings: EvaluationSettings,
    #[serde(default)]
    pub resources: ResourceHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WorkerRequest {
    Init { job: WorkerJob },
    Chunk { chunk: Chunk<Structure> },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WorkerResponse {
    Ready,
    ChunkDone {
        start: usize,
        records: Vec<ResultRecord>,
    },
    Fatal {
        message: String,
    },
}

/// Writes one message as a single line and flushes.
pub fn write_message<W: Write, M: Serialize>(writer: &mut W, message: &M) -> Result<(), EngineError> {
    let mut line = serde_json::to_vec(message).map_err(|e| EngineError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .and_then(|()| writer.flush())
        .map_err(|e| EngineError::Protocol(format!("write failed: {e}")))
}

/// Reads the next message, or `None` at end of input.
pub fn read_message<R: BufRead, M: DeserializeOwned>(
    reader: &mut R,
) -> Result<Option<M>, EngineError> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| EngineError::Protocol(format!("read failed: {e}")))?;
        if n == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }
    serde_json::from_str(&line)
        .map(Some)
        .map_err(|e| EngineError::Protocol(format!("malformed message: {e}")))
}

/// Runs the worker side of the protocol until shutdown or end of input.
///
/// # Errors
///
/// Returns the run-level error that ended the session, after reporting it to the
/// dispatcher as a `Fatal` response.
pub fn serve<R, W>(
    mut reader: R,
    mut writer: W,
    factory: &dyn CalculatorFactory,
) -> Result<(), EngineError>
where
    R: BufRead,
    W: Write,
{
    let job = match read_message(&mut reader)? {
        Some(WorkerRequest::Init { job }) => job,
        Some(other) => {
            let err = EngineError::Protocol(format!("expected init, got {other:?}"));
            write_message(&mut writer, &WorkerResponse::Fatal {
                message: err.to_string(),
            })?;
            return Err(err);
        }
        None => return Ok(()),
    };
    if job.factory != factory.factory_id() {
        let err = EngineError::FactoryMismatch {
            expected: job.factory,
            worker: factory.factory_id().to_string(),
        };
        write_message(&mut writer, &WorkerResponse::Fatal {
            message: err.to_string(),
        })?;
        return Err(err);
    }
    info!(
        "Worker ready for calculator '{}'",
        job.calculator.backend_name()
    );
    let mut adapter = CalculatorAdapter::new(factory, job.calculator, job.settings, job.resources);
    write_message(&mut writer, &WorkerResponse::Ready)?;

    while let Some(request) = read_message::<_, WorkerRequest>(&mut reader)? {
        let chunk = match request {
            WorkerRequest::Chunk { chunk } => chunk,
            WorkerRequest::Shutdown => break,
            WorkerRequest::Init { .. } => {
                let err = EngineError::Protocol("duplicate init".to_string());
                write_message(&mut writer, &WorkerResponse::Fatal {
                    message: err.to_string(),
                })?;
                return Err(err);
            }
        };

        let start = chunk.start;
        debug!(start, len = chunk.len(), "worker received chunk");
        let mut records = Vec::with_capacity(chunk.len());
        for (index, structure) in chunk.indexed() {
            match adapter.evaluate(index, structure) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("Worker aborting at item {}: {}", index, e);
                    write_message(&mut writer, &WorkerResponse::Fatal {
                        message: e.to_string(),
                    })?;
                    return Err(e);
                }
            }
        }
        write_message(&mut writer, &WorkerResponse::ChunkDone { start, records })?;
    }

    debug!("Worker shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calculators::{
        BUILTIN_FACTORY_ID, BackendConfig, BuiltinCalculators, Calculator, CalculatorError,
        LennardJonesParams,
    };
    use crate::core::models::record::Property;
    use crate::engine::rundir::{KeepFiles, RunDirConfig};
    use std::io::Cursor;
    use std::path::Path;

    fn job(workdir: &Path, sigma: f64) -> WorkerJob {
        WorkerJob {
            factory: BuiltinCalculators.factory_id().to_string(),
            calculator: CalculatorSpec::new(BackendConfig::LennardJones(LennardJonesParams {
                sigma,
                ..LennardJonesParams::default()
            })),
            settings: EvaluationSettings {
                properties: vec![Property::Energy],
                output_prefix: "lj_".to_string(),
                rundir: RunDirConfig {
                    workdir: Some(workdir.to_path_buf()),
                    keep_files: KeepFiles::None,
                    ..RunDirConfig::default()
                },
            },
            resources: ResourceHints::default(),
        }
    }

    fn dimer(distance: f64) -> Structure {
        Structure::new(
            vec!["Ar".into(), "Ar".into()],
            vec![[0.0; 3], [distance, 0.0, 0.0]],
        )
        .unwrap()
    }

    fn session(requests: &[WorkerRequest]) -> (Result<(), EngineError>, Vec<WorkerResponse>) {
        session_with(&BuiltinCalculators, requests)
    }

    fn session_with(
        factory: &dyn CalculatorFactory,
        requests: &[WorkerRequest],
    ) -> (Result<(), EngineError>, Vec<WorkerResponse>) {
        let mut input = Vec::new();
        for request in requests {
            write_message(&mut input, request).unwrap();
        }
        let mut output = Vec::new();
        let result = serve(Cursor::new(input), &mut output, factory);

        let mut reader = Cursor::new(output);
        let mut responses = Vec::new();
        while let Some(response) = read_message(&mut reader).unwrap() {
            responses.push(response);
        }
        (result, responses)
    }

    #[test]
    fn worker_answers_every_chunk_in_order() {
        let workdir = tempfile::tempdir().unwrap();
        let (result, responses) = session(&[
            WorkerRequest::Init {
                job: job(workdir.path(), 1.0),
            },
            WorkerRequest::Chunk {
                chunk: Chunk {
                    start: 4,
                    items: vec![dimer(1.2), dimer(0.1)],
                },
            },
            WorkerRequest::Chunk {
                chunk: Chunk {
                    start: 0,
                    items: vec![dimer(1.5)],
                },
            },
            WorkerRequest::Shutdown,
        ]);

        result.unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], WorkerResponse::Ready);
        match &responses[1] {
            WorkerResponse::ChunkDone { start, records } => {
                assert_eq!(*start, 4);
                assert_eq!(records.iter().map(|r| r.index()).collect::<Vec<_>>(), vec![4, 5]);
                assert!(!records[0].is_failed());
                assert!(records[1].is_failed());
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(matches!(
            &responses[2],
            WorkerResponse::ChunkDone { start: 0, .. }
        ));
    }

    #[test]
    fn construction_failure_is_reported_as_fatal() {
        let workdir = tempfile::tempdir().unwrap();
        let (result, responses) = session(&[
            WorkerRequest::Init {
                job: job(workdir.path(), -1.0),
            },
            WorkerRequest::Chunk {
                chunk: Chunk {
                    start: 0,
                    items: vec![dimer(1.5)],
                },
            },
        ]);

        assert!(matches!(
            result,
            Err(EngineError::CalculatorConstruction { .. })
        ));
        assert_eq!(responses[0], WorkerResponse::Ready);
        assert!(matches!(&responses[1], WorkerResponse::Fatal { .. }));
    }

    #[test]
    fn chunk_before_init_is_a_protocol_error() {
        let (result, responses) = session(&[WorkerRequest::Chunk {
            chunk: Chunk {
                start: 0,
                items: vec![dimer(1.5)],
            },
        }]);
        assert!(matches!(result, Err(EngineError::Protocol(_))));
        assert!(matches!(&responses[0], WorkerResponse::Fatal { .. }));
    }

    #[test]
    fn end_of_input_ends_the_session_cleanly() {
        let workdir = tempfile::tempdir().unwrap();
        let (result, responses) = session(&[WorkerRequest::Init {
            job: job(workdir.path(), 1.0),
        }]);
        result.unwrap();
        assert_eq!(responses, vec![WorkerResponse::Ready]);
    }

    struct AlwaysFailing;

    impl CalculatorFactory for AlwaysFailing {
        fn create(
            &self,
            _spec: &CalculatorSpec,
            _resources: &ResourceHints,
        ) -> Result<Box<dyn Calculator>, CalculatorError> {
            Err(CalculatorError::InvalidParameters("never builds".to_string()))
        }
    }

    #[test]
    fn worker_refuses_a_job_for_another_factory() {
        let workdir = tempfile::tempdir().unwrap();
        let mut foreign = job(workdir.path(), 1.0);
        foreign.factory = AlwaysFailing.factory_id().to_string();
        assert_ne!(foreign.factory, BUILTIN_FACTORY_ID);

        let (result, responses) = session(&[
            WorkerRequest::Init { job: foreign },
            WorkerRequest::Chunk {
                chunk: Chunk {
                    start: 0,
                    items: vec![dimer(1.5)],
                },
            },
        ]);

        assert!(matches!(result, Err(EngineError::FactoryMismatch { .. })));
        assert_eq!(responses.len(), 1);
        assert!(matches!(
            &responses[0],
            WorkerResponse::Fatal { message } if message.contains("factory")
        ));
    }

    #[test]
    fn worker_serving_a_custom_factory_accepts_its_jobs() {
        let workdir = tempfile::tempdir().unwrap();
        let mut custom = job(workdir.path(), 1.0);
        custom.factory = AlwaysFailing.factory_id().to_string();

        let (result, responses) = session_with(
            &AlwaysFailing,
            &[WorkerRequest::Init { job: custom }, WorkerRequest::Shutdown],
        );

        result.unwrap();
        assert_eq!(responses, vec![WorkerResponse::Ready]);
    }
}
