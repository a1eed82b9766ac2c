use super::adapter::CalculatorAdapter;
use super::chunker::Chunk;
use super::error::EngineError;
use super::pool::WorkerPool;
use super::progress::{Progress, ProgressReporter};
use super::sink::ResultSink;
use crate::core::models::record::ResultRecord;
use crate::core::models::structure::Structure;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Running totals of delivered records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tally {
    pub computed: usize,
    pub failed: usize,
}

/// Holds completed chunks until every chunk before them has been delivered.
#[derive(Debug)]
pub(crate) struct ReorderBuffer {
    next: usize,
    pending: BTreeMap<usize, Vec<ResultRecord>>,
}

impl ReorderBuffer {
    pub fn new(next: usize) -> Self {
        Self {
            next,
            pending: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, start: usize, records: Vec<ResultRecord>) -> Result<(), EngineError> {
        if start < self.next || self.pending.contains_key(&start) {
            return Err(EngineError::Internal(format!(
                "chunk starting at {start} delivered twice"
            )));
        }
        self.pending.insert(start, records);
        Ok(())
    }

    /// The next chunk in input order, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<Vec<ResultRecord>> {
        let entry = self.pending.first_entry()?;
        if *entry.key() != self.next {
            return None;
        }
        let records = entry.remove();
        self.next += records.len();
        Some(records)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn deliver<S>(
    sink: &mut S,
    records: &[ResultRecord],
    reporter: &ProgressReporter,
    tally: &mut Tally,
) -> Result<(), EngineError>
where
    S: ResultSink + ?Sized,
{
    sink.append(records)?;
    let failed = records.iter().filter(|r| r.is_failed()).count();
    tally.failed += failed;
    tally.computed += records.len() - failed;
    reporter.report(Progress::TaskIncrement {
        amount: records.len() as u64,
    });
    Ok(())
}

/// Evaluates every chunk in this process, one after another.
pub(crate) fn run_serial<C, E, S>(
    chunks: C,
    adapter: &mut CalculatorAdapter,
    sink: &mut S,
    reporter: &ProgressReporter,
    tally: &mut Tally,
) -> Result<(), EngineError>
where
    C: Iterator<Item = Result<Chunk<Structure>, E>>,
    E: Into<EngineError>,
    S: ResultSink + ?Sized,
{
    for chunk in chunks {
        let chunk = chunk.map_err(Into::into)?;
        trace!(start = chunk.start, len = chunk.len(), "serial chunk");
        let mut records = Vec::with_capacity(chunk.len());
        for (index, structure) in chunk.indexed() {
            records.push(adapter.evaluate(index, structure)?);
        }
        deliver(sink, &records, reporter, tally)?;
    }
    Ok(())
}

/// Feeds chunks to the pool, keeping at most [`WorkerPool::capacity`] in flight, and
/// hands completed chunks to the sink in input order.
///
/// Returns on the first error without draining the pool; dropping the pool then kills
/// the in-flight work.
pub(crate) fn run_parallel<C, E, S>(
    chunks: C,
    first_index: usize,
    pool: &WorkerPool,
    timeout: Option<Duration>,
    sink: &mut S,
    reporter: &ProgressReporter,
    tally: &mut Tally,
) -> Result<(), EngineError>
where
    C: Iterator<Item = Result<Chunk<Structure>, E>>,
    E: Into<EngineError>,
    S: ResultSink + ?Sized,
{
    let mut chunks = chunks.fuse();
    let mut reorder = ReorderBuffer::new(first_index);
    let mut in_flight = 0usize;

    loop {
        while in_flight < pool.capacity() {
            let Some(chunk) = chunks.next() else {
                break;
            };
            let chunk = chunk.map_err(Into::into)?;
            trace!(start = chunk.start, len = chunk.len(), "submitting chunk");
            pool.submit(chunk)?;
            in_flight += 1;
        }
        if in_flight == 0 {
            break;
        }

        let done = pool.next_result(timeout)?;
        in_flight -= 1;
        debug!(
            worker = done.worker,
            start = done.start,
            "chunk completed"
        );
        reorder.push(done.start, done.records)?;
        while let Some(records) = reorder.pop_ready() {
            deliver(sink, &records, reporter, tally)?;
        }
    }

    if !reorder.is_empty() {
        return Err(EngineError::Internal(
            "completed chunks left undelivered".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calculators::{
        BackendConfig, BuiltinCalculators, CalculatorSpec, LennardJonesParams, ResourceHints,
    };
    use crate::core::models::record::Property;
    use crate::engine::chunker::chunked;
    use crate::engine::config::EvaluationSettings;
    use crate::engine::rundir::{KeepFiles, RunDirConfig};
    use crate::engine::sink::MemorySink;
    use std::convert::Infallible;
    use std::sync::Mutex;

    fn records(range: std::ops::Range<usize>) -> Vec<ResultRecord> {
        range
            .map(|index| ResultRecord::Computed {
                index,
                structure: Structure::new(vec!["Ar".into()], vec![[0.0; 3]]).unwrap(),
            })
            .collect()
    }

    #[test]
    fn reorder_buffer_releases_chunks_in_input_order() {
        let mut buffer = ReorderBuffer::new(0);
        buffer.push(10, records(10..20)).unwrap();
        buffer.push(20, records(20..23)).unwrap();
        assert!(buffer.pop_ready().is_none());

        buffer.push(0, records(0..10)).unwrap();
        let starts: Vec<usize> = std::iter::from_fn(|| buffer.pop_ready())
            .map(|r| r[0].index())
            .collect();
        assert_eq!(starts, vec![0, 10, 20]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn reorder_buffer_rejects_duplicates() {
        let mut buffer = ReorderBuffer::new(5);
        assert!(buffer.push(0, records(0..5)).is_err());
        buffer.push(5, records(5..6)).unwrap();
        assert!(buffer.push(5, records(5..6)).is_err());
    }

    #[test]
    fn serial_run_delivers_every_record_with_failures_in_place() {
        let workdir = tempfile::tempdir().unwrap();
        let settings = EvaluationSettings {
            properties: vec![Property::Energy],
            output_prefix: "lj_".to_string(),
            rundir: RunDirConfig {
                workdir: Some(workdir.path().to_path_buf()),
                keep_files: KeepFiles::None,
                ..RunDirConfig::default()
            },
        };
        let spec = CalculatorSpec::new(BackendConfig::LennardJones(LennardJonesParams::default()));
        let mut adapter =
            CalculatorAdapter::new(&BuiltinCalculators, spec, settings, ResourceHints::default());

        let inputs = (0..23).map(|i| {
            let distance = if i == 7 { 0.1 } else { 1.2 };
            Ok::<_, Infallible>(
                Structure::new(
                    vec!["Ar".into(), "Ar".into()],
                    vec![[0.0; 3], [distance, 0.0, 0.0]],
                )
                .unwrap(),
            )
        });
        let increments = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if let Progress::TaskIncrement { amount } = event {
                increments.lock().unwrap().push(amount);
            }
        }));
        let mut sink = MemorySink::new();
        let mut tally = Tally::default();

        run_serial(
            chunked(inputs, 10, 0),
            &mut adapter,
            &mut sink,
            &reporter,
            &mut tally,
        )
        .unwrap();

        let out = sink.records();
        assert_eq!(out.len(), 23);
        assert!(out.iter().enumerate().all(|(i, r)| r.index() == i));
        assert!(out[7].is_failed());
        assert_eq!(tally, Tally {
            computed: 22,
            failed: 1
        });
        assert_eq!(*increments.lock().unwrap(), vec![10, 10, 3]);
    }
}
