use crate::core::models::record::ResultRecord;
use crate::core::models::structure::Structure;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::marker::PhantomData;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// A streaming reader over a JSON-lines file, yielding one value per non-blank line.
///
/// Values are parsed lazily, so arbitrarily long inputs can be processed without holding
/// them in memory. When opened from a path the number of entries is counted up front,
/// which gives the iterator an exact `size_hint`.
pub struct JsonLinesReader<T, R> {
    lines: Lines<R>,
    line: usize,
    remaining: Option<usize>,
    failed: bool,
    _marker: PhantomData<T>,
}

/// Streaming reader for input structures.
pub type StructureReader<R> = JsonLinesReader<Structure, R>;

impl<T: DeserializeOwned> JsonLinesReader<T, BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReadError> {
        let path = path.as_ref();
        let count = count_entries(BufReader::new(File::open(path)?))?;
        let mut reader = Self::from_reader(BufReader::new(File::open(path)?));
        reader.remaining = Some(count);
        Ok(reader)
    }
}

impl<T: DeserializeOwned, R: BufRead> JsonLinesReader<T, R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            remaining: None,
            failed: false,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned, R: BufRead> Iterator for JsonLinesReader<T, R> {
    type Item = Result<T, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.into()));
                }
            };
            self.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
            let parsed = serde_json::from_str(&line).map_err(|e| ReadError::Parse {
                line: self.line,
                message: e.to_string(),
            });
            if parsed.is_err() {
                self.failed = true;
            }
            return Some(parsed);
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.remaining {
            Some(n) if !self.failed => (n, Some(n)),
            _ => (0, None),
        }
    }
}

fn count_entries(reader: impl BufRead) -> Result<usize, ReadError> {
    let mut count = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Reads every structure of a JSON-lines file.
pub fn read_structures<P: AsRef<Path>>(path: P) -> Result<Vec<Structure>, ReadError> {
    StructureReader::open(path)?.collect()
}

/// Reads every result record of a JSON-lines output file.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<ResultRecord>, ReadError> {
    JsonLinesReader::<ResultRecord, _>::open(path)?.collect()
}

/// Writes structures as JSON lines.
pub fn write_structures<'a, W, I>(writer: &mut W, structures: I) -> Result<(), io::Error>
where
    W: io::Write,
    I: IntoIterator<Item = &'a Structure>,
{
    for structure in structures {
        serde_json::to_writer(&mut *writer, structure)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(n: usize) -> Vec<Structure> {
        (0..n)
            .map(|i| {
                Structure::new(vec!["Ne".into()], vec![[i as f64, 0.0, 0.0]])
                    .unwrap()
                    .with_info("id", i)
            })
            .collect()
    }

    #[test]
    fn reader_streams_structures_and_skips_blank_lines() {
        let mut buf = Vec::new();
        write_structures(&mut buf, &sample(2)).unwrap();
        buf.extend_from_slice(b"\n   \n");
        write_structures(&mut buf, &sample(3)[2..]).unwrap();

        let read: Vec<Structure> = StructureReader::from_reader(Cursor::new(buf))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(read, sample(3));
    }

    #[test]
    fn parse_error_reports_line_and_ends_stream() {
        let mut buf = Vec::new();
        write_structures(&mut buf, &sample(1)).unwrap();
        buf.extend_from_slice(b"{broken\n");
        write_structures(&mut buf, &sample(1)).unwrap();

        let mut reader = StructureReader::from_reader(Cursor::new(buf));
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next().unwrap(),
            Err(ReadError::Parse { line: 2, .. })
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn opened_reader_has_exact_size_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        let mut file = File::create(&path).unwrap();
        write_structures(&mut file, &sample(4)).unwrap();

        let mut reader = StructureReader::open(&path).unwrap();
        assert_eq!(reader.size_hint(), (4, Some(4)));
        reader.next();
        assert_eq!(reader.size_hint(), (3, Some(3)));
        assert_eq!(read_structures(&path).unwrap().len(), 4);
    }
}
