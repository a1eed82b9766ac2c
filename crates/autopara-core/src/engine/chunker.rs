use serde::{Deserialize, Serialize};

/// Consecutive input items plus the global index of the first one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk<T> {
    pub start: usize,
    pub items: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// One past the global index of the last item.
    pub fn end(&self) -> usize {
        self.start + self.items.len()
    }

    /// Items paired with their global indices.
    pub fn indexed(self) -> impl Iterator<Item = (usize, T)> {
        let start = self.start;
        self.items
            .into_iter()
            .enumerate()
            .map(move |(offset, item)| (start + offset, item))
    }
}

/// Lazily groups a fallible input stream into [`Chunk`]s.
///
/// Holds at most one chunk's worth of items. The first input error is yielded on its own
/// (items read before it in the same chunk are dropped) and ends the stream.
pub struct Chunks<I> {
    inner: I,
    size: usize,
    next_start: usize,
    done: bool,
}

/// Splits `inputs` into chunks of `size` items, numbering from `start_index`.
///
/// A `size` of zero is treated as one.
pub fn chunked<I, T, E>(inputs: I, size: usize, start_index: usize) -> Chunks<I::IntoIter>
where
    I: IntoIterator<Item = Result<T, E>>,
{
    Chunks {
        inner: inputs.into_iter(),
        size: size.max(1),
        next_start: start_index,
        done: false,
    }
}

impl<I, T, E> Iterator for Chunks<I>
where
    I: Iterator<Item = Result<T, E>>,
{
    type Item = Result<Chunk<T>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut items = Vec::with_capacity(self.size);
        while items.len() < self.size {
            match self.inner.next() {
                Some(Ok(item)) => items.push(item),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if items.is_empty() {
            return None;
        }
        let chunk = Chunk {
            start: self.next_start,
            items,
        };
        self.next_start = chunk.end();
        Some(Ok(chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let (lo, hi) = self.inner.size_hint();
        (lo.div_ceil(self.size), hi.map(|h| h.div_ceil(self.size)))
    }
}
