//! Chunked value segments.
//!
//! A [`Segment`] is a sequence of output values, grouped into [`Chunk`]s and
//! terminated by a result. The interpreter consumes segments through exactly
//! two operations: [`Segment::split_at`] (for `uncons`) and
//! [`Segment::fold_into`] (for folding emitted output). This implementation
//! is strict; laziness lives in the algebra term, not in the segment.

use std::collections::VecDeque;

use crate::error::Result;

/// A strict run of output values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<O>(Vec<O>);

impl<O> Chunk<O> {
    /// Creates a chunk from a vector of values.
    #[must_use]
    pub fn from_vec(values: Vec<O>) -> Self {
        Self(values)
    }

    /// Creates a single-element chunk.
    #[must_use]
    pub fn singleton(value: O) -> Self {
        Self(vec![value])
    }

    /// Number of values in the chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the chunk holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the values.
    pub fn iter(&self) -> std::slice::Iter<'_, O> {
        self.0.iter()
    }

    /// Consumes the chunk into its backing vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<O> {
        self.0
    }

    /// Concatenates a list of chunks into one.
    #[must_use]
    pub fn concat(chunks: Vec<Chunk<O>>) -> Self {
        let mut out = Vec::with_capacity(chunks.iter().map(Chunk::len).sum());
        for chunk in chunks {
            out.extend(chunk.0);
        }
        Self(out)
    }
}

impl<O> IntoIterator for Chunk<O> {
    type Item = O;
    type IntoIter = std::vec::IntoIter<O>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<O> FromIterator<O> for Chunk<O> {
    fn from_iter<I: IntoIterator<Item = O>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Outcome of [`Segment::split_at`].
#[derive(Debug)]
pub enum SplitAt<O, R> {
    /// The segment ran out of values before `n` were taken.
    Exhausted {
        /// The segment's terminal result.
        result: R,
        /// Everything that was taken.
        taken: Vec<Chunk<O>>,
    },
    /// `n` values were taken, or the step budget ran out first.
    Split {
        /// The values taken so far.
        taken: Vec<Chunk<O>>,
        /// The untouched remainder.
        rest: Segment<O, R>,
    },
}

/// A sequence of chunks terminating in a result value.
#[derive(Debug, Clone)]
pub struct Segment<O, R> {
    chunks: VecDeque<Chunk<O>>,
    result: R,
}

impl<O, R> Segment<O, R> {
    /// A segment with no values and the given result.
    #[must_use]
    pub fn pure(result: R) -> Self {
        Self {
            chunks: VecDeque::new(),
            result,
        }
    }

    /// Builds a segment from chunks and a terminal result.
    #[must_use]
    pub fn from_chunks(chunks: Vec<Chunk<O>>, result: R) -> Self {
        Self {
            chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
            result,
        }
    }

    /// Total number of values across all chunks.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    /// Takes up to `n` values, visiting at most `max_steps` chunks.
    ///
    /// Each chunk visited (even partially) costs one step of the budget. If
    /// the budget runs out before `n` values are collected, the split
    /// returns early with what was taken.
    #[must_use]
    pub fn split_at(mut self, n: usize, max_steps: u64) -> SplitAt<O, R> {
        let mut taken = Vec::new();
        let mut wanted = n;
        let mut steps = max_steps;
        while wanted > 0 && steps > 0 {
            let Some(chunk) = self.chunks.pop_front() else {
                return SplitAt::Exhausted {
                    result: self.result,
                    taken,
                };
            };
            steps -= 1;
            if chunk.len() <= wanted {
                wanted -= chunk.len();
                taken.push(chunk);
            } else {
                let mut values = chunk.into_vec();
                let rest = values.split_off(wanted);
                taken.push(Chunk::from_vec(values));
                self.chunks.push_front(Chunk::from_vec(rest));
                wanted = 0;
            }
        }
        if self.chunks.is_empty() {
            SplitAt::Exhausted {
                result: self.result,
                taken,
            }
        } else {
            SplitAt::Split { taken, rest: self }
        }
    }

    /// Maps the terminal result, leaving the values untouched.
    #[must_use]
    pub fn map_result<S>(self, f: impl FnOnce(R) -> S) -> Segment<O, S> {
        Segment {
            chunks: self.chunks,
            result: f(self.result),
        }
    }

    /// Folds every value into `acc` through a fallible combiner, returning
    /// the terminal result.
    ///
    /// On combiner failure the error is returned and the remaining values
    /// are dropped; `acc` keeps everything absorbed so far.
    pub fn fold_into<B>(
        self,
        acc: &mut B,
        g: &mut impl FnMut(&mut B, O) -> Result<()>,
    ) -> Result<R> {
        for chunk in self.chunks {
            for value in chunk {
                g(acc, value)?;
            }
        }
        Ok(self.result)
    }
}

impl<O> Segment<O, ()> {
    /// A unit-result segment emitting the given values as one chunk.
    #[must_use]
    pub fn emit(values: impl IntoIterator<Item = O>) -> Self {
        Self::from_chunks(vec![values.into_iter().collect()], ())
    }

    /// A unit-result segment emitting one value.
    #[must_use]
    pub fn emit_one(value: O) -> Self {
        Self::emit(std::iter::once(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(chunks: Vec<Vec<u32>>) -> Segment<u32, &'static str> {
        Segment::from_chunks(chunks.into_iter().map(Chunk::from_vec).collect(), "done")
    }

    #[test]
    fn split_within_first_chunk() {
        let s = seg(vec![vec![1, 2, 3, 4]]);
        match s.split_at(2, 100) {
            SplitAt::Split { taken, rest } => {
                assert_eq!(Chunk::concat(taken).into_vec(), vec![1, 2]);
                assert_eq!(rest.value_count(), 2);
            }
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn split_across_chunks() {
        let s = seg(vec![vec![1, 2], vec![3, 4], vec![5]]);
        match s.split_at(3, 100) {
            SplitAt::Split { taken, rest } => {
                assert_eq!(Chunk::concat(taken).into_vec(), vec![1, 2, 3]);
                assert_eq!(rest.value_count(), 2);
            }
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn split_exhausts_small_segment() {
        let s = seg(vec![vec![1, 2]]);
        match s.split_at(5, 100) {
            SplitAt::Exhausted { result, taken } => {
                assert_eq!(result, "done");
                assert_eq!(Chunk::concat(taken).into_vec(), vec![1, 2]);
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
    }

    #[test]
    fn split_respects_step_budget() {
        let s = seg(vec![vec![1], vec![2], vec![3]]);
        match s.split_at(3, 2) {
            SplitAt::Split { taken, rest } => {
                assert_eq!(Chunk::concat(taken).into_vec(), vec![1, 2]);
                assert_eq!(rest.value_count(), 1);
            }
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn fold_reaches_terminal_result() {
        let s = seg(vec![vec![1, 2], vec![3]]);
        let mut acc = Vec::new();
        let result = s
            .fold_into(&mut acc, &mut |acc, v| {
                acc.push(v);
                Ok(())
            })
            .expect("fold succeeds");
        assert_eq!(result, "done");
        assert_eq!(acc, vec![1, 2, 3]);
    }

    #[test]
    fn fold_error_keeps_partial_accumulator() {
        let s = seg(vec![vec![1, 2, 3]]);
        let mut acc = Vec::new();
        let err = s
            .fold_into(&mut acc, &mut |acc, v| {
                if v == 3 {
                    Err(crate::error::Error::user("combiner"))
                } else {
                    acc.push(v);
                    Ok(())
                }
            })
            .expect_err("combiner fails");
        assert_eq!(err, crate::error::Error::user("combiner"));
        assert_eq!(acc, vec![1, 2]);
    }

    #[test]
    fn empty_chunks_are_dropped_on_construction() {
        let s = Segment::from_chunks(vec![Chunk::from_vec(Vec::<u32>::new())], ());
        assert_eq!(s.value_count(), 0);
    }
}
