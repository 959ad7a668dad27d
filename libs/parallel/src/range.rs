//! One- and two-dimensional iteration domains.
//!
//! A [`Range`] describes a strided, half-open interval. It can be split into
//! contiguous sub-ranges whose concatenation visits exactly the same indices,
//! which is how work is handed to the thread pool in cache-friendly chunks.
//! A [`BlockedRange`] tiles two ranges in row-major order for grid-shaped work.

use std::num::NonZeroUsize;

use crate::error::{Error, Result};

/// A half-open interval `[start, end)` visited in increments of `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    start: i64,
    end: i64,
    step: i64,
}

impl Range {
    /// Creates a new [`Range`].
    ///
    /// Returns an error if `step` is not positive, if `end < start`, or if the
    /// number of indices does not fit in a `usize`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use parallel::range::Range;
    /// let range = Range::new(0, 10, 3).unwrap();
    /// assert_eq!(range.iter().collect::<Vec<_>>(), vec![0, 3, 6, 9]);
    /// assert!(Range::new(5, 0, 1).is_err());
    /// ```
    pub fn new(start: i64, end: i64, step: i64) -> Result<Self> {
        if step <= 0 || end < start || usize::try_from(span_len(start, end, step)).is_err() {
            return Err(Error::InvalidRange { start, end, step });
        }
        Ok(Self { start, end, step })
    }

    /// Creates a new [`Range`] with a step of 1.
    pub fn unit(start: i64, end: i64) -> Result<Self> {
        Self::new(start, end, 1)
    }

    /// The first index of the range.
    #[inline]
    pub fn start(&self) -> i64 {
        self.start
    }

    /// The exclusive upper bound of the range.
    #[inline]
    pub fn end(&self) -> i64 {
        self.end
    }

    /// The distance between consecutive indices.
    #[inline]
    pub fn step(&self) -> i64 {
        self.step
    }

    /// The number of indices visited by the range.
    pub fn len(&self) -> usize {
        // Fits: checked in `Range::new`.
        span_len(self.start, self.end, self.step) as usize
    }

    /// Returns `true` if the range visits no indices.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Iterates over the indices of the range.
    pub fn iter(&self) -> impl Iterator<Item = i64> {
        (self.start..self.end).step_by(self.step as usize)
    }

    /// Splits the range into contiguous sub-ranges of at most `chunk` indices each.
    ///
    /// The sub-ranges are returned in order and their concatenation visits
    /// exactly the indices of `self`. A `chunk` of at least [`Range::len`] yields
    /// a single sub-range. An empty range yields no sub-ranges.
    ///
    /// # Examples
    ///
    /// ```
    /// # use parallel::range::Range;
    /// let range = Range::unit(0, 10).unwrap();
    /// let parts = range.split(4).unwrap();
    /// assert_eq!(parts.len(), 3);
    /// assert_eq!(parts[2], Range::unit(8, 10).unwrap());
    /// ```
    pub fn split(&self, chunk: usize) -> Result<Vec<Range>> {
        let chunk = NonZeroUsize::new(chunk).ok_or(Error::ZeroChunk)?;
        Ok(self.split_nonzero(chunk))
    }

    fn split_nonzero(&self, chunk: NonZeroUsize) -> Vec<Range> {
        let span = (chunk.get() as i64).saturating_mul(self.step);
        let mut out = Vec::with_capacity(self.len().div_ceil(chunk.get()));
        let mut lo = self.start;
        while lo < self.end {
            let hi = lo.saturating_add(span).min(self.end);
            out.push(Range {
                start: lo,
                end: hi,
                step: self.step,
            });
            lo = hi;
        }
        out
    }

    /// Pairs the range with a chunk size, producing a [`Domain`] for the parallel patterns.
    pub fn chunked(self, chunk: usize) -> Result<Chunked> {
        Ok(Chunked {
            range: self,
            chunk: NonZeroUsize::new(chunk).ok_or(Error::ZeroChunk)?,
        })
    }
}

/// The number of indices in `[start, end)` with stride `step`, free of overflow.
fn span_len(start: i64, end: i64, step: i64) -> i128 {
    let (start, end, step) = (start as i128, end as i128, step as i128);
    (end - start + step - 1) / step
}

/// An iteration domain that can be cut into independently executable chunks.
pub trait Domain {
    /// One unit of dispatched work.
    type Chunk: Send + 'static;

    /// Splits the domain into chunks, in a deterministic order.
    fn chunks(&self) -> Vec<Self::Chunk>;
}

/// A one-dimensional [`Range`] with a fixed chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunked {
    range: Range,
    chunk: NonZeroUsize,
}

impl Chunked {
    /// The underlying range.
    pub fn range(&self) -> Range {
        self.range
    }
}

impl Domain for Chunked {
    type Chunk = Range;

    fn chunks(&self) -> Vec<Range> {
        self.range.split_nonzero(self.chunk)
    }
}

/// One tile of a [`BlockedRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    /// The row indices covered by the tile.
    pub rows: Range,
    /// The column indices covered by the tile.
    pub cols: Range,
}

impl Block {
    /// Iterates over the `(row, col)` pairs of the tile in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.rows
            .iter()
            .flat_map(move |r| self.cols.iter().map(move |c| (r, c)))
    }

    /// The number of `(row, col)` pairs in the tile.
    pub fn len(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    /// Returns `true` if the tile has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A two-dimensional domain tiled into blocks of `block_rows x block_cols`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockedRange {
    rows: Range,
    cols: Range,
    block_rows: NonZeroUsize,
    block_cols: NonZeroUsize,
}

impl BlockedRange {
    /// Creates a new [`BlockedRange`].
    ///
    /// Returns an error if either block dimension is zero.
    pub fn new(rows: Range, cols: Range, block_rows: usize, block_cols: usize) -> Result<Self> {
        Ok(Self {
            rows,
            cols,
            block_rows: NonZeroUsize::new(block_rows).ok_or(Error::ZeroChunk)?,
            block_cols: NonZeroUsize::new(block_cols).ok_or(Error::ZeroChunk)?,
        })
    }

    /// The row range.
    pub fn rows(&self) -> Range {
        self.rows
    }

    /// The column range.
    pub fn cols(&self) -> Range {
        self.cols
    }

    /// The tiles of the domain in row-major order.
    pub fn blocks(&self) -> Vec<Block> {
        let cols = self.cols.split_nonzero(self.block_cols);
        self.rows
            .split_nonzero(self.block_rows)
            .into_iter()
            .flat_map(|rows| cols.iter().map(move |&c| Block { rows, cols: c }))
            .collect()
    }
}

impl Domain for BlockedRange {
    type Chunk = Block;

    fn chunks(&self) -> Vec<Block> {
        self.blocks()
    }
}
