//! Chunked append-only buffers for streaming training data.
//!
//! A [`ChunkedArray`] accumulates values whose total count is unknown up
//! front. Storage grows one fixed-size chunk at a time, so previously filled
//! chunks are never reallocated or copied while appending. The chunk base
//! pointers can be handed to the native engine directly
//! (`LGBM_DatasetCreateFromMats` takes one pointer per matrix), or the
//! content can be coalesced into a contiguous buffer once accumulation ends.

use crate::core::error::{ProviderError, Result};
use num_traits::Zero;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bytes currently held by all chunked arrays in the process.
static TOTAL_CHUNKED_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Get the number of bytes currently allocated by chunked arrays.
pub fn total_chunked_bytes() -> usize {
    TOTAL_CHUNKED_BYTES.load(Ordering::Relaxed)
}

/// Append-only buffer made of equally sized chunks.
///
/// Invariants:
/// - every chunk except the last is completely filled;
/// - `len() == (chunks - 1) * chunk_size + last_chunk_add_count`;
/// - a new chunk is allocated only when a value arrives and the current
///   chunk is full.
pub struct ChunkedArray<T> {
    chunks: Vec<Box<[T]>>,
    chunk_size: usize,
    /// Index of the chunk receiving the next value
    last_chunk_idx: usize,
    /// Number of values already written to the last chunk
    last_idx_in_chunk: usize,
}

impl<T: Copy + Zero> ChunkedArray<T> {
    /// Create an array with one empty chunk of `chunk_size` elements.
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ProviderError::invalid_parameter(
                "chunk_size",
                "0",
                "chunk size must be positive",
            ));
        }

        let mut array = ChunkedArray {
            chunks: Vec::new(),
            chunk_size,
            last_chunk_idx: 0,
            last_idx_in_chunk: 0,
        };
        array.new_chunk();
        Ok(array)
    }

    fn new_chunk(&mut self) {
        self.chunks
            .push(vec![T::zero(); self.chunk_size].into_boxed_slice());
        TOTAL_CHUNKED_BYTES.fetch_add(self.chunk_bytes(), Ordering::Relaxed);
    }

    fn chunk_bytes(&self) -> usize {
        self.chunk_size * std::mem::size_of::<T>()
    }

    /// Append a value, allocating the next chunk if the current one is full.
    pub fn add(&mut self, value: T) {
        if self.chunks.is_empty() {
            self.new_chunk();
        } else if self.last_idx_in_chunk == self.chunk_size {
            self.new_chunk();
            self.last_chunk_idx += 1;
            self.last_idx_in_chunk = 0;
        }

        self.chunks[self.last_chunk_idx][self.last_idx_in_chunk] = value;
        self.last_idx_in_chunk += 1;
    }

    /// Total number of values appended. O(1).
    pub fn get_add_count(&self) -> usize {
        if self.chunks.is_empty() {
            return 0;
        }
        self.last_chunk_idx * self.chunk_size + self.last_idx_in_chunk
    }

    /// Alias of [`get_add_count`](Self::get_add_count).
    pub fn len(&self) -> usize {
        self.get_add_count()
    }

    /// Whether nothing was appended yet.
    pub fn is_empty(&self) -> bool {
        self.get_add_count() == 0
    }

    /// Number of chunks currently allocated.
    pub fn get_chunks_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of values stored in the last chunk.
    pub fn get_last_chunk_add_count(&self) -> usize {
        self.last_idx_in_chunk
    }

    /// Capacity of each chunk.
    pub fn get_chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read a value by chunk coordinates, returning `on_fail` when the
    /// position was never written.
    pub fn getitem(&self, chunk_index: usize, index_within_chunk: usize, on_fail: T) -> T {
        if chunk_index >= self.chunks.len() || index_within_chunk >= self.chunk_size {
            return on_fail;
        }
        if chunk_index == self.last_chunk_idx && index_within_chunk >= self.last_idx_in_chunk {
            return on_fail;
        }
        self.chunks[chunk_index][index_within_chunk]
    }

    /// Overwrite an already appended value.
    pub fn setitem(&mut self, chunk_index: usize, index_within_chunk: usize, value: T) -> Result<()> {
        let in_range = chunk_index < self.chunks.len()
            && index_within_chunk < self.chunk_size
            && (chunk_index < self.last_chunk_idx || index_within_chunk < self.last_idx_in_chunk);
        if !in_range {
            return Err(ProviderError::internal(format!(
                "chunked array position ({}, {}) was never written",
                chunk_index, index_within_chunk
            )));
        }
        self.chunks[chunk_index][index_within_chunk] = value;
        Ok(())
    }

    /// Copy every appended value, in order, into `other`.
    ///
    /// `other` must hold exactly `len()` elements, or the full capacity of all
    /// chunks when `all_valid_addresses` is set (the unused tail of the last
    /// chunk is then copied as well).
    pub fn coalesce_to(&self, other: &mut [T], all_valid_addresses: bool) -> Result<()> {
        if self.chunks.is_empty() {
            return if other.is_empty() {
                Ok(())
            } else {
                Err(ProviderError::internal(
                    "cannot coalesce a released chunked array into a non-empty buffer",
                ))
            };
        }

        let last_chunk_elems = if all_valid_addresses {
            self.chunk_size
        } else {
            self.last_idx_in_chunk
        };
        let expected = self.last_chunk_idx * self.chunk_size + last_chunk_elems;
        if other.len() != expected {
            return Err(ProviderError::internal(format!(
                "coalesce destination holds {} elements, expected {}",
                other.len(),
                expected
            )));
        }

        let mut offset = 0;
        for chunk in &self.chunks[..self.last_chunk_idx] {
            other[offset..offset + self.chunk_size].copy_from_slice(chunk);
            offset += self.chunk_size;
        }
        other[offset..].copy_from_slice(&self.chunks[self.last_chunk_idx][..last_chunk_elems]);
        Ok(())
    }

    /// Copy every appended value into a new contiguous vector.
    pub fn coalesce(&self) -> Vec<T> {
        let mut out = vec![T::zero(); self.len()];
        // Sizes match by construction.
        if self.coalesce_to(&mut out, false).is_err() {
            out.clear();
        }
        out
    }

    /// Base pointer of each chunk, in order.
    ///
    /// The pointers stay valid until the array is released, cleared or dropped.
    pub fn data_as_ptrs(&self) -> Vec<*const T> {
        self.chunks.iter().map(|chunk| chunk.as_ptr()).collect()
    }

    /// Number of rows held by each chunk when the values are row-major rows
    /// of `row_width` elements.
    pub fn rows_per_chunk(&self, row_width: usize) -> Result<Vec<i32>> {
        if row_width == 0 {
            return Err(ProviderError::internal("row width must be positive"));
        }
        if self.chunk_size % row_width != 0 || self.last_idx_in_chunk % row_width != 0 {
            return Err(ProviderError::internal(format!(
                "chunked array does not hold whole rows of width {}",
                row_width
            )));
        }

        let chunks = self.get_chunks_count();
        let mut rows = Vec::with_capacity(chunks);
        for chunk in 0..chunks {
            let count = if chunk + 1 == chunks {
                self.last_idx_in_chunk
            } else {
                self.chunk_size
            };
            rows.push((count / row_width) as i32);
        }
        Ok(rows)
    }

    /// Reset counts, keeping only the first chunk allocated.
    pub fn clear(&mut self) {
        if self.chunks.len() > 1 {
            let freed = (self.chunks.len() - 1) * self.chunk_bytes();
            self.chunks.truncate(1);
            TOTAL_CHUNKED_BYTES.fetch_sub(freed, Ordering::Relaxed);
        }
        self.last_chunk_idx = 0;
        self.last_idx_in_chunk = 0;
    }

    /// Free every chunk. Idempotent.
    pub fn release(&mut self) {
        if !self.chunks.is_empty() {
            let freed = self.chunks.len() * self.chunk_bytes();
            self.chunks = Vec::new();
            TOTAL_CHUNKED_BYTES.fetch_sub(freed, Ordering::Relaxed);
        }
        self.last_chunk_idx = 0;
        self.last_idx_in_chunk = 0;
    }

    /// Whether the storage was released.
    pub fn is_released(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl<T> Drop for ChunkedArray<T> {
    fn drop(&mut self) {
        let freed = self.chunks.len() * self.chunk_size * std::mem::size_of::<T>();
        TOTAL_CHUNKED_BYTES.fetch_sub(freed, Ordering::Relaxed);
    }
}

impl<T> std::fmt::Debug for ChunkedArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedArray")
            .field("chunk_size", &self.chunk_size)
            .field("chunks", &self.chunks.len())
            .field("last_chunk_add_count", &self.last_idx_in_chunk)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_capacity_three_with_seven_values() {
        let mut array = ChunkedArray::<f64>::new(3).unwrap();
        for v in 1..=7 {
            array.add(v as f64);
        }

        assert_eq!(array.get_add_count(), 7);
        assert_eq!(array.get_chunks_count(), 3);
        assert_eq!(array.get_last_chunk_add_count(), 1);

        let mut out = vec![0.0; 7];
        array.coalesce_to(&mut out, false).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_new_chunk_is_lazy() {
        let mut array = ChunkedArray::<i32>::new(2).unwrap();
        assert_eq!(array.get_chunks_count(), 1);
        array.add(1);
        array.add(2);
        assert_eq!(array.get_chunks_count(), 1);
        array.add(3);
        assert_eq!(array.get_chunks_count(), 2);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        assert!(ChunkedArray::<f32>::new(0).is_err());
    }

    #[test]
    fn test_getitem_and_setitem() {
        let mut array = ChunkedArray::<f32>::new(2).unwrap();
        for v in [1.0, 2.0, 3.0] {
            array.add(v);
        }
        assert_eq!(array.getitem(0, 1, -1.0), 2.0);
        assert_eq!(array.getitem(1, 0, -1.0), 3.0);
        assert_eq!(array.getitem(1, 1, -1.0), -1.0);
        assert_eq!(array.getitem(7, 0, -1.0), -1.0);

        array.setitem(0, 0, 10.0).unwrap();
        assert_eq!(array.getitem(0, 0, -1.0), 10.0);
        assert!(array.setitem(1, 1, 5.0).is_err());
    }

    #[test]
    fn test_coalesce_size_mismatch() {
        let mut array = ChunkedArray::<f64>::new(4).unwrap();
        array.add(1.0);
        let mut too_big = vec![0.0; 2];
        assert!(array.coalesce_to(&mut too_big, false).is_err());

        let mut full = vec![0.0; 4];
        array.coalesce_to(&mut full, true).unwrap();
        assert_eq!(full, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut array = ChunkedArray::<f64>::new(3).unwrap();
        array.add(1.0);
        array.release();
        array.release();
        assert!(array.is_released());
        assert_eq!(array.get_add_count(), 0);
        assert!(array.coalesce().is_empty());

        array.add(4.0);
        assert_eq!(array.coalesce(), vec![4.0]);
    }

    #[test]
    fn test_clear_keeps_first_chunk() {
        let mut array = ChunkedArray::<i32>::new(2).unwrap();
        for v in 0..5 {
            array.add(v);
        }
        array.clear();
        assert_eq!(array.get_chunks_count(), 1);
        assert_eq!(array.get_add_count(), 0);
    }

    #[test]
    fn test_rows_per_chunk() {
        let mut array = ChunkedArray::<f64>::new(6).unwrap();
        for v in 0..8 {
            array.add(v as f64);
        }
        assert_eq!(array.rows_per_chunk(2).unwrap(), vec![3, 1]);
        assert!(array.rows_per_chunk(4).is_err());
    }

    proptest! {
        #[test]
        fn prop_coalesce_preserves_append_order(
            values in proptest::collection::vec(-1000i32..1000, 0..200),
            chunk_size in 1usize..17,
        ) {
            let mut array = ChunkedArray::<i32>::new(chunk_size).unwrap();
            for &v in &values {
                array.add(v);
            }
            prop_assert_eq!(array.get_add_count(), values.len());
            prop_assert_eq!(array.coalesce(), values);
        }
    }
}
