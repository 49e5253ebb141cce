//! Word-backed byte buffer shared between one writer and its readers.
//!
//! [`AtomicBuffer`] stores bytes in `AtomicU32` words so the writer and
//! readers may touch the same memory from different threads without
//! `unsafe`. Byte `i` of the buffer is bits `8 * (i % 4)..` of word `i / 4`,
//! which makes the byte view little-endian on every host.
//!
//! Plain accessors use relaxed ordering. Publication happens only through
//! [`put_i32_ordered`](AtomicBuffer::put_i32_ordered) (release) and
//! [`get_i32_volatile`](AtomicBuffer::get_i32_volatile) (acquire), the
//! classic single-writer handoff.
//!
//! Sub-word writes are a load followed by a store, so a given word must
//! only ever be written by one thread at a time. Frames are aligned to 32
//! bytes, so distinct frames never share a word.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::LogBufferError;

const WORD: usize = 4;

/// A fixed-capacity byte buffer with ordered word publication.
pub struct AtomicBuffer {
    words: Box<[AtomicU32]>,
    capacity: usize,
}

// Compile-time assertion: AtomicBuffer must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<AtomicBuffer>();
};

impl AtomicBuffer {
    /// Create a zeroed buffer of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a multiple of 4.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity % WORD == 0,
            "AtomicBuffer capacity must be a multiple of 4, got {capacity}"
        );
        let words = (0..capacity / WORD).map(|_| AtomicU32::new(0)).collect();
        Self { words, capacity }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check that `length` bytes starting at `index` are inside the buffer.
    pub fn bounds_check(&self, index: usize, length: usize) -> Result<(), LogBufferError> {
        match index.checked_add(length) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(LogBufferError::OutOfBounds {
                index,
                length,
                capacity: self.capacity,
            }),
        }
    }

    fn checked(&self, index: usize, length: usize) {
        if let Err(e) = self.bounds_check(index, length) {
            panic!("{e}");
        }
    }

    /// Read one byte.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn get_u8(&self, index: usize) -> u8 {
        self.checked(index, 1);
        let word = self.words[index / WORD].load(Ordering::Relaxed);
        (word >> ((index % WORD) * 8)) as u8
    }

    /// Write one byte.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn put_u8(&self, index: usize, value: u8) {
        self.checked(index, 1);
        let slot = &self.words[index / WORD];
        let shift = (index % WORD) * 8;
        let word = slot.load(Ordering::Relaxed);
        let updated = (word & !(0xFF << shift)) | (u32::from(value) << shift);
        slot.store(updated, Ordering::Relaxed);
    }

    /// Copy `dst.len()` bytes starting at `index` into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        self.checked(index, dst.len());
        let mut i = 0;
        while i < dst.len() {
            let at = index + i;
            if at % WORD == 0 && dst.len() - i >= WORD {
                let word = self.words[at / WORD].load(Ordering::Relaxed);
                dst[i..i + WORD].copy_from_slice(&word.to_le_bytes());
                i += WORD;
            } else {
                dst[i] = self.get_u8(at);
                i += 1;
            }
        }
    }

    /// Copy `src` into the buffer starting at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn put_bytes(&self, index: usize, src: &[u8]) {
        self.checked(index, src.len());
        let mut i = 0;
        while i < src.len() {
            let at = index + i;
            if at % WORD == 0 && src.len() - i >= WORD {
                let word = u32::from_le_bytes([src[i], src[i + 1], src[i + 2], src[i + 3]]);
                self.words[at / WORD].store(word, Ordering::Relaxed);
                i += WORD;
            } else {
                self.put_u8(at, src[i]);
                i += 1;
            }
        }
    }

    /// Fill `length` bytes starting at `index` with `value`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn set_memory(&self, index: usize, length: usize, value: u8) {
        self.checked(index, length);
        let fill = u32::from_le_bytes([value; WORD]);
        let mut i = 0;
        while i < length {
            let at = index + i;
            if at % WORD == 0 && length - i >= WORD {
                self.words[at / WORD].store(fill, Ordering::Relaxed);
                i += WORD;
            } else {
                self.put_u8(at, value);
                i += 1;
            }
        }
    }

    /// Read a little-endian `u16`.
    pub fn get_u16_le(&self, index: usize) -> u16 {
        let mut b = [0u8; 2];
        self.get_bytes(index, &mut b);
        u16::from_le_bytes(b)
    }

    /// Write a little-endian `u16`.
    pub fn put_u16_le(&self, index: usize, value: u16) {
        self.put_bytes(index, &value.to_le_bytes());
    }

    /// Read a little-endian `i32` with relaxed ordering.
    pub fn get_i32_le(&self, index: usize) -> i32 {
        let mut b = [0u8; 4];
        self.get_bytes(index, &mut b);
        i32::from_le_bytes(b)
    }

    /// Write a little-endian `i32` with relaxed ordering.
    pub fn put_i32_le(&self, index: usize, value: i32) {
        self.put_bytes(index, &value.to_le_bytes());
    }

    /// Read a little-endian `i64`.
    pub fn get_i64_le(&self, index: usize) -> i64 {
        let mut b = [0u8; 8];
        self.get_bytes(index, &mut b);
        i64::from_le_bytes(b)
    }

    /// Write a little-endian `i64`.
    pub fn put_i64_le(&self, index: usize, value: i64) {
        self.put_bytes(index, &value.to_le_bytes());
    }

    /// Store a little-endian `i32` with release ordering.
    ///
    /// Every write made by this thread before the call is visible to a
    /// reader that observes the stored value through
    /// [`get_i32_volatile`](Self::get_i32_volatile).
    pub fn put_i32_ordered(&self, index: usize, value: i32) -> Result<(), LogBufferError> {
        self.word_slot(index)?.store(value as u32, Ordering::Release);
        Ok(())
    }

    /// Load a little-endian `i32` with acquire ordering.
    pub fn get_i32_volatile(&self, index: usize) -> Result<i32, LogBufferError> {
        Ok(self.word_slot(index)?.load(Ordering::Acquire) as i32)
    }

    fn word_slot(&self, index: usize) -> Result<&AtomicU32, LogBufferError> {
        if index % WORD != 0 {
            return Err(LogBufferError::Misaligned {
                offset: index,
                alignment: WORD,
            });
        }
        self.bounds_check(index, WORD)?;
        Ok(&self.words[index / WORD])
    }

    /// Copy `length` bytes starting at `index` into a new vector.
    pub fn to_vec(&self, index: usize, length: usize) -> Vec<u8> {
        let mut out = vec![0u8; length];
        self.get_bytes(index, &mut out);
        out
    }
}

impl std::fmt::Debug for AtomicBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("capacity", &self.capacity)
            .finish()
    }
}
