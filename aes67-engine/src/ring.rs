//! Lock-free SPSC ring buffer for audio sample transfer.
//!
//! Exactly one producer and one consumer. Head and tail are monotonic
//! counters masked on access; one slot stays empty so full and empty are
//! distinguishable. Hot-path operations never allocate.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Fixed-capacity single-producer single-consumer queue of `T`.
///
/// Methods take `&self`: the producer side (`write`, `write_silence`) and the
/// consumer side (`read`, `peek`, `skip`) may each be driven from one thread
/// at a time. `reset` is not concurrency-safe and may only be called with
/// both sides stopped.
pub struct SpscRing<T> {
    buf: Box<[UnsafeCell<T>]>,
    capacity: usize,
    mask: usize,
    read_index: CachePadded<AtomicUsize>,
    write_index: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T: Copy + Default> SpscRing<T> {
    /// Create a ring with capacity rounded up to the next power of two.
    pub fn new(requested: usize) -> Self {
        let capacity = requested.max(2).next_power_of_two();
        let buf: Box<[UnsafeCell<T>]> = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect();

        Self {
            buf,
            capacity,
            mask: capacity - 1,
            read_index: CachePadded::new(AtomicUsize::new(0)),
            write_index: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames available to read.
    pub fn read_available(&self) -> usize {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    /// Frames available to write (one slot always stays empty).
    pub fn write_available(&self) -> usize {
        self.capacity - 1 - self.read_available()
    }

    /// Write frames from `data`. Returns the number actually written; a short
    /// return is an overflow, not an error.
    pub fn write(&self, data: &[T]) -> usize {
        let w = self.write_index.load(Ordering::Relaxed);
        let r = self.read_index.load(Ordering::Acquire);
        let available = self.capacity - 1 - w.wrapping_sub(r);
        let count = data.len().min(available);
        if count == 0 {
            return 0;
        }

        let idx = w & self.mask;
        let first = count.min(self.capacity - idx);
        unsafe {
            let base = self.buf.as_ptr() as *mut T;
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(idx), first);
            if count > first {
                std::ptr::copy_nonoverlapping(data.as_ptr().add(first), base, count - first);
            }
        }

        self.write_index.store(w.wrapping_add(count), Ordering::Release);
        count
    }

    /// Write `frames` zero frames. Equivalent to `write` of zeros.
    pub fn write_silence(&self, frames: usize) -> usize {
        let w = self.write_index.load(Ordering::Relaxed);
        let r = self.read_index.load(Ordering::Acquire);
        let available = self.capacity - 1 - w.wrapping_sub(r);
        let count = frames.min(available);
        if count == 0 {
            return 0;
        }

        let idx = w & self.mask;
        let first = count.min(self.capacity - idx);
        unsafe {
            let base = self.buf.as_ptr() as *mut T;
            for i in 0..first {
                *base.add(idx + i) = T::default();
            }
            for i in 0..count - first {
                *base.add(i) = T::default();
            }
        }

        self.write_index.store(w.wrapping_add(count), Ordering::Release);
        count
    }

    /// Read frames into `dst`. Returns the number actually read; a short
    /// return is an underflow, not an error.
    pub fn read(&self, dst: &mut [T]) -> usize {
        let count = self.copy_out(dst);
        if count > 0 {
            let r = self.read_index.load(Ordering::Relaxed);
            self.read_index.store(r.wrapping_add(count), Ordering::Release);
        }
        count
    }

    /// Copy frames into `dst` without consuming them.
    pub fn peek(&self, dst: &mut [T]) -> usize {
        self.copy_out(dst)
    }

    /// Discard up to `frames` frames. Returns the number skipped.
    pub fn skip(&self, frames: usize) -> usize {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Relaxed);
        let count = frames.min(w.wrapping_sub(r));
        if count > 0 {
            self.read_index.store(r.wrapping_add(count), Ordering::Release);
        }
        count
    }

    /// Empty the ring and zero its storage. Only safe with no concurrent
    /// accessors; call with I/O stopped.
    pub fn reset(&self) {
        self.read_index.store(0, Ordering::Relaxed);
        self.write_index.store(0, Ordering::Relaxed);
        unsafe {
            let base = self.buf.as_ptr() as *mut T;
            for i in 0..self.capacity {
                *base.add(i) = T::default();
            }
        }
    }

    fn copy_out(&self, dst: &mut [T]) -> usize {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Relaxed);
        let count = dst.len().min(w.wrapping_sub(r));
        if count == 0 {
            return 0;
        }

        let idx = r & self.mask;
        let first = count.min(self.capacity - idx);
        unsafe {
            let base = self.buf.as_ptr() as *const T;
            std::ptr::copy_nonoverlapping(base.add(idx), dst.as_mut_ptr(), first);
            if count > first {
                std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), count - first);
            }
        }
        count
    }
}

/// Interleaved 32-bit audio samples (24-bit left-justified containers).
pub type AudioRing = SpscRing<i32>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn capacity_rounds_to_power_of_two() {
        assert_eq!(SpscRing::<i32>::new(100).capacity(), 128);
        assert_eq!(SpscRing::<i32>::new(128).capacity(), 128);
        assert_eq!(SpscRing::<i32>::new(129).capacity(), 256);
    }

    #[test]
    fn availability_invariant() {
        let ring = SpscRing::<i32>::new(64);
        assert_eq!(ring.read_available() + ring.write_available(), 63);

        ring.write(&[1i32; 40]);
        assert_eq!(ring.read_available(), 40);
        assert_eq!(ring.read_available() + ring.write_available(), 63);

        let mut out = [0i32; 10];
        ring.read(&mut out);
        assert_eq!(ring.read_available() + ring.write_available(), 63);
    }

    #[test]
    fn fifo_across_wrap() {
        // Requested 100 rounds to 128. Write 80, read 60, write 80: the
        // second write wraps. Reading 20 then 80 must reproduce the second
        // write exactly.
        let ring = SpscRing::<i32>::new(100);
        assert_eq!(ring.capacity(), 128);

        let first: Vec<i32> = (0..80).collect();
        assert_eq!(ring.write(&first), 80);

        let mut out = [0i32; 60];
        assert_eq!(ring.read(&mut out), 60);
        assert_eq!(&out[..], &first[..60]);

        let second: Vec<i32> = (1000..1080).collect();
        assert_eq!(ring.write(&second), 80);

        let mut tail = [0i32; 20];
        assert_eq!(ring.read(&mut tail), 20);
        assert_eq!(&tail[..], &first[60..80]);

        let mut wrapped = [0i32; 80];
        assert_eq!(ring.read(&mut wrapped), 80);
        assert_eq!(&wrapped[..], &second[..]);
    }

    #[test]
    fn full_ring_rejects_extra_frames() {
        let ring = SpscRing::<i32>::new(8);
        // Usable capacity is 7
        assert_eq!(ring.write(&[7i32; 20]), 7);
        assert_eq!(ring.write(&[7i32; 1]), 0);
        assert_eq!(ring.write_available(), 0);
    }

    #[test]
    fn empty_read_returns_zero() {
        let ring = SpscRing::<i32>::new(8);
        let mut out = [0i32; 4];
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn peek_does_not_consume() {
        let ring = SpscRing::<i32>::new(16);
        ring.write(&[1, 2, 3, 4]);

        let mut out = [0i32; 4];
        assert_eq!(ring.peek(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(ring.read_available(), 4);

        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn skip_advances_read_position() {
        let ring = SpscRing::<i32>::new(16);
        ring.write(&[1, 2, 3, 4, 5]);

        assert_eq!(ring.skip(2), 2);
        let mut out = [0i32; 3];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [3, 4, 5]);

        assert_eq!(ring.skip(10), 0);
    }

    #[test]
    fn write_silence_is_zero_frames() {
        let ring = SpscRing::<i32>::new(16);
        ring.write(&[9, 9]);
        assert_eq!(ring.write_silence(3), 3);

        let mut out = [1i32; 5];
        assert_eq!(ring.read(&mut out), 5);
        assert_eq!(out, [9, 9, 0, 0, 0]);
    }

    #[test]
    fn reset_empties_the_ring() {
        let ring = SpscRing::<i32>::new(16);
        ring.write(&[1, 2, 3]);
        ring.reset();
        assert_eq!(ring.read_available(), 0);
        assert_eq!(ring.write_available(), 15);
    }

    #[test]
    fn concurrent_fifo_conservation() {
        // One producer, one consumer; the read stream must be a prefix of
        // the write stream at all times.
        let ring = Arc::new(SpscRing::<u32>::new(256));
        let producer_ring = ring.clone();

        const TOTAL: u32 = 100_000;
        let producer = std::thread::spawn(move || {
            let mut next = 0u32;
            while next < TOTAL {
                let chunk: Vec<u32> = (next..(next + 17).min(TOTAL)).collect();
                let written = producer_ring.write(&chunk);
                next += written as u32;
                if written == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0u32;
        let mut out = [0u32; 31];
        while expected < TOTAL {
            let n = ring.read(&mut out);
            for &value in &out[..n] {
                assert_eq!(value, expected);
                expected += 1;
            }
            if n == 0 {
                std::thread::yield_now();
            }
        }

        producer.join().unwrap();
    }
}
