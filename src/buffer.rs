//! Frame buffers shared between the application and the driver.
//!
//! A [`FrameBuffer`] is a fixed-length allocation behind a reference count.
//! The driver writes into the same memory the application later reads, so a
//! delivered frame is never copied. The allocation cannot be resized or moved
//! while any handle to it is alive, which is what lets a channel loan it to the
//! driver as a transfer destination.

use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
}

/// Element type of a frame: `u8` for video, `u16` for depth.
pub trait Sample: sealed::Sealed + Copy + Default + Send + Sync + 'static {}

impl Sample for u8 {}
impl Sample for u16 {}

/// Identity of a frame buffer allocation. Two handles to the same buffer
/// share an id; distinct allocations never do while both are alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

/// Reference-counted handle to a fixed-size frame buffer.
///
/// Cloning the handle does not copy the frame.
pub struct FrameBuffer<T> {
    inner: Arc<Mutex<Box<[T]>>>,
    len: usize,
}

impl<T: Sample> FrameBuffer<T> {
    /// Allocate a zeroed buffer of `len` samples.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![T::default(); len])
    }

    /// Take ownership of existing storage. Spare capacity is released.
    pub fn from_vec(samples: Vec<T>) -> Self {
        let len = samples.len();
        Self {
            inner: Arc::new(Mutex::new(samples.into_boxed_slice())),
            len,
        }
    }

    /// Copy the current contents out of the buffer.
    pub fn to_vec(&self) -> Vec<T> {
        self.lock().to_vec()
    }
}

impl<T> FrameBuffer<T> {
    /// Length in samples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn id(&self) -> BufferId {
        BufferId(Arc::as_ptr(&self.inner) as usize)
    }

    /// Whether both handles refer to the same allocation.
    pub fn same_buffer(&self, other: &FrameBuffer<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Lock the buffer for reading or writing.
    pub fn lock(&self) -> BufferGuard<'_, T> {
        BufferGuard(self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Lock the buffer if nobody else holds it.
    pub fn try_lock(&self) -> Option<BufferGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(BufferGuard(guard)),
            Err(TryLockError::Poisoned(poisoned)) => Some(BufferGuard(poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

impl<T> Clone for FrameBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            len: self.len,
        }
    }
}

impl<T> fmt::Debug for FrameBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id())
            .field("len", &self.len)
            .finish()
    }
}

/// Exclusive access to a frame's samples. Derefs to a slice, so the length
/// is fixed.
pub struct BufferGuard<'a, T>(MutexGuard<'a, Box<[T]>>);

impl<T> Deref for BufferGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> DerefMut for BufferGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

/// Fixed set of preallocated buffers behind a bounded handoff queue.
///
/// Implements the double-buffer pattern: the producer takes the next free
/// buffer, the consumer hands the delivered buffer to a worker, and the worker
/// releases it once done. A buffer is only ever in one place: queued here,
/// installed with the driver, or held by the application.
///
/// ```
/// use freenect::BufferPool;
///
/// let pool: BufferPool<u8> = BufferPool::new(2, 16);
/// let a = pool.try_take().unwrap();
/// let b = pool.try_take().unwrap();
/// assert!(!a.same_buffer(&b));
/// assert!(pool.try_take().is_none());
/// pool.release(a);
/// assert_eq!(pool.available(), 1);
/// ```
pub struct BufferPool<T> {
    free_tx: Sender<FrameBuffer<T>>,
    free_rx: Receiver<FrameBuffer<T>>,
    frame_len: usize,
}

impl<T: Sample> BufferPool<T> {
    /// Preallocate `count` buffers of `frame_len` samples each.
    pub fn new(count: usize, frame_len: usize) -> Self {
        let (free_tx, free_rx) = crossbeam_channel::bounded(count);
        for _ in 0..count {
            // Capacity equals count, so this cannot fail.
            let _ = free_tx.try_send(FrameBuffer::new(frame_len));
        }
        Self {
            free_tx,
            free_rx,
            frame_len,
        }
    }

    /// Block until a free buffer is available.
    pub fn take(&self) -> FrameBuffer<T> {
        match self.free_rx.recv() {
            Ok(buf) => buf,
            // The pool holds its own sender, so the queue never disconnects.
            Err(_) => FrameBuffer::new(self.frame_len),
        }
    }

    /// Take a free buffer without blocking.
    pub fn try_take(&self) -> Option<FrameBuffer<T>> {
        self.free_rx.try_recv().ok()
    }

    /// Return a buffer to the pool.
    ///
    /// Buffers of the wrong length, or beyond the pool's capacity, are
    /// dropped with a warning.
    pub fn release(&self, buf: FrameBuffer<T>) {
        if buf.len() != self.frame_len {
            log::warn!(
                "Dropping foreign buffer of {} samples (pool frames are {})",
                buf.len(),
                self.frame_len
            );
            return;
        }
        if self.free_tx.try_send(buf).is_err() {
            log::warn!("Buffer pool full, dropping released buffer");
        }
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Producer callback drawing from this pool. Blocks the event loop until
    /// the consumer side releases a buffer.
    pub fn producer(&self) -> impl FnMut(usize) -> Option<FrameBuffer<T>> + Send + 'static {
        let pool = self.clone();
        move |_samples| Some(pool.take())
    }
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            free_tx: self.free_tx.clone(),
            free_rx: self.free_rx.clone(),
            frame_len: self.frame_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_allocation() {
        let a: FrameBuffer<u16> = FrameBuffer::new(8);
        let b = a.clone();
        assert_eq!(a.id(), b.id());
        assert!(a.same_buffer(&b));

        b.lock()[3] = 42;
        assert_eq!(a.to_vec()[3], 42);

        let c: FrameBuffer<u16> = FrameBuffer::new(8);
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_try_lock_while_held() {
        let buf: FrameBuffer<u8> = FrameBuffer::from_vec(vec![1, 2, 3]);
        let guard = buf.lock();
        assert!(buf.try_lock().is_none());
        drop(guard);
        assert_eq!(&*buf.try_lock().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_pool_rejects_foreign_buffers() {
        let pool: BufferPool<u8> = BufferPool::new(1, 4);
        let _held = pool.take();
        pool.release(FrameBuffer::new(5));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_pool_producer_blocks_until_release() {
        let pool: BufferPool<u8> = BufferPool::new(1, 4);
        let mut producer = pool.producer();
        let first = producer(4).unwrap();

        let releaser = pool.clone();
        let held = first.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            releaser.release(held);
        });

        let second = producer(4).unwrap();
        assert!(second.same_buffer(&first));
        handle.join().unwrap();
    }
}
