//! Byte-addressable view over shared memory with aligned atomic access
//!
//! An `AtomicBuffer` is a `(base pointer, capacity)` window onto a region
//! that may be written concurrently by another thread or process. Plain
//! accessors compile to ordinary loads and stores; the `_volatile` and
//! `_ordered` variants are acquire loads and release stores, which is the
//! only ordering contract the inter-process protocols rely on.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use crate::concurrent::bits::Index;

/// View over a byte region shared between threads or processes.
///
/// The view is `Copy`; it does not own the region. Whoever creates the
/// view must guarantee the region outlives every copy of it, which the
/// client does by holding mapped files alive behind `Arc`.
#[derive(Clone, Copy, Debug)]
pub struct AtomicBuffer {
    ptr: *mut u8,
    capacity: Index,
}

unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

/// Scratch storage with the alignment the atomic accessors require.
///
/// Mapped regions are page-aligned, but stack and heap byte arrays are
/// not; wrap one of these instead when staging messages.
#[repr(C, align(16))]
pub struct AlignedBuffer<const N: usize>(pub [u8; N]);

impl<const N: usize> AlignedBuffer<N> {
    pub fn new() -> Self {
        Self([0u8; N])
    }

    pub fn buffer(&mut self) -> AtomicBuffer {
        AtomicBuffer::wrap_slice(&mut self.0)
    }
}

impl<const N: usize> Default for AlignedBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicBuffer {
    /// Wrap a raw region.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `capacity` bytes for
    /// the lifetime of this view and every copy made from it.
    pub unsafe fn wrap(ptr: *mut u8, capacity: Index) -> Self {
        debug_assert!(!ptr.is_null());
        debug_assert!(capacity >= 0);
        Self { ptr, capacity }
    }

    /// Wrap a mutable byte slice, e.g. a stack scratch buffer
    pub fn wrap_slice(slice: &mut [u8]) -> Self {
        unsafe { Self::wrap(slice.as_mut_ptr(), slice.len() as Index) }
    }

    /// Narrow this view to `[offset, offset + length)`
    pub fn view(&self, offset: Index, length: Index) -> Self {
        self.bounds_check(offset, length);
        unsafe { Self::wrap(self.ptr.add(offset as usize), length) }
    }

    pub fn capacity(&self) -> Index {
        self.capacity
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    fn bounds_check(&self, offset: Index, length: Index) {
        assert!(
            offset >= 0 && length >= 0 && offset + length <= self.capacity,
            "index out of bounds: offset={} length={} capacity={}",
            offset,
            length,
            self.capacity
        );
    }

    #[inline]
    unsafe fn atomic_i32(&self, offset: Index) -> &AtomicI32 {
        debug_assert_eq!(offset & 3, 0, "unaligned 32-bit access at {}", offset);
        &*(self.ptr.add(offset as usize) as *const AtomicI32)
    }

    #[inline]
    unsafe fn atomic_i64(&self, offset: Index) -> &AtomicI64 {
        debug_assert_eq!(offset & 7, 0, "unaligned 64-bit access at {}", offset);
        &*(self.ptr.add(offset as usize) as *const AtomicI64)
    }

    // plain accessors

    #[inline]
    pub fn get_i32(&self, offset: Index) -> i32 {
        self.bounds_check(offset, 4);
        unsafe { self.atomic_i32(offset).load(Ordering::Relaxed) }
    }

    #[inline]
    pub fn put_i32(&self, offset: Index, value: i32) {
        self.bounds_check(offset, 4);
        unsafe { self.atomic_i32(offset).store(value, Ordering::Relaxed) }
    }

    #[inline]
    pub fn get_i64(&self, offset: Index) -> i64 {
        self.bounds_check(offset, 8);
        unsafe { self.atomic_i64(offset).load(Ordering::Relaxed) }
    }

    #[inline]
    pub fn put_i64(&self, offset: Index, value: i64) {
        self.bounds_check(offset, 8);
        unsafe { self.atomic_i64(offset).store(value, Ordering::Relaxed) }
    }

    #[inline]
    pub fn get_u8(&self, offset: Index) -> u8 {
        self.bounds_check(offset, 1);
        unsafe { std::ptr::read_volatile(self.ptr.add(offset as usize)) }
    }

    #[inline]
    pub fn put_u8(&self, offset: Index, value: u8) {
        self.bounds_check(offset, 1);
        unsafe { std::ptr::write_volatile(self.ptr.add(offset as usize), value) }
    }

    #[inline]
    pub fn get_u16(&self, offset: Index) -> u16 {
        self.bounds_check(offset, 2);
        unsafe { std::ptr::read_volatile(self.ptr.add(offset as usize) as *const u16) }
    }

    #[inline]
    pub fn put_u16(&self, offset: Index, value: u16) {
        self.bounds_check(offset, 2);
        unsafe { std::ptr::write_volatile(self.ptr.add(offset as usize) as *mut u16, value) }
    }

    // acquire loads

    #[inline]
    pub fn get_i32_volatile(&self, offset: Index) -> i32 {
        self.bounds_check(offset, 4);
        unsafe { self.atomic_i32(offset).load(Ordering::Acquire) }
    }

    #[inline]
    pub fn get_i64_volatile(&self, offset: Index) -> i64 {
        self.bounds_check(offset, 8);
        unsafe { self.atomic_i64(offset).load(Ordering::Acquire) }
    }

    // release stores

    #[inline]
    pub fn put_i32_ordered(&self, offset: Index, value: i32) {
        self.bounds_check(offset, 4);
        unsafe { self.atomic_i32(offset).store(value, Ordering::Release) }
    }

    #[inline]
    pub fn put_i64_ordered(&self, offset: Index, value: i64) {
        self.bounds_check(offset, 8);
        unsafe { self.atomic_i64(offset).store(value, Ordering::Release) }
    }

    // read-modify-write

    #[inline]
    pub fn compare_and_set_i32(&self, offset: Index, expected: i32, update: i32) -> bool {
        self.bounds_check(offset, 4);
        unsafe {
            self.atomic_i32(offset)
                .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }
    }

    #[inline]
    pub fn compare_and_set_i64(&self, offset: Index, expected: i64, update: i64) -> bool {
        self.bounds_check(offset, 8);
        unsafe {
            self.atomic_i64(offset)
                .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }
    }

    #[inline]
    pub fn get_and_add_i64(&self, offset: Index, delta: i64) -> i64 {
        self.bounds_check(offset, 8);
        unsafe { self.atomic_i64(offset).fetch_add(delta, Ordering::AcqRel) }
    }

    // bulk accessors

    pub fn get_bytes(&self, offset: Index, dst: &mut [u8]) {
        self.bounds_check(offset, dst.len() as Index);
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.add(offset as usize),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
    }

    pub fn put_bytes(&self, offset: Index, src: &[u8]) {
        self.bounds_check(offset, src.len() as Index);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset as usize), src.len());
        }
    }

    /// Copy `length` bytes from another buffer into this one
    pub fn copy_from(&self, offset: Index, src: &AtomicBuffer, src_offset: Index, length: Index) {
        self.bounds_check(offset, length);
        src.bounds_check(src_offset, length);
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.ptr.add(src_offset as usize),
                self.ptr.add(offset as usize),
                length as usize,
            );
        }
    }

    pub fn set_memory(&self, offset: Index, length: Index, value: u8) {
        self.bounds_check(offset, length);
        unsafe {
            std::ptr::write_bytes(self.ptr.add(offset as usize), value, length as usize);
        }
    }

    /// Borrow a range of the buffer as a slice.
    ///
    /// Only sound for ranges the protocol guarantees stable, e.g. a
    /// committed frame between its release store and the consumer
    /// position advancing past it.
    pub fn as_slice(&self, offset: Index, length: Index) -> &[u8] {
        self.bounds_check(offset, length);
        unsafe { std::slice::from_raw_parts(self.ptr.add(offset as usize), length as usize) }
    }

    /// Read a length-prefixed UTF-8 string (`i32` length, then bytes).
    ///
    /// The prefix is read byte-wise: a string following another string
    /// in a message lands on arbitrary alignment.
    pub fn get_string(&self, offset: Index) -> String {
        let mut length_bytes = [0u8; 4];
        self.get_bytes(offset, &mut length_bytes);
        let length = i32::from_le_bytes(length_bytes);
        String::from_utf8_lossy(self.as_slice(offset + 4, length)).into_owned()
    }

    /// Write a length-prefixed UTF-8 string, returning the bytes consumed
    pub fn put_string(&self, offset: Index, value: &str) -> Index {
        let bytes = value.as_bytes();
        self.put_bytes(offset, &(bytes.len() as i32).to_le_bytes());
        self.put_bytes(offset + 4, bytes);
        4 + bytes.len() as Index
    }
}
