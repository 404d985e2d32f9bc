use std::{mem, ptr};

use crate::align::{ALIGNMENT, is_aligned};

/// Low bit of `size_and_flag`; free for use because sizes are aligned.
const ALLOCATED: usize = 0x1;

/// Header placed in front of every payload in the arena.
///
/// ```text
///   ┌──────────────────────────────┬───────────────────────────┐
///   │ Block                        │ Payload                   │
///   │ ┌──────────────┬───────────┐ │                           │
///   │ │ size | alloc │ next      │ │   size bytes              │
///   │ └──────────────┴───────────┘ │                           │
///   │          16 bytes            │                           │
///   └──────────────────────────────┴───────────────────────────┘
///                                  ▲
///                                  └── pointer handed to callers
/// ```
///
/// `next` is only meaningful while the block sits on the free list.
#[repr(C, align(16))]
pub(crate) struct Block {
  size_and_flag: usize,
  next: *mut Block,
}

/// Bytes of bookkeeping in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

/// Smallest block able to hold a header and a non-empty payload.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + ALIGNMENT;

const _: () = assert!(HEADER_SIZE == ALIGNMENT);
const _: () = assert!(mem::align_of::<Block>() == ALIGNMENT);

impl Block {
  /// Writes a fresh header at `addr` with a cleared link.
  ///
  /// # Safety
  ///
  /// `addr` must point to at least `HEADER_SIZE + size` writable bytes that
  /// are not part of any other live block.
  pub(crate) unsafe fn put(
    addr: *mut u8,
    size: usize,
    allocated: bool,
  ) -> *mut Block {
    assert!(!addr.is_null(), "block address must not be null");
    assert!(
      is_aligned(addr.addr()),
      "block address {addr:p} must be aligned"
    );
    assert!(
      size % ALIGNMENT == 0,
      "block size {size} must be a multiple of {ALIGNMENT}"
    );

    #[allow(clippy::cast_ptr_alignment)]
    let block = addr.cast::<Block>();
    unsafe {
      block.write(Block {
        size_and_flag: size | usize::from(allocated),
        next: ptr::null_mut(),
      });
    }
    block
  }

  /// # Safety
  ///
  /// `block` must point to a header written by [`Block::put`].
  pub(crate) unsafe fn is_allocated(block: *const Block) -> bool {
    assert!(!block.is_null(), "block must not be null");
    unsafe { (*block).size_and_flag & ALLOCATED != 0 }
  }

  /// # Safety
  ///
  /// See [`Block::is_allocated`].
  pub(crate) unsafe fn mark_allocated(block: *mut Block) {
    assert!(!block.is_null(), "block must not be null");
    unsafe { (*block).size_and_flag |= ALLOCATED }
  }

  /// # Safety
  ///
  /// See [`Block::is_allocated`].
  pub(crate) unsafe fn mark_free(block: *mut Block) {
    assert!(!block.is_null(), "block must not be null");
    unsafe { (*block).size_and_flag &= !ALLOCATED }
  }

  /// Payload size with the flag masked off.
  ///
  /// # Safety
  ///
  /// See [`Block::is_allocated`].
  pub(crate) unsafe fn size(block: *const Block) -> usize {
    assert!(!block.is_null(), "block must not be null");
    unsafe { (*block).size_and_flag & !(ALIGNMENT - 1) }
  }

  /// Replaces the payload size, keeping the allocation flag.
  ///
  /// # Safety
  ///
  /// See [`Block::is_allocated`]. The caller owns the bytes the new size
  /// covers.
  pub(crate) unsafe fn set_size(
    block: *mut Block,
    size: usize,
  ) {
    assert!(!block.is_null(), "block must not be null");
    assert!(
      size % ALIGNMENT == 0,
      "block size {size} must be a multiple of {ALIGNMENT}"
    );
    unsafe {
      let flag = (*block).size_and_flag & ALLOCATED;
      (*block).size_and_flag = size | flag;
    }
  }

  /// # Safety
  ///
  /// See [`Block::is_allocated`].
  pub(crate) unsafe fn next(block: *const Block) -> *mut Block {
    assert!(!block.is_null(), "block must not be null");
    unsafe { (*block).next }
  }

  /// # Safety
  ///
  /// See [`Block::is_allocated`].
  pub(crate) unsafe fn set_next(
    block: *mut Block,
    next: *mut Block,
  ) {
    assert!(!block.is_null(), "block must not be null");
    unsafe { (*block).next = next }
  }

  /// # Safety
  ///
  /// `block` must not be null.
  pub(crate) unsafe fn payload(block: *mut Block) -> *mut u8 {
    assert!(!block.is_null(), "block must not be null");
    unsafe { block.cast::<u8>().add(HEADER_SIZE) }
  }

  /// Recovers the header sitting in front of a payload pointer.
  ///
  /// # Safety
  ///
  /// `payload` must have been produced by [`Block::payload`].
  pub(crate) unsafe fn from_payload(payload: *mut u8) -> *mut Block {
    assert!(!payload.is_null(), "payload must not be null");
    #[allow(clippy::cast_ptr_alignment)]
    let block = unsafe { payload.sub(HEADER_SIZE).cast::<Block>() };
    block
  }

  /// Address one past the last payload byte.
  ///
  /// # Safety
  ///
  /// See [`Block::is_allocated`].
  pub(crate) unsafe fn end(block: *const Block) -> usize {
    unsafe { block.addr() + HEADER_SIZE + Block::size(block) }
  }
}
