//! Address-ordered list of the blocks that are currently free.
//!
//! The list owns no memory of its own: every link lives in the `next` field
//! of a free block's header, and the list itself is only the head pointer.
//!
//! ```text
//!   head
//!    │
//!    ▼
//!   ┌──────┬──────────┐   ┌───────┐   ┌──────┬──────┐   ┌───────┐   ┌──────┬────────────┐
//!   │ free │          │   │ alloc │   │ free │      │   │ alloc │   │ free │            │
//!   └──┬───┴──────────┘   └───────┘   └──┬───┴──────┘   └───────┘   └──┬───┴────────────┘
//!      └─────────────────────────────────┘  └───────────────────────────┘        next = null
//! ```
//!
//! Blocks on the list are never marked allocated, appear once, and after every
//! completed heap operation no two of them touch.

use std::{marker::PhantomData, ptr};

use log::trace;

use crate::{
  block::{Block, HEADER_SIZE},
  config::SearchMode,
};

pub(crate) struct FreeList {
  head: *mut Block,
}

impl FreeList {
  pub(crate) const fn new() -> Self {
    Self {
      head: ptr::null_mut(),
    }
  }

  #[cfg(test)]
  pub(crate) unsafe fn from_head(head: *mut Block) -> Self {
    Self { head }
  }

  pub(crate) fn head(&self) -> *mut Block {
    self.head
  }

  pub(crate) fn iter(&self) -> FreeBlocks<'_> {
    FreeBlocks {
      current: self.head,
      _list: PhantomData,
    }
  }

  /// Links a free block in at its address-ordered position.
  ///
  /// # Safety
  ///
  /// `block` must be a valid header inside the arena that is not already on
  /// the list.
  pub(crate) unsafe fn insert(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      assert!(!Block::is_allocated(block), "only free blocks can be listed");
      assert!(block != self.head, "block {block:p} is already on the free list");

      if self.head.is_null() || block < self.head {
        Block::set_next(block, self.head);
        self.head = block;
        return;
      }

      let mut current = self.head;
      while !Block::next(current).is_null() && Block::next(current) < block {
        current = Block::next(current);
      }
      assert!(
        Block::next(current) != block,
        "block {block:p} is already on the free list"
      );

      Block::set_next(block, Block::next(current));
      Block::set_next(current, block);
    }
  }

  /// Member whose `next` is `block`, or null when `block` is the head.
  ///
  /// # Safety
  ///
  /// `block` must be on the list.
  unsafe fn predecessor(
    &self,
    block: *mut Block,
  ) -> *mut Block {
    unsafe {
      if self.head == block {
        return ptr::null_mut();
      }

      let mut current = self.head;
      while !current.is_null() {
        if Block::next(current) == block {
          return current;
        }
        current = Block::next(current);
      }
      panic!("block {block:p} is not on the free list");
    }
  }

  /// Puts `replacement` where `block` used to be.
  ///
  /// # Safety
  ///
  /// `block` must be on the list and `replacement` either null or a block
  /// already linked to what followed `block`.
  unsafe fn replace(
    &mut self,
    block: *mut Block,
    replacement: *mut Block,
  ) {
    unsafe {
      let prev = self.predecessor(block);
      if prev.is_null() {
        self.head = replacement;
      } else {
        Block::set_next(prev, replacement);
      }
    }
  }

  /// Drops `block` from the list and clears its link.
  ///
  /// # Safety
  ///
  /// `block` must be on the list.
  pub(crate) unsafe fn unlink(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      self.replace(block, Block::next(block));
      Block::set_next(block, ptr::null_mut());
    }
  }

  /// Picks a free block with at least `size` payload bytes.
  ///
  /// # Safety
  ///
  /// The list must be well formed.
  pub(crate) unsafe fn find(
    &self,
    size: usize,
    mode: SearchMode,
  ) -> Option<*mut Block> {
    unsafe {
      let mut best: Option<(*mut Block, usize)> = None;
      let mut current = self.head;

      while !current.is_null() {
        let available = Block::size(current);
        if available >= size {
          match mode {
            SearchMode::FirstFit => return Some(current),
            SearchMode::BestFit if available == size => return Some(current),
            SearchMode::BestFit => {
              if best.is_none_or(|(_, best_size)| available < best_size) {
                best = Some((current, available));
              }
            }
          }
        }
        current = Block::next(current);
      }

      best.map(|(block, _)| block)
    }
  }

  /// Takes `size` payload bytes from the front of a listed free block.
  ///
  /// When at least `threshold` bytes would be left over, they become a new
  /// free block that takes the split block's place on the list. Otherwise the
  /// whole block is handed out. Either way the returned block is allocated and
  /// off the list.
  ///
  /// # Safety
  ///
  /// `block` must be on the list. `size` must be aligned, `threshold` at least
  /// [`MIN_BLOCK_SIZE`](crate::MIN_BLOCK_SIZE) and aligned.
  pub(crate) unsafe fn split(
    &mut self,
    block: *mut Block,
    size: usize,
    threshold: usize,
  ) -> *mut Block {
    unsafe {
      assert!(!Block::is_allocated(block), "cannot split an allocated block");
      let available = Block::size(block);
      assert!(
        available >= size,
        "block of {available} bytes cannot hold {size}"
      );

      let leftover = available - size;
      if leftover < threshold {
        trace!("no split: {block:p} keeps {leftover} spare bytes");
        self.unlink(block);
      } else {
        let remainder = Block::put(Block::payload(block).add(size), leftover - HEADER_SIZE, false);
        Block::set_next(remainder, Block::next(block));
        self.replace(block, remainder);

        Block::put(block.cast(), size, false);
        trace!(
          "split {block:p}: {size} bytes allocated, {} bytes free at {remainder:p}",
          leftover - HEADER_SIZE
        );
      }

      Block::mark_allocated(block);
      block
    }
  }

  /// Merges a listed block with its free neighbours when they touch.
  ///
  /// Returns the block that now covers `block`'s bytes, which is the
  /// predecessor if it absorbed `block`.
  ///
  /// # Safety
  ///
  /// `block` must be on the list.
  pub(crate) unsafe fn coalesce(
    &mut self,
    block: *mut Block,
  ) -> *mut Block {
    unsafe {
      let prev = self.predecessor(block);
      let next = Block::next(block);

      if !next.is_null() && Block::end(block) == next.addr() {
        Block::set_size(block, Block::size(block) + HEADER_SIZE + Block::size(next));
        Block::set_next(block, Block::next(next));
        trace!("coalesced {next:p} into {block:p}");
      }

      if !prev.is_null() && Block::end(prev) == block.addr() {
        Block::set_size(prev, Block::size(prev) + HEADER_SIZE + Block::size(block));
        Block::set_next(prev, Block::next(block));
        trace!("coalesced {block:p} into {prev:p}");
        return prev;
      }

      block
    }
  }
}

/// A free list member as seen from outside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
  /// Address of the block header.
  pub addr: usize,
  /// Payload bytes, header excluded.
  pub size: usize,
}

impl FreeBlock {
  /// Address one past the block's last byte.
  pub fn end(&self) -> usize {
    self.addr + HEADER_SIZE + self.size
  }
}

/// Iterator over the free list in address order.
pub struct FreeBlocks<'a> {
  current: *mut Block,
  _list: PhantomData<&'a FreeList>,
}

impl Iterator for FreeBlocks<'_> {
  type Item = FreeBlock;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() {
      return None;
    }

    unsafe {
      let block = self.current;
      self.current = Block::next(block);
      Some(FreeBlock {
        addr: block.addr(),
        size: Block::size(block),
      })
    }
  }
}
