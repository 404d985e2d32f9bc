//! Read-only validation of the free list.

use log::debug;
use thiserror::Error;

use crate::{
  align::is_aligned,
  block::{Block, HEADER_SIZE},
  free_list::FreeList,
};

/// First broken free-list invariant found by [`Heap::check`](crate::Heap::check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("free list member {addr:#x} is marked allocated")]
  AllocatedMember { addr: usize },

  #[error("free list member {next:#x} does not come after {addr:#x}")]
  Misordered { addr: usize, next: usize },

  #[error("free block {addr:#x} overlaps or touches its successor {next:#x}")]
  Overlap { addr: usize, next: usize },

  #[error("free block header {addr:#x} is misaligned")]
  Misaligned { addr: usize },
}

impl Violation {
  /// Distinct non-zero code per invariant class.
  pub const fn code(&self) -> i32 {
    match self {
      Self::AllocatedMember { .. } => -1,
      Self::Misordered { .. } => -2,
      Self::Overlap { .. } => -3,
      Self::Misaligned { .. } => -4,
    }
  }
}

/// Walks the list from the head and reports the first violation.
///
/// Alignment is checked before a header is read, so a stray link is reported
/// instead of dereferenced.
///
/// # Safety
///
/// Every aligned link reachable from the head must point at readable memory.
pub(crate) unsafe fn check(list: &FreeList) -> Result<(), Violation> {
  let mut current = list.head();

  unsafe {
    while !current.is_null() {
      let addr = current.addr();
      let result = if !is_aligned(addr) {
        Err(Violation::Misaligned { addr })
      } else if Block::is_allocated(current) {
        Err(Violation::AllocatedMember { addr })
      } else {
        let next = Block::next(current);
        if next.is_null() {
          Ok(())
        } else if next.addr() <= addr {
          Err(Violation::Misordered {
            addr,
            next: next.addr(),
          })
        } else if addr
          .checked_add(HEADER_SIZE)
          .and_then(|start| start.checked_add(Block::size(current)))
          .is_none_or(|end| end >= next.addr())
        {
          // A size that runs past the address space overlaps everything.
          Err(Violation::Overlap {
            addr,
            next: next.addr(),
          })
        } else {
          Ok(())
        }
      };

      if let Err(violation) = result {
        debug!("heap check failed: {violation}");
        return Err(violation);
      }
      current = Block::next(current);
    }
  }

  Ok(())
}
