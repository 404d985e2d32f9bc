//! Sources of fresh arena memory.
//!
//! The heap never returns memory, so a provider only has to hand out new
//! extents. Successive extents may or may not be contiguous.

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use libc::{_SC_PAGESIZE, c_void, intptr_t, sbrk, sysconf};
use log::{debug, warn};

use crate::{
  align::ALIGNMENT,
  error::{HeapError, Result},
};

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Supplies page-aligned extents to the heap.
pub trait PageProvider {
  /// Granularity every request is rounded up to.
  fn page_size(&self) -> usize;

  /// Returns the base of a fresh extent of at least `byte_count` bytes
  /// rounded up to [`page_size`](Self::page_size), or `None` once memory is
  /// exhausted.
  ///
  /// The base is aligned to at least [`ALIGNMENT`].
  fn request_pages(
    &mut self,
    byte_count: usize,
  ) -> Option<NonNull<u8>>;
}

impl<P: PageProvider + ?Sized> PageProvider for &mut P {
  fn page_size(&self) -> usize {
    (**self).page_size()
  }

  fn request_pages(
    &mut self,
    byte_count: usize,
  ) -> Option<NonNull<u8>> {
    (**self).request_pages(byte_count)
  }
}

fn round_to_pages(
  byte_count: usize,
  page_size: usize,
) -> Option<usize> {
  byte_count.max(1).checked_next_multiple_of(page_size)
}

/// Grows the process data segment with `sbrk(2)`.
///
/// ```text
///   before:   ... data │ heap ────────────┤ program break
///   after:    ... data │ heap ────────────┼ pad │ extent ───────┼ slack ┤ program break
///                                                 ▲
///                                                 └── page aligned base
/// ```
///
/// Only one `SbrkPages` should be driving the break at a time.
pub struct SbrkPages {
  page_size: usize,
}

impl Default for SbrkPages {
  fn default() -> Self {
    Self::new()
  }
}

impl SbrkPages {
  pub fn new() -> Self {
    let page_size = unsafe { sysconf(_SC_PAGESIZE) };
    let page_size = usize::try_from(page_size)
      .ok()
      .filter(|size| size.is_power_of_two() && *size >= ALIGNMENT)
      .unwrap_or(FALLBACK_PAGE_SIZE);

    Self { page_size }
  }
}

impl PageProvider for SbrkPages {
  fn page_size(&self) -> usize {
    self.page_size
  }

  fn request_pages(
    &mut self,
    byte_count: usize,
  ) -> Option<NonNull<u8>> {
    let bytes = round_to_pages(byte_count, self.page_size)?;
    // Slack to align up from wherever the break actually was.
    let increment = bytes.checked_add(self.page_size - 1)?;
    let increment = intptr_t::try_from(increment).ok()?;

    unsafe {
      let address = sbrk(increment);
      if address == usize::MAX as *mut c_void {
        warn!("sbrk({increment}) failed");
        return None;
      }

      let address = address.cast::<u8>();
      let base = address.add(address.align_offset(self.page_size));
      debug!(
        "sbrk extent {base:?} ({bytes} bytes), program break = {:?}",
        sbrk(0)
      );
      NonNull::new(base)
    }
  }
}

/// Which end of a [`ReservedPages`] reservation extents are taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrowthOrder {
  /// Each extent sits directly above the previous one.
  #[default]
  Ascending,
  /// Each extent sits directly below the previous one.
  Descending,
}

/// Hands out extents from a single fixed-size reservation.
///
/// Useful when the arena must live inside a known region, or to exercise
/// exhaustion without touching the process break. The reservation is zeroed
/// up front and released when the provider is dropped, which invalidates
/// every pointer handed out from it.
pub struct ReservedPages {
  base: NonNull<u8>,
  layout: Layout,
  page_size: usize,
  order: GrowthOrder,
  used: usize,
  requests: usize,
}

impl ReservedPages {
  /// Reserves `pages` pages of 4 KiB, growing upwards.
  pub fn new(pages: usize) -> Result<Self> {
    Self::with_layout(pages, FALLBACK_PAGE_SIZE, GrowthOrder::Ascending)
  }

  pub fn with_layout(
    pages: usize,
    page_size: usize,
    order: GrowthOrder,
  ) -> Result<Self> {
    if !page_size.is_power_of_two() || page_size < ALIGNMENT {
      return Err(HeapError::InvalidConfig {
        reason: "page size must be a power of two no smaller than the alignment unit",
      });
    }
    if pages == 0 {
      return Err(HeapError::InvalidConfig {
        reason: "reservation must hold at least one page",
      });
    }
    let capacity = pages
      .checked_mul(page_size)
      .ok_or(HeapError::SizeOverflow { requested: usize::MAX })?;
    let layout = Layout::from_size_align(capacity, page_size)
      .map_err(|_| HeapError::SizeOverflow { requested: capacity })?;

    let base = unsafe { alloc::alloc_zeroed(layout) };
    let Some(base) = NonNull::new(base) else {
      alloc::handle_alloc_error(layout);
    };
    debug!("reserved {capacity} bytes at {base:?} ({order:?})");

    Ok(Self {
      base,
      layout,
      page_size,
      order,
      used: 0,
      requests: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }

  pub fn remaining(&self) -> usize {
    self.capacity() - self.used
  }

  /// Number of `request_pages` calls seen so far, failed ones included.
  pub fn requests(&self) -> usize {
    self.requests
  }
}

impl PageProvider for ReservedPages {
  fn page_size(&self) -> usize {
    self.page_size
  }

  fn request_pages(
    &mut self,
    byte_count: usize,
  ) -> Option<NonNull<u8>> {
    self.requests += 1;

    let bytes = round_to_pages(byte_count, self.page_size)?;
    if bytes > self.remaining() {
      warn!(
        "reservation exhausted: {bytes} bytes requested, {} left",
        self.remaining()
      );
      return None;
    }

    let offset = match self.order {
      GrowthOrder::Ascending => self.used,
      GrowthOrder::Descending => self.capacity() - self.used - bytes,
    };
    self.used += bytes;

    Some(unsafe { self.base.add(offset) })
  }
}

// SAFETY: the reservation is owned exclusively by this value and only
// reachable through `&mut self`, so moving it to another thread is sound.
unsafe impl Send for ReservedPages {}

impl Drop for ReservedPages {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
  }
}
