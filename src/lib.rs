//! # rheap - A Free-List Heap Allocator
//!
//! This crate provides a user-space **free-list allocator** that manages a
//! growable arena of raw pages, handing out and taking back variable-sized
//! blocks the way a general-purpose `malloc`/`free` pair does.
//!
//! ## Overview
//!
//! Every block carries its bookkeeping in a header placed right in front of
//! the bytes handed to the caller. Free blocks are threaded into a singly
//! linked list kept in ascending address order:
//!
//! ```text
//!   Arena:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ ┌───┬──────┐┌───┬────────┐┌───┬───┐┌───┬──────────┐┌───┬──────────┐  │
//!   │ │ H │  A1  ││ H │  free  ││ H │A2 ││ H │    A3    ││ H │   free   │  │
//!   │ └───┴──────┘└─┬─┴────────┘└───┴───┘└───┴──────────┘└─▲─┴──────────┘  │
//!   │               │                                      │               │
//!   │               └──────────────── next ────────────────┘               │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   H = 16 byte header: payload size | allocated bit, next free block
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rheap
//!   ├── align      - Alignment unit and macros (align!, align_to!)
//!   ├── block      - Header encoding (internal)
//!   ├── free_list  - Address-ordered list: fit search, split, coalesce
//!   ├── check      - Free-list consistency checker
//!   ├── config     - HeapConfig and SearchMode
//!   ├── error      - HeapError
//!   ├── page       - PageProvider trait, SbrkPages, ReservedPages
//!   └── heap       - Heap: allocate / release orchestration
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rheap::{Heap, ReservedPages};
//!
//! let mut heap = Heap::new(ReservedPages::new(16)?);
//! heap.initialize()?;
//!
//! let ptr = heap.allocate(64)?;
//! unsafe {
//!   ptr.cast::<u64>().write(42);
//!   assert_eq!(ptr.cast::<u64>().read(), 42);
//!   heap.release(ptr)?;
//! }
//! assert_eq!(heap.check_code(), 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## How It Works
//!
//! ```text
//!   allocate(n):
//!     1. round n up to 16 bytes
//!     2. search the free list (best fit by default)
//!     3. on a miss, request pages, add them as a free block, merge with a
//!        touching neighbour
//!     4. split off the unused tail if it can hold a block of its own
//!     5. unlink, mark allocated, return header + 16
//!
//!   release(p):
//!     1. step back 16 bytes to the header, clear the allocated bit
//!     2. link the block in at its address-ordered position
//!     3. merge with the free blocks directly before and after it
//! ```
//!
//! Memory is obtained from a [`PageProvider`]. [`SbrkPages`] grows the
//! program break with `sbrk(2)`; [`ReservedPages`] carves extents out of one
//! fixed reservation. Pages are never given back.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **No shrinking**: the arena only grows
//! - **One free list**: no size classes, O(n) allocate and release
//!
//! ## Safety
//!
//! [`Heap::release`] is `unsafe`: the pointer must come from
//! [`Heap::allocate`] on the same heap and must not be used afterwards.
//! Misuse that can be detected cheaply (a second release, a pointer that no
//! extent covers) is reported as a [`HeapError`]; anything else corrupts the
//! arena, which [`Heap::check`] can diagnose after the fact.

pub mod align;
mod block;
mod check;
mod config;
mod error;
mod free_list;
mod heap;
mod page;

pub use block::{HEADER_SIZE, MIN_BLOCK_SIZE};
pub use check::Violation;
pub use config::{HeapConfig, SearchMode};
pub use error::{HeapError, Result};
pub use free_list::{FreeBlock, FreeBlocks};
pub use heap::{Heap, HeapStats};
pub use page::{GrowthOrder, PageProvider, ReservedPages, SbrkPages};
