use std::{ops::Range, ptr::NonNull};

use log::{debug, trace, warn};

use crate::{
  align::{checked_align, is_aligned},
  align_to,
  block::{Block, HEADER_SIZE},
  check::{self, Violation},
  config::HeapConfig,
  error::{HeapError, Result},
  free_list::{FreeBlocks, FreeList},
  page::PageProvider,
};

/// Snapshot of the arena's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
  /// Extents obtained from the page provider.
  pub extents: usize,
  /// Bytes across all extents, headers included.
  pub arena_bytes: usize,
  pub free_blocks: usize,
  /// Free payload bytes, headers excluded.
  pub free_bytes: usize,
  pub allocated_blocks: usize,
}

/// A growable arena managed through an address-ordered free list.
///
/// ```text
///   allocate(n)                         release(p)
///       │                                   │
///       ▼                                   ▼
///   find ──miss──▶ extend ──▶ coalesce   mark free
///       │                       │           │
///       ▼◀──────────────────────┘           ▼
///    split ──▶ mark allocated            insert ──▶ coalesce
/// ```
///
/// The heap is single threaded; wrap it in a lock to share it.
pub struct Heap<P: PageProvider> {
  provider: P,
  config: HeapConfig,
  free: FreeList,
  initialized: bool,
  /// Address ranges covered by the arena, sorted, touching extents merged.
  spans: Vec<Range<usize>>,
  extents: usize,
  arena_bytes: usize,
  allocated_blocks: usize,
}

impl<P: PageProvider> Heap<P> {
  /// Creates an uninitialized heap with the default configuration.
  pub fn new(provider: P) -> Self {
    Self::with_config(provider, HeapConfig::default())
  }

  pub fn with_config(
    provider: P,
    config: HeapConfig,
  ) -> Self {
    Self {
      provider,
      config,
      free: FreeList::new(),
      initialized: false,
      spans: Vec::new(),
      extents: 0,
      arena_bytes: 0,
      allocated_blocks: 0,
    }
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn provider(&self) -> &P {
    &self.provider
  }

  /// Requests the initial pages and lays them out as one free block.
  pub fn initialize(&mut self) -> Result<()> {
    if self.initialized {
      return Err(HeapError::AlreadyInitialized);
    }
    self.config.validate()?;

    let bytes = self
      .config
      .initial_pages
      .checked_mul(self.provider.page_size())
      .ok_or(HeapError::SizeOverflow {
        requested: self.config.initial_pages,
      })?;

    unsafe { self.add_extent(bytes, bytes)? };
    self.initialized = true;
    debug!(
      "heap initialized with {bytes} bytes, head = {:p}",
      self.free.head()
    );
    Ok(())
  }

  /// Returns a pointer to at least `size` bytes aligned to
  /// [`ALIGNMENT`](crate::align::ALIGNMENT).
  ///
  /// Zero-sized requests still get a distinct block.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if !self.initialized {
      return Err(HeapError::NotInitialized);
    }
    let aligned = checked_align(size.max(1)).ok_or(HeapError::SizeOverflow { requested: size })?;

    unsafe {
      let block = match self.free.find(aligned, self.config.search) {
        Some(block) => block,
        None => self.extend(aligned)?,
      };

      let block = self
        .free
        .split(block, aligned, self.config.split_threshold);
      Block::mark_allocated(block);
      self.allocated_blocks += 1;

      let payload = Block::payload(block);
      trace!(
        "allocate({size}) -> {payload:p} ({} bytes)",
        Block::size(block)
      );
      debug_assert!(is_aligned(payload.addr()));
      Ok(NonNull::new_unchecked(payload))
    }
  }

  /// Returns a block to the free list, merging it with free neighbours.
  ///
  /// Pointers outside the arena and blocks that are already free are
  /// rejected without touching the list.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by [`allocate`](Self::allocate) on this
  /// heap. Its memory must not be used afterwards.
  pub unsafe fn release(
    &mut self,
    ptr: NonNull<u8>,
  ) -> Result<()> {
    let addr = ptr.addr().get();
    if !self.owns(addr) {
      warn!("release({addr:#x}): not an arena payload");
      return Err(HeapError::ForeignPointer { addr });
    }

    unsafe {
      let block = Block::from_payload(ptr.as_ptr());
      if !Block::is_allocated(block) {
        warn!("release({addr:#x}): block is already free");
        return Err(HeapError::DoubleFree { addr });
      }

      Block::mark_free(block);
      Block::set_next(block, std::ptr::null_mut());
      self.free.insert(block);
      let merged = self.free.coalesce(block);
      self.allocated_blocks -= 1;

      trace!(
        "release({addr:#x}) -> free block {merged:p} ({} bytes)",
        Block::size(merged)
      );
    }
    Ok(())
  }

  /// Payload bytes available behind a live allocation.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation from this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    unsafe { Block::size(Block::from_payload(ptr.as_ptr())) }
  }

  /// Validates the free list, reporting the first broken invariant.
  pub fn check(&self) -> core::result::Result<(), Violation> {
    unsafe { check::check(&self.free) }
  }

  /// [`check`](Self::check) as a plain code: 0 when consistent.
  pub fn check_code(&self) -> i32 {
    match self.check() {
      Ok(()) => 0,
      Err(violation) => violation.code(),
    }
  }

  /// Free list members in address order.
  pub fn free_blocks(&self) -> FreeBlocks<'_> {
    self.free.iter()
  }

  pub fn stats(&self) -> HeapStats {
    let (free_blocks, free_bytes) = self
      .free_blocks()
      .fold((0, 0), |(count, bytes), block| (count + 1, bytes + block.size));

    HeapStats {
      extents: self.extents,
      arena_bytes: self.arena_bytes,
      free_blocks,
      free_bytes,
      allocated_blocks: self.allocated_blocks,
    }
  }

  fn owns(
    &self,
    addr: usize,
  ) -> bool {
    is_aligned(addr)
      && self
        .spans
        .iter()
        .any(|span| addr >= span.start + HEADER_SIZE && addr < span.end)
  }

  fn record_span(
    &mut self,
    span: Range<usize>,
  ) {
    let at = self.spans.partition_point(|other| other.start < span.start);
    let joins_previous = at > 0 && self.spans[at - 1].end == span.start;
    let joins_next = self.spans.get(at).is_some_and(|next| next.start == span.end);

    match (joins_previous, joins_next) {
      (true, true) => {
        let next = self.spans.remove(at);
        self.spans[at - 1].end = next.end;
      }
      (true, false) => self.spans[at - 1].end = span.end,
      (false, true) => self.spans[at].start = span.start,
      (false, false) => self.spans.insert(at, span),
    }
  }

  /// Grows the arena by enough pages for a `min_size` payload and returns
  /// the free block now covering them.
  ///
  /// # Safety
  ///
  /// The free list must be well formed.
  unsafe fn extend(
    &mut self,
    min_size: usize,
  ) -> Result<*mut Block> {
    let page_size = self.provider.page_size();
    let bytes = min_size
      .checked_add(HEADER_SIZE)
      .and_then(|needed| needed.checked_next_multiple_of(page_size))
      .and_then(|needed| needed.checked_add(self.config.growth_pages.checked_mul(page_size)?))
      .ok_or(HeapError::SizeOverflow {
        requested: min_size,
      })?;

    let block = unsafe { self.add_extent(bytes, min_size)? };
    debug!(
      "arena grew by {bytes} bytes, {} extents, {} bytes total",
      self.extents, self.arena_bytes
    );
    Ok(block)
  }

  /// Requests an extent and links it into the free list as one block.
  ///
  /// # Safety
  ///
  /// The free list must be well formed.
  unsafe fn add_extent(
    &mut self,
    bytes: usize,
    requested: usize,
  ) -> Result<*mut Block> {
    debug_assert_eq!(bytes, align_to!(bytes, self.provider.page_size()));

    let Some(base) = self.provider.request_pages(bytes) else {
      warn!("page provider could not supply {bytes} bytes");
      return Err(HeapError::OutOfMemory { requested });
    };
    let low = base.addr().get();
    assert!(is_aligned(low), "page provider returned misaligned extent {base:?}");

    unsafe {
      let block = Block::put(base.as_ptr(), bytes - HEADER_SIZE, false);
      self.free.insert(block);
      let block = self.free.coalesce(block);

      self.extents += 1;
      self.arena_bytes += bytes;
      self.record_span(low..low + bytes);
      Ok(block)
    }
  }
}

// SAFETY: every block reachable from the free list lives in extents owned
// by this heap and is only touched through `&mut self`, so the heap can move
// to another thread together with its provider.
unsafe impl<P: PageProvider + Send> Send for Heap<P> {}

#[cfg(test)]
mod tests {
  use rand::{Rng, SeedableRng, rngs::StdRng};

  use super::*;
  use crate::{
    align::ALIGNMENT,
    block::MIN_BLOCK_SIZE,
    config::SearchMode,
    free_list::FreeBlock,
    page::{GrowthOrder, ReservedPages, SbrkPages},
  };

  const PAGE: usize = 4096;

  /// Leaves one unused page in front of every extent.
  struct GappedPages(ReservedPages);

  impl PageProvider for GappedPages {
    fn page_size(&self) -> usize {
      self.0.page_size()
    }

    fn request_pages(
      &mut self,
      byte_count: usize,
    ) -> Option<NonNull<u8>> {
      let base = self.0.request_pages(byte_count.checked_add(PAGE)?)?;
      Some(unsafe { base.add(PAGE) })
    }
  }

  fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
  }

  fn heap_with(
    reserved_pages: usize,
    config: HeapConfig,
  ) -> Heap<ReservedPages> {
    init_logger();
    let provider = ReservedPages::new(reserved_pages).unwrap();
    let mut heap = Heap::with_config(provider, config);
    heap.initialize().unwrap();
    heap
  }

  fn heap() -> Heap<ReservedPages> {
    heap_with(64, HeapConfig::default())
  }

  fn free_layout<P: PageProvider>(heap: &Heap<P>) -> Vec<FreeBlock> {
    heap.free_blocks().collect()
  }

  #[test]
  fn test_initialize_lays_out_one_block() {
    let heap = heap();

    assert_eq!(
      heap.stats(),
      HeapStats {
        extents: 1,
        arena_bytes: 4 * PAGE,
        free_blocks: 1,
        free_bytes: 4 * PAGE - HEADER_SIZE,
        allocated_blocks: 0,
      }
    );
    assert_eq!(heap.provider().requests(), 1);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_borrowed_provider() {
    init_logger();
    let mut pages = ReservedPages::new(12).unwrap();

    {
      let mut heap = Heap::with_config(&mut pages, HeapConfig::default().with_growth_pages(0));
      heap.initialize().unwrap();
      let ptr = heap.allocate(5 * PAGE).unwrap();
      unsafe { heap.release(ptr).unwrap() };
      assert_eq!(heap.stats().extents, 2);
      assert_eq!(heap.stats().free_blocks, 1);
    }

    // 4 initial pages, then 5 pages plus a header rounded up to 6
    assert_eq!(pages.requests(), 2);
    assert_eq!(pages.remaining(), 2 * PAGE);
  }

  #[test]
  fn test_initialize_twice_fails() {
    let mut heap = heap();

    assert_eq!(heap.initialize(), Err(HeapError::AlreadyInitialized));
    assert_eq!(heap.stats().extents, 1);
  }

  #[test]
  fn test_use_before_initialize_fails() {
    let mut heap = Heap::new(ReservedPages::new(4).unwrap());

    assert_eq!(heap.allocate(16), Err(HeapError::NotInitialized));
    assert_eq!(heap.check_code(), 0);
  }

  #[test]
  fn test_initialize_rejects_bad_config() {
    let provider = ReservedPages::new(4).unwrap();
    let mut heap = Heap::with_config(provider, HeapConfig::default().with_split_threshold(8));

    assert!(matches!(
      heap.initialize(),
      Err(HeapError::InvalidConfig { .. })
    ));
    assert_eq!(heap.provider().requests(), 0);
  }

  #[test]
  fn test_initialize_without_memory_fails() {
    init_logger();
    let provider = ReservedPages::new(2).unwrap();
    let mut heap = Heap::new(provider);

    assert_eq!(
      heap.initialize(),
      Err(HeapError::OutOfMemory { requested: 4 * PAGE })
    );
    assert_eq!(heap.allocate(16), Err(HeapError::NotInitialized));
  }

  #[test]
  fn test_concrete_scenario() {
    let mut heap = heap();

    let p1 = heap.allocate(32).unwrap();
    assert_eq!(p1.addr().get() % ALIGNMENT, 0);
    assert_eq!(heap.check_code(), 0);

    let p2 = heap.allocate(64).unwrap();
    assert!(p2 > p1);
    assert!(p1.addr().get() + 32 <= p2.addr().get() - HEADER_SIZE);
    assert_eq!(heap.check_code(), 0);

    unsafe { heap.release(p1).unwrap() };
    assert_eq!(heap.check_code(), 0);

    let p3 = heap.allocate(32).unwrap();
    assert_eq!(p3, p1);
    assert_eq!(heap.check_code(), 0);
    assert_eq!(heap.provider().requests(), 1);
  }

  #[test]
  fn test_alignment_across_sizes() {
    let mut heap = heap();

    for size in 0..=4 * PAGE {
      let ptr = heap.allocate(size).unwrap();
      assert_eq!(ptr.addr().get() % ALIGNMENT, 0, "size {size}");
      assert!(unsafe { heap.usable_size(ptr) } >= size);
      unsafe { heap.release(ptr).unwrap() };
    }

    assert_eq!(heap.check(), Ok(()));
    assert_eq!(heap.stats().free_blocks, 1);
  }

  #[test]
  fn test_zero_sized_allocations_are_distinct() {
    let mut heap = heap();

    let a = heap.allocate(0).unwrap();
    let b = heap.allocate(0).unwrap();

    assert_ne!(a, b);
    assert_eq!(unsafe { heap.usable_size(a) }, ALIGNMENT);
    assert_eq!(b.addr().get() - a.addr().get(), HEADER_SIZE + ALIGNMENT);
  }

  #[test]
  fn test_round_trip_reuses_memory() {
    let mut heap = heap();

    for size in [1, 48, 1000, 3 * PAGE] {
      let ptr = heap.allocate(size).unwrap();
      unsafe { heap.release(ptr).unwrap() };
      let requests = heap.provider().requests();

      let same = heap.allocate(size).unwrap();
      assert_eq!(same, ptr);
      unsafe { heap.release(same).unwrap() };

      let smaller = heap.allocate(size / 2).unwrap();
      assert_eq!(smaller, ptr);
      unsafe { heap.release(smaller).unwrap() };

      assert_eq!(heap.provider().requests(), requests, "size {size}");
    }
  }

  #[test]
  fn test_split_threshold() {
    let n = 64;

    for k in [0, ALIGNMENT, MIN_BLOCK_SIZE, MIN_BLOCK_SIZE + ALIGNMENT, 256] {
      let mut heap = heap();

      // carve out a free hole of exactly n + k bytes, fenced off from the tail
      let hole = heap.allocate(n + k).unwrap();
      let _fence = heap.allocate(16).unwrap();
      unsafe { heap.release(hole).unwrap() };
      let hole_header = hole.addr().get() - HEADER_SIZE;
      assert_eq!(free_layout(&heap)[0], FreeBlock {
        addr: hole_header,
        size: n + k,
      });

      let ptr = heap.allocate(n).unwrap();
      assert_eq!(ptr, hole);

      let free = free_layout(&heap);
      if k >= MIN_BLOCK_SIZE {
        assert_eq!(unsafe { heap.usable_size(ptr) }, n, "k = {k}");
        assert_eq!(free.len(), 2, "k = {k}");
        assert_eq!(free[0], FreeBlock {
          addr: hole_header + HEADER_SIZE + n,
          size: k - HEADER_SIZE,
        });
      } else {
        assert_eq!(unsafe { heap.usable_size(ptr) }, n + k, "k = {k}");
        assert_eq!(free.len(), 1, "k = {k}");
      }
      assert_eq!(heap.check(), Ok(()));
    }
  }

  #[test]
  fn test_coarser_split_threshold() {
    let mut heap = heap_with(64, HeapConfig::default().with_split_threshold(128));

    let hole = heap.allocate(64 + 112).unwrap();
    let _fence = heap.allocate(16).unwrap();
    unsafe { heap.release(hole).unwrap() };

    let ptr = heap.allocate(64).unwrap();
    assert_eq!(unsafe { heap.usable_size(ptr) }, 64 + 112);
  }

  #[test]
  fn test_best_fit_and_first_fit() {
    for (search, expect_second_hole) in [(SearchMode::BestFit, true), (SearchMode::FirstFit, false)] {
      let mut heap = heap_with(64, HeapConfig::default().with_search(search));

      let wide = heap.allocate(96).unwrap();
      let _fence = heap.allocate(16).unwrap();
      let narrow = heap.allocate(32).unwrap();
      let _fence = heap.allocate(16).unwrap();
      unsafe {
        heap.release(wide).unwrap();
        heap.release(narrow).unwrap();
      }

      let ptr = heap.allocate(32).unwrap();
      let expected = if expect_second_hole { narrow } else { wide };
      assert_eq!(ptr, expected, "{search:?}");
      assert_eq!(heap.check(), Ok(()));
    }
  }

  #[test]
  fn test_release_coalesces_both_neighbours() {
    let mut heap = heap();

    let a = heap.allocate(32).unwrap();
    let b = heap.allocate(48).unwrap();
    let c = heap.allocate(64).unwrap();
    let _fence = heap.allocate(16).unwrap();

    unsafe {
      heap.release(a).unwrap();
      heap.release(c).unwrap();
      assert_eq!(heap.stats().free_blocks, 3);

      heap.release(b).unwrap();
    }

    let free = free_layout(&heap);
    assert_eq!(free.len(), 2);
    assert_eq!(free[0], FreeBlock {
      addr: a.addr().get() - HEADER_SIZE,
      size: 32 + 48 + 64 + 2 * HEADER_SIZE,
    });
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_release_into_tail_merges() {
    let mut heap = heap();

    let ptr = heap.allocate(100).unwrap();
    unsafe { heap.release(ptr).unwrap() };

    assert_eq!(free_layout(&heap), vec![FreeBlock {
      addr: ptr.addr().get() - HEADER_SIZE,
      size: 4 * PAGE - HEADER_SIZE,
    }]);
  }

  #[test]
  fn test_growth_merges_with_contiguous_tail() {
    let mut heap = heap();

    let small = heap.allocate(64).unwrap();
    let big = heap.allocate(6 * PAGE).unwrap();

    let stats = heap.stats();
    assert_eq!(stats.extents, 2);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(big.addr().get(), small.addr().get() + 64 + HEADER_SIZE);
    assert_eq!(heap.spans.len(), 1);
    assert_eq!(heap.check(), Ok(()));

    unsafe {
      heap.release(big).unwrap();
      heap.release(small).unwrap();
    }
    let free = free_layout(&heap);
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].size, heap.stats().arena_bytes - HEADER_SIZE);
  }

  #[test]
  fn test_growth_below_head_is_prepended() {
    init_logger();
    let provider = ReservedPages::with_layout(32, PAGE, GrowthOrder::Descending).unwrap();
    let mut heap = Heap::new(provider);
    heap.initialize().unwrap();
    let initial = free_layout(&heap)[0];

    let big = heap.allocate(5 * PAGE).unwrap();

    assert!(big.addr().get() < initial.addr);
    assert_eq!(heap.spans.len(), 1);
    let free = free_layout(&heap);
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].end(), initial.end());
    assert_eq!(heap.check(), Ok(()));

    unsafe { heap.release(big).unwrap() };
    let free = free_layout(&heap);
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].size, heap.stats().arena_bytes - HEADER_SIZE);
  }

  #[test]
  fn test_out_of_memory_leaves_list_untouched() {
    let mut heap = heap_with(6, HeapConfig::default());
    let keep = heap.allocate(128).unwrap();
    let before = free_layout(&heap);

    assert_eq!(
      heap.allocate(8 * PAGE),
      Err(HeapError::OutOfMemory { requested: 8 * PAGE })
    );
    assert_eq!(free_layout(&heap), before);
    assert_eq!(heap.check(), Ok(()));

    let small = heap.allocate(256).unwrap();
    unsafe {
      heap.release(small).unwrap();
      heap.release(keep).unwrap();
    }
    assert_eq!(heap.stats().free_blocks, 1);
  }

  #[test]
  fn test_size_overflow() {
    let mut heap = heap();

    assert_eq!(
      heap.allocate(usize::MAX),
      Err(HeapError::SizeOverflow { requested: usize::MAX })
    );
    assert!(matches!(
      heap.allocate(usize::MAX - 64),
      Err(HeapError::SizeOverflow { .. })
    ));
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_double_free_is_rejected() {
    let mut heap = heap();

    let a = heap.allocate(32).unwrap();
    let _fence = heap.allocate(32).unwrap();
    unsafe {
      heap.release(a).unwrap();
      assert_eq!(
        heap.release(a),
        Err(HeapError::DoubleFree { addr: a.addr().get() })
      );
    }
    assert_eq!(heap.check(), Ok(()));
    assert_eq!(heap.stats().allocated_blocks, 1);
  }

  #[test]
  fn test_foreign_pointer_is_rejected() {
    let mut heap = heap();
    let mut local = [0u128; 4];
    let foreign = NonNull::new(local.as_mut_ptr().cast::<u8>()).unwrap();

    let ptr = heap.allocate(64).unwrap();
    let misaligned = unsafe { ptr.add(8) };

    unsafe {
      assert_eq!(
        heap.release(foreign),
        Err(HeapError::ForeignPointer {
          addr: foreign.addr().get()
        })
      );
      assert_eq!(
        heap.release(misaligned),
        Err(HeapError::ForeignPointer {
          addr: misaligned.addr().get()
        })
      );
      heap.release(ptr).unwrap();
    }
  }

  #[test]
  fn test_pointer_between_extents_is_rejected() {
    init_logger();
    let mut heap = Heap::new(GappedPages(ReservedPages::new(64).unwrap()));
    heap.initialize().unwrap();
    let initial = free_layout(&heap)[0];

    let big = heap.allocate(6 * PAGE).unwrap();
    assert_eq!(heap.stats().extents, 2);
    assert_eq!(heap.spans.len(), 2);
    assert!(big.addr().get() > initial.end() + PAGE);

    // Aligned, inside the overall span, but in the page no extent covers.
    let gap_addr = initial.end() + 4 * HEADER_SIZE;
    let gap = unsafe { big.sub(big.addr().get() - gap_addr) };

    unsafe {
      assert_eq!(
        heap.release(gap),
        Err(HeapError::ForeignPointer { addr: gap_addr })
      );
      heap.release(big).unwrap();
    }
    assert_eq!(heap.stats().free_blocks, 2);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_heap_moves_across_threads() {
    fn assert_send<T: Send>() {}
    assert_send::<Heap<ReservedPages>>();
    assert_send::<Heap<SbrkPages>>();

    let mut heap = heap();
    let kept = heap.allocate(128).unwrap().addr().get();

    let mut heap = std::thread::spawn(move || {
      let ptr = heap.allocate(64).unwrap();
      unsafe { heap.release(ptr).unwrap() };
      heap
    })
    .join()
    .unwrap();

    assert_eq!(heap.stats().allocated_blocks, 1);
    assert_eq!(heap.check(), Ok(()));
    let again = heap.allocate(64).unwrap();
    assert_eq!(again.addr().get(), kept + 128 + HEADER_SIZE);
  }

  #[test]
  fn test_payloads_do_not_clobber_each_other() {
    let mut heap = heap();
    let sizes = [24, 200, 16, 4000, 72];

    let ptrs: Vec<_> = sizes
      .iter()
      .enumerate()
      .map(|(i, &size)| {
        let ptr = heap.allocate(size).unwrap();
        unsafe { ptr.write_bytes(i as u8 + 1, size) };
        ptr
      })
      .collect();

    for (i, (&ptr, &size)) in ptrs.iter().zip(&sizes).enumerate() {
      for offset in 0..size {
        assert_eq!(unsafe { ptr.add(offset).read() }, i as u8 + 1);
      }
    }
  }

  #[test]
  fn test_random_churn_keeps_invariants() {
    let mut heap = heap_with(1024, HeapConfig::default());
    let mut rng = StdRng::seed_from_u64(0x2545_f491_4f6c_dd1d);
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for step in 0..4000 {
      if live.len() < 64 && (live.is_empty() || rng.gen_range(0..3) != 0) {
        let size = rng.gen_range(0..2048);
        let ptr = heap.allocate(size).unwrap();
        let fill = (step % 251) as u8;
        unsafe { ptr.write_bytes(fill, size) };
        live.push((ptr, size, fill));
      } else {
        let (ptr, size, fill) = live.swap_remove(rng.gen_range(0..live.len()));
        for offset in 0..size {
          assert_eq!(unsafe { ptr.add(offset).read() }, fill, "step {step}");
        }
        unsafe { heap.release(ptr).unwrap() };
      }

      assert_eq!(heap.check(), Ok(()), "step {step}");

      let mut ranges: Vec<(usize, usize)> = live
        .iter()
        .map(|&(ptr, _, _)| {
          let start = ptr.addr().get() - HEADER_SIZE;
          (start, ptr.addr().get() + unsafe { heap.usable_size(ptr) })
        })
        .chain(heap.free_blocks().map(|block| (block.addr, block.end())))
        .collect();
      ranges.sort_unstable();
      for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "step {step}: {pair:x?}");
      }
      assert_eq!(heap.stats().allocated_blocks, live.len());
    }

    for (ptr, _, _) in live.drain(..) {
      unsafe { heap.release(ptr).unwrap() };
    }
    let free = free_layout(&heap);
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].size, heap.stats().arena_bytes - HEADER_SIZE);
  }
}
