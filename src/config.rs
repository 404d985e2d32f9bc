use crate::{
  align::ALIGNMENT,
  block::MIN_BLOCK_SIZE,
  error::{HeapError, Result},
};

/// How the free list is searched for a block that fits a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
  /// Smallest block that fits; ties go to the lowest address.
  #[default]
  BestFit,
  /// Lowest-addressed block that fits.
  FirstFit,
}

/// Tunables for a [`Heap`](crate::Heap).
///
/// ```rust
/// use rheap::{HeapConfig, SearchMode};
///
/// let config = HeapConfig::default()
///   .with_initial_pages(8)
///   .with_search(SearchMode::FirstFit);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Pages requested by `initialize`.
  pub initial_pages: usize,
  /// Pages added on top of every growth request.
  pub growth_pages: usize,
  pub search: SearchMode,
  /// Smallest leftover, header included, that is split off as its own block.
  pub split_threshold: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapConfig {
  pub const fn new() -> Self {
    Self {
      initial_pages: 4,
      growth_pages: 2,
      search: SearchMode::BestFit,
      split_threshold: MIN_BLOCK_SIZE,
    }
  }

  pub const fn with_initial_pages(
    mut self,
    pages: usize,
  ) -> Self {
    self.initial_pages = pages;
    self
  }

  pub const fn with_growth_pages(
    mut self,
    pages: usize,
  ) -> Self {
    self.growth_pages = pages;
    self
  }

  pub const fn with_search(
    mut self,
    search: SearchMode,
  ) -> Self {
    self.search = search;
    self
  }

  pub const fn with_split_threshold(
    mut self,
    threshold: usize,
  ) -> Self {
    self.split_threshold = threshold;
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.initial_pages == 0 {
      return Err(HeapError::InvalidConfig {
        reason: "initial_pages must be non-zero",
      });
    }
    if self.split_threshold < MIN_BLOCK_SIZE {
      return Err(HeapError::InvalidConfig {
        reason: "split_threshold must leave room for a header and a payload",
      });
    }
    if self.split_threshold % ALIGNMENT != 0 {
      return Err(HeapError::InvalidConfig {
        reason: "split_threshold must be a multiple of the alignment unit",
      });
    }
    Ok(())
  }
}
