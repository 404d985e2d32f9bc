/// Byte boundary every block header and payload size conforms to.
pub const ALIGNMENT: usize = 16;

/// Rounds the given size up to the heap's alignment unit.
///
/// # Examples
///
/// ```rust
/// use rheap::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds `value` up to a multiple of `unit`, which must be a power of two.
///
/// # Examples
///
/// ```rust
/// use rheap::align_to;
///
/// assert_eq!(align_to!(1, 4096), 4096);
/// assert_eq!(align_to!(8192, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $unit:expr) => {
    ($value + $unit - 1) & !($unit - 1)
  };
}

/// Overflow-checked [`align!`], for sizes coming from callers.
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(padded) => Some(padded & !(ALIGNMENT - 1)),
    None => None,
  }
}

pub const fn is_aligned(addr: usize) -> bool {
  addr % ALIGNMENT == 0
}
