use thiserror::Error;

/// Errors surfaced at the heap's public boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("out of memory (requested: {requested} bytes)")]
  OutOfMemory { requested: usize },

  #[error("allocation size {requested} overflows the address space")]
  SizeOverflow { requested: usize },

  #[error("heap used before initialize()")]
  NotInitialized,

  #[error("heap initialized twice")]
  AlreadyInitialized,

  #[error("invalid heap configuration: {reason}")]
  InvalidConfig { reason: &'static str },

  #[error("block at {addr:#x} released while not allocated")]
  DoubleFree { addr: usize },

  #[error("pointer {addr:#x} was not handed out by this heap")]
  ForeignPointer { addr: usize },
}

pub type Result<T> = core::result::Result<T, HeapError>;
