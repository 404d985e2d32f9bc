use std::{env, io::Read, ptr::NonNull};

use libc::sbrk;
use rheap::{Heap, HeapConfig, SbrkPages};

/// Waits until the user presses ENTER when `RHEAP_PAUSE` is set.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `gdb`, or just visually track how the program break moves.
fn block_until_enter_pressed() {
  if env::var_os("RHEAP_PAUSE").is_none() {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_alloc(
  heap: &Heap<SbrkPages>,
  size: usize,
  ptr: NonNull<u8>,
) {
  println!(
    "Allocated {} bytes (usable {}), address = {:?}, free blocks = {}, check = {}",
    size,
    unsafe { heap.usable_size(ptr) },
    ptr,
    heap.stats().free_blocks,
    heap.check_code(),
  );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();

  let mut heap = Heap::with_config(SbrkPages::new(), HeapConfig::default().with_initial_pages(4));

  print_program_break("start");
  heap.initialize()?;
  print_program_break("after initialize");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 32 bytes from the fresh 4-page arena.
  // --------------------------------------------------------------------
  let p1 = heap.allocate(32)?;
  println!("\n[1] Allocate 32 bytes");
  print_alloc(&heap, 32, p1);
  unsafe { p1.cast::<u64>().write(0xDEADBEEF) };

  // --------------------------------------------------------------------
  // 2) Allocate 64 bytes; it lands right after the first block.
  // --------------------------------------------------------------------
  let p2 = heap.allocate(64)?;
  println!("\n[2] Allocate 64 bytes");
  print_alloc(&heap, 64, p2);
  println!("[2] p2 > p1? {}", p2 > p1);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Release the first block and ask for the same size again.
  //    Best fit hands the freed block straight back.
  // --------------------------------------------------------------------
  unsafe { heap.release(p1)? };
  println!("\n[3] Released p1 at {:?}, check = {}", p1, heap.check_code());

  let p3 = heap.allocate(32)?;
  print_alloc(&heap, 32, p3);
  println!(
    "[3] p3 == p1? {}",
    if p3 == p1 {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Allocate 64 KiB to force the arena to grow.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let big = heap.allocate(64 * 1024)?;
  println!("\n[4] Allocate large 64 KiB block");
  print_alloc(&heap, 64 * 1024, big);
  print_program_break("after large alloc");
  println!("[4] {:?}", heap.stats());
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Release everything. Neighbouring free blocks merge back together;
  //    pages stay with the process until it exits.
  // --------------------------------------------------------------------
  unsafe {
    heap.release(big)?;
    heap.release(p3)?;
    heap.release(p2)?;
  }
  println!("\n[5] Released all blocks: {:?}", heap.stats());
  for block in heap.free_blocks() {
    println!("[5]   free block at {:#x}, {} bytes", block.addr, block.size);
  }
  println!("[5] check = {}", heap.check_code());

  Ok(())
}
