use segalloc::{HeapConfig, Pointer, SegAlloc};

fn log_alloc(heap: &SegAlloc, size: usize, ptr: Option<Pointer>) {
    println!("Requested {size} bytes of memory");
    match ptr {
        Some(ptr) => println!(
            "Received offset 0x{:x} ({} usable bytes)",
            ptr.offset(),
            heap.usable_size(ptr)
        ),
        None => println!("Received nothing"),
    }
}

fn main() {
    env_logger::init();

    let mut heap = SegAlloc::with_config(HeapConfig::default().with_checks(true))
        .expect("default configuration is valid");

    let mut ptrs = Vec::new();
    for size in [8, 16, 100, 5000] {
        let ptr = heap.allocate(size);
        log_alloc(&heap, size, ptr);
        ptrs.push(ptr);
    }

    if let Some(ptr) = ptrs[2] {
        heap.payload_mut(ptr)[..12].copy_from_slice(b"Heap Testing");
        let moved = heap.reallocate(Some(ptr), 300);
        if let Some(moved) = moved {
            println!(
                "\nMoved '{}' to 0x{:x}",
                String::from_utf8_lossy(&heap.payload(moved)[..12]),
                moved.offset()
            );
        }
        ptrs[2] = moved;
    }

    println!("\nBlocks:");
    for block in heap.blocks() {
        let state = if block.allocated { "allocated" } else { "free" };
        println!("  0x{:06x} {:>6} bytes {state}", block.offset, block.size);
    }

    for ptr in ptrs {
        heap.deallocate(ptr);
    }

    println!("\n{:#?}", heap.stats());
}
