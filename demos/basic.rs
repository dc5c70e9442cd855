use mempool::{Allocation, FitPolicy, Pool, PoolError};

fn log_alloc(allocation: &Allocation) {
    println!("Requested {} bytes of memory", allocation.len());
    println!("Received offset: {}", allocation.offset());
}

fn print_layout(pool: &Pool) {
    let layout: Vec<_> = pool
        .inspect()
        .iter()
        .map(|segment| format!("{}{}", segment.len, if segment.in_use { "*" } else { "" }))
        .collect();
    println!("Layout: [{}]  (* = in use)", layout.join(", "));
}

fn main() -> Result<(), PoolError> {
    let mut pool = Pool::open(1000, FitPolicy::BestFit)?;

    let a = pool.allocate(100)?;
    log_alloc(&a);
    let b = pool.allocate(200)?;
    log_alloc(&b);
    let c = pool.allocate(50)?;
    log_alloc(&c);
    print_layout(&pool);

    pool.bytes_mut(&b)?[..5].copy_from_slice(b"hello");

    pool.deallocate(a)?;
    print_layout(&pool);

    // Best fit takes the 100 byte hole at the front, not the tail.
    let d = pool.allocate(80)?;
    log_alloc(&d);
    print_layout(&pool);

    for allocation in [b, c, d] {
        pool.deallocate(allocation)?;
    }
    print_layout(&pool);

    pool.close().map_err(|(_, error)| error)
}
