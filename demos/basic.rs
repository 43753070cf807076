//! Walkthrough of the pool tree and multi-size dispatch.

use slicepool::{PoolHandle, alloc_multi, allocated_size, finalize, free, init};

fn main() -> Result<(), slicepool::MemoryError> {
    init()?;

    let mut pool = PoolHandle::create(None, 256)?;
    println!("created a memory pool; its object size is 256");

    let subpool = PoolHandle::create(Some(pool), 128)?;
    println!("created a sub pool under it, object size 128");

    let mem = subpool.alloc()?;
    println!("allocated a block from the sub pool");
    println!("the block size is {}", unsafe { allocated_size(mem) });
    unsafe { free(mem) };
    println!("gave the block back to the sub pool");

    let mem = pool.alloc()?;
    println!("allocated a block from the parent pool");
    println!("the block size is {}", unsafe { allocated_size(mem) });
    unsafe { free(mem) };
    println!("gave the block back to the parent pool");

    let mem = alloc_multi(69)?;
    println!(
        "requested 69 bytes from the global multi pool, got {}",
        unsafe { allocated_size(mem) }
    );
    unsafe { free(mem) };

    let mem = alloc_multi(2096)?;
    println!(
        "requested 2096 bytes from the global multi pool, got {}",
        unsafe { allocated_size(mem) }
    );
    unsafe { free(mem) };

    pool.destroy();
    println!("destroyed the parent pool");
    println!(
        "the sub pool was {} destroyed with it",
        if subpool.is_valid() { "not" } else { "also" }
    );

    finalize();
    Ok(())
}
