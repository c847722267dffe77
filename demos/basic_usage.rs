//! Basic usage example for guardmap
//!
//! This example walks through the map's operations: plain accessors,
//! conditional and lazy insertion, batch updates, iteration and the
//! structural transforms.

use guardmap::ConcurrentMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("guardmap Usage Example");
    println!("======================");

    // Basic accessors
    println!("\n1. Basic Operations:");
    let map = ConcurrentMap::new();
    map.set(1, 10);
    map.set(2, 20);
    println!("   get(1) = {:?}, get(3) = {:?}", map.get(&1), map.get(&3));
    println!("   len = {}, contains(2) = {}", map.len(), map.contains(&2));
    println!("   remove(2) = {:?}", map.remove(&2));

    // Conditional insertion
    println!("\n2. Conditional Insertion:");
    println!("   get_or_set(1, 99) = {}", map.get_or_set(1, 99));
    println!("   set_if_not_exist(1, 99) = {}", map.set_if_not_exist(1, 99));
    println!("   set_if_not_exist(5, 50) = {}", map.set_if_not_exist(5, 50));
    println!(
        "   get_or_set_func(6, ..) = {}",
        map.get_or_set_func(6, || 6 * 10)
    );
    let parsed = map.try_get_or_set_func(7, || "70".parse::<i32>())?;
    println!("   try_get_or_set_func(7, ..) = {}", parsed);

    // Lazy insertion from many threads: the locked variant computes once
    println!("\n3. Single Computation Across Threads:");
    let shared: Arc<ConcurrentMap<&str, usize>> = Arc::new(ConcurrentMap::new());
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                shared.get_or_set_func_lock("config", || {
                    println!("   worker {} computed the value", worker);
                    worker
                })
            })
        })
        .collect();
    for handle in handles {
        let value = handle.join().map_err(|_| "worker panicked")?;
        println!("   worker saw {}", value);
    }

    // Batch operations and iteration
    println!("\n4. Batch Operations:");
    let batch = ConcurrentMap::new();
    batch.batch_set(HashMap::from([(1, 1), (2, 2), (3, 3)]));
    batch.batch_remove([1, 2]);
    batch.iterator(|key, value| {
        println!("   {} => {}", key, value);
        true
    });

    // Structural transforms
    println!("\n5. Merge, Flip and Clone:");
    let left = ConcurrentMap::from_arrays(["a", "b"], ["x", "y"]);
    let right = ConcurrentMap::from_map(HashMap::from([("c", "z")]));
    left.merge(&right);
    let copy = left.clone();
    left.flip();
    println!("   flipped: {:?}", left);
    println!("   clone before flip: {:?}", copy);

    Ok(())
}
