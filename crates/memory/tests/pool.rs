//! Integration tests for the fixed-size Pool

use std::collections::HashSet;

use basalt_memory::extent::Extent;
use basalt_memory::pool::Pool;
use basalt_memory::utils::WORD;
use rstest::rstest;

#[rstest]
#[case(1, WORD)]
#[case(8, 8)]
#[case(12, 16)]
#[case(24, 24)]
#[case(100, 104)]
fn test_slot_stride(#[case] requested: usize, #[case] stride: usize) {
    // Strides above assume a 64-bit target; 32-bit rounds differently.
    if WORD == 8 {
        assert_eq!(Pool::slot_stride(requested), stride);
    }
    assert!(Pool::slot_stride(requested) >= requested.max(WORD));
    assert_eq!(Pool::slot_stride(requested) % WORD, 0);
}

#[test]
fn test_pool_over_slice_full_cycle() {
    let mut buf = vec![0u8; 4096];
    let mut pool = Pool::from_slice(&mut buf, 48, 64).expect("pool fits");

    let mut live = Vec::new();
    while let Ok(ptr) = pool.alloc() {
        unsafe { ptr.as_ptr().write_bytes(live.len() as u8, 48) };
        live.push(ptr);
    }
    assert_eq!(live.len(), 64);
    assert!(pool.is_full());
    assert_eq!(pool.free_slots(), 0);

    // Every slot is distinct and keeps its contents.
    let distinct: HashSet<_> = live.iter().map(|p| p.as_ptr() as usize).collect();
    assert_eq!(distinct.len(), 64);
    for (i, ptr) in live.iter().enumerate() {
        assert_eq!(unsafe { ptr.as_ptr().add(47).read() }, i as u8);
    }

    for ptr in live.drain(..) {
        unsafe { pool.free(ptr) };
    }
    assert!(pool.is_empty());
    pool.validate().expect("free list intact");
}

#[test]
fn test_exhausted_is_retryable() {
    let mut buf = vec![0u8; 256];
    let mut pool = Pool::from_slice(&mut buf, 16, 2).unwrap();
    let a = pool.alloc().unwrap();
    let _b = pool.alloc().unwrap();

    let err = pool.alloc().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.code(), "MEM:POOL:EXHAUSTED");

    // Freeing makes the next alloc succeed again.
    unsafe { pool.free(a) };
    assert_eq!(pool.alloc().unwrap(), a);
}

#[test]
fn test_init_over_raw_extent() {
    let mut backing = vec![0u64; 64];
    let extent = Extent::from_slice(unsafe {
        std::slice::from_raw_parts_mut(backing.as_mut_ptr().cast::<u8>(), 512)
    });

    let max = Pool::max_capacity(extent, 32);
    assert_eq!(max, 16);
    let mut pool = unsafe { Pool::init(extent, 32, max) }.unwrap();
    assert_eq!(pool.capacity(), 16);
    assert!(unsafe { Pool::init(extent, 32, max + 1) }.is_err());

    let first = pool.alloc().unwrap();
    assert_eq!(first.as_ptr() as usize, extent.addr());
    assert_eq!(pool.slot_index(first), Some(0));
    assert!(extent.contains(first.as_ptr() as usize));
}

#[test]
fn test_foreign_pointer_not_owned() {
    let mut buf_a = vec![0u8; 128];
    let mut buf_b = vec![0u8; 128];
    let mut a = Pool::from_slice(&mut buf_a, 16, 4).unwrap();
    let mut b = Pool::from_slice(&mut buf_b, 16, 4).unwrap();

    let from_b = b.alloc().unwrap();
    assert!(!a.owns(from_b));
    assert!(b.owns(from_b));
    assert!(a.alloc().is_ok());
}
