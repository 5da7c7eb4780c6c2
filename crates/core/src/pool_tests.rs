// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pool tests: cookie arithmetic, first-fit reuse, ceilings.

use super::*;
use yare::parameterized;

#[test]
fn cookies_start_at_one_and_ascend() {
    let mut pool: Pool<u32> = Pool::new();
    let a = pool.insert(10).unwrap();
    let b = pool.insert(20).unwrap();
    let c = pool.insert(30).unwrap();

    assert_eq!(a.raw(), 1);
    assert_eq!(b.raw(), 2);
    assert_eq!(c.raw(), 3);
    assert_eq!(pool.get(b), Some(&20));
}

#[test]
fn remove_frees_the_lowest_slot_for_reuse() {
    let mut pool: Pool<&str> = Pool::new();
    let a = pool.insert("a").unwrap();
    let _b = pool.insert("b").unwrap();
    let c = pool.insert("c").unwrap();

    assert_eq!(pool.remove(a).unwrap(), "a");
    assert_eq!(pool.remove(c).unwrap(), "c");

    // First-fit: the lowest freed slot is claimed first.
    let d = pool.insert("d").unwrap();
    assert_eq!(d.raw(), a.raw());
    assert_eq!(pool.len(), 2);
}

#[test]
fn cookie_stays_valid_across_unrelated_churn() {
    let mut pool: Pool<u64> = Pool::new();
    let keep = pool.insert(0xfeed).unwrap();

    let mut cookies = Vec::new();
    for i in 0..1000u64 {
        cookies.push(pool.insert(i).unwrap());
    }
    for cookie in cookies.iter().step_by(2) {
        pool.remove(*cookie).unwrap();
    }

    assert_eq!(pool.get(keep), Some(&0xfeed));
}

#[test]
fn limit_fails_with_out_of_space() {
    let mut pool: Pool<u8> =
        Pool::with_config(PoolConfig { limit: 2, ..PoolConfig::default() });
    pool.insert(1).unwrap();
    pool.insert(2).unwrap();
    assert!(matches!(pool.insert(3), Err(Error::OutOfSpace)));
}

#[test]
fn cookie_beyond_limit_is_out_of_range() {
    let mut pool: Pool<u8> =
        Pool::with_config(PoolConfig { limit: 8, ..PoolConfig::default() });
    let cookie = Cookie::from_raw(9).unwrap();
    assert!(matches!(pool.insert_at(cookie, 1), Err(Error::Range)));
    assert!(matches!(pool.remove(cookie), Err(Error::Range)));
}

#[test]
fn insert_at_rejects_live_slots() {
    let mut pool: Pool<u8> = Pool::new();
    let cookie = pool.insert(1).unwrap();
    assert!(matches!(pool.insert_at(cookie, 2), Err(Error::Exists)));
}

#[test]
fn insert_at_extends_the_arena() {
    let mut pool: Pool<u8> = Pool::new();
    let far = Cookie::from_raw(pool.entries_per_chunk() * 2 + 5).unwrap();
    pool.insert_at(far, 42).unwrap();
    assert_eq!(pool.get(far), Some(&42));

    // Fresh allocations still fill from the bottom.
    let low = pool.insert(7).unwrap();
    assert_eq!(low.raw(), 1);
}

#[test]
fn removing_a_dead_slot_is_not_found() {
    let mut pool: Pool<u8> = Pool::new();
    let cookie = pool.insert(1).unwrap();
    pool.remove(cookie).unwrap();
    assert!(matches!(pool.remove(cookie), Err(Error::NotFound)));
    assert_eq!(pool.get(cookie), None);
}

#[parameterized(
    small = { 1024 },
    default = { 4096 },
    large = { 16384 },
)]
fn growth_crosses_chunk_boundaries(chunk_bytes: usize) {
    let mut pool: Pool<[u8; 8]> =
        Pool::with_config(PoolConfig { chunk_bytes, ..PoolConfig::default() });
    let per_chunk = pool.entries_per_chunk() as usize;
    let total = per_chunk * 2 + 3;

    let cookies: Vec<_> =
        (0..total).map(|i| pool.insert([(i % 251) as u8; 8]).unwrap()).collect();
    assert_eq!(pool.len() as usize, total);

    for (i, cookie) in cookies.iter().enumerate() {
        assert_eq!(pool.get(*cookie), Some(&[(i % 251) as u8; 8]));
    }
}
