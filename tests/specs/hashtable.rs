// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hash-table churn spec: cookie-addressed deletion during iteration.

use plinth_core::htbl::{Direction, HashTable};
use plinth_core::pool::Cookie;

/// Insert k0..k999 with minted cookies; walk forward deleting every
/// third entry by its cookie; exactly ⌈1000·2/3⌉ survive, in their
/// original relative order.
#[test]
fn churn_deletes_by_cookie_mid_walk() {
    let mut table: HashTable<String, usize> = HashTable::new();
    let mut cookies: Vec<Cookie> = Vec::new();
    for i in 0..1000 {
        cookies.push(table.insert(format!("k{i}"), i).unwrap());
    }

    let cursor = table.cursor(Direction::Forward);
    let mut visited = 0usize;
    while let Some(cookie) = table.cursor_next(&cursor).unwrap() {
        visited += 1;
        if visited % 3 == 0 {
            table.remove_cookie(cookie).unwrap();
        }
    }

    assert_eq!(visited, 1000);
    assert_eq!(table.len(), 667);

    let survivors: Vec<usize> = table.iter().map(|(_, v)| *v).collect();
    let expected: Vec<usize> = (0..1000).filter(|i| (i + 1) % 3 != 0).collect();
    assert_eq!(survivors, expected);

    // Survivor cookies still answer; deleted ones do not.
    for (i, cookie) in cookies.iter().enumerate() {
        let alive = (i + 1) % 3 != 0;
        assert_eq!(table.lookup_cookie(*cookie).is_some(), alive, "entry {i}");
    }
}

/// Cookies issued at insert keep referring to the same entry through
/// unrelated churn until that entry is deleted.
#[test]
fn minted_cookies_are_stable_references() {
    let mut table: HashTable<String, u32> = HashTable::new();
    let keep = table.insert("keep".into(), 1).unwrap();

    for round in 0..10u32 {
        let mut batch = Vec::new();
        for i in 0..100 {
            batch.push(table.insert(format!("r{round}-{i}"), i).unwrap());
        }
        for cookie in batch {
            table.remove_cookie(cookie).unwrap();
        }
        assert_eq!(table.lookup_cookie(keep), Some((&"keep".to_string(), &1)));
    }
}
