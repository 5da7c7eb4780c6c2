// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-loop specs: the timer cascade and re-entrant teardown.

use std::cell::RefCell;
use std::rc::Rc;

use plinth_mainloop::Mainloop;

/// Three timers at 30/50/80 ms over a 300 ms run fire 10/6/3 times,
/// give or take the boundary tick.
#[test]
fn timer_cascade_fire_counts() {
    let ml = Mainloop::new().unwrap();
    let counts: Rc<RefCell<[u32; 3]>> = Rc::new(RefCell::new([0; 3]));

    for (slot, period) in [30u32, 50, 80].into_iter().enumerate() {
        let c = Rc::clone(&counts);
        ml.add_timer(period, move |_, _| c.borrow_mut()[slot] += 1);
    }
    ml.add_oneshot(300, |ml, _| ml.quit(0));

    assert_eq!(ml.run(), 0);

    let counts = counts.borrow();
    assert!((9..=11).contains(&counts[0]), "30ms timer fired {}", counts[0]);
    assert!((5..=7).contains(&counts[1]), "50ms timer fired {}", counts[1]);
    assert!((2..=4).contains(&counts[2]), "80ms timer fired {}", counts[2]);
}

/// Destroying the timer and quitting the loop from inside the timer's
/// own callback: the callback returns, `run` reports the exit code,
/// and no handler runs afterwards.
#[test]
fn reentrant_destroy_of_timer_and_loop() {
    let ml = Mainloop::new().unwrap();
    let after = Rc::new(RefCell::new(false));

    ml.add_oneshot(10, |ml, id| {
        ml.del_timer(id);
        ml.quit(42);
    });

    // Would fire right after the first timer if the loop kept going.
    let a = Rc::clone(&after);
    ml.add_timer(15, move |_, _| *a.borrow_mut() = true);

    assert_eq!(ml.run(), 42);
    assert!(!*after.borrow(), "no handler may run after quit");

    // The handle is still usable for inspection after the run.
    assert!(ml.now_us() > 0);
}
