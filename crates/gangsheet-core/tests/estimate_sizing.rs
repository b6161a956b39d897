//! Canvas estimator: sampling, slack, clamping, and fallbacks.

use gangsheet_core::estimate::estimate_canvas;
use gangsheet_core::model::{RemainingWork, WorkItem};

fn item(name: &str) -> WorkItem {
    WorkItem {
        source_ref: name.into(),
        template_key: "DTF".into(),
        repeat_count: 1,
    }
}

fn remaining_for(items: &[WorkItem], count: u32) -> RemainingWork {
    let mut remaining = RemainingWork::new();
    for it in items {
        remaining.insert(it.key(), count);
    }
    remaining
}

#[test]
fn estimate_grows_with_remaining_units() {
    let items = vec![item("a.png")];
    let few = estimate_canvas(
        &items,
        &remaining_for(&items, 2),
        (2, 2),
        (1000, 1000),
        1.2,
        4,
        |_| Some((10, 10)),
    );
    let many = estimate_canvas(
        &items,
        &remaining_for(&items, 50),
        (2, 2),
        (1000, 1000),
        1.2,
        4,
        |_| Some((10, 10)),
    );
    assert!(many.0 > few.0 && many.1 > few.1);
}

#[test]
fn repeated_keys_do_not_inflate_the_estimate() {
    // The same design listed twice shares one remaining count; the
    // estimate must match the single-entry work list.
    let single = vec![item("a.png")];
    let doubled = vec![item("a.png"), item("a.png")];
    let remaining = remaining_for(&single, 2);
    let dims = |_: &WorkItem| Some((10u32, 10u32));
    let a = estimate_canvas(&single, &remaining, (2, 2), (1000, 1000), 1.2, 4, dims);
    let b = estimate_canvas(&doubled, &remaining, (2, 2), (1000, 1000), 1.2, 4, dims);
    assert_eq!(a, b);
}

#[test]
fn unreadable_samples_fall_back_to_printer_max() {
    let items = vec![item("a.png")];
    let est = estimate_canvas(
        &items,
        &remaining_for(&items, 3),
        (2, 2),
        (440, 600),
        1.2,
        4,
        |_| None,
    );
    assert_eq!(est, (440, 600));
}

#[test]
fn estimate_never_exceeds_the_printer_max() {
    let items = vec![item("a.png")];
    let est = estimate_canvas(
        &items,
        &remaining_for(&items, 10_000),
        (2, 2),
        (440, 600),
        1.2,
        4,
        |_| Some((100, 100)),
    );
    assert_eq!(est, (440, 600));
}

#[test]
fn estimate_floor_fits_the_largest_item_plus_spacing() {
    let items = vec![item("a.png")];
    let est = estimate_canvas(
        &items,
        &remaining_for(&items, 1),
        (5, 5),
        (1000, 1000),
        1.2,
        4,
        |_| Some((40, 90)),
    );
    assert!(est.0 >= 40 + 10);
    assert!(est.1 >= 90 + 10);
}
