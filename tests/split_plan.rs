use bulk_partition::{
    config::Config,
    split::{calculate_breaks, group_items, plan_parts},
};

#[test]
fn at_or_below_threshold_is_two() {
    for size in [0.0, 1.0, 4.99, 5.0] {
        assert_eq!(calculate_breaks(size, 5.0, 10), 2, "size {size}");
    }
}

#[test]
fn never_exceeds_max_and_never_decreases() {
    let mut prev = 0;
    for tenth in 51..5000 {
        let size = tenth as f64 / 10.0;
        let n = calculate_breaks(size, 5.0, 10);
        assert!(n <= 10, "size {size} gave {n}");
        assert!(n >= prev, "size {size} dropped from {prev} to {n}");
        prev = n;
    }
}

#[test]
fn twelve_mb_epub_hits_max() {
    assert_eq!(calculate_breaks(12.0, 5.0, 10), 10);
    let cfg = Config::default();
    assert_eq!(plan_parts(&cfg, 12.0), 10);
    assert_eq!(plan_parts(&cfg, 4.0), 1);
    assert_eq!(plan_parts(&cfg, 5.0), 1);
}

#[test]
fn grouping_covers_every_item_once() {
    for items in 2..60 {
        for parts in 1..=10 {
            let groups = group_items(items, parts);
            assert_eq!(groups.len(), parts.min(items));
            assert_eq!(groups.iter().map(|g| g.len()).sum::<usize>(), items);
            assert_eq!(groups[0].start, 0);
            for w in groups.windows(2) {
                assert_eq!(w[0].end, w[1].start);
            }

            // all but the last are the same size; the last takes the rest
            let head = &groups[..groups.len() - 1];
            if let Some(first) = head.first() {
                assert!(head.iter().all(|g| g.len() == first.len()));
                assert!(groups.last().unwrap().len() >= first.len());
            }
            assert!(groups.iter().all(|g| !g.is_empty()));
        }
    }
}

#[test]
fn fewer_than_two_items_is_a_no_op() {
    assert!(group_items(0, 5).is_empty());
    assert!(group_items(1, 5).is_empty());
}
