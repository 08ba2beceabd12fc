//! A feed's context ring evicts its oldest entry once it exceeds its
//! configured capacity, keeping only the most recent `N_ctx` normalized
//! events (spec §8, scenario 3; spec §4.2 eviction rule).

use ts_context::ContextRing;
use ts_protocol::{DataFormat, FeedId};

#[tokio::test]
async fn ring_at_capacity_evicts_the_oldest_entry_on_append() {
    let ctx = ContextRing::with_capacity(3);
    let feed_id = FeedId::new("ticks");

    for seq in 1..=5 {
        let payload = format!(r#"{{"seq":{seq}}}"#);
        let summary = ctx.append(&feed_id, payload.as_bytes(), DataFormat::Json).await;
        if seq <= 3 {
            assert_eq!(summary.evicted, 0);
        } else {
            assert_eq!(summary.evicted, 1);
        }
        assert_eq!(summary.new_size, seq.min(3));
    }

    let snapshot = ctx.snapshot(&feed_id).await;
    assert_eq!(snapshot.len(), 3);

    let seqs: Vec<i64> = snapshot.iter().map(|e| e.data["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, vec![5, 4, 3]);

    let (item_count, approx_bytes, _oldest_age) = ctx.stats(&feed_id).await;
    assert_eq!(item_count, 3);
    assert!(approx_bytes > 0);
}

#[tokio::test]
async fn clearing_a_feed_empties_its_ring_without_affecting_others() {
    let ctx = ContextRing::with_capacity(10);
    let a = FeedId::new("a");
    let b = FeedId::new("b");

    ctx.append(&a, b"{}", DataFormat::Json).await;
    ctx.append(&b, b"{}", DataFormat::Json).await;

    ctx.clear(&a).await;

    assert!(ctx.snapshot(&a).await.is_empty());
    assert_eq!(ctx.snapshot(&b).await.len(), 1);
}
