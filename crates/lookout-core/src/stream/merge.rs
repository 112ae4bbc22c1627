// Fan-in helpers: several store feeds (or subscriptions) folded into one
// published view.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::select_all;
use lookout_api::{Feed, IN_FILTER_LIMIT};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Subscription, publish};

/// Fold many feeds into one view. `combine` sees the latest snapshot of
/// every feed, in the order given, each time any of them changes.
pub(crate) fn merge_feeds<S, T, F>(feeds: Vec<Feed<S>>, combine: F) -> Subscription<T>
where
    S: Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
    F: Fn(&[Arc<S>]) -> T + Send + 'static,
{
    if feeds.is_empty() {
        return Subscription::constant(combine(&[]));
    }

    let mut latest: Vec<Arc<S>> = feeds.iter().map(Feed::current).collect();
    let (tx, rx) = watch::channel(Arc::new(combine(&latest)));

    let mut guards = Vec::with_capacity(feeds.len());
    let mut streams = Vec::with_capacity(feeds.len());
    for (index, feed) in feeds.into_iter().enumerate() {
        let (changes, guard) = feed.into_changes();
        guards.push(guard);
        streams.push(changes.map(move |snapshot| (index, snapshot)).boxed());
    }
    let mut merged = select_all(streams);

    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        // Listeners live exactly as long as this task.
        let _guards = guards;
        loop {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                next = merged.next() => {
                    let Some((index, snapshot)) = next else { break };
                    latest[index] = snapshot;
                    publish(&tx, combine(&latest));
                }
            }
        }
    });

    Subscription::new(rx, cancel.drop_guard())
}

/// Combine two live views. A side that shuts down keeps its last value.
pub(crate) fn combine2<A, B, T, F>(
    mut left: Subscription<A>,
    mut right: Subscription<B>,
    combine: F,
) -> Subscription<T>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
    F: Fn(&A, &B) -> T + Send + 'static,
{
    let mut a = left.latest();
    let mut b = right.latest();
    let (tx, rx) = watch::channel(Arc::new(combine(&a, &b)));

    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut left_live = true;
        let mut right_live = true;
        while left_live || right_live {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                next = left.changed(), if left_live => match next {
                    Some(snapshot) => a = snapshot,
                    None => {
                        left_live = false;
                        continue;
                    }
                },
                next = right.changed(), if right_live => match next {
                    Some(snapshot) => b = snapshot,
                    None => {
                        right_live = false;
                        continue;
                    }
                },
            }
            publish(&tx, combine(&a, &b));
        }
    });

    Subscription::new(rx, cancel.drop_guard())
}

/// Deduplicate `ids` (first occurrence wins) and split them into groups
/// small enough for one `IN` filter.
pub(crate) fn in_chunks(ids: &[String]) -> Vec<Vec<String>> {
    let mut seen = HashSet::with_capacity(ids.len());
    let unique: Vec<String> = ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();
    unique
        .chunks(IN_FILTER_LIMIT)
        .map(<[String]>::to_vec)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    fn feed(initial: i32) -> (watch::Sender<Arc<i32>>, Feed<i32>) {
        let (tx, rx) = watch::channel(Arc::new(initial));
        (tx, Feed::new(rx, CancellationToken::new().drop_guard()))
    }

    #[test]
    fn chunks_dedupe_and_respect_the_limit() {
        let ids: Vec<String> = (0..23).map(|i| format!("d{}", i % 21)).collect();
        let chunks = in_chunks(&ids);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 1]);
        assert_eq!(chunks[0][0], "d0");
        assert!(in_chunks(&[]).is_empty());
    }

    #[tokio::test]
    async fn merge_recombines_on_any_change() {
        let (tx_a, a) = feed(1);
        let (tx_b, b) = feed(10);
        let mut sum = merge_feeds(vec![a, b], |parts| parts.iter().map(|p| **p).sum::<i32>());
        assert_eq!(**sum.current(), 11);

        tx_b.send(Arc::new(20)).unwrap();
        assert_eq!(*sum.changed().await.unwrap(), 21);
        tx_a.send(Arc::new(5)).unwrap();
        assert_eq!(*sum.changed().await.unwrap(), 25);
    }

    #[tokio::test]
    async fn merge_of_nothing_is_constant() {
        let mut empty = merge_feeds(Vec::<Feed<i32>>::new(), <[Arc<i32>]>::len);
        assert_eq!(**empty.current(), 0);
        assert!(empty.changed().await.is_none());
    }

    #[tokio::test]
    async fn combine2_survives_a_finished_side() {
        let fixed = Subscription::constant(100);
        let (tx, rx) = watch::channel(Arc::new(1));
        let live = Subscription::new(rx, CancellationToken::new().drop_guard());
        let mut total = combine2(fixed, live, |a, b| a + b);
        assert_eq!(**total.current(), 101);

        tx.send(Arc::new(2)).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), total.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*next, 102);
    }
}
