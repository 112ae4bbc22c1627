// Derived views whose inner subscription depends on an outer one.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{Subscription, publish_arc};
use crate::error::CoreError;

/// Re-open the inner view every time the outer one changes.
///
/// The returned subscription always reflects the inner view for the most
/// recent outer value. The previous inner view is dropped only after its
/// replacement is open, so consumers never observe an empty gap. A failed
/// re-open keeps the last snapshot and logs a warning. Once the outer view
/// shuts down, the current inner view is still followed.
pub(crate) async fn switch_map<K, T, F, Fut>(
    mut outer: Subscription<K>,
    open: F,
) -> Result<Subscription<T>, CoreError>
where
    K: Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
    F: Fn(Arc<K>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Subscription<T>, CoreError>> + Send + 'static,
{
    let mut inner = open(outer.latest()).await?;
    let (tx, rx) = watch::channel(inner.latest());

    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut outer_live = true;
        let mut inner_live = true;
        while outer_live || inner_live {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                next = outer.changed(), if outer_live => {
                    let Some(key) = next else {
                        outer_live = false;
                        continue;
                    };
                    let opened = tokio::select! {
                        _ = task_cancel.cancelled() => break,
                        opened = open(key) => opened,
                    };
                    match opened {
                        Ok(sub) => {
                            inner = sub;
                            inner_live = true;
                            publish_arc(&tx, inner.latest());
                        }
                        Err(e) => warn!(error = %e, "re-opening derived view failed, keeping last snapshot"),
                    }
                }
                next = inner.changed(), if inner_live => match next {
                    Some(snapshot) => {
                        publish_arc(&tx, snapshot);
                    }
                    None => inner_live = false,
                },
            }
        }
    });

    Ok(Subscription::new(rx, cancel.drop_guard()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn follows_the_latest_outer_value() {
        let (outer_tx, outer_rx) = watch::channel(Arc::new(2_u32));
        let outer = Subscription::new(outer_rx, CancellationToken::new().drop_guard());

        let mut doubled = switch_map(outer, |n: Arc<u32>| async move {
            Ok(Subscription::constant(vec![*n; 2]))
        })
        .await
        .unwrap();
        assert_eq!(**doubled.current(), vec![2, 2]);

        outer_tx.send(Arc::new(7)).unwrap();
        assert_eq!(*doubled.changed().await.unwrap(), vec![7, 7]);
    }

    #[tokio::test]
    async fn initial_open_failure_is_returned() {
        let outer = Subscription::constant(1_u8);
        let result = switch_map(outer, |_| async {
            Err::<Subscription<u8>, _>(CoreError::validation("nope"))
        })
        .await;
        assert!(matches!(result, Err(CoreError::ValidationFailed { .. })));
    }
}
