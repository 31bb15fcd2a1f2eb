use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::types::PriceTick;

/// Merges several tick streams into one.
///
/// No ordering is kept across inputs. The merged channel closes once every
/// input has closed, or as soon as `cancel` fires.
pub fn fan_in(
    cancel: &CancellationToken,
    inputs: Vec<mpsc::Receiver<PriceTick>>,
    capacity: usize,
) -> mpsc::Receiver<PriceTick> {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    for (index, mut input) in inputs.into_iter().enumerate() {
        let tx = tx.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let tick = tokio::select! {
                    _ = cancel.cancelled() => break,
                    tick = input.recv() => match tick {
                        Some(tick) => tick,
                        None => break,
                    },
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(tick) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(input = index, "Fan-in forwarder finished");
        });
    }

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use std::time::Duration;
    use crate::types::{Exchange, Symbol};

    fn tick(exchange: Exchange, ms: i64) -> PriceTick {
        PriceTick::new(
            exchange,
            Symbol::TonUsdt,
            99.0,
            DateTime::<Utc>::from_timestamp_millis(ms).unwrap(),
        )
    }

    async fn merge(batches: Vec<Vec<i64>>) -> Vec<(Exchange, i64)> {
        let mut receivers = Vec::new();
        for (i, batch) in batches.into_iter().enumerate() {
            let exchange = Exchange::SOURCES[i % Exchange::SOURCES.len()];
            let (tx, rx) = mpsc::channel(4);
            receivers.push(rx);
            tokio::spawn(async move {
                for ms in batch {
                    tx.send(tick(exchange, ms)).await.unwrap();
                }
            });
        }

        let mut merged = fan_in(&CancellationToken::new(), receivers, 4);
        let mut out = Vec::new();
        while let Some(t) = merged.recv().await {
            out.push((t.exchange, t.timestamp_ms()));
        }
        out
    }

    #[tokio::test]
    async fn test_empty_inputs_close_immediately() {
        let mut merged = fan_in(&CancellationToken::new(), Vec::new(), 1);
        assert!(merged.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_closes_merged() {
        let (_tx, rx) = mpsc::channel::<PriceTick>(1);
        let cancel = CancellationToken::new();
        let mut merged = fan_in(&cancel, vec![rx], 1);

        cancel.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), merged.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_one_closed_input_does_not_block_others() {
        let (closed_tx, closed_rx) = mpsc::channel::<PriceTick>(1);
        let (live_tx, live_rx) = mpsc::channel::<PriceTick>(1);
        drop(closed_tx);

        let mut merged = fan_in(&CancellationToken::new(), vec![closed_rx, live_rx], 1);
        live_tx.send(tick(Exchange::Exchange2, 7)).await.unwrap();

        let got = merged.recv().await.unwrap();
        assert_eq!(got.exchange, Exchange::Exchange2);
        drop(live_tx);
        assert!(merged.recv().await.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_merged_output_is_exact_union(
            batches in prop::collection::vec(prop::collection::vec(1i64..1_000_000, 0..20), 0..6)
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let mut expected: Vec<(Exchange, i64)> = batches
                .iter()
                .enumerate()
                .flat_map(|(i, batch)| {
                    let exchange = Exchange::SOURCES[i % Exchange::SOURCES.len()];
                    batch.iter().map(move |ms| (exchange, *ms))
                })
                .collect();

            let mut actual = runtime.block_on(merge(batches));
            expected.sort();
            actual.sort();
            prop_assert_eq!(actual, expected);
        }
    }
}
