use bms_pipeline::Aggregator;
use domain::{Field, Reading};

fn reading(field: Field, value: f64) -> Reading {
    Reading {
        field,
        value,
        ts_ms: 1,
    }
}

#[tokio::test]
async fn flush_reduces_and_clears() {
    let aggregator = Aggregator::new();
    aggregator
        .accumulate(&[
            reading(Field::Voltage, 52.1),
            reading(Field::Voltage, 52.3),
            reading(Field::Charge, 10.0),
            reading(Field::Charge, 20.0),
            reading(Field::Charge, 30.0),
        ])
        .await;
    assert_eq!(aggregator.pending().await.get(&Field::Voltage), Some(&2));

    let flush = aggregator.begin_flush().await.expect("flush");
    let values: Vec<(Field, f64, usize)> = flush
        .values
        .iter()
        .map(|value| (value.field, value.value, value.samples))
        .collect();
    assert_eq!(
        values,
        vec![(Field::Voltage, 52.2, 2), (Field::Charge, 960.0, 3)]
    );
    drop(flush);
    assert!(aggregator.pending().await.is_empty());
}

#[tokio::test]
async fn overlapping_flush_is_skipped_and_samples_survive() {
    let aggregator = Aggregator::new();
    aggregator.accumulate(&[reading(Field::Power, 10.0)]).await;
    let first = aggregator.begin_flush().await.expect("first flush");
    assert_eq!(first.values.len(), 1);

    aggregator.accumulate(&[reading(Field::Power, 20.0)]).await;
    assert!(aggregator.begin_flush().await.is_none());
    assert_eq!(aggregator.pending().await.get(&Field::Power), Some(&1));

    drop(first);
    let second = aggregator.begin_flush().await.expect("second flush");
    assert_eq!(second.values[0].value, 20.0);
}

#[tokio::test]
async fn empty_flush_has_no_values() {
    let aggregator = Aggregator::new();
    let flush = aggregator.begin_flush().await.expect("flush");
    assert!(flush.values.is_empty());
}
