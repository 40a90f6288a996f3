use std::path::Path;
use std::sync::LazyLock;

use prometheus::*;

static METRIC_TX_COMMIT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imcatalog_tx_commit", "count of committed transactions", &["op"])
        .unwrap()
});

static METRIC_TX_CONFLICT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imcatalog_tx_conflict",
        "count of transaction attempts aborted by a conflict",
        &["op"]
    )
    .unwrap()
});

static METRIC_TX_EXHAUSTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imcatalog_tx_exhausted",
        "count of transactions that ran out of retry attempts",
        &["op"]
    )
    .unwrap()
});

static METRIC_PAGE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("imcatalog_page_fetch_duration", "duration of a page fetch in seconds")
        .unwrap()
});

pub fn inc_tx_commit(op: &str) {
    METRIC_TX_COMMIT.with_label_values(&[op]).inc();
}

pub fn inc_tx_conflict(op: &str) {
    METRIC_TX_CONFLICT.with_label_values(&[op]).inc();
}

pub fn inc_tx_exhausted(op: &str) {
    METRIC_TX_EXHAUSTED.with_label_values(&[op]).inc();
}

pub fn observe_page_fetch(duration: f32) {
    METRIC_PAGE_DURATION.observe(duration as f64);
}

/// 以文本格式导出当前进程的全部指标
pub fn dump(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let encoder = TextEncoder::new();
    let text = encoder.encode_to_string(&prometheus::gather())?;
    std::fs::write(path, text)?;
    Ok(())
}
