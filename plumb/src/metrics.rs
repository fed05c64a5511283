//! Metric names recorded by pipeline stages.
//!
//! Stages record through the [`metrics`] facade, so nothing is exported until a recorder is
//! installed (see `plumb_telemetry::metrics::init_metrics_handle`).

/// Label for the stage that recorded the metric.
pub const STAGE_LABEL: &str = "stage";

/// Label for the [`crate::error::ErrorKind`] an item was routed with.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for why the collector released a batch.
pub const REASON_LABEL: &str = "reason";

// Item metrics

/// Counter for items successfully processed and forwarded.
pub const PLUMB_ITEMS_PROCESSED_TOTAL: &str = "plumb_items_processed_total";

/// Counter for items handed to `on_undeliverable`.
pub const PLUMB_ITEMS_UNDELIVERABLE_TOTAL: &str = "plumb_items_undeliverable_total";

// Batch metrics

/// Counter for batches released by the collector.
pub const PLUMB_BATCHES_EMITTED_TOTAL: &str = "plumb_batches_emitted_total";

/// Counter for whole batches handed to `on_undeliverable`.
pub const PLUMB_BATCHES_UNDELIVERABLE_TOTAL: &str = "plumb_batches_undeliverable_total";

/// Histogram of released batch sizes.
pub const PLUMB_BATCH_SIZE: &str = "plumb_batch_size";
