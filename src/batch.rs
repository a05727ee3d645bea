//! Batch partitioning.

/// Split `items` into ordered batches of `batch_size`.
///
/// Produces `ceil(N / batch_size)` batches; every batch is full except
/// possibly the last. Ordering is preserved within and across batches.
///
/// Panics if `batch_size` is zero.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    assert!(batch_size >= 1, "batch_size must be at least 1");

    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut batch = Vec::with_capacity(batch_size);
    for item in items {
        batch.push(item);
        if batch.len() == batch_size {
            batches.push(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)));
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}
