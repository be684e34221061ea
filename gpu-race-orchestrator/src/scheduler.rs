//! Round slicing over the ranked offer list. Rounds are 1-based.

/// Offers raced in `round`: `all[(round-1)*batch_size .. round*batch_size]`,
/// clamped to the list (the last batch may be partial).
pub fn next_batch<T>(all: &[T], round: u32, batch_size: usize) -> &[T] {
    if round == 0 || batch_size == 0 {
        return &[];
    }
    let start = (round as usize - 1).saturating_mul(batch_size);
    if start >= all.len() {
        return &[];
    }
    let end = start.saturating_add(batch_size).min(all.len());
    &all[start..end]
}

/// True when another round may follow `round`.
pub fn has_more_rounds<T>(all: &[T], round: u32, batch_size: usize, max_rounds: u32) -> bool {
    round < max_rounds && all.len() > (round as usize).saturating_mul(batch_size)
}
