use smallvec::SmallVec;

/// Native indices of the future steps for one input sample.
pub type OutputIndices = SmallVec<[usize; 4]>;

/// `in_idx + i * tstep` for `i` in `1..=n_tsteps`.
///
/// A step that would run past the last native sample of the year falls back
/// to `in_idx` itself, so trailing samples learn the identity. Each step is
/// checked on its own.
pub fn plan_output_indices(in_idx: usize, tstep: usize, n_tsteps: usize, n_native: usize) -> OutputIndices {
    (1..=n_tsteps)
        .map(|i| {
            let candidate = in_idx.saturating_add(i.saturating_mul(tstep));
            if candidate >= n_native { in_idx } else { candidate }
        })
        .collect()
}
