/// Climate CSV records and hourly subsampling.
pub mod record;

/// Frame construction and periodic time encodings.
pub mod features;

/// Deterministic synthetic climate series.
pub mod synthetic;

/// Sliding-window supervised samples.
pub mod window;

/// Train/validation/test partitioning.
pub mod split;

/// Z-score normalization fitted on the training split.
pub mod scaler;
