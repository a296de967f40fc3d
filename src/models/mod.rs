/// Declarative layer and model descriptions with shape validation.
pub mod spec;

/// LSTM and GRU layers unrolled over a window.
pub mod recurrent;

/// Sequential model built from a `ModelSpec`.
pub mod sequential;
