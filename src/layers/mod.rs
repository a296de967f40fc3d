/// Element-wise activations.
pub mod activation;

/// Fully connected layer.
pub mod linear;

/// Long short-term memory cell.
pub mod lstm_cell;

/// Gated recurrent unit cell.
pub mod gru_cell;

/// Temporal convolution.
pub mod conv1d;
