// Adapters layer: concrete implementations of the hardware ports.

pub mod scale;
pub mod simulated;
pub mod stepper;
