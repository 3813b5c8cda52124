// Domain layer: machine model and the hardware ports the engine talks to.

pub mod model;
pub mod ports;
