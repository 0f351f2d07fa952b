pub mod deploy;
pub mod lambda;
pub mod transport;
