mod base;
mod connection;
mod topology;

pub use base::*;
pub use connection::*;
pub use topology::*;
