//! Client socket abstraction.
mod socket;

pub use socket::Socket;
