//! Request dispatch, response reassembly and the upload state machine.

mod manager;
mod parsers;
mod queue;
mod reassembly;
mod upload;

pub use manager::NewtManager;
