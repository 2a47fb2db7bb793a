//! Data exchanged between the scanner and the dispatcher.

pub mod batch;
pub mod message;
