#![warn(missing_docs)]

//! This crate contains the interfaces and in-memory implementations that
//! back persistence in the Silo secret replication service. The replication
//! worker is generic over these seams, so alternative backends (a SQL
//! persistence gateway, a Redis coordinator) can be swapped in without
//! touching the worker itself.

#[macro_use]
extern crate tracing;

mod key_value;
mod lock;
mod memory;
mod memory_replica;
mod replica;

pub use key_value::*;
pub use lock::*;
pub use memory::*;
pub use memory_replica::*;
pub use replica::*;
