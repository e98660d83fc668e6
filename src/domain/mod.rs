//! Domain Layer
//!
//! Types, ports and pure logic of the data-access layer. Nothing in here
//! performs I/O.

pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;
