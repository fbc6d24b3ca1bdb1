//! Switchyard: Context-Switched Remote Invocation
//!
//! Reaches remote session objects hosted by different application-server
//! runtimes from a single process, keeping each runtime's class-resolution
//! context and serialization delegate isolated from the others and from the
//! caller. Calls run thread-per-call inside a temporarily installed
//! resolution context, with an optional interrupt-based deadline.

pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod interrupt;
pub mod libdir;
pub mod logging;
pub mod naming;
pub mod proxy;
pub mod switch;
pub mod timer;
