//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a locker is alive.
//!
//! # Tasks
//! - Garbage collection: removes expired items at the configured interval

mod gc;

pub(crate) use gc::{spawn_gc_task, GcHandle};
