//! Durable file-based work queue (spec §4.4/§4.8): two directory queues
//! (global and per-user), a dispatcher that scans both on an interval, and a
//! worker pool that drains the resulting in-memory FIFO.

pub mod dirqueue;
pub mod dispatcher;
pub mod item;
pub mod retry;
pub mod sink;
pub mod worker;

pub use dirqueue::{DirQueue, QueueEntry};
pub use dispatcher::DispatchedEntry;
pub use item::{InputRequest, QueueItem};
pub use sink::QueueSink;
