//! Request/completion queue plumbing between the kernel, the pager, and
//! applications. A [Queue] is a duplex pair of subqueues: requests of type S
//! flow one way, completions of type C flow back, correlated by a 32-bit id
//! chosen by the submitter. The transport here is an in-process channel; the
//! contract it implements (reliable, ordered, multi-producer/single-consumer,
//! `submit`/`receive`/`complete`/`get_completion`) is what any physical
//! transport must provide.

mod callback_queue;
mod queue;
mod sender_queue;

pub use callback_queue::CallbackQueueReceiver;
pub use queue::{Queue, QueueError};
pub use sender_queue::QueueSender;
