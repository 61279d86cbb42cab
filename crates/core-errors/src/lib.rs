//! Errors, autocorrects, and the thread-safe pipeline that carries them.
//!
//! Producers live on worker threads and push into an [`queue::ErrorQueue`];
//! one consumer thread drains and hands batches to an [`flushers::ErrorFlusher`]
//! for rendering. Query responses share the queue, tagged by message kind.

pub mod autocorrect;
pub mod counters;
pub mod errors;
pub mod fatal;
pub mod flushers;
pub mod queue;

pub use autocorrect::{AutocorrectSuggestion, Edit};
pub use counters::CounterState;
pub use errors::{Error, ErrorClass, ErrorLine, ErrorSection};
pub use fatal::FatalError;
pub use flushers::{CollectorFlusher, ErrorFlusher, NullFlusher, QueryCollector, StdoutFlusher};
pub use queue::{ErrorQueue, ErrorQueueMessage};
