//! Per-run event state for stepwise.
//!
//! - [`EventStore`]: keyed state updated through functional patches, with a
//!   patch log and ordered change notifications.
//! - [`steps`]: the `steps` / `sources` shape consumers render.
//! - [`ChunkBuffer`]: batches streamed text into readable chunks.

pub mod chunk_buffer;
pub mod steps;
pub mod store;

pub use chunk_buffer::ChunkBuffer;
pub use steps::{
    SOURCES_KEY, STEPS_KEY, Step, StepEntry, StepStatus, StepsState, append_sources, next_step_id,
    set_entry_status, set_step_status, upsert_step_entry,
};
pub use store::{DEFAULT_EVENT_CAPACITY, EventSnapshot, EventStore, EventUpdate};
