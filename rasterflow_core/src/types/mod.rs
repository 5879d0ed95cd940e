//! Element types, chunks, and the buffering primitives shared by all streams.

mod chunk;
pub use chunk::*;

mod chunk_stream;
pub use chunk_stream::*;

mod element_type;
pub use element_type::*;

mod fragment_queue;
pub use fragment_queue::*;

mod size;
pub use size::*;
