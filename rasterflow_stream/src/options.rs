//! Options for the reader, writer and synchronizer.
//!
//! All option structs deserialize with `#[serde(default)]`, so a caller can embed
//! them in its own configuration file and only spell out what differs:
//!
//! ```rust
//! use rasterflow_stream::WriterOptions;
//!
//! let options: WriterOptions = serde_yaml_ng::from_str("convert_no_data: true").unwrap();
//! assert!(options.block_optimize);
//! assert!(options.convert_no_data);
//! ```

use rasterflow_core::{ConcurrencyLimits, ElementType};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaderOptions {
	/// Read whole block rows when the blocks span the full raster width.
	pub block_optimize: bool,
	/// Turn elements equal to the band's NoData value into NaN.
	pub convert_no_data: bool,
	/// Convert every chunk to this type. Defaults to the band's own type.
	pub element_type: Option<ElementType>,
	/// Number of chunks fetched ahead of the consumer on a background task. Zero
	/// fetches only on demand.
	pub prefetch: usize,
}

impl Default for ReaderOptions {
	fn default() -> Self {
		Self {
			block_optimize: true,
			convert_no_data: false,
			element_type: None,
			prefetch: 0,
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WriterOptions {
	/// Write whole block rows when the blocks span the full raster width, and hand
	/// matching chunks to the storage without copying.
	pub block_optimize: bool,
	/// Replace NaN with the band's NoData value before writing.
	pub convert_no_data: bool,
	/// Block writes in flight at once while draining a single chunk.
	pub max_concurrent_writes: usize,
}

impl Default for WriterOptions {
	fn default() -> Self {
		Self {
			block_optimize: true,
			convert_no_data: false,
			max_concurrent_writes: ConcurrencyLimits::default().io_bound,
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncOptions {
	/// Hand out a source's fragment unchanged when it is exactly one step long.
	pub block_optimize: bool,
	/// How many steps (or, before the first step, fragments) a source may buffer
	/// before it is no longer polled.
	pub high_water_mark: usize,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self {
			block_optimize: true,
			high_water_mark: 16,
		}
	}
}
