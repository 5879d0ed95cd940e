//! Lock-step synchronization of several chunk sources.
//!
//! [`RasterSync`] combines named sources of equal total length, typically one
//! [`RasterReader`] per co-registered band, into a single stream of [`SyncChunk`]s.
//! Each step is as long as the smallest amount any source has buffered, so every
//! slice of a step covers the same pixels no matter how the sources cut their
//! chunks.
//!
//! ## Flow control
//!
//! Sources are only polled while the combined stream is polled. After a step has
//! been emitted, a source that holds `step * high_water_mark` elements or more is
//! not polled again until the others have caught up. Before the first step the
//! limit is `high_water_mark` fragments.
//!
//! ## End of data
//!
//! If a source ends while another one still holds buffered elements (or delivers
//! more afterwards), the sources are out of sync and the stream fails with an
//! error naming the source that ended. When every source has ended with nothing
//! left over, the stream ends. Either way all sources are dropped.

mod sync_chunk;
pub use sync_chunk::*;

use crate::{RasterReader, ReaderOptions, SyncOptions};
use anyhow::{Result, anyhow, ensure};
use futures::{
	Stream, StreamExt,
	stream::{BoxStream, FusedStream},
};
use rasterflow_core::{BlockStorage, Chunk, FragmentQueue};
use std::{
	fmt,
	pin::Pin,
	sync::Arc,
	task::{Context, Poll},
};

struct Source {
	name: Arc<str>,
	stream: Option<BoxStream<'static, Result<Chunk>>>,
	queue: FragmentQueue,
}

impl Source {
	fn ended(&self) -> bool {
		self.stream.is_none()
	}

	fn exhausted(&self) -> bool {
		self.ended() && self.queue.is_empty()
	}
}

/// Multiplexer over named chunk sources of equal total length.
///
/// Yields one [`SyncChunk`] per step. A step is as long as the least any source has
/// buffered, and holds a slice of exactly that length from every source, so slice
/// `i` of every source covers the same pixels. Sources are polled in declaration
/// order and only while the synchronizer itself is polled.
///
/// ```rust
/// use futures::TryStreamExt;
/// use rasterflow_core::{Chunk, ChunkStream};
/// use rasterflow_stream::{RasterSync, SyncChunk, SyncOptions};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let a = ChunkStream::from_items(vec![Chunk::from(vec![1u8, 2, 3]), Chunk::from(vec![4u8])]);
/// let b = ChunkStream::from_items(vec![Chunk::from(vec![5u8]), Chunk::from(vec![6u8, 7, 8])]);
/// let steps: Vec<SyncChunk> = RasterSync::new([("a", a.inner), ("b", b.inner)], SyncOptions::default())?
/// 	.try_collect()
/// 	.await?;
///
/// assert!(steps.iter().all(|step| step.get("a").map(Chunk::len) == Some(step.len())));
/// assert_eq!(steps.iter().map(SyncChunk::len).sum::<usize>(), 4);
/// # Ok(())
/// # }
/// ```
pub struct RasterSync {
	sources: Vec<Source>,
	options: SyncOptions,
	/// Length of the last emitted step.
	step: Option<usize>,
	/// Set once the stream has ended or failed; every source is dropped by then.
	done: bool,
}

impl fmt::Debug for RasterSync {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let buffered: Vec<(&str, usize)> = self
			.sources
			.iter()
			.map(|source| (source.name.as_ref(), source.queue.buffered()))
			.collect();
		f.debug_struct("RasterSync")
			.field("buffered", &buffered)
			.field("step", &self.step)
			.field("done", &self.done)
			.finish()
	}
}

impl RasterSync {
	/// Combines `sources`, given as `(name, stream)` pairs. Needs at least one
	/// source, and names must be unique.
	pub fn new<N, S>(sources: impl IntoIterator<Item = (N, S)>, options: SyncOptions) -> Result<Self>
	where
		N: Into<Arc<str>>,
		S: Stream<Item = Result<Chunk>> + Send + 'static,
	{
		let mut list: Vec<Source> = Vec::new();
		for (name, stream) in sources {
			let name: Arc<str> = name.into();
			ensure!(
				list.iter().all(|source| source.name != name),
				"duplicate source name '{name}'"
			);
			list.push(Source {
				name,
				stream: Some(stream.boxed()),
				queue: FragmentQueue::new(),
			});
		}
		ensure!(!list.is_empty(), "raster sync needs at least one source");
		log::debug!(
			"synchronizing sources {:?}",
			list.iter().map(|source| source.name.as_ref()).collect::<Vec<_>>()
		);
		Ok(Self {
			sources: list,
			options,
			step: None,
			done: false,
		})
	}

	/// Opens a [`RasterReader`] on every storage and combines them.
	pub fn from_storages<N>(
		storages: impl IntoIterator<Item = (N, Arc<dyn BlockStorage>)>,
		reader_options: &ReaderOptions,
		options: SyncOptions,
	) -> Result<Self>
	where
		N: Into<Arc<str>>,
	{
		Self::new(
			storages
				.into_iter()
				.map(|(name, storage)| (name, RasterReader::new(storage, reader_options.clone()))),
			options,
		)
	}

	/// Names of the sources in declaration order.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.sources.iter().map(|source| source.name.as_ref())
	}

	fn is_paused(&self, source: &Source) -> bool {
		let high_water_mark = self.options.high_water_mark.max(1);
		match self.step {
			Some(step) => source.queue.buffered() >= step.saturating_mul(high_water_mark),
			None => source.queue.fragments() >= high_water_mark,
		}
	}

	fn emit(&mut self, step: usize) -> Result<SyncChunk> {
		let zero_copy = self.options.block_optimize;
		let mut entries = Vec::with_capacity(self.sources.len());
		for source in &mut self.sources {
			entries.push((source.name.clone(), source.queue.take(step, zero_copy)?));
		}
		self.step = Some(step);
		log::trace!("emitting step of {step} elements");
		Ok(SyncChunk::from_parts(step, entries))
	}

	/// Checks the ended sources. `Some` ends the stream, with or without an error.
	fn check_end(&self) -> Option<Result<()>> {
		let exhausted = self.sources.iter().find(|source| source.exhausted())?;
		if let Some(ahead) = self.sources.iter().find(|source| !source.queue.is_empty()) {
			return Some(Err(anyhow!(
				"desynchronized: source '{}' ended while source '{}' still has {} buffered elements",
				exhausted.name,
				ahead.name,
				ahead.queue.buffered()
			)));
		}
		if self.sources.iter().all(Source::ended) {
			return Some(Ok(()));
		}
		None
	}

	fn close(&mut self) {
		self.done = true;
		for source in &mut self.sources {
			source.stream = None;
		}
	}

	fn fail(&mut self, err: anyhow::Error) -> Poll<Option<Result<SyncChunk>>> {
		log::debug!("raster sync failed: {err:#}");
		self.close();
		Poll::Ready(Some(Err(err)))
	}
}

impl Stream for RasterSync {
	type Item = Result<SyncChunk>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if this.done {
			return Poll::Ready(None);
		}

		loop {
			let step = this.sources.iter().map(|source| source.queue.buffered()).min().unwrap_or(0);
			if step > 0 {
				return match this.emit(step) {
					Ok(chunk) => Poll::Ready(Some(Ok(chunk))),
					Err(err) => this.fail(err),
				};
			}

			match this.check_end() {
				Some(Ok(())) => {
					log::debug!("all sources ended");
					this.close();
					return Poll::Ready(None);
				}
				Some(Err(err)) => return this.fail(err),
				None => {}
			}

			let mut progressed = false;
			let mut polled = false;
			for index in 0..this.sources.len() {
				if this.sources[index].ended() || this.is_paused(&this.sources[index]) {
					continue;
				}
				polled = true;
				let source = &mut this.sources[index];
				let Some(stream) = source.stream.as_mut() else {
					continue;
				};
				match stream.poll_next_unpin(cx) {
					Poll::Ready(Some(Ok(chunk))) => {
						if let Err(err) = source.queue.push(chunk) {
							let err = err.context(format!("source '{}'", source.name));
							return this.fail(err);
						}
						progressed = true;
					}
					Poll::Ready(Some(Err(err))) => return this.fail(err),
					Poll::Ready(None) => {
						log::trace!("source '{}' ended", source.name);
						source.stream = None;
						progressed = true;
					}
					Poll::Pending => {}
				}
			}

			if !progressed {
				if polled {
					return Poll::Pending;
				}
				return this.fail(anyhow!("raster sync stalled: every source is paused"));
			}
		}
	}
}

impl FusedStream for RasterSync {
	fn is_terminated(&self) -> bool {
		self.done
	}
}
