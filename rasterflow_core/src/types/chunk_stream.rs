//! Fallible asynchronous chunk streams.
//!
//! [`ChunkStream`] is the currency between pipeline stages: a boxed stream of
//! `Result<T>` items (default: [`Chunk`]). The first error ends a stream.
//!
//! ```rust
//! use rasterflow_core::{Chunk, ChunkStream};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let stream = ChunkStream::from_items(vec![Chunk::from(vec![1u8, 2, 3]), Chunk::from(vec![4u8, 5])]);
//! let chunks = stream.rechunk(2).to_vec().await?;
//! assert_eq!(chunks.len(), 3);
//! # Ok(())
//! # }
//! ```

use super::{Chunk, FragmentQueue};
use anyhow::{Result, anyhow};
use futures::{
	Stream, StreamExt, TryStreamExt,
	stream::{self, BoxStream},
};
use tokio::sync::mpsc;

pub struct ChunkStream<'a, T = Chunk> {
	pub inner: BoxStream<'a, Result<T>>,
}

impl<'a, T> ChunkStream<'a, T>
where
	T: Send + 'a,
{
	#[must_use]
	pub fn empty() -> Self {
		ChunkStream {
			inner: stream::empty().boxed(),
		}
	}

	pub fn from_stream(stream: impl Stream<Item = Result<T>> + Send + 'a) -> Self {
		ChunkStream { inner: stream.boxed() }
	}

	/// A stream that yields `vec` in order, errors included.
	#[must_use]
	pub fn from_vec(vec: Vec<Result<T>>) -> Self {
		ChunkStream {
			inner: stream::iter(vec).boxed(),
		}
	}

	/// A stream that yields every item of `vec` as `Ok`.
	#[must_use]
	pub fn from_items(vec: Vec<T>) -> Self {
		ChunkStream {
			inner: stream::iter(vec.into_iter().map(Ok)).boxed(),
		}
	}

	pub async fn next(&mut self) -> Option<Result<T>> {
		self.inner.next().await
	}

	/// Collects all items, failing with the first error.
	pub async fn to_vec(self) -> Result<Vec<T>> {
		self.inner.try_collect().await
	}
}

impl<T> ChunkStream<'static, T>
where
	T: Send + 'static,
{
	/// Drives this stream on a spawned tokio task that stays up to `capacity`
	/// items ahead of the consumer.
	///
	/// The task waits while the channel is full and continues as soon as the
	/// consumer pulls. When the returned stream is dropped, the task stops after its
	/// current fetch; that result is discarded. Must be called inside a tokio runtime.
	#[must_use]
	pub fn prefetch(self, capacity: usize) -> Self {
		let (sender, receiver) = mpsc::channel(capacity.max(1));
		let mut inner = self.inner;
		tokio::spawn(async move {
			while let Some(item) = inner.next().await {
				let failed = item.is_err();
				if sender.send(item).await.is_err() {
					log::trace!("prefetch receiver dropped, stopping");
					break;
				}
				if failed {
					break;
				}
			}
		});
		ChunkStream::from_stream(stream::unfold(receiver, |mut receiver| async move {
			receiver.recv().await.map(|item| (item, receiver))
		}))
	}
}

struct Rechunk<'a> {
	inner: BoxStream<'a, Result<Chunk>>,
	queue: FragmentQueue,
	ended: bool,
}

impl<'a> ChunkStream<'a, Chunk> {
	/// Re-slices the stream into chunks of exactly `len` elements; only the last
	/// one may be shorter. A `len` of zero is treated as one.
	#[must_use]
	pub fn rechunk(self, len: usize) -> Self {
		let len = len.max(1);
		let state = Some(Rechunk {
			inner: self.inner,
			queue: FragmentQueue::new(),
			ended: false,
		});
		let stream = stream::unfold(state, move |state| async move {
			let mut state = state?;
			loop {
				let buffered = state.queue.buffered();
				if buffered >= len || (state.ended && buffered > 0) {
					return match state.queue.take(len.min(buffered), true) {
						Ok(chunk) => Some((Ok(chunk), Some(state))),
						Err(err) => Some((Err(err), None)),
					};
				}
				if state.ended {
					return None;
				}
				match state.inner.next().await {
					Some(Ok(chunk)) => {
						if let Err(err) = state.queue.push(chunk) {
							return Some((Err(err), None));
						}
					}
					Some(Err(err)) => return Some((Err(err), None)),
					None => state.ended = true,
				}
			}
		});
		ChunkStream::from_stream(stream)
	}

	/// Concatenates all chunks into one.
	pub async fn concat(self) -> Result<Chunk> {
		let mut output: Option<Chunk> = None;
		let mut inner = self.inner;
		while let Some(chunk) = inner.try_next().await? {
			match output.as_mut() {
				Some(output) => output.append(chunk)?,
				None => output = Some(chunk),
			}
		}
		output.ok_or_else(|| anyhow!("stream yielded no chunks"))
	}
}
