//! Pixel-wise functions over synchronized sources.
//!
//! [`RasterTransform`] maps every [`SyncChunk`] to one flat chunk by calling a
//! pixel function once per element position, with one argument per source. The
//! argument order is the key order of the first chunk and stays fixed for the
//! lifetime of the stream.
//!
//! ```rust
//! use futures::TryStreamExt;
//! use rasterflow_core::{Chunk, ElementType};
//! use rasterflow_stream::{RasterTransform, SyncChunk};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let step = SyncChunk::new([
//! 	("a", Chunk::from(vec![1.0f64, 2.0, 3.0, 4.0])),
//! 	("b", Chunk::from(vec![0.0f64, 1.0, 1.0, 2.0])),
//! ])?;
//! let input = futures::stream::iter(vec![Ok(step)]);
//! let output: Vec<Chunk> = RasterTransform::binary(input, ElementType::Float64, |a, b| a - b)
//! 	.try_collect()
//! 	.await?;
//! assert_eq!(output, [Chunk::from(vec![1.0f64, 1.0, 2.0, 2.0])]);
//! # Ok(())
//! # }
//! ```

use crate::SyncChunk;
use anyhow::{Context as _, Result, bail};
use futures::{Stream, StreamExt, stream::FusedStream};
use rasterflow_core::{Chunk, ElementType};
use std::{
	borrow::Cow,
	fmt,
	pin::Pin,
	sync::Arc,
	task::{Context, Poll, ready},
};

/// A pixel function: one argument per source, in key order.
pub type PixelFn = Arc<dyn Fn(&[f64]) -> Result<f64> + Send + Sync>;

/// Elementwise transform over a stream of [`SyncChunk`]s.
///
/// Yields one chunk of `element_type` per input step, as long as the step. Results
/// of the pixel function are converted with the usual saturating casts, so an
/// integer output type clamps and truncates. An error of the input or of the pixel
/// function ends the stream, and no output is produced for the failing step.
pub struct RasterTransform<S> {
	input: S,
	element_type: ElementType,
	function: PixelFn,
	arity: Option<usize>,
	keys: Option<Vec<Arc<str>>>,
	done: bool,
}

impl<S> fmt::Debug for RasterTransform<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RasterTransform")
			.field("element_type", &self.element_type)
			.field("arity", &self.arity)
			.field("keys", &self.keys)
			.field("done", &self.done)
			.finish()
	}
}

impl<S> RasterTransform<S>
where
	S: Stream<Item = Result<SyncChunk>> + Unpin,
{
	/// Applies `function` to every element position and converts the results to
	/// `element_type`.
	///
	/// `function` receives one argument per source, in the key order of the first
	/// step, with every element converted to `f64`. Any number of sources is
	/// accepted.
	pub fn new(
		input: S,
		element_type: ElementType,
		function: impl Fn(&[f64]) -> Result<f64> + Send + Sync + 'static,
	) -> Self {
		Self {
			input,
			element_type,
			function: Arc::new(function),
			arity: None,
			keys: None,
			done: false,
		}
	}

	/// Transform over a single source. Fails on the first step if the input
	/// carries a different number of sources.
	pub fn unary(input: S, element_type: ElementType, function: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
		Self::with_arity(input, element_type, 1, move |args| Ok(function(args[0])))
	}

	/// Transform over exactly two sources, passed in the key order of the first
	/// step.
	pub fn binary(
		input: S,
		element_type: ElementType,
		function: impl Fn(f64, f64) -> f64 + Send + Sync + 'static,
	) -> Self {
		Self::with_arity(input, element_type, 2, move |args| Ok(function(args[0], args[1])))
	}

	/// Transform over exactly three sources, passed in the key order of the first
	/// step.
	pub fn ternary(
		input: S,
		element_type: ElementType,
		function: impl Fn(f64, f64, f64) -> f64 + Send + Sync + 'static,
	) -> Self {
		Self::with_arity(input, element_type, 3, move |args| {
			Ok(function(args[0], args[1], args[2]))
		})
	}

	fn with_arity(
		input: S,
		element_type: ElementType,
		arity: usize,
		function: impl Fn(&[f64]) -> Result<f64> + Send + Sync + 'static,
	) -> Self {
		let mut transform = Self::new(input, element_type, function);
		transform.arity = Some(arity);
		transform
	}

	/// The argument order, known once the first chunk has arrived.
	pub fn keys(&self) -> Option<&[Arc<str>]> {
		self.keys.as_deref()
	}

	fn capture_keys(&mut self, chunk: &SyncChunk) -> Result<()> {
		if let Some(keys) = &self.keys {
			let same = chunk.width() == keys.len() && keys.iter().all(|key| chunk.get(key).is_some());
			if !same {
				bail!(
					"TypeError: sources changed from {keys:?} to {:?}",
					chunk.keys().collect::<Vec<_>>()
				);
			}
			return Ok(());
		}

		let keys: Vec<Arc<str>> = chunk.keys().map(Arc::from).collect();
		if let Some(arity) = self.arity
			&& keys.len() != arity
		{
			bail!("TypeError: pixel function takes {arity} arguments, got {} sources", keys.len());
		}
		log::debug!("pixel function arguments: {keys:?}");
		self.keys = Some(keys);
		Ok(())
	}

	fn apply(&mut self, chunk: &SyncChunk) -> Result<Chunk> {
		self.capture_keys(chunk)?;
		let keys = self.keys.as_deref().unwrap_or_default();

		let mut inputs: Vec<Cow<'_, [f64]>> = Vec::with_capacity(keys.len());
		for key in keys {
			match chunk.get(key) {
				Some(slice) => inputs.push(slice.to_f64()),
				None => bail!("TypeError: missing source '{key}'"),
			}
		}

		let mut args = vec![0.0; inputs.len()];
		let mut output = Vec::with_capacity(chunk.len());
		for index in 0..chunk.len() {
			for (arg, input) in args.iter_mut().zip(&inputs) {
				*arg = input[index];
			}
			let value = (self.function)(&args).with_context(|| format!("pixel function failed at element {index}"))?;
			output.push(value);
		}
		log::trace!("transformed {} elements", output.len());
		Ok(Chunk::from_f64(self.element_type, output))
	}
}

impl<S> Stream for RasterTransform<S>
where
	S: Stream<Item = Result<SyncChunk>> + Unpin,
{
	type Item = Result<Chunk>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if this.done {
			return Poll::Ready(None);
		}
		let result = match ready!(this.input.poll_next_unpin(cx)) {
			Some(Ok(chunk)) => this.apply(&chunk),
			Some(Err(err)) => Err(err),
			None => {
				this.done = true;
				return Poll::Ready(None);
			}
		};
		if result.is_err() {
			this.done = true;
		}
		Poll::Ready(Some(result))
	}
}

impl<S> FusedStream for RasterTransform<S>
where
	S: Stream<Item = Result<SyncChunk>> + Unpin,
{
	fn is_terminated(&self) -> bool {
		self.done
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::anyhow;
	use futures::{TryStreamExt, stream};
	use pretty_assertions::assert_eq;

	fn step(entries: &[(&str, Vec<f64>)]) -> SyncChunk {
		SyncChunk::new(entries.iter().map(|(name, values)| (*name, Chunk::from(values.clone())))).unwrap()
	}

	#[tokio::test]
	async fn should_subtract_two_sources() -> Result<()> {
		let input = stream::iter(vec![Ok(step(&[
			("a", vec![1.0, 2.0, 3.0, 4.0]),
			("b", vec![0.0, 1.0, 1.0, 2.0]),
		]))]);
		let output: Vec<Chunk> = RasterTransform::binary(input, ElementType::Float64, |x, y| x - y)
			.try_collect()
			.await?;
		assert_eq!(output, [Chunk::from(vec![1.0f64, 1.0, 2.0, 2.0])]);
		Ok(())
	}

	#[tokio::test]
	async fn should_mix_input_types_and_convert_output() -> Result<()> {
		let chunk = SyncChunk::new([("u", Chunk::from(vec![200u8, 100])), ("f", Chunk::from(vec![0.5f32, 0.25]))])?;
		let input = stream::iter(vec![Ok(chunk)]);
		let output: Vec<Chunk> = RasterTransform::new(input, ElementType::UInt16, |args| Ok(args[0] * args[1] * 4.0))
			.try_collect()
			.await?;
		assert_eq!(output, [Chunk::from(vec![400u16, 100])]);
		Ok(())
	}

	#[tokio::test]
	async fn keeps_argument_order_of_first_chunk() -> Result<()> {
		let input = stream::iter(vec![
			Ok(step(&[("b", vec![10.0]), ("a", vec![1.0])])),
			Ok(step(&[("a", vec![2.0]), ("b", vec![20.0])])),
		]);
		let mut transform = RasterTransform::binary(input, ElementType::Float64, |x, y| x - y);
		assert_eq!(transform.try_next().await?, Some(Chunk::from(vec![9.0f64])));
		assert_eq!(transform.try_next().await?, Some(Chunk::from(vec![18.0f64])));
		assert_eq!(
			transform.keys().map(|keys| keys.iter().map(|key| key.as_ref()).collect::<Vec<_>>()),
			Some(vec!["b", "a"])
		);
		Ok(())
	}

	#[tokio::test]
	async fn should_check_arity() {
		let input = stream::iter(vec![Ok(step(&[("a", vec![1.0])]))]);
		let mut transform = RasterTransform::binary(input, ElementType::Float64, |x, y| x + y);
		let err = transform.try_next().await.unwrap_err();
		assert_eq!(err.to_string(), "TypeError: pixel function takes 2 arguments, got 1 sources");
		assert!(transform.next().await.is_none());
	}

	#[tokio::test]
	async fn should_reject_changed_keys() {
		let input = stream::iter(vec![
			Ok(step(&[("a", vec![1.0])])),
			Ok(step(&[("z", vec![1.0])])),
		]);
		let mut transform = RasterTransform::unary(input, ElementType::Float64, |x| x);
		assert!(transform.try_next().await.is_ok());
		let err = transform.try_next().await.unwrap_err();
		assert_eq!(err.to_string(), r#"TypeError: sources changed from ["a"] to ["z"]"#);
	}

	#[tokio::test]
	async fn function_error_aborts_the_step() {
		let input = stream::iter(vec![Ok(step(&[("a", vec![1.0, -1.0])]))]);
		let mut transform = RasterTransform::new(input, ElementType::Float64, |args| {
			if args[0] < 0.0 {
				return Err(anyhow!("negative input"));
			}
			Ok(args[0].sqrt())
		});
		let err = transform.try_next().await.unwrap_err();
		assert_eq!(format!("{err:#}"), "pixel function failed at element 1: negative input");
		assert!(transform.is_terminated());
	}

	#[tokio::test]
	async fn should_forward_input_errors() {
		let input = stream::iter(vec![Err(anyhow!("desynchronized"))]);
		let mut transform = RasterTransform::ternary(input, ElementType::Float32, |x, y, z| x + y + z);
		let err = transform.try_next().await.unwrap_err();
		assert_eq!(err.to_string(), "desynchronized");
	}
}
