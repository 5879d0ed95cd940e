use anyhow::{Result, ensure};
use rasterflow_core::Chunk;
use std::sync::Arc;

/// One synchronization step: a slice of equal length from every source, in the
/// order the sources were declared.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncChunk {
	len: usize,
	entries: Vec<(Arc<str>, Chunk)>,
}

impl SyncChunk {
	/// Builds a step from named slices, which must all have the same length and
	/// distinct names.
	pub fn new<N: Into<Arc<str>>>(entries: impl IntoIterator<Item = (N, Chunk)>) -> Result<Self> {
		let entries: Vec<(Arc<str>, Chunk)> = entries.into_iter().map(|(name, chunk)| (name.into(), chunk)).collect();
		let len = entries.first().map_or(0, |(_, chunk)| chunk.len());
		for (index, (name, chunk)) in entries.iter().enumerate() {
			ensure!(
				chunk.len() == len,
				"slice '{name}' has {} elements, expected {len}",
				chunk.len()
			);
			ensure!(
				entries[..index].iter().all(|(other, _)| other != name),
				"duplicate source name '{name}'"
			);
		}
		Ok(Self { len, entries })
	}

	pub(super) fn from_parts(len: usize, entries: Vec<(Arc<str>, Chunk)>) -> Self {
		Self { len, entries }
	}

	/// Number of elements in every slice.
	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Number of sources.
	pub fn width(&self) -> usize {
		self.entries.len()
	}

	/// Source names in declaration order.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.entries.iter().map(|(name, _)| name.as_ref())
	}

	/// The slice of source `name`, if there is such a source.
	pub fn get(&self, name: &str) -> Option<&Chunk> {
		self
			.entries
			.iter()
			.find(|(key, _)| key.as_ref() == name)
			.map(|(_, chunk)| chunk)
	}

	/// `(name, slice)` pairs in declaration order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &Chunk)> {
		self.entries.iter().map(|(name, chunk)| (name.as_ref(), chunk))
	}

	/// Takes the slices apart without copying them.
	pub fn into_inner(self) -> Vec<(Arc<str>, Chunk)> {
		self.entries
	}
}
