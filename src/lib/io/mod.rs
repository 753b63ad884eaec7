/*
recframe library & toolset
Copyright (C) 2018 Steve Muller <steve.muller@outlook.com>

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::rc::Rc;
use crate::error::{Fault, Result};

/// Random access to a run of bytes. `read` is the only place a decode may block.
pub trait Provider {
	fn size(&self) -> u64;
	fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>>;

	/// Number of bytes readable from `offset` onwards.
	fn available(&self, offset: u64) -> u64 {
		self.size().saturating_sub(offset)
	}
}

pub type Source = Rc<dyn Provider>;

fn truncated(offset: u64, length: usize, size: u64) -> Fault {
	Fault::Truncated { offset, need: length as u64, have: size.saturating_sub(offset) }
}

fn check(offset: u64, length: usize, size: u64) -> Result<()> {
	match offset.checked_add(length as u64) {
		Some(end) if end <= size => Ok(()),
		_ => Err(truncated(offset, length, size).into()),
	}
}

/// An in-memory provider.
pub struct Buffer {
	data: Vec<u8>,
}

impl Buffer {
	pub fn new(data: Vec<u8>) -> Buffer {
		Buffer { data }
	}

	/// Drains a non-seekable reader (such as STDIN) into memory.
	pub fn from_reader(mut read: impl Read) -> Result<Buffer> {
		let mut data: Vec<u8> = Vec::new();
		read.read_to_end(&mut data)?;
		Ok(Buffer { data })
	}

	pub fn source(data: Vec<u8>) -> Source {
		Rc::new(Buffer::new(data))
	}

	pub fn into_inner(self) -> Vec<u8> {
		self.data
	}
}

impl Provider for Buffer {
	fn size(&self) -> u64 {
		self.data.len() as u64
	}

	fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
		check(offset, length, self.size())?;
		let start = offset as usize;
		Ok(self.data[start..start + length].to_vec())
	}
}

/// A provider over anything seekable, typically a file on disk.
pub struct FileSource<TFile: Read + Seek> {
	file: RefCell<TFile>,
	size: u64,
}

impl<TFile> FileSource<TFile> where TFile: Read + Seek {
	pub fn new(mut file: TFile) -> Result<FileSource<TFile>> {
		let size = file.seek(SeekFrom::End(0))?;
		Ok(FileSource { file: RefCell::new(file), size })
	}
}

impl<TFile> Provider for FileSource<TFile> where TFile: Read + Seek {
	fn size(&self) -> u64 {
		self.size
	}

	fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
		check(offset, length, self.size)?;
		let mut file = self.file.borrow_mut();
		file.seek(SeekFrom::Start(offset))?;
		let mut buffer = vec![0; length];
		file.read_exact(&mut buffer)?;
		Ok(buffer)
	}
}

/// A window onto another provider. Offsets are renumbered so that offset 0
/// is the start of the window.
pub struct Proxy {
	source: Source,
	offset: u64,
	length: u64,
}

impl Proxy {
	pub fn new(source: Source, offset: u64, length: u64) -> Proxy {
		let length = length.min(source.available(offset));
		Proxy { source, offset, length }
	}
}

impl Provider for Proxy {
	fn size(&self) -> u64 {
		self.length
	}

	fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
		check(offset, length, self.length)?;
		self.source.read(self.offset + offset, length)
	}
}

/// Non-contiguous extents of another provider presented as one contiguous run,
/// such as the sectors of a compound-file stream.
pub struct Scattered {
	source: Source,
	extents: Vec<(u64, u64)>,
	size: u64,
}

impl Scattered {
	/// `extents` are `(offset, length)` pairs in the underlying provider. The
	/// resulting size is clamped to `size`.
	pub fn new(source: Source, extents: Vec<(u64, u64)>, size: u64) -> Scattered {
		let total: u64 = extents.iter().map(|&(_, length)| length).sum();
		Scattered { source, extents, size: size.min(total) }
	}
}

impl Provider for Scattered {
	fn size(&self) -> u64 {
		self.size
	}

	fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
		check(offset, length, self.size)?;
		let mut result = Vec::with_capacity(length);
		let mut position = offset;
		let mut base = 0u64;
		for &(start, extent) in &self.extents {
			if result.len() == length {
				break;
			}
			if position < base + extent {
				let skip = position - base;
				let want = ((extent - skip) as usize).min(length - result.len());
				result.extend(self.source.read(start + skip, want)?);
				position += want as u64;
			}
			base += extent;
		}
		if result.len() < length {
			return Err(truncated(offset, length, offset + result.len() as u64).into());
		}
		Ok(result)
	}
}

/// Resolves the symbolic stream names used by cross-stream pointers.
pub trait Streams {
	fn open_stream(&self, name: &str) -> Result<Source>;
}

impl Streams for HashMap<String, Source> {
	fn open_stream(&self, name: &str) -> Result<Source> {
		self.get(name).cloned().ok_or_else(|| crate::error::Error::StreamNotFound(name.to_owned()))
	}
}

/// Little-endian byte sink used by the build paths.
#[derive(Default)]
pub struct Writer {
	buf: Vec<u8>,
}

impl Writer {
	pub fn new() -> Writer {
		Writer { buf: Vec::new() }
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	pub fn write_u8(&mut self, v: u8) {
		self.buf.push(v);
	}

	pub fn write_u16(&mut self, v: u16) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	pub fn write_u32(&mut self, v: u32) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	pub fn write_u64(&mut self, v: u64) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	pub fn write_bytes(&mut self, data: &[u8]) {
		self.buf.extend_from_slice(data);
	}

	/// Pads with `fill` up to the next multiple of `alignment`.
	pub fn pad(&mut self, alignment: usize, fill: u8) {
		while self.buf.len() % alignment != 0 {
			self.buf.push(fill);
		}
	}

	pub fn into_inner(self) -> Vec<u8> {
		self.buf
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn buffer_reports_truncation() {
		let buffer = Buffer::new(vec![1, 2, 3]);
		assert_eq!(buffer.read(1, 2).unwrap(), vec![2, 3]);
		match buffer.read(2, 4) {
			Err(crate::error::Error::Fault(Fault::Truncated { offset, need, have })) => {
				assert_eq!((offset, need, have), (2, 4, 1));
			},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn proxy_renumbers_offsets() {
		let source = Buffer::source((0u8..16).collect());
		let proxy = Proxy::new(source, 4, 8);
		assert_eq!(proxy.size(), 8);
		assert_eq!(proxy.read(0, 2).unwrap(), vec![4, 5]);
		assert!(proxy.read(7, 2).is_err());
	}

	#[test]
	fn scattered_stitches_extents() {
		let source = Buffer::source((0u8..32).collect());
		let scattered = Scattered::new(source, vec![(16, 4), (4, 4), (28, 4)], 10);
		assert_eq!(scattered.size(), 10);
		assert_eq!(scattered.read(2, 4).unwrap(), vec![18, 19, 4, 5]);
		assert_eq!(scattered.read(8, 2).unwrap(), vec![28, 29]);
		assert!(scattered.read(9, 2).is_err());
	}

	#[test]
	fn writer_pads() {
		let mut writer = Writer::new();
		writer.write_u16(0xFFFE);
		writer.pad(4, 0);
		writer.write_u32(1);
		assert_eq!(writer.into_inner(), vec![0xFE, 0xFF, 0, 0, 1, 0, 0, 0]);
	}
}
