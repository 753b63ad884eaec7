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

use std::collections::HashMap;
use std::convert::TryFrom;
use std::rc::Rc;
use crate::error::{Error, Result};
use crate::io::{Source, Streams};
use super::alloc::{self, Init};
use super::decode::{self, Span};
use super::field::{self, Field};
use super::shape::Shape;

/// Everything a decode needs besides the shape: the byte provider, the
/// sibling streams pointers may select, and attributes inherited by every
/// child instance (such as the compound-file sector size).
#[derive(Clone)]
pub struct Context {
	pub source: Source,
	pub streams: Option<Rc<dyn Streams>>,
	attrs: Rc<HashMap<&'static str, u64>>,
	/// Report unknown enumeration values as faults.
	pub strict: bool,
}

impl Context {
	pub fn new(source: Source) -> Context {
		Context { source, streams: None, attrs: Rc::new(HashMap::new()), strict: false }
	}

	pub fn with_streams(mut self, streams: Rc<dyn Streams>) -> Context {
		self.streams = Some(streams);
		self
	}

	pub fn with_attr(mut self, name: &'static str, value: u64) -> Context {
		Rc::make_mut(&mut self.attrs).insert(name, value);
		self
	}

	pub fn strict(mut self) -> Context {
		self.strict = true;
		self
	}

	pub fn attr(&self, name: &str) -> Option<u64> {
		self.attrs.get(name).cloned()
	}

	/// Same streams and attributes, different provider.
	pub fn rebind(&self, source: Source) -> Context {
		Context { source, ..self.clone() }
	}

	pub fn open_stream(&self, name: &str) -> Result<Source> {
		match &self.streams {
			Some(streams) => streams.open_stream(name),
			None => Err(Error::StreamNotFound(name.to_owned())),
		}
	}

	pub fn decode(&self, shape: &Shape, offset: u64) -> Result<Field> {
		decode::decode(shape, shape.name().into(), offset, Span::open(), None, self)
	}

	/// Decodes `shape` as a block of exactly `size` bytes; whatever the shape
	/// leaves over is kept as a trailing member.
	pub fn decode_within(&self, shape: &Shape, offset: u64, size: u64) -> Result<Field> {
		decode::decode(shape, shape.name().into(), offset, Span::exact(size), None, self)
	}

	/// Builds a new instance from caller-supplied values, then runs the
	/// back-fill passes until lengths and checksums settle.
	pub fn alloc(&self, shape: &Shape, init: Init) -> Result<Field> {
		alloc::alloc(shape, init, self)
	}
}

/// A read-only frame over the members decoded so far, handed to thunks.
/// Frames chain to their enclosing structures so that a thunk can reach an
/// ancestor's members (a record header, a file-level attribute).
#[derive(Clone, Copy)]
pub struct Scope<'a> {
	pub cx: &'a Context,
	pub parent: Option<&'a Scope<'a>>,
	/// Name of the shape being decoded in this frame.
	pub name: &'a str,
	pub fields: &'a [Field],
	pub start: u64,
	pub position: u64,
	/// Absolute offset this frame may not read past.
	pub bound: u64,
}

impl<'a> Scope<'a> {
	pub fn get(&self, path: &str) -> Option<&'a Field> {
		field::find_in(self.fields, path)
	}

	pub fn int(&self, path: &str) -> Result<i128> {
		field::int_in(self.fields, path).ok_or_else(|| Error::Schema(format!("{} has no integer {}", self.name, path)))
	}

	pub fn u64(&self, path: &str) -> Result<u64> {
		let value = self.int(path)?;
		u64::try_from(value).map_err(|_| Error::Schema(format!("{}.{} = {} is negative", self.name, path, value)))
	}

	pub fn ancestors(&self) -> Ancestors<'_, 'a> {
		Ancestors { next: Some(self) }
	}

	/// First match for `path`, searching this frame and then each enclosing one.
	pub fn lookup(&self, path: &str) -> Option<&'a Field> {
		self.ancestors().find_map(|scope| scope.get(path))
	}

	pub fn lookup_int(&self, path: &str) -> Result<i128> {
		self.ancestors()
			.find_map(|scope| field::int_in(scope.fields, path))
			.ok_or_else(|| Error::Schema(format!("no enclosing integer {} from {}", path, self.name)))
	}

	pub fn lookup_u64(&self, path: &str) -> Result<u64> {
		let value = self.lookup_int(path)?;
		u64::try_from(value).map_err(|_| Error::Schema(format!("{} = {} is negative", path, value)))
	}

	/// The nearest frame (this one included) decoding a shape called `name`.
	pub fn named(&self, name: &str) -> Option<&Scope<'a>> {
		self.ancestors().find(|scope| scope.name == name)
	}

	pub fn remaining(&self) -> u64 {
		self.bound.saturating_sub(self.position)
	}

	pub fn attr(&self, name: &str) -> Result<u64> {
		self.cx.attr(name).ok_or_else(|| Error::Schema(format!("attribute {} is not set", name)))
	}
}

pub struct Ancestors<'s, 'a: 's> {
	next: Option<&'s Scope<'a>>,
}

impl<'s, 'a: 's> Iterator for Ancestors<'s, 'a> {
	type Item = &'s Scope<'a>;

	fn next(&mut self) -> Option<&'s Scope<'a>> {
		let current = self.next?;
		self.next = current.parent;
		Some(current)
	}
}
