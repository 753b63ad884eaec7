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
use std::fmt;
use std::sync::Arc;
use log::debug;
use crate::error::{Fault, Result};
use super::decode::{self, Span};
use super::field::{Field, Name, Value};
use super::scope::{Context, Scope};
use super::shape::Shape;

/// Registry key: a type code, optionally narrowed by a version and an
/// instance (or any other secondary code, such as an option opcode).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key {
	pub kind: u64,
	pub version: Option<u64>,
	pub instance: Option<u64>,
}

impl Key {
	pub fn new(kind: u64) -> Key {
		Key { kind, version: None, instance: None }
	}

	pub fn versioned(kind: u64, version: u64, instance: u64) -> Key {
		Key { kind, version: Some(version), instance: Some(instance) }
	}
}

impl fmt::Display for Key {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "type {:#06x}", self.kind)?;
		if let Some(version) = self.version {
			write!(f, " version {}", version)?;
		}
		if let Some(instance) = self.instance {
			write!(f, " instance {:#x}", instance)?;
		}
		Ok(())
	}
}

/// Body shapes keyed by type code, and within a type by `(version, instance)`.
/// Registries are filled once when a schema module is first used and are
/// read-only afterwards.
pub struct Registry {
	pub name: &'static str,
	types: HashMap<u64, HashMap<(Option<u64>, Option<u64>), Shape>>,
}

impl Registry {
	pub fn new(name: &'static str) -> Registry {
		Registry { name, types: HashMap::new() }
	}

	pub fn define(self, kind: u64, shape: Shape) -> Registry {
		self.define_versioned(kind, None, None, shape)
	}

	pub fn define_versioned(mut self, kind: u64, version: Option<u64>, instance: Option<u64>, shape: Shape) -> Registry {
		self.types.entry(kind).or_insert_with(HashMap::new).insert((version, instance), shape);
		self
	}

	/// Exact match first, then the version alone, then the bare type code.
	pub fn lookup(&self, key: &Key) -> Option<&Shape> {
		let variants = self.types.get(&key.kind)?;
		variants.get(&(key.version, key.instance))
			.or_else(|| variants.get(&(key.version, None)))
			.or_else(|| variants.get(&(None, None)))
	}

	pub fn resolve(&self, key: &Key, fallback: fn(&Key) -> Shape) -> Shape {
		match self.lookup(key) {
			Some(shape) => shape.clone(),
			None => {
				debug!("{}: no definition for {}", self.name, key);
				fallback(key)
			},
		}
	}

	pub fn contains(&self, kind: u64) -> bool {
		self.types.contains_key(&kind)
	}

	pub fn len(&self) -> usize {
		self.types.len()
	}

	pub fn is_empty(&self) -> bool {
		self.types.is_empty()
	}
}

/// Extracts the registry key from a decoded header.
pub type KeyFn = fn(&Field) -> Result<Key>;

pub enum Dispatch {
	Registry(&'static Registry, KeyFn),
	Fixed(Shape),
}

/// The opaque body used when nothing else matches.
pub fn raw(_: &Key) -> Shape {
	Shape::Rest
}

/// A `header + body + extra` triple. The header is decoded first, the body
/// shape is chosen from it, and the body is held to the length the header
/// declares. Bytes the body leaves over are kept as `extra`.
pub struct RecordSpec {
	pub name: &'static str,
	pub header: Shape,
	pub dispatch: Dispatch,
	/// Header path of the length and the number of header bytes it counts.
	pub length: Option<(&'static str, i128)>,
	/// Header path of the type code.
	pub kind_field: Option<&'static str>,
	pub fallback: fn(&Key) -> Shape,
}

impl RecordSpec {
	pub fn new(name: &'static str, header: Shape, dispatch: Dispatch) -> RecordSpec {
		RecordSpec { name, header, dispatch, length: None, kind_field: None, fallback: raw }
	}

	pub fn length(mut self, path: &'static str, bias: i128) -> RecordSpec {
		self.length = Some((path, bias));
		self
	}

	pub fn kind(mut self, path: &'static str) -> RecordSpec {
		self.kind_field = Some(path);
		self
	}

	pub fn fallback(mut self, fallback: fn(&Key) -> Shape) -> RecordSpec {
		self.fallback = fallback;
		self
	}

	pub fn build(self) -> Shape {
		Shape::Record(Arc::new(self))
	}

	pub fn body_shape(&self, header: &Field) -> Result<Shape> {
		match &self.dispatch {
			Dispatch::Registry(registry, key) => Ok(registry.resolve(&key(header)?, self.fallback)),
			Dispatch::Fixed(shape) => Ok(shape.clone()),
		}
	}

	/// Body length declared by the header, net of the bytes the header counts
	/// for itself.
	pub fn declared(&self, header: &Field) -> Option<u64> {
		let (path, bias) = self.length?;
		header.int_at(path).map(|length| (length - bias).max(0) as u64)
	}
}

pub(crate) fn decode(spec: &Arc<RecordSpec>, name: Name, offset: u64, span: Span, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	let bound = span.bound(offset, cx);
	let mut fields: Vec<Field> = Vec::with_capacity(3);

	let frame = Scope { cx, parent, name: spec.name, fields: &fields, start: offset, position: offset, bound };
	let header = decode::decode(&spec.header, "header".into(), offset, Span::within(bound.saturating_sub(offset)), Some(&frame), cx)?;
	let position = header.end();
	if header.cut_short() {
		fields.push(header);
		let size = position - offset;
		return Ok(Field::new(name, offset, size, Shape::Record(spec.clone()), Value::Fields(fields)));
	}

	let room = bound.saturating_sub(position).min(cx.source.available(position));
	let declared = spec.declared(&header);
	let mut fault = None;
	let length = match declared {
		Some(declared) if declared > room => {
			debug!("{}: declared length {} clamped to {}", spec.name, declared, room);
			fault = Some(Fault::Inconsistent { what: format!("{} length", spec.name), declared, available: room });
			room
		},
		Some(declared) => declared,
		None => room,
	};
	let blocksize = declared.map(|declared| header.size + declared);
	let body_shape = spec.body_shape(&header);
	fields.push(header);

	let frame = Scope { cx, parent, name: spec.name, fields: &fields, start: offset, position, bound: position + length };
	let body = match body_shape {
		Ok(shape) => decode::decode(&shape, "body".into(), position, Span::within(length), Some(&frame), cx)?,
		Err(err) => {
			let fault = err.into_fault()?;
			debug!("{}: substituting an opaque body ({})", spec.name, fault);
			let mut block = decode::decode(&Shape::Block(length), "body".into(), position, Span::within(length), Some(&frame), cx)?;
			block.fault = Some(fault);
			block
		},
	};
	let rest = length.saturating_sub(body.size);
	let extra = decode::decode(&Shape::Block(rest), "extra".into(), body.end(), Span::within(rest), Some(&frame), cx)?;
	fields.push(body);
	fields.push(extra);

	let size = fields.iter().map(|f| f.size).sum();
	let mut field = Field::new(name, offset, size, Shape::Record(spec.clone()), Value::Fields(fields));
	field.fault = fault;
	field.blocksize = blocksize;
	Ok(field)
}

#[cfg(test)]
mod tests {
	use super::*;
	use lazy_static::lazy_static;
	use crate::engine::primitive::{U16, U8};
	use crate::engine::shape::Structure;
	use crate::io::Buffer;

	fn key(header: &Field) -> Result<Key> {
		Ok(Key::versioned(header.u64_at("type")?, header.u64_at("version")?, 0))
	}

	lazy_static! {
		static ref TEST: Registry = Registry::new("test")
			.define(1, Structure::new("One").field("a", U16).tag(1).build())
			.define_versioned(2, Some(1), None, Structure::new("TwoV1").field("a", U8).tag(2).build());
	}

	fn record() -> Shape {
		let header = Structure::new("Header").field("type", U8).field("version", U8).field("length", U8).build();
		RecordSpec::new("Test", header, Dispatch::Registry(&TEST, key)).length("length", 0).kind("type").build()
	}

	fn cx(data: Vec<u8>) -> Context {
		Context::new(Buffer::source(data))
	}

	#[test]
	fn lookup_falls_back_by_version() {
		assert!(TEST.lookup(&Key::versioned(2, 1, 7)).is_some());
		assert!(TEST.lookup(&Key::versioned(2, 2, 0)).is_none());
		assert!(TEST.lookup(&Key::versioned(1, 9, 9)).is_some());
		assert!(TEST.lookup(&Key::new(3)).is_none());
	}

	#[test]
	fn longer_records_keep_extra() {
		let field = cx(vec![1, 0, 4, 0xAA, 0xBB, 0xCC, 0xDD]).decode(&record(), 0).unwrap();
		assert_eq!(field.type_name(), "One");
		assert_eq!(field.int_at("body.a"), Some(0xBBAA));
		assert_eq!(field.find("extra").and_then(Field::bytes), Some(&[0xCC, 0xDD][..]));
		assert_eq!(field.size, 7);
		assert!(field.is_complete());
	}

	#[test]
	fn unknown_types_decode_raw() {
		let field = cx(vec![9, 0, 2, 0xAA, 0xBB, 0x77]).decode(&record(), 0).unwrap();
		assert_eq!(field.type_name(), "Test(0x9)");
		assert_eq!(field.find("body").map(|f| f.size), Some(2));
		assert_eq!(field.size, 5);
	}

	#[test]
	fn overlong_lengths_are_clamped() {
		let field = cx(vec![1, 0, 9, 0xAA, 0xBB]).decode(&record(), 0).unwrap();
		assert!(matches!(field.fault, Some(Fault::Inconsistent { declared: 9, available: 2, .. })));
		assert_eq!(field.size, 5);
		assert_eq!(field.encode().unwrap(), vec![1, 0, 9, 0xAA, 0xBB]);
	}
}
