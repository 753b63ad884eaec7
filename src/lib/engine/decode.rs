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

use std::sync::Arc;
use log::trace;
use crate::error::{Error, Fault, Result};
use super::field::{Field, Name, Value};
use super::primitive::{Integer, StrSpec};
use super::scope::{Context, Scope};
use super::shape::{Shape, Structure};
use super::{chain, pointer, record};

/// Byte budget granted to a field by its container. `exact` budgets are
/// filled completely: whatever the shape leaves over is kept as a trailing
/// member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
	pub limit: Option<u64>,
	pub exact: bool,
}

impl Span {
	pub fn open() -> Span {
		Span { limit: None, exact: false }
	}

	pub fn within(limit: u64) -> Span {
		Span { limit: Some(limit), exact: false }
	}

	pub fn exact(limit: u64) -> Span {
		Span { limit: Some(limit), exact: true }
	}

	/// Absolute offset the field may not read past.
	pub fn bound(&self, offset: u64, cx: &Context) -> u64 {
		match self.limit {
			Some(limit) => offset.saturating_add(limit),
			None => cx.source.size().max(offset),
		}
	}
}

pub(crate) fn decode(shape: &Shape, name: Name, offset: u64, span: Span, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	trace!("decoding {} ({}) at {:#x}", name, shape.name(), offset);
	match shape {
		Shape::Int(integer) => integer_field(*integer, shape, name, offset, span, cx),
		Shape::Enum(e) => {
			let mut field = integer_field(e.base, shape, name, offset, span, cx)?;
			if let Value::Int(v) = field.value {
				if cx.strict && e.lookup(v as u64).is_none() {
					field.fault = Some(Fault::BadEnum { name: e.name, value: v as u64 });
				}
			}
			Ok(field)
		},
		Shape::Bits(bits) => {
			let mut field = integer_field(bits.base, shape, name, offset, span, cx)?;
			if let Value::Int(raw) = field.value {
				field.value = Value::Bits(bits.unpack(raw as u64));
			}
			Ok(field)
		},
		Shape::Block(length) => bytes(shape, name, offset, *length, span, cx),
		Shape::Rest => {
			let available = cx.source.available(offset);
			let length = span.limit.unwrap_or(available);
			bytes(shape, name, offset, length, span, cx)
		},
		Shape::Str(spec) => match &**spec {
			StrSpec::Fixed { length, charset } => bytes(shape, name, offset, length * charset.unit(), span, cx),
			StrSpec::Terminated { terminators } => terminated(terminators, shape, name, offset, span, cx),
		},
		Shape::Struct(structure) => self::structure(structure, name, offset, span, parent, cx),
		Shape::Array(array) => chain::decode(array, shape, name, offset, span, parent, cx),
		Shape::Record(spec) => record::decode(spec, name, offset, span, parent, cx),
		Shape::Pointer(spec) => pointer::decode(spec, name, offset, span, parent, cx),
	}
}

/// Why `need` bytes could not be read at `offset`: the container ran out
/// (`Inconsistent`), or the provider did (`Truncated`).
fn shortfall(name: &str, offset: u64, need: u64, window: u64, cx: &Context) -> Fault {
	let have = cx.source.available(offset);
	if need <= have {
		Fault::Inconsistent { what: name.to_owned(), declared: need, available: window }
	}
	else {
		Fault::Truncated { offset, need, have }
	}
}

fn window(offset: u64, span: Span, cx: &Context) -> u64 {
	let have = cx.source.available(offset);
	span.limit.map_or(have, |limit| limit.min(have))
}

/// Reads exactly `need` bytes or reports why it could not.
pub(crate) fn read(name: &str, offset: u64, need: u64, span: Span, cx: &Context) -> Result<Vec<u8>> {
	let window = window(offset, span, cx);
	if need > window {
		return Err(shortfall(name, offset, need, window, cx).into());
	}
	cx.source.read(offset, need as usize)
}

fn integer_field(integer: Integer, shape: &Shape, name: Name, offset: u64, span: Span, cx: &Context) -> Result<Field> {
	match read(&name, offset, integer.width as u64, span, cx) {
		Ok(data) => Ok(Field::new(name, offset, integer.width as u64, shape.clone(), Value::Int(integer.from_bytes(&data)))),
		Err(err) => Ok(Field::faulted(name, offset, shape.clone(), err.into_fault()?)),
	}
}

/// Opaque bytes. A short read keeps whatever could be read, so that the
/// tree still re-encodes up to the truncation point.
fn bytes(shape: &Shape, name: Name, offset: u64, length: u64, span: Span, cx: &Context) -> Result<Field> {
	let window = window(offset, span, cx);
	if length <= window {
		let data = cx.source.read(offset, length as usize)?;
		return Ok(Field::new(name, offset, length, shape.clone(), Value::Bytes(data)));
	}
	let fault = shortfall(&name, offset, length, window, cx);
	let data = cx.source.read(offset, window as usize)?;
	let mut field = Field::new(name, offset, window, shape.clone(), Value::Bytes(data));
	field.fault = Some(fault);
	Ok(field)
}

const SCAN_CHUNK: u64 = 256;

/// Bytes up to and including the first terminator.
fn terminated(terminators: &[u8], shape: &Shape, name: Name, offset: u64, span: Span, cx: &Context) -> Result<Field> {
	let window = window(offset, span, cx);
	let mut data: Vec<u8> = Vec::new();
	while (data.len() as u64) < window {
		let position = offset + data.len() as u64;
		let chunk = cx.source.read(position, SCAN_CHUNK.min(window - data.len() as u64) as usize)?;
		if let Some(index) = chunk.iter().position(|b| terminators.contains(b)) {
			data.extend_from_slice(&chunk[..=index]);
			let size = data.len() as u64;
			return Ok(Field::new(name, offset, size, shape.clone(), Value::Bytes(data)));
		}
		data.extend(chunk);
	}
	let fault = shortfall(&name, offset, window + 1, window, cx);
	let mut field = Field::new(name, offset, window, shape.clone(), Value::Bytes(data));
	field.fault = Some(fault);
	Ok(field)
}

fn structure(structure: &Arc<Structure>, name: Name, offset: u64, span: Span, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	let bound = span.bound(offset, cx);
	let mut fields: Vec<Field> = Vec::with_capacity(structure.members.len() + 1);
	let mut position = offset;
	let mut stopped = false;

	for member in &structure.members {
		let scope = Scope { cx, parent, name: structure.name, fields: &fields, start: offset, position, bound };
		let field = match member.kind.realise(&scope) {
			Ok(shape) => decode(&shape, member.name.into(), position, Span::within(bound.saturating_sub(position)), Some(&scope), cx)?,
			Err(err) => Field::faulted(member.name, position, Shape::empty(), err.into_fault()?),
		};

		if member.magic && field.fault.is_none() {
			if let Some(expected) = &member.default {
				if !expected.matches(&field) {
					return Err(Error::BadMagic {
						field: format!("{}.{}", structure.name, member.name),
						expected: expected.describe(),
						found: field.summary(),
					});
				}
			}
		}

		position = field.end();
		stopped = field.cut_short();
		fields.push(field);
		if stopped {
			break;
		}
	}

	if span.exact && !stopped && position < bound {
		let trailing = decode(&Shape::Rest, "trailing".into(), position, Span::within(bound - position), parent, cx)?;
		position = trailing.end();
		fields.push(trailing);
	}

	let mut field = Field::new(name, offset, position - offset, Shape::Struct(structure.clone()), Value::Fields(fields));
	if span.exact {
		field.blocksize = span.limit;
	}
	Ok(field)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::primitive::{Charset, U16, U32, U8};
	use crate::io::Buffer;

	fn cx(data: Vec<u8>) -> Context {
		Context::new(Buffer::source(data))
	}

	fn prefixed() -> Shape {
		Structure::new("prefixed")
			.field("length", U8)
			.field_with("value", |scope| Ok(Shape::string(scope.u64("length")?, Charset::Latin1)))
			.build()
	}

	#[test]
	fn thunks_see_earlier_members() {
		let field = cx(b"\x03abcz".to_vec()).decode(&prefixed(), 0).unwrap();
		assert_eq!(field.size, 4);
		assert_eq!(field.find("value").and_then(Field::text).unwrap(), "abc");
		assert!(field.is_complete());
	}

	#[test]
	fn exact_spans_keep_trailing_bytes() {
		let field = cx(b"\x01a\xAA\xBB".to_vec()).decode_within(&prefixed(), 0, 4).unwrap();
		assert_eq!(field.get("trailing").and_then(Field::bytes), Some(&[0xAA, 0xBB][..]));
		assert_eq!(field.encode().unwrap(), b"\x01a\xAA\xBB".to_vec());
		assert_eq!(field.blocksize, Some(4));
	}

	#[test]
	fn truncation_keeps_the_prefix() {
		let shape = Structure::new("pair").field("a", U16).field("b", U32).field("c", U8).build();
		let field = cx(vec![1, 0, 2, 0]).decode(&shape, 0).unwrap();
		assert_eq!(field.int_at("a"), Some(1));
		assert!(matches!(field.get("b").and_then(|f| f.fault.clone()), Some(Fault::Truncated { need: 4, have: 2, .. })));
		assert!(field.get("c").is_none());
		assert!(!field.is_complete());
		assert_eq!(field.encode().unwrap(), vec![1, 0]);
	}

	#[test]
	fn magic_mismatch_is_fatal() {
		let shape = Structure::new("signed").field("sig", Shape::block(2)).magic("sig", &b"PK"[..]).build();
		assert!(cx(b"PK".to_vec()).decode(&shape, 0).is_ok());
		match cx(b"MZ".to_vec()).decode(&shape, 0) {
			Err(Error::BadMagic { field, .. }) => assert_eq!(field, "signed.sig"),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn terminated_strings_include_the_terminator() {
		let shape = Shape::terminated_string(b"\0>");
		let field = cx(b"<Game State>rest".to_vec()).decode(&shape, 0).unwrap();
		assert_eq!(field.text().unwrap(), "<Game State>");
		let field = cx(b"<unterminated".to_vec()).decode(&shape, 0).unwrap();
		assert!(matches!(field.fault, Some(Fault::Truncated { .. })));
		assert_eq!(field.size, 13);
	}

	#[test]
	fn strict_enums_flag_unknown_values() {
		let shape = Shape::enumeration("Color", U8, &[("red", 1), ("blue", 2)]);
		let field = cx(vec![7]).decode(&shape, 0).unwrap();
		assert!(field.fault.is_none());
		assert_eq!(field.int(), Some(7));
		let field = cx(vec![7]).strict().decode(&shape, 0).unwrap();
		assert_eq!(field.fault, Some(Fault::BadEnum { name: "Color", value: 7 }));
	}
}
