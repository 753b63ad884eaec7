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
use crate::error::{Error, Result};
use super::field::{Field, Name, Value};
use super::pointer::Pointer;
use super::primitive::{Charset, StrSpec};
use super::record::RecordSpec;
use super::scope::{Context, Scope};
use super::shape::{Array, Length, Shape, Structure};

/// Back-fill passes before giving up.
pub const MAX_PASSES: usize = 8;

/// Caller-supplied value for a field being built. Members that are not
/// mentioned get their schema default, or zero.
#[derive(Clone, Debug)]
pub enum Init {
	Default,
	Int(i128),
	Bytes(Vec<u8>),
	Text(String),
	Fields(Vec<(&'static str, Init)>),
	Items(Vec<Init>),
	/// An already built (or decoded) field, used as it is.
	Field(Field),
	/// Raw offset and length members of a pointer.
	Pointer { offset: u64, length: Option<u64> },
}

impl Init {
	pub fn fields(members: Vec<(&'static str, Init)>) -> Init {
		Init::Fields(members)
	}

	/// Whether a decoded field holds this value. Only scalar values are compared.
	pub fn matches(&self, field: &Field) -> bool {
		match self {
			Init::Int(v) => field.int() == Some(*v),
			Init::Bytes(bytes) => field.bytes() == Some(&bytes[..]),
			Init::Text(text) => field.text().as_deref() == Some(text.as_str()),
			_ => true,
		}
	}

	pub fn describe(&self) -> String {
		match self {
			Init::Int(v) => format!("{:#x}", v),
			Init::Bytes(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
			Init::Text(text) => format!("{:?}", text),
			other => format!("{:?}", other),
		}
	}
}

macro_rules! init_from_int {
	($($t:ty),*) => {
		$(impl From<$t> for Init {
			fn from(value: $t) -> Init {
				Init::Int(value as i128)
			}
		})*
	};
}

init_from_int!(u8, u16, u32, u64, i8, i16, i32, i64, i128);

impl From<&str> for Init {
	fn from(text: &str) -> Init {
		Init::Text(text.to_owned())
	}
}

impl From<String> for Init {
	fn from(text: String) -> Init {
		Init::Text(text)
	}
}

impl From<&[u8]> for Init {
	fn from(bytes: &[u8]) -> Init {
		Init::Bytes(bytes.to_vec())
	}
}

impl From<Vec<u8>> for Init {
	fn from(bytes: Vec<u8>) -> Init {
		Init::Bytes(bytes)
	}
}

impl From<Field> for Init {
	fn from(field: Field) -> Init {
		Init::Field(field)
	}
}

impl From<Vec<Init>> for Init {
	fn from(items: Vec<Init>) -> Init {
		Init::Items(items)
	}
}

pub(crate) fn alloc(shape: &Shape, init: Init, cx: &Context) -> Result<Field> {
	let mut field = build(shape, shape.name().into(), init, 0, None, cx)?;
	settle(&mut field)?;
	Ok(field)
}

/// Runs back-fill passes until nothing changes.
pub fn settle(field: &mut Field) -> Result<()> {
	let offset = field.offset;
	for pass in 0..MAX_PASSES {
		field.relayout(offset);
		if !field.backfill()? {
			trace!("{}: settled after {} passes", field.name, pass + 1);
			return Ok(());
		}
	}
	Err(Error::BackfillLoop { passes: MAX_PASSES })
}

fn int_value(init: &Init, shape: &Shape) -> Result<i128> {
	match (init, shape) {
		(Init::Default, _) => Ok(0),
		(Init::Int(v), _) => Ok(*v),
		(Init::Text(name), Shape::Enum(e)) => e.value_of(name)
			.map(i128::from)
			.ok_or_else(|| Error::Schema(format!("{} has no member {}", e.name, name))),
		(other, shape) => Err(Error::Schema(format!("cannot build {} from {:?}", shape.name(), other))),
	}
}

pub(crate) fn build(shape: &Shape, name: Name, init: Init, offset: u64, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	if let Init::Field(mut field) = init {
		field.name = name;
		field.relayout(offset);
		return Ok(field);
	}
	let pinned = match init {
		Init::Default => false,
		_ => true,
	};
	let mut field = match shape {
		Shape::Int(integer) => {
			let value = int_value(&init, shape)?;
			integer.check(value)?;
			Field::new(name, offset, integer.width as u64, shape.clone(), Value::Int(value))
		},
		Shape::Enum(e) => {
			let value = int_value(&init, shape)?;
			e.base.check(value)?;
			Field::new(name, offset, e.base.width as u64, shape.clone(), Value::Int(value))
		},
		Shape::Bits(bits) => {
			let whole = match init {
				Init::Int(_) => true,
				_ => false,
			};
			let values = match init {
				Init::Fields(members) => {
					let mut values = vec![0; bits.fields.len()];
					for (member, value) in members {
						let index = bits.index(member).ok_or_else(|| Error::Schema(format!("{} has no bit {}", bits.name, member)))?;
						values[index] = int_value(&value, shape)? as u64;
					}
					bits.pack(&values)?;
					values
				},
				other => {
					let raw = int_value(&other, shape)?;
					bits.base.check(raw)?;
					bits.unpack(raw as u64)
				},
			};
			let mut field = Field::new(name, offset, bits.base.width as u64, shape.clone(), Value::Bits(values));
			// Individually named bits stay open to back-fill.
			field.pinned = whole;
			return Ok(field);
		},
		Shape::Block(length) => {
			let data = match init {
				Init::Default => vec![0; *length as usize],
				other => bytes_of(other, Charset::Latin1, shape)?,
			};
			Field::new(name, offset, data.len() as u64, shape.clone(), Value::Bytes(data))
		},
		Shape::Rest => {
			let data = match init {
				Init::Default => Vec::new(),
				other => bytes_of(other, Charset::Latin1, shape)?,
			};
			Field::new(name, offset, data.len() as u64, shape.clone(), Value::Bytes(data))
		},
		Shape::Str(spec) => {
			let data = match (&**spec, init) {
				(StrSpec::Fixed { length, charset }, Init::Default) => vec![0; (length * charset.unit()) as usize],
				(StrSpec::Fixed { charset, .. }, other) => bytes_of(other, *charset, shape)?,
				(StrSpec::Terminated { terminators }, Init::Default) => terminators.iter().take(1).cloned().collect(),
				(StrSpec::Terminated { terminators }, other) => {
					let mut data = bytes_of(other, Charset::Latin1, shape)?;
					if !data.last().map_or(false, |b| terminators.contains(b)) {
						data.extend(terminators.iter().take(1));
					}
					data
				},
			};
			Field::new(name, offset, data.len() as u64, shape.clone(), Value::Bytes(data))
		},
		Shape::Struct(structure) => structure_field(structure, name, init, offset, parent, cx)?,
		Shape::Array(array) => array_field(array, shape, name, init, offset, parent, cx)?,
		Shape::Record(spec) => record_field(spec, name, init, offset, parent, cx)?,
		Shape::Pointer(spec) => {
			let (raw, count) = match init {
				Init::Pointer { offset: raw, length } => (raw, length),
				other => (int_value(&other, shape)? as u64, None),
			};
			spec.offset.check(raw as i128)?;
			let count = match (spec.length, count) {
				(Some(integer), count) => {
					let count = count.unwrap_or(0);
					integer.check(count as i128)?;
					Some(count)
				},
				(None, _) => None,
			};
			let address = spec.resolve(raw, parent)?;
			let pointer = Pointer { raw, count, length: count.map(|c| c * spec.length_scale), address };
			Field::new(name, offset, spec.width(), shape.clone(), Value::Pointer(pointer))
		},
	};
	field.pinned = pinned;
	Ok(field)
}

fn bytes_of(init: Init, charset: Charset, shape: &Shape) -> Result<Vec<u8>> {
	match init {
		Init::Bytes(bytes) => Ok(bytes),
		Init::Text(text) => Ok(charset.encode(&text)),
		other => Err(Error::Schema(format!("cannot build {} from {:?}", shape.name(), other))),
	}
}

fn named(init: Init, owner: &str, allowed: &[&str]) -> Result<Vec<(&'static str, Init)>> {
	let members = match init {
		Init::Default => Vec::new(),
		Init::Fields(members) => members,
		other => return Err(Error::Schema(format!("{} is built from named members, not {:?}", owner, other))),
	};
	if let Some((unknown, _)) = members.iter().find(|(name, _)| !allowed.contains(name)) {
		return Err(Error::Schema(format!("{} has no member {}", owner, unknown)));
	}
	Ok(members)
}

fn take(members: &mut Vec<(&'static str, Init)>, name: &str) -> Option<Init> {
	let index = members.iter().position(|(n, _)| *n == name)?;
	Some(members.remove(index).1)
}

fn structure_field(structure: &Arc<Structure>, name: Name, init: Init, offset: u64, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	let allowed: Vec<&str> = structure.members.iter().map(|m| m.name).collect();
	let mut given = named(init, structure.name, &allowed)?;
	let mut fields: Vec<Field> = Vec::with_capacity(structure.members.len());
	let mut position = offset;
	for member in &structure.members {
		let (init, supplied) = match take(&mut given, member.name) {
			Some(init) => (init, true),
			None => (member.default.clone().unwrap_or(Init::Default), false),
		};
		let scope = Scope { cx, parent, name: structure.name, fields: &fields, start: offset, position, bound: u64::max_value() };
		let mut field = match init {
			Init::Field(field) => build(&field.shape.clone(), member.name.into(), Init::Field(field), position, Some(&scope), cx)?,
			init => build(&member.kind.realise(&scope)?, member.name.into(), init, position, Some(&scope), cx)?,
		};
		if !supplied {
			field.pinned = false;
		}
		position = field.end();
		fields.push(field);
	}
	Ok(Field::new(name, offset, position - offset, Shape::Struct(structure.clone()), Value::Fields(fields)))
}

fn array_field(array: &Arc<Array>, shape: &Shape, name: Name, init: Init, offset: u64, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	let inits = match (init, &array.length) {
		(Init::Items(items), _) => items,
		(Init::Default, Length::Count(count)) => vec![Init::Default; *count as usize],
		(Init::Default, _) => Vec::new(),
		(other, _) => return Err(Error::Schema(format!("{} is built from items, not {:?}", name, other))),
	};
	let mut items: Vec<Field> = Vec::with_capacity(inits.len());
	let mut position = offset;
	for (index, init) in inits.into_iter().enumerate() {
		let scope = Scope { cx, parent, name: &name, fields: &items, start: offset, position, bound: u64::max_value() };
		let item = match init {
			Init::Field(field) => build(&field.shape.clone(), index.to_string().into(), Init::Field(field), position, Some(&scope), cx)?,
			init => build(&array.element.realise(&scope)?, index.to_string().into(), init, position, Some(&scope), cx)?,
		};
		position = item.end();
		items.push(item);
	}
	Ok(Field::new(name, offset, position - offset, shape.clone(), Value::Items(items)))
}

fn record_field(spec: &Arc<RecordSpec>, name: Name, init: Init, offset: u64, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	let mut given = named(init, spec.name, &["header", "body", "extra"])?;
	let mut fields: Vec<Field> = Vec::with_capacity(3);

	let frame = Scope { cx, parent, name: spec.name, fields: &fields, start: offset, position: offset, bound: u64::max_value() };
	let header = build(&spec.header, "header".into(), take(&mut given, "header").unwrap_or(Init::Default), offset, Some(&frame), cx)?;
	let position = header.end();
	let body_init = take(&mut given, "body").unwrap_or(Init::Default);
	let body_shape = match &body_init {
		Init::Field(field) => field.shape.clone(),
		_ => spec.body_shape(&header)?,
	};
	fields.push(header);

	let frame = Scope { cx, parent, name: spec.name, fields: &fields, start: offset, position, bound: u64::max_value() };
	let body = build(&body_shape, "body".into(), body_init, position, Some(&frame), cx)?;
	let extra_init = take(&mut given, "extra").unwrap_or(Init::Default);
	let extra = build(&Shape::Block(0), "extra".into(), extra_init, body.end(), Some(&frame), cx)?;
	fields.push(body);
	fields.push(extra);

	let size = fields.iter().map(|f| f.size).sum();
	Ok(Field::new(name, offset, size, Shape::Record(spec.clone()), Value::Fields(fields)))
}

impl Field {
	/// One back-fill pass over this field and everything below it: length
	/// members, record type codes and checksums are recomputed from their
	/// siblings unless the caller supplied them. Returns whether any value
	/// changed.
	pub fn backfill(&mut self) -> Result<bool> {
		let mut changed = false;
		for child in self.children_mut() {
			changed |= child.backfill()?;
		}
		match self.shape.clone() {
			Shape::Struct(structure) => for backfill in &structure.backfill {
				if let Some(value) = (backfill.rule)(self.children())? {
					changed |= self.assign(backfill.target, value)?;
				}
			},
			Shape::Record(spec) => {
				let body = self.get("body").map_or(0, |f| f.size) + self.get("extra").map_or(0, |f| f.size);
				if let Some((path, bias)) = spec.length {
					changed |= self.assign(&format!("header.{}", path), body as i128 + bias)?;
				}
				let tag = self.get("body").and_then(|f| f.shape.tag());
				if let (Some(path), Some(tag)) = (spec.kind_field, tag) {
					changed |= self.assign(&format!("header.{}", path), tag as i128)?;
				}
			},
			_ => {},
		}
		Ok(changed)
	}

	/// Stores a computed value, leaving caller-supplied values alone.
	pub(crate) fn assign(&mut self, path: &str, value: i128) -> Result<bool> {
		if let Some(target) = self.find_mut(path) {
			if target.pinned || target.int() == Some(value) {
				return Ok(false);
			}
			match (&target.shape, &mut target.value) {
				(Shape::Int(integer), Value::Int(v)) => {
					integer.check(value)?;
					*v = value;
				},
				(Shape::Enum(e), Value::Int(v)) => {
					e.base.check(value)?;
					*v = value;
				},
				(Shape::Bits(bits), Value::Bits(values)) => {
					bits.base.check(value)?;
					*values = bits.unpack(value as u64);
				},
				_ => return Err(Error::Schema(format!("cannot back-fill {}", path))),
			}
			return Ok(true);
		}

		let (parent, member) = match path.rfind('.') {
			Some(split) => (&path[..split], &path[split + 1..]),
			None => return Err(Error::Schema(format!("{} has no member {}", self.name, path))),
		};
		let name = self.name.clone();
		let target = self.find_mut(parent).ok_or_else(|| Error::Schema(format!("{} has no member {}", name, parent)))?;
		if target.pinned {
			return Ok(false);
		}
		match (&target.shape, &mut target.value) {
			(Shape::Bits(bits), Value::Bits(values)) => {
				let index = bits.index(member).ok_or_else(|| Error::Schema(format!("{} has no bit {}", bits.name, member)))?;
				if values[index] as i128 == value {
					return Ok(false);
				}
				values[index] = value as u64;
				bits.pack(values)?;
				Ok(true)
			},
			_ => Err(Error::Schema(format!("{} has no member {}", parent, member))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::primitive::{BitStruct, U16, U8};
	use crate::engine::record::{Dispatch, RecordSpec};
	use crate::io::Buffer;

	fn cx() -> Context {
		Context::new(Buffer::source(Vec::new()))
	}

	fn record() -> Shape {
		let header = Structure::new("Header")
			.field("type", U8)
			.field("flags", Shape::bits(BitStruct::msb_first("flags", U8, &[(1, "last"), (7, "length")])))
			.build();
		let body = Structure::new("Body").field("value", U16).field("tail", Shape::Rest).tag(7).build();
		RecordSpec::new("Tlv", header, Dispatch::Fixed(body)).length("flags.length", 2).kind("type").build()
	}

	#[test]
	fn records_back_fill_length_and_type() {
		let field = cx().alloc(&record(), Init::fields(vec![
			("body", Init::fields(vec![("value", 0x1234.into()), ("tail", (&b"xyz"[..]).into())])),
		])).unwrap();
		assert_eq!(field.encode().unwrap(), vec![7, 7, 0x34, 0x12, b'x', b'y', b'z']);
		let mut again = field.clone();
		assert!(!again.backfill().unwrap());
	}

	#[test]
	fn supplied_values_are_not_overwritten() {
		let field = cx().alloc(&record(), Init::fields(vec![
			("header", Init::fields(vec![("type", 9.into())])),
		])).unwrap();
		assert_eq!(field.int_at("header.type"), Some(9));
		assert_eq!(field.int_at("header.flags.length"), Some(4));
	}

	#[test]
	fn defaults_fill_unspecified_members() {
		let shape = Structure::new("Sig")
			.field("magic", U16)
			.field("count", U8)
			.sentinel("magic", 0xBEEFu16)
			.backfill("count", |fields| Ok(Some(fields.len() as i128)))
			.build();
		let field = cx().alloc(&shape, Init::Default).unwrap();
		assert_eq!(field.encode().unwrap(), vec![0xEF, 0xBE, 2]);
		assert!(field.valid());
	}

	#[test]
	fn oscillating_rules_do_not_settle() {
		let shape = Structure::new("Flip")
			.field("a", U8)
			.backfill("a", |fields| Ok(Some(1 - fields[0].int().unwrap_or(0))))
			.build();
		assert!(matches!(cx().alloc(&shape, Init::Default), Err(Error::BackfillLoop { passes: MAX_PASSES })));
	}

	#[test]
	fn unknown_members_are_rejected() {
		let shape = Structure::new("S").field("a", U8).build();
		assert!(cx().alloc(&shape, Init::fields(vec![("b", 1.into())])).is_err());
	}
}
