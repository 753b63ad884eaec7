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

use std::fmt;
use std::sync::Arc;
use log::debug;
use crate::error::{Error, Result};
use super::decode::{self, Span};
use super::field::{Field, Name, Value};
use super::primitive::Integer;
use super::scope::{Context, Scope};
use super::shape::Shape;

/// How the raw value of a pointer turns into an offset in its target stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Addressing {
	Absolute,
	/// Relative to the start of the nearest enclosing structure of this name.
	Relative(&'static str),
	/// Index of a compound-file sector of the given size; sector 0 follows
	/// the header.
	Sector(u64),
	/// Index of a unit of the given size counted from offset 0.
	SectorOffset(u64),
}

pub enum Selector {
	Local,
	Stream(&'static str),
	/// Stream name computed from the members decoded so far.
	Dynamic(Arc<dyn Fn(&Scope<'_>) -> Result<String> + Send + Sync>),
}

pub enum Target {
	Shape(Shape),
	/// An opaque block as long as the pointer's length member.
	Sized,
	/// A shape built from the pointer's length in bytes.
	SizedWith(Arc<dyn Fn(u64) -> Shape + Send + Sync>),
}

/// An offset member, optionally followed by a length member, that refers to a
/// structure in this stream or in a sibling stream of the same container.
pub struct PointerSpec {
	pub name: &'static str,
	pub offset: Integer,
	pub offset_scale: u64,
	pub length: Option<Integer>,
	pub length_scale: u64,
	pub addressing: Addressing,
	pub selector: Selector,
	pub target: Target,
}

impl PointerSpec {
	pub fn new(name: &'static str, offset: Integer, target: Target) -> PointerSpec {
		PointerSpec {
			name,
			offset,
			offset_scale: 1,
			length: None,
			length_scale: 1,
			addressing: Addressing::Absolute,
			selector: Selector::Local,
			target,
		}
	}

	pub fn length(mut self, length: Integer) -> PointerSpec {
		self.length = Some(length);
		self
	}

	pub fn scaled(mut self, offset_scale: u64, length_scale: u64) -> PointerSpec {
		self.offset_scale = offset_scale;
		self.length_scale = length_scale;
		self
	}

	pub fn addressing(mut self, addressing: Addressing) -> PointerSpec {
		self.addressing = addressing;
		self
	}

	pub fn stream(mut self, name: &'static str) -> PointerSpec {
		self.selector = Selector::Stream(name);
		self
	}

	pub fn select<F>(mut self, selector: F) -> PointerSpec
		where F: Fn(&Scope<'_>) -> Result<String> + Send + Sync + 'static {
		self.selector = Selector::Dynamic(Arc::new(selector));
		self
	}

	pub fn build(self) -> Shape {
		Shape::Pointer(Arc::new(self))
	}

	/// Applies the addressing rule and the stream selector to a raw value.
	/// Nil pointers have no address.
	pub fn resolve(&self, raw: u64, scope: Option<&Scope<'_>>) -> Result<Option<Address>> {
		if raw == self.offset.mask() {
			return Ok(None);
		}
		let offset = match &self.addressing {
			Addressing::Absolute => raw * self.offset_scale,
			Addressing::Relative(name) => {
				let base = scope.and_then(|scope| scope.named(name)).map(|frame| frame.start);
				match base {
					Some(base) => base + raw * self.offset_scale,
					None => return Err(Error::Schema(format!("{} is not inside a {}", self.name, name))),
				}
			},
			Addressing::Sector(size) => (raw + 1) * size,
			Addressing::SectorOffset(size) => raw * size,
		};
		let address = match &self.selector {
			Selector::Local => Address::Local(offset),
			Selector::Stream(stream) => Address::Foreign((*stream).to_owned(), offset),
			Selector::Dynamic(select) => match scope {
				Some(scope) => Address::Foreign(select(scope)?, offset),
				None => return Err(Error::Schema(format!("{} needs an enclosing structure to pick its stream", self.name))),
			},
		};
		Ok(Some(address))
	}

	pub fn width(&self) -> u64 {
		(self.offset.width + self.length.map_or(0, |l| l.width)) as u64
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
	Local(u64),
	Foreign(String, u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pointer {
	pub raw: u64,
	/// Raw value of the length member.
	pub count: Option<u64>,
	/// Length in bytes.
	pub length: Option<u64>,
	pub address: Option<Address>,
}

impl Pointer {
	pub fn is_nil(&self) -> bool {
		self.address.is_none()
	}
}

impl fmt::Display for Pointer {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match &self.address {
			None => write!(f, "nil")?,
			Some(Address::Local(offset)) => write!(f, "-> {:#x}", offset)?,
			Some(Address::Foreign(stream, offset)) => write!(f, "-> {}:{:#x}", stream, offset)?,
		}
		if let Some(length) = self.length {
			write!(f, " ({} bytes)", length)?;
		}
		Ok(())
	}
}

pub(crate) fn decode(spec: &Arc<PointerSpec>, name: Name, offset: u64, span: Span, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	let shape = Shape::Pointer(spec.clone());
	let data = match decode::read(&name, offset, spec.width(), span, cx) {
		Ok(data) => data,
		Err(err) => return Ok(Field::faulted(name, offset, shape, err.into_fault()?)),
	};
	let width = spec.offset.width;
	let raw = spec.offset.from_bytes(&data[..width]) as u64;
	let count = spec.length.map(|length| length.from_bytes(&data[width..]) as u64);
	let mut field = Field::new(name, offset, spec.width(), shape, Value::Missing);
	let address = match spec.resolve(raw, parent) {
		Ok(address) => address,
		Err(err) => {
			field.fault = Some(err.into_fault()?);
			None
		},
	};
	field.value = Value::Pointer(Pointer { raw, count, length: count.map(|c| c * spec.length_scale), address });
	Ok(field)
}

impl Field {
	/// Follows a pointer field. The target is decoded from the selected stream,
	/// bounded by the pointer's length when it has one.
	pub fn dereference(&self, cx: &Context) -> Result<Field> {
		let (spec, pointer) = match (&self.shape, &self.value) {
			(Shape::Pointer(spec), Value::Pointer(pointer)) => (spec, pointer),
			_ => return Err(Error::Schema(format!("{} is not a pointer", self.name))),
		};
		let (cx, offset) = match &pointer.address {
			None => return Err(Error::NilPointer),
			Some(Address::Local(offset)) => (cx.clone(), *offset),
			Some(Address::Foreign(stream, offset)) => (cx.rebind(cx.open_stream(stream)?), *offset),
		};
		let shape = match (&spec.target, pointer.length) {
			(Target::Shape(shape), _) => shape.clone(),
			(Target::Sized, Some(length)) => Shape::Block(length),
			(Target::Sized, None) => Shape::Rest,
			(Target::SizedWith(build), length) => build(length.unwrap_or(0)),
		};
		debug!("{}: following {} to {}", self.name, pointer, shape.name());
		let mut target = match pointer.length {
			Some(length) => cx.decode_within(&shape, offset, length)?,
			None => cx.decode(&shape, offset)?,
		};
		target.name = self.name.clone();
		Ok(target)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use std::rc::Rc;
	use crate::engine::primitive::{U16, U32};
	use crate::engine::shape::Structure;
	use crate::io::{Buffer, Source};

	#[test]
	fn foreign_pointers_rebind_the_provider() {
		let shape = Structure::new("FcLcb")
			.field("Stshf", PointerSpec::new("FcLcb", U32, Target::Sized).length(U32).stream("1Table").build())
			.build();
		let mut data = vec![0u8; 8];
		data[0] = 0x10;
		data[4] = 4;
		let mut table: Vec<u8> = vec![0; 0x10];
		table.extend(b"STSH....");
		let mut streams: HashMap<String, Source> = HashMap::new();
		streams.insert("1Table".to_owned(), Buffer::source(table));
		let cx = Context::new(Buffer::source(data)).with_streams(Rc::new(streams));

		let fields = cx.decode(&shape, 0).unwrap();
		let stshf = fields.get("Stshf").unwrap();
		assert_eq!(stshf.pointer().unwrap().address, Some(Address::Foreign("1Table".to_owned(), 0x10)));
		let target = stshf.dereference(&cx).unwrap();
		assert_eq!(target.bytes(), Some(&b"STSH"[..]));
		assert!(target.end() <= 0x18);
	}

	#[test]
	fn nil_pointers_are_invalid() {
		let shape = PointerSpec::new("ref", U16, Target::Sized).build();
		let cx = Context::new(Buffer::source(vec![0xFF, 0xFF]));
		let field = cx.decode(&shape, 0).unwrap();
		assert!(!field.valid());
		assert!(matches!(field.dereference(&cx), Err(Error::NilPointer)));
	}

	#[test]
	fn relative_pointers_start_at_their_structure() {
		let shape = Structure::new("Set")
			.field("pad", U16)
			.field("at", PointerSpec::new("ref", U16, Target::Shape(U16.into())).addressing(Addressing::Relative("Set")).build())
			.build();
		let cx = Context::new(Buffer::source(vec![0, 0, 0, 0, 4, 0, 0x34, 0x12]));
		let field = cx.decode(&shape, 2).unwrap();
		assert_eq!(field.find("at").and_then(|f| f.pointer()).and_then(|p| p.address.clone()), Some(Address::Local(6)));
		let target = field.get("at").unwrap().dereference(&cx).unwrap();
		assert_eq!(target.int(), Some(0x1234));
	}
}
