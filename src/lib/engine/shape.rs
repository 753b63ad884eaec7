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
use crate::error::Result;
use super::alloc::Init;
use super::field::Field;
use super::pointer::PointerSpec;
use super::primitive::{BitStruct, Charset, Enumeration, Integer, StrSpec};
use super::record::RecordSpec;
use super::scope::Scope;

/// A field shape computed from the siblings decoded before it.
pub type Thunk = Arc<dyn Fn(&Scope<'_>) -> Result<Shape> + Send + Sync>;

/// Predicate closing a terminated array. The matching element is kept.
pub type Predicate = Arc<dyn Fn(&Field) -> bool + Send + Sync>;

/// Computes the canonical value of a field from its siblings.
pub type Compute = Arc<dyn Fn(&[Field]) -> Result<Option<i128>> + Send + Sync>;

#[derive(Clone)]
pub enum Shape {
	Int(Integer),
	Enum(Arc<Enumeration>),
	Bits(Arc<BitStruct>),
	/// Opaque bytes of a known length.
	Block(u64),
	/// Opaque bytes up to the end of the enclosing blocksize.
	Rest,
	Str(Arc<StrSpec>),
	Struct(Arc<Structure>),
	Array(Arc<Array>),
	Record(Arc<RecordSpec>),
	Pointer(Arc<PointerSpec>),
}

impl Shape {
	pub fn block(length: u64) -> Shape {
		Shape::Block(length)
	}

	pub fn empty() -> Shape {
		Shape::Block(0)
	}

	pub fn string(length: u64, charset: Charset) -> Shape {
		Shape::Str(Arc::new(StrSpec::Fixed { length, charset }))
	}

	pub fn terminated_string(terminators: &'static [u8]) -> Shape {
		Shape::Str(Arc::new(StrSpec::Terminated { terminators }))
	}

	pub fn bits(bits: BitStruct) -> Shape {
		Shape::Bits(Arc::new(bits))
	}

	pub fn enumeration(name: &'static str, base: Integer, values: &'static [(&'static str, u64)]) -> Shape {
		Shape::Enum(Arc::new(Enumeration { name, base, values }))
	}

	pub fn array(element: Shape, length: Length) -> Shape {
		Shape::Array(Arc::new(Array { element: Kind::Fixed(element), length, limit: None }))
	}

	pub fn array_with<F>(element: F, length: Length) -> Shape
		where F: Fn(&Scope<'_>) -> Result<Shape> + Send + Sync + 'static {
		Shape::Array(Arc::new(Array { element: Kind::Thunk(Arc::new(element)), length, limit: None }))
	}

	pub fn count(element: Shape, count: u64) -> Shape {
		Shape::array(element, Length::Count(count))
	}

	/// An array filling exactly `bytes` bytes.
	pub fn block_array(element: Shape, bytes: u64) -> Shape {
		Shape::Array(Arc::new(Array { element: Kind::Fixed(element), length: Length::Block, limit: Some(bytes) }))
	}

	pub fn terminated<P>(element: Shape, predicate: P) -> Shape
		where P: Fn(&Field) -> bool + Send + Sync + 'static {
		Shape::array(element, Length::Terminated(Arc::new(predicate)))
	}

	/// Restricts an array shape to at most `bytes` bytes.
	pub fn within(self, bytes: u64) -> Shape {
		match self {
			Shape::Array(array) => Shape::Array(Arc::new(Array {
				element: array.element.clone(),
				length: array.length.clone(),
				limit: Some(array.limit.map_or(bytes, |l| l.min(bytes))),
			})),
			other => other,
		}
	}

	pub fn name(&self) -> String {
		match self {
			Shape::Int(integer) => integer.type_name(),
			Shape::Enum(e) => e.name.to_owned(),
			Shape::Bits(b) => b.name.to_owned(),
			Shape::Block(_) => "block".to_owned(),
			Shape::Rest => "raw".to_owned(),
			Shape::Str(_) => "string".to_owned(),
			Shape::Struct(s) => s.name.to_owned(),
			Shape::Array(a) => match &a.element {
				Kind::Fixed(element) => format!("{}[]", element.name()),
				Kind::Thunk(_) => "array".to_owned(),
			},
			Shape::Record(r) => r.name.to_owned(),
			Shape::Pointer(p) => p.name.to_owned(),
		}
	}

	/// Declared record type constant of a body, used to back-fill its header.
	pub fn tag(&self) -> Option<u64> {
		match self {
			Shape::Struct(s) => s.tag,
			_ => None,
		}
	}

	/// Size in bytes when it does not depend on data.
	pub fn natural_size(&self) -> Option<u64> {
		match self {
			Shape::Int(integer) => Some(integer.width as u64),
			Shape::Enum(e) => Some(e.base.width as u64),
			Shape::Bits(b) => Some(b.base.width as u64),
			Shape::Block(length) => Some(*length),
			Shape::Str(spec) => match &**spec {
				StrSpec::Fixed { length, charset } => Some(length * charset.unit()),
				StrSpec::Terminated { .. } => None,
			},
			Shape::Struct(s) => s.members.iter().map(|m| match &m.kind {
				Kind::Fixed(shape) => shape.natural_size(),
				Kind::Thunk(_) => None,
			}).sum(),
			Shape::Array(a) => match (&a.element, &a.length) {
				(Kind::Fixed(element), Length::Count(n)) => element.natural_size().map(|size| size * n),
				_ => a.limit,
			},
			Shape::Pointer(p) => Some((p.offset.width + p.length.map_or(0, |l| l.width)) as u64),
			Shape::Rest | Shape::Record(_) => None,
		}
	}
}

impl fmt::Debug for Shape {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Shape({})", self.name())
	}
}

impl From<Integer> for Shape {
	fn from(integer: Integer) -> Shape {
		Shape::Int(integer)
	}
}

#[derive(Clone)]
pub enum Kind {
	Fixed(Shape),
	Thunk(Thunk),
}

impl Kind {
	pub fn realise(&self, scope: &Scope<'_>) -> Result<Shape> {
		match self {
			Kind::Fixed(shape) => Ok(shape.clone()),
			Kind::Thunk(thunk) => thunk(scope),
		}
	}
}

#[derive(Clone)]
pub enum Length {
	/// Exactly this many elements.
	Count(u64),
	/// As many elements as fit in the blocksize.
	Block,
	/// Up to and including the first element matching the predicate.
	Terminated(Predicate),
}

pub struct Array {
	pub element: Kind,
	pub length: Length,
	pub limit: Option<u64>,
}

pub struct Member {
	pub name: &'static str,
	pub kind: Kind,
	pub default: Option<Init>,
	/// Mismatch against `default` aborts the decode.
	pub magic: bool,
	/// Mismatch against `default` only makes `valid()` false.
	pub sentinel: bool,
}

pub struct Backfill {
	pub target: &'static str,
	pub rule: Compute,
}

/// An ordered list of named members. Built with the methods below and then
/// frozen by `build`.
pub struct Structure {
	pub name: &'static str,
	pub members: Vec<Member>,
	pub backfill: Vec<Backfill>,
	pub tag: Option<u64>,
}

impl Structure {
	pub fn new(name: &'static str) -> Structure {
		Structure { name, members: Vec::new(), backfill: Vec::new(), tag: None }
	}

	pub fn field<S: Into<Shape>>(mut self, name: &'static str, shape: S) -> Structure {
		self.members.push(Member { name, kind: Kind::Fixed(shape.into()), default: None, magic: false, sentinel: false });
		self
	}

	pub fn field_with<F>(mut self, name: &'static str, thunk: F) -> Structure
		where F: Fn(&Scope<'_>) -> Result<Shape> + Send + Sync + 'static {
		self.members.push(Member { name, kind: Kind::Thunk(Arc::new(thunk)), default: None, magic: false, sentinel: false });
		self
	}

	fn member_mut(&mut self, name: &str) -> &mut Member {
		let index = self.members.iter().position(|m| m.name == name);
		match index {
			Some(index) => &mut self.members[index],
			// Schemas are static tables; a typo here is a programming error.
			None => panic!("structure {} has no member {}", self.name, name),
		}
	}

	pub fn default<I: Into<Init>>(mut self, name: &'static str, value: I) -> Structure {
		self.member_mut(name).default = Some(value.into());
		self
	}

	pub fn magic<I: Into<Init>>(mut self, name: &'static str, value: I) -> Structure {
		let member = self.member_mut(name);
		member.default = Some(value.into());
		member.magic = true;
		self
	}

	pub fn sentinel<I: Into<Init>>(mut self, name: &'static str, value: I) -> Structure {
		let member = self.member_mut(name);
		member.default = Some(value.into());
		member.sentinel = true;
		self
	}

	pub fn backfill<F>(mut self, target: &'static str, rule: F) -> Structure
		where F: Fn(&[Field]) -> Result<Option<i128>> + Send + Sync + 'static {
		self.backfill.push(Backfill { target, rule: Arc::new(rule) });
		self
	}

	pub fn tag(mut self, kind: u64) -> Structure {
		self.tag = Some(kind);
		self
	}

	pub fn build(self) -> Shape {
		Shape::Struct(Arc::new(self))
	}
}

/// Picks the largest variant whose natural size fits in `available`, falling
/// back to the smallest one. Variants must be listed oldest first.
pub fn latest(variants: &[Shape], available: u64) -> Shape {
	let mut chosen = variants.first().cloned().unwrap_or_else(Shape::empty);
	for variant in variants {
		match variant.natural_size() {
			Some(size) if size <= available => chosen = variant.clone(),
			_ => {},
		}
	}
	chosen
}

/// Block padding the current position up to a multiple of `alignment`,
/// counted from the start of the enclosing structure.
pub fn align(scope: &Scope<'_>, alignment: u64) -> Shape {
	let used = scope.position - scope.start;
	Shape::Block((alignment - used % alignment) % alignment)
}
