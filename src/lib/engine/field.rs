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

use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt;
use crate::error::{Error, Fault, Result};
use super::pointer::Pointer;
use super::shape::Shape;

pub type Name = Cow<'static, str>;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	Int(i128),
	/// Bit members, in the order of the struct's (normalised) field list.
	Bits(Vec<u64>),
	Bytes(Vec<u8>),
	/// Members of a structure or the header/body/extra of a record.
	Fields(Vec<Field>),
	/// Elements of an array.
	Items(Vec<Field>),
	Pointer(Pointer),
	/// The field could not be read; see its fault.
	Missing,
}

/// A positioned, sized view over a byte provider, together with the value
/// decoded from it.
#[derive(Clone, Debug)]
pub struct Field {
	pub name: Name,
	pub offset: u64,
	pub size: u64,
	/// Byte budget granted by the container, if any.
	pub blocksize: Option<u64>,
	pub shape: Shape,
	pub value: Value,
	pub fault: Option<Fault>,
	pub(crate) pinned: bool,
}

impl PartialEq for Field {
	fn eq(&self, other: &Field) -> bool {
		self.name == other.name && self.offset == other.offset && self.size == other.size && self.value == other.value
	}
}

impl Field {
	pub fn new<N: Into<Name>>(name: N, offset: u64, size: u64, shape: Shape, value: Value) -> Field {
		Field { name: name.into(), offset, size, blocksize: None, shape, value, fault: None, pinned: false }
	}

	pub(crate) fn faulted<N: Into<Name>>(name: N, offset: u64, shape: Shape, fault: Fault) -> Field {
		let mut field = Field::new(name, offset, 0, shape, Value::Missing);
		field.fault = Some(fault);
		field
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn end(&self) -> u64 {
		self.offset + self.size
	}

	pub fn children(&self) -> &[Field] {
		match &self.value {
			Value::Fields(fields) | Value::Items(fields) => fields,
			_ => &[],
		}
	}

	pub(crate) fn children_mut(&mut self) -> &mut [Field] {
		match &mut self.value {
			Value::Fields(fields) | Value::Items(fields) => fields,
			_ => &mut [],
		}
	}

	pub fn len(&self) -> usize {
		self.children().len()
	}

	pub fn is_empty(&self) -> bool {
		self.children().is_empty()
	}

	pub fn get(&self, name: &str) -> Option<&Field> {
		let children = self.children();
		if name == "last" {
			return children.last();
		}
		children.iter().find(|f| f.name == name)
	}

	pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
		let children = self.children_mut();
		if name == "last" {
			return children.last_mut();
		}
		children.iter_mut().find(|f| f.name == name)
	}

	/// Looks up a descendant by dotted path, such as `header.recInstance`.
	pub fn find(&self, path: &str) -> Option<&Field> {
		path.split('.').try_fold(self, |field, name| field.get(name))
	}

	pub(crate) fn find_mut(&mut self, path: &str) -> Option<&mut Field> {
		let mut field = self;
		for name in path.split('.') {
			field = field.get_mut(name)?;
		}
		Some(field)
	}

	pub fn field(&self, path: &str) -> Result<&Field> {
		self.find(path).ok_or_else(|| Error::Schema(format!("{} has no field {}", self.name, path)))
	}

	pub fn int(&self) -> Option<i128> {
		match &self.value {
			Value::Int(v) => Some(*v),
			Value::Bits(values) => match &self.shape {
				Shape::Bits(bits) => bits.pack(values).ok().map(i128::from),
				_ => None,
			},
			Value::Pointer(pointer) => Some(pointer.raw as i128),
			_ => None,
		}
	}

	/// Integer at a dotted path. The last component may name a member of a
	/// bit-packed field.
	pub fn int_at(&self, path: &str) -> Option<i128> {
		int_in(self.children(), path)
	}

	pub fn u64_at(&self, path: &str) -> Result<u64> {
		match self.int_at(path) {
			Some(v) => u64::try_from(v).map_err(|_| Error::Schema(format!("{}.{} is negative", self.name, path))),
			None => Err(Error::Schema(format!("{} has no integer {}", self.name, path))),
		}
	}

	pub fn bytes(&self) -> Option<&[u8]> {
		match &self.value {
			Value::Bytes(bytes) => Some(bytes),
			_ => None,
		}
	}

	pub fn text(&self) -> Option<String> {
		match (&self.shape, &self.value) {
			(Shape::Str(spec), Value::Bytes(bytes)) => Some(spec.charset().decode(bytes)),
			(_, Value::Bytes(bytes)) => Some(bytes.iter().map(|&b| b as char).collect()),
			_ => None,
		}
	}

	pub fn bit(&self, name: &str) -> Option<u64> {
		match (&self.shape, &self.value) {
			(Shape::Bits(bits), Value::Bits(values)) => bits.index(name).and_then(|i| values.get(i).cloned()),
			_ => None,
		}
	}

	pub fn pointer(&self) -> Option<&Pointer> {
		match &self.value {
			Value::Pointer(pointer) => Some(pointer),
			_ => None,
		}
	}

	pub fn encode(&self) -> Result<Vec<u8>> {
		let mut out = Vec::with_capacity(self.size as usize);
		self.encode_into(&mut out)?;
		Ok(out)
	}

	pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
		match (&self.shape, &self.value) {
			(_, Value::Missing) => {},
			(Shape::Enum(e), Value::Int(v)) => out.extend(e.base.encode(*v)?),
			(Shape::Int(integer), Value::Int(v)) => out.extend(integer.encode(*v)?),
			(Shape::Bits(bits), Value::Bits(values)) => out.extend(bits.base.encode(bits.pack(values)? as i128)?),
			(Shape::Pointer(spec), Value::Pointer(pointer)) => {
				out.extend(spec.offset.encode(pointer.raw as i128)?);
				if let (Some(integer), Some(count)) = (spec.length, pointer.count) {
					out.extend(integer.encode(count as i128)?);
				}
			},
			(_, Value::Bytes(bytes)) => out.extend_from_slice(bytes),
			(_, Value::Fields(fields)) | (_, Value::Items(fields)) => for field in fields {
				field.encode_into(out)?;
			},
			(shape, value) => return Err(Error::Schema(format!("cannot encode {:?} as {:?}", value, shape))),
		}
		Ok(())
	}

	/// Recomputes offsets and sizes from the values, starting at `offset`.
	pub fn relayout(&mut self, offset: u64) -> u64 {
		self.offset = offset;
		self.size = match &mut self.value {
			Value::Missing => 0,
			Value::Int(_) | Value::Bits(_) | Value::Pointer(_) => self.shape.natural_size().unwrap_or(0),
			Value::Bytes(bytes) => bytes.len() as u64,
			Value::Fields(fields) | Value::Items(fields) => {
				let mut position = offset;
				for field in fields.iter_mut() {
					position += field.relayout(position);
				}
				position - offset
			},
		};
		if self.blocksize.is_some() {
			self.blocksize = Some(self.size);
		}
		self.size
	}

	/// Whether reading stopped inside this field before its shape was
	/// satisfied, either at the end of the provider or at the end of the
	/// container's budget.
	pub fn cut_short(&self) -> bool {
		match self.fault {
			Some(Fault::Truncated { .. }) | Some(Fault::Inconsistent { .. }) => true,
			_ => self.children().last().map_or(false, Field::cut_short),
		}
	}

	/// No faults anywhere below, and every container filled its blocksize.
	pub fn is_complete(&self) -> bool {
		self.fault.is_none()
			&& self.blocksize.map_or(true, |b| b == self.size)
			&& self.children().iter().all(Field::is_complete)
	}

	/// Every fault below this field, keyed by dotted path.
	pub fn faults(&self) -> Vec<(String, Fault)> {
		let mut res = Vec::new();
		self.collect_faults(&self.name, &mut res);
		res
	}

	fn collect_faults(&self, path: &str, res: &mut Vec<(String, Fault)>) {
		if let Some(fault) = &self.fault {
			res.push((path.to_owned(), fault.clone()));
		}
		for child in self.children() {
			child.collect_faults(&format!("{}.{}", path, child.name), res);
		}
	}

	/// Sentinel members hold their declared values and no pointer is nil.
	/// Pointers nested inside a structure are not followed.
	pub fn valid(&self) -> bool {
		match (&self.shape, &self.value) {
			(Shape::Pointer(_), Value::Pointer(pointer)) => !pointer.is_nil(),
			(Shape::Struct(structure), Value::Fields(fields)) => {
				let sentinels = structure.members.iter().filter(|m| m.sentinel).all(|m| {
					match (fields.iter().find(|f| f.name == m.name), &m.default) {
						(Some(field), Some(expected)) => expected.matches(field),
						_ => false,
					}
				});
				sentinels && fields.iter().filter(|f| f.pointer().is_none()).all(Field::valid)
			},
			(_, Value::Fields(fields)) | (_, Value::Items(fields)) => fields.iter().filter(|f| f.pointer().is_none()).all(Field::valid),
			_ => true,
		}
	}

	/// Class name used in listings. Records are named after their body, or
	/// after their type code when the body is unknown.
	pub fn type_name(&self) -> String {
		match &self.shape {
			Shape::Record(spec) => match self.get("body") {
				Some(body) if body.shape.tag().is_some() || matches!(body.shape, Shape::Struct(_)) => body.shape.name(),
				_ => match spec.kind_field.and_then(|path| self.get("header").and_then(|h| h.int_at(path))) {
					Some(kind) => format!("{}(0x{:x})", spec.name, kind),
					None => spec.name.to_owned(),
				},
			},
			shape => shape.name(),
		}
	}

	pub fn summary(&self) -> String {
		let mut res = match (&self.shape, &self.value) {
			(_, Value::Missing) => "<missing>".to_owned(),
			(Shape::Enum(e), Value::Int(v)) => match e.lookup(*v as u64) {
				Some(name) => format!("{}({:#x})", name, v),
				None => format!("{:#x}", v),
			},
			(_, Value::Int(v)) => format!("{}", v),
			(Shape::Bits(bits), Value::Bits(values)) => bits.fields.iter().zip(values)
				.map(|(&(_, name), value)| format!("{}={}", name, value))
				.collect::<Vec<_>>()
				.join(" "),
			(Shape::Str(_), Value::Bytes(_)) => format!("{:?}", self.text().unwrap_or_default()),
			(_, Value::Bytes(bytes)) => {
				let preview: Vec<String> = bytes.iter().take(16).map(|b| format!("{:02x}", b)).collect();
				let ellipsis = if bytes.len() > 16 { "..." } else { "" };
				format!("{} bytes [{}{}]", bytes.len(), preview.join(""), ellipsis)
			},
			(_, Value::Pointer(pointer)) => pointer.to_string(),
			(_, Value::Fields(_)) => format!("{{{}}}", self.type_name()),
			(_, Value::Items(items)) => group(items),
		};
		if let Some(fault) = &self.fault {
			res.push_str(&format!(" ! {}", fault));
		}
		res
	}

	fn write_tree(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
		writeln!(f, "{:indent$}[{:#x}] {} : {} = {}", "", self.offset, self.name, self.type_name(), self.summary(), indent = depth * 2)?;
		for child in self.children() {
			child.write_tree(f, depth + 1)?;
		}
		Ok(())
	}
}

impl fmt::Display for Field {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		self.write_tree(f, 0)
	}
}

/// Groups consecutive elements of the same type as `N × Type`.
fn group(items: &[Field]) -> String {
	let mut runs: Vec<(String, usize)> = Vec::new();
	for item in items {
		let name = item.type_name();
		match runs.last_mut() {
			Some((last, count)) if *last == name => *count += 1,
			_ => runs.push((name, 1)),
		}
	}
	let parts: Vec<String> = runs.into_iter()
		.map(|(name, count)| if count > 1 { format!("{} × {}", count, name) } else { name })
		.collect();
	format!("[{}]", parts.join(", "))
}

pub(crate) fn find_in<'a>(fields: &'a [Field], path: &str) -> Option<&'a Field> {
	let mut names = path.split('.');
	let first = names.next()?;
	let head = if first == "last" { fields.last() } else { fields.iter().find(|f| f.name == first) }?;
	names.try_fold(head, |field, name| field.get(name))
}

pub(crate) fn int_in(fields: &[Field], path: &str) -> Option<i128> {
	if let Some(field) = find_in(fields, path) {
		return field.int();
	}
	let (parent, member) = match path.rfind('.') {
		Some(split) => (&path[..split], &path[split + 1..]),
		None => return None,
	};
	find_in(fields, parent).and_then(|field| field.bit(member)).map(i128::from)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use crate::engine::primitive::{BitStruct, U16, U8};

	fn leaf(name: &'static str, offset: u64, value: i128) -> Field {
		Field::new(name, offset, 1, Shape::Int(U8), Value::Int(value))
	}

	#[test]
	fn paths_reach_bit_members() {
		let bits = BitStruct::msb_first("flags", U16, &[(12, "inst"), (4, "ver")]);
		let flags = Field::new("flags", 0, 2, Shape::Bits(Arc::new(bits)), Value::Bits(vec![3, 15]));
		let header = Field::new("header", 0, 2, Shape::empty(), Value::Fields(vec![flags]));
		let root = Field::new("root", 0, 2, Shape::empty(), Value::Fields(vec![header]));
		assert_eq!(root.int_at("header.flags.inst"), Some(3));
		assert_eq!(root.int_at("header.flags"), Some(0x3F));
		assert_eq!(root.int_at("header.flags.missing"), None);
		assert_eq!(root.encode().unwrap(), vec![0x3F, 0x00]);
	}

	#[test]
	fn summaries_group_runs() {
		let items = vec![leaf("0", 0, 1), leaf("1", 1, 2), leaf("2", 2, 3)];
		let array = Field::new("items", 0, 3, Shape::empty(), Value::Items(items));
		assert_eq!(array.summary(), "[3 × uint8]");
		assert_eq!(array.get("last").and_then(Field::int), Some(3));
	}

	#[test]
	fn relayout_renumbers_members() {
		let mut root = Field::new("root", 0, 0, Shape::empty(), Value::Fields(vec![leaf("a", 9, 1), leaf("b", 9, 2)]));
		assert_eq!(root.relayout(4), 2);
		assert_eq!(root.get("b").map(|f| f.offset), Some(5));
	}
}
