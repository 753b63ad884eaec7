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
use log::debug;
use crate::error::{Fault, Result};
use super::decode::{self, Span};
use super::field::{Field, Name, Value};
use super::scope::{Context, Scope};
use super::shape::{Array, Length, Shape};

/// Reads the elements of an array until its count is reached, its block is
/// filled or its terminator has been read.
///
/// An element that does not fit in the block is dropped and the bytes left in
/// the block are kept as a `tail` member; an element cut short by the end of
/// the provider is kept as it is. Either way the chain stops there.
pub(crate) fn decode(array: &Arc<Array>, shape: &Shape, name: Name, offset: u64, span: Span, parent: Option<&Scope<'_>>, cx: &Context) -> Result<Field> {
	let have = cx.source.available(offset);
	let mut fault = None;
	let limit = match (array.limit, span.limit) {
		(Some(own), Some(room)) if own > room => {
			fault = Some(Fault::Inconsistent { what: name.to_string(), declared: own, available: room });
			Some(room)
		},
		(Some(own), _) => Some(own),
		(None, room) => room,
	};
	let end = match limit {
		Some(limit) => offset.saturating_add(limit),
		None => offset + have,
	};

	let mut items: Vec<Field> = Vec::new();
	let mut position = offset;
	let mut index = 0u64;
	loop {
		match &array.length {
			Length::Count(count) if index >= *count => break,
			Length::Block | Length::Terminated(_) if position >= end => break,
			_ => {},
		}

		let scope = Scope { cx, parent, name: &name, fields: &items, start: offset, position, bound: end };
		let element = match array.element.realise(&scope) {
			Ok(element) => decode::decode(&element, index.to_string().into(), position, Span::within(end.saturating_sub(position)), Some(&scope), cx)?,
			Err(err) => Field::faulted(index.to_string(), position, Shape::empty(), err.into_fault()?),
		};
		index += 1;

		if element.cut_short() {
			if end < offset + have {
				debug!("{}: element {} overruns the block at {:#x}", name, index - 1, position);
				let mut tail = decode::decode(&Shape::Block(end - position), "tail".into(), position, Span::within(end - position), Some(&scope), cx)?;
				tail.fault = Some(Fault::ChainOverrun { offset: position, blocksize: end - offset });
				position = tail.end();
				items.push(tail);
			}
			else {
				position = element.end();
				items.push(element);
			}
			break;
		}

		let closes = match &array.length {
			Length::Terminated(predicate) => predicate(&element),
			_ => false,
		};
		let size = element.size;
		position = element.end();
		items.push(element);
		if closes {
			break;
		}
		if size == 0 {
			if let Length::Count(_) = array.length {
				continue;
			}
			debug!("{}: zero-sized element at {:#x}, closing the chain", name, position);
			break;
		}
	}

	let mut field = Field::new(name, offset, position - offset, shape.clone(), Value::Items(items));
	field.fault = fault;
	if let Length::Block = array.length {
		field.blocksize = Some(end - offset);
	}
	Ok(field)
}

#[cfg(test)]
mod tests {
	use crate::engine::primitive::{U16, U8};
	use crate::engine::shape::{Length, Shape, Structure};
	use crate::engine::scope::Context;
	use crate::error::Fault;
	use crate::io::Buffer;

	fn cx(data: Vec<u8>) -> Context {
		Context::new(Buffer::source(data))
	}

	#[test]
	fn block_arrays_fill_their_budget() {
		let shape = Shape::block_array(U16.into(), 6);
		let field = cx(vec![1, 0, 2, 0, 3, 0, 4, 0]).decode(&shape, 0).unwrap();
		assert_eq!(field.len(), 3);
		assert_eq!(field.size, 6);
		assert!(field.is_complete());
	}

	#[test]
	fn overshooting_element_becomes_a_tail() {
		let shape = Shape::block_array(U16.into(), 5);
		let field = cx(vec![1, 0, 2, 0, 3, 0]).decode(&shape, 0).unwrap();
		assert_eq!(field.len(), 3);
		let tail = field.get("tail").unwrap();
		assert_eq!(tail.size, 1);
		assert!(matches!(tail.fault, Some(Fault::ChainOverrun { offset: 4, blocksize: 5 })));
		assert_eq!(field.size, 5);
		assert!(!field.is_complete());
		assert_eq!(field.encode().unwrap(), vec![1, 0, 2, 0, 3]);
	}

	#[test]
	fn truncated_element_stops_the_chain() {
		let shape = Shape::array(U16.into(), Length::Count(4));
		let field = cx(vec![1, 0, 2, 0, 3]).decode(&shape, 0).unwrap();
		assert_eq!(field.len(), 3);
		assert!(matches!(field.get("last").and_then(|f| f.fault.clone()), Some(Fault::Truncated { .. })));
		assert_eq!(field.encode().unwrap(), vec![1, 0, 2, 0]);
	}

	#[test]
	fn sentinel_element_closes_the_chain() {
		let shape = Shape::terminated(U8.into(), |f| f.int() == Some(0));
		let field = cx(vec![5, 6, 0, 7]).decode(&shape, 0).unwrap();
		assert_eq!(field.len(), 3);
		assert_eq!(field.get("last").and_then(|f| f.int()), Some(0));
		assert!(field.children()[..2].iter().all(|f| f.int() != Some(0)));
	}

	#[test]
	fn counts_come_from_siblings() {
		let shape = Structure::new("list")
			.field("count", U8)
			.field_with("items", |scope| Ok(Shape::count(U8.into(), scope.u64("count")?)))
			.build();
		let field = cx(vec![2, 9, 8, 7]).decode(&shape, 0).unwrap();
		assert_eq!(field.find("items").map(|f| f.len()), Some(2));
		assert_eq!(field.size, 3);
	}
}
