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

//! OLE property set streams (`\u{5}SummaryInformation` and friends): a
//! header naming each set by format id, then sets of typed values reached
//! through offsets relative to the start of their set.

use std::rc::Rc;
use lazy_static::lazy_static;
use log::{debug, warn};
use crate::cfbf::Container;
use crate::engine::{align, Addressing, Charset, Context, Field, Key, Length, PointerSpec, Registry, Scope, Shape, Structure, Target};
use crate::engine::{I16, I32, I64, I8, U16, U32, U64, U8};
use crate::error::Result;
use super::{filetime, guid, File};

pub const SUMMARY_INFORMATION: &str = "\u{5}SummaryInformation";
pub const DOCUMENT_SUMMARY_INFORMATION: &str = "\u{5}DocumentSummaryInformation";

pub const BYTE_ORDER: u64 = 0xFFFE;

pub const DICTIONARY_PROPERTY_IDENTIFIER: u64 = 0x0000_0000;
pub const CODEPAGE_PROPERTY_IDENTIFIER: u64 = 0x0000_0001;
pub const LOCALE_PROPERTY_IDENTIFIER: u64 = 0x8000_0000;
pub const BEHAVIOR_PROPERTY_IDENTIFIER: u64 = 0x8000_0001;

pub const PIDSI_TITLE: u64 = 0x02;
pub const PIDSI_SUBJECT: u64 = 0x03;
pub const PIDSI_AUTHOR: u64 = 0x04;
pub const PIDSI_KEYWORDS: u64 = 0x05;
pub const PIDSI_COMMENTS: u64 = 0x06;
pub const PIDSI_TEMPLATE: u64 = 0x07;
pub const PIDSI_LASTAUTHOR: u64 = 0x08;
pub const PIDSI_REVNUMBER: u64 = 0x09;
pub const PIDSI_EDITTIME: u64 = 0x0A;
pub const PIDSI_LASTPRINTED: u64 = 0x0B;
pub const PIDSI_CREATE_DTM: u64 = 0x0C;
pub const PIDSI_LASTSAVE_DTM: u64 = 0x0D;
pub const PIDSI_PAGECOUNT: u64 = 0x0E;
pub const PIDSI_WORDCOUNT: u64 = 0x0F;
pub const PIDSI_CHARCOUNT: u64 = 0x10;
pub const PIDSI_APPNAME: u64 = 0x12;
pub const PIDSI_DOC_SECURITY: u64 = 0x13;

/// Code page whose strings are UTF-16.
pub const CP_WINUNICODE: u64 = 1200;

pub const VT_EMPTY: u64 = 0x0000;
pub const VT_NULL: u64 = 0x0001;
pub const VT_I2: u64 = 0x0002;
pub const VT_I4: u64 = 0x0003;
pub const VT_R4: u64 = 0x0004;
pub const VT_R8: u64 = 0x0005;
pub const VT_CY: u64 = 0x0006;
pub const VT_DATE: u64 = 0x0007;
pub const VT_BSTR: u64 = 0x0008;
pub const VT_ERROR: u64 = 0x000A;
pub const VT_BOOL: u64 = 0x000B;
pub const VT_VARIANT: u64 = 0x000C;
pub const VT_DECIMAL: u64 = 0x000E;
pub const VT_I1: u64 = 0x0010;
pub const VT_UI1: u64 = 0x0011;
pub const VT_UI2: u64 = 0x0012;
pub const VT_UI4: u64 = 0x0013;
pub const VT_I8: u64 = 0x0014;
pub const VT_UI8: u64 = 0x0015;
pub const VT_INT: u64 = 0x0016;
pub const VT_UINT: u64 = 0x0017;
pub const VT_CLSID: u64 = 0x0048;
pub const VT_LPSTR: u64 = 0x001E;
pub const VT_LPWSTR: u64 = 0x001F;
pub const VT_FILETIME: u64 = 0x0040;
pub const VT_BLOB: u64 = 0x0041;
pub const VT_STREAM: u64 = 0x0042;
pub const VT_STORAGE: u64 = 0x0043;
pub const VT_STREAMED_OBJECT: u64 = 0x0044;
pub const VT_STORED_OBJECT: u64 = 0x0045;
pub const VT_BLOB_OBJECT: u64 = 0x0046;
pub const VT_CF: u64 = 0x0047;
pub const VT_VERSIONED_STREAM: u64 = 0x0049;

pub const VT_VECTOR: u64 = 0x1000;
pub const VT_ARRAY: u64 = 0x2000;

const PROPERTY_TYPES: &[(&str, u64)] = &[
	("VT_EMPTY", 0x0000),
	("VT_NULL", 0x0001),
	("VT_I2", 0x0002),
	("VT_I4", 0x0003),
	("VT_R4", 0x0004),
	("VT_R8", 0x0005),
	("VT_CY", 0x0006),
	("VT_DATE", 0x0007),
	("VT_BSTR", 0x0008),
	("VT_ERROR", 0x000A),
	("VT_BOOL", 0x000B),
	("VT_DECIMAL", 0x000E),
	("VT_I1", 0x0010),
	("VT_UI1", 0x0011),
	("VT_UI2", 0x0012),
	("VT_UI4", 0x0013),
	("VT_I8", 0x0014),
	("VT_UI8", 0x0015),
	("VT_INT", 0x0016),
	("VT_UINT", 0x0017),
	("VT_LPSTR", 0x001E),
	("VT_LPWSTR", 0x001F),
	("VT_FILETIME", 0x0040),
	("VT_BLOB", 0x0041),
	("VT_STREAM", 0x0042),
	("VT_STORAGE", 0x0043),
	("VT_STREAMED_Object", 0x0044),
	("VT_STORED_Object", 0x0045),
	("VT_BLOB_Object", 0x0046),
	("VT_CF", 0x0047),
	("VT_CLSID", 0x0048),
	("VT_VERSIONED_STREAM", 0x0049),
	("VT_VECTOR|VT_I2", 0x1002),
	("VT_VECTOR|VT_I4", 0x1003),
	("VT_VECTOR|VT_R4", 0x1004),
	("VT_VECTOR|VT_R8", 0x1005),
	("VT_VECTOR|VT_CY", 0x1006),
	("VT_VECTOR|VT_DATE", 0x1007),
	("VT_VECTOR|VT_BSTR", 0x1008),
	("VT_VECTOR|VT_ERROR", 0x100A),
	("VT_VECTOR|VT_BOOL", 0x100B),
	("VT_VECTOR|VT_VARIANT", 0x100C),
	("VT_VECTOR|VT_I1", 0x1010),
	("VT_VECTOR|VT_UI1", 0x1011),
	("VT_VECTOR|VT_UI2", 0x1012),
	("VT_VECTOR|VT_UI4", 0x1013),
	("VT_VECTOR|VT_I8", 0x1014),
	("VT_VECTOR|VT_UI8", 0x1015),
	("VT_VECTOR|VT_LPSTR", 0x101E),
	("VT_VECTOR|VT_LPWSTR", 0x101F),
	("VT_VECTOR|VT_FILETIME", 0x1040),
	("VT_VECTOR|VT_CF", 0x1047),
	("VT_VECTOR|VT_CLSID", 0x1048),
	("VT_ARRAY|VT_I2", 0x2002),
	("VT_ARRAY|VT_I4", 0x2003),
	("VT_ARRAY|VT_R4", 0x2004),
	("VT_ARRAY|VT_R8", 0x2005),
	("VT_ARRAY|VT_CY", 0x2006),
	("VT_ARRAY|VT_DATE", 0x2007),
	("VT_ARRAY|VT_BSTR", 0x2008),
	("VT_ARRAY|VT_ERROR", 0x200A),
	("VT_ARRAY|VT_BOOL", 0x200B),
	("VT_ARRAY|VT_VARIANT", 0x200C),
	("VT_ARRAY|VT_DECIMAL", 0x200E),
	("VT_ARRAY|VT_I1", 0x2010),
	("VT_ARRAY|VT_UI1", 0x2011),
	("VT_ARRAY|VT_UI2", 0x2012),
	("VT_ARRAY|VT_UI4", 0x2013),
	("VT_ARRAY|VT_INT", 0x2016),
	("VT_ARRAY|VT_UINT", 0x2017),
];

const PROPERTY_IDENTIFIERS: &[(&str, u64)] = &[
	("DICTIONARY_PROPERTY_IDENTIFIER", DICTIONARY_PROPERTY_IDENTIFIER),
	("CODEPAGE_PROPERTY_IDENTIFIER", CODEPAGE_PROPERTY_IDENTIFIER),
	("LOCALE_PROPERTY_IDENTIFIER", LOCALE_PROPERTY_IDENTIFIER),
	("BEHAVIOR_PROPERTY_IDENTIFIER", BEHAVIOR_PROPERTY_IDENTIFIER),
];

fn property_identifier() -> Shape {
	Shape::enumeration("PropertyIdentifier", U32, PROPERTY_IDENTIFIERS)
}

/// A counted string followed by padding to 4 bytes. `unit` is the width of
/// one counted element: 1 for code page strings, 2 for UTF-16.
fn counted(name: &'static str, charset: Charset) -> Shape {
	Structure::new(name)
		.field("Size", U32)
		.field_with("Characters", move |scope| Ok(Shape::string(scope.u64("Size")? * charset.unit(), charset)))
		.field_with("Alignment", |scope| Ok(align(scope, 4)))
		.build()
}

fn code_page_string() -> Shape {
	counted("CodePageString", Charset::Latin1)
}

fn blob() -> Shape {
	Structure::new("BLOB")
		.field("Size", U32)
		.field_with("Bytes", |scope| Ok(Shape::block(scope.u64("Size")?)))
		.field_with("Alignment", |scope| Ok(align(scope, 4)))
		.build()
}

fn decimal() -> Shape {
	Structure::new("DECIMAL")
		.field("wReserved", U16)
		.field("scale", U8)
		.field("sign", U8)
		.field("Hi32", U32)
		.field("Lo64", U64)
		.build()
}

fn clipboard_data() -> Shape {
	Structure::new("ClipboardData")
		.field("Size", U32)
		.field("Format", U32)
		.field_with("Data", |scope| Ok(Shape::block(scope.u64("Size")?.saturating_sub(4))))
		.field_with("Alignment", |scope| Ok(align(scope, 4)))
		.build()
}

fn versioned_stream() -> Shape {
	Structure::new("VersionedStream")
		.field("VersionGuid", guid())
		.field("StreamName", code_page_string())
		.build()
}

lazy_static! {
	/// Scalar values; vectors and arrays are built over these.
	static ref SCALARS: Registry = Registry::new("TypedValue")
		.define(VT_EMPTY, Shape::empty())
		.define(VT_NULL, Shape::empty())
		.define(VT_I2, I16.into())
		.define(VT_I4, I32.into())
		.define(VT_R4, U32.into())
		.define(VT_R8, U64.into())
		.define(VT_CY, I64.into())
		.define(VT_DATE, U64.into())
		.define(VT_BSTR, code_page_string())
		.define(VT_ERROR, U32.into())
		.define(VT_BOOL, U16.into())
		.define(VT_DECIMAL, decimal())
		.define(VT_I1, I8.into())
		.define(VT_UI1, U8.into())
		.define(VT_UI2, U16.into())
		.define(VT_UI4, U32.into())
		.define(VT_I8, I64.into())
		.define(VT_UI8, U64.into())
		.define(VT_INT, I32.into())
		.define(VT_UINT, U32.into())
		.define(VT_LPSTR, code_page_string())
		.define(VT_LPWSTR, counted("UnicodeString", Charset::Utf16))
		.define(VT_FILETIME, filetime())
		.define(VT_BLOB, blob())
		.define(VT_STREAM, code_page_string())
		.define(VT_STORAGE, code_page_string())
		.define(VT_STREAMED_OBJECT, code_page_string())
		.define(VT_STORED_OBJECT, code_page_string())
		.define(VT_BLOB_OBJECT, blob())
		.define(VT_CF, clipboard_data())
		.define(VT_CLSID, guid())
		.define(VT_VERSIONED_STREAM, versioned_stream())
		.define(VT_VARIANT, typed_property_value());
}

fn unknown_type(key: &Key) -> Shape {
	warn!("[value_shape] Unknown property type {:#x}", key.kind);
	Shape::Rest
}

fn array_header() -> Shape {
	let dimension = Structure::new("ArrayDimension")
		.field("Size", U32)
		.field("IndexOffset", I32)
		.build();
	Structure::new("ArrayHeader")
		.field("Type", U32)
		.field("NumDimensions", U32)
		.field_with("Dimension", move |scope| Ok(Shape::count(dimension.clone(), scope.u64("NumDimensions")?)))
		.build()
}

/// Shape of a value of type `vt`, scalars and their vector or array forms.
pub fn value_shape(vt: u64) -> Shape {
	let scalar = SCALARS.resolve(&Key::new(vt & 0x0FFF), unknown_type);
	if vt & VT_VECTOR != 0 {
		Structure::new("Vector")
			.field("Length", U32)
			.field_with("Items", move |scope| Ok(Shape::count(scalar.clone(), scope.u64("Length")?)))
			.build()
	}
	else if vt & VT_ARRAY != 0 {
		Structure::new("Array")
			.field("Header", array_header())
			.field_with("Items", move |scope| {
				let cells = scope.get("Header.Dimension")
					.map_or(0, |dims| dims.children().iter().map(|d| d.int_at("Size").unwrap_or(0) as u64).product());
				Ok(Shape::count(scalar.clone(), cells))
			})
			.build()
	}
	else {
		scalar
	}
}

pub fn typed_property_value() -> Shape {
	Structure::new("TypedPropertyValue")
		.field("Type", Shape::enumeration("PropertyType", U16, PROPERTY_TYPES))
		.field("Padding", U16)
		.field_with("Value", |scope| Ok(value_shape(scope.u64("Type")?)))
		.field_with("Alignment", |scope| Ok(align(scope, 4)))
		.build()
}

/// Names are UTF-16 when the set's code page is CP_WINUNICODE.
fn dictionary_entry() -> Shape {
	Structure::new("DictionaryEntry")
		.field("PropertyIdentifier", U32)
		.field("Length", U32)
		.field_with("Name", |scope| Ok(match scope.cx.attr("codepage") {
			Some(CP_WINUNICODE) => Shape::string(scope.u64("Length")? * 2, Charset::Utf16),
			_ => Shape::string(scope.u64("Length")?, Charset::Latin1),
		}))
		.field_with("Padding", |scope| Ok(match scope.cx.attr("codepage") {
			Some(CP_WINUNICODE) => align(scope, 4),
			_ => Shape::empty(),
		}))
		.build()
}

pub fn dictionary() -> Shape {
	Structure::new("Dictionary")
		.field("NumEntries", U32)
		.field_with("Entry", |scope| Ok(Shape::count(dictionary_entry(), scope.u64("NumEntries")?)))
		.field_with("Padding", |scope| Ok(align(scope, 4)))
		.build()
}

fn property_offset(scope: &Scope<'_>) -> Result<Shape> {
	let target = match scope.u64("PropertyIdentifier")? {
		DICTIONARY_PROPERTY_IDENTIFIER => dictionary(),
		_ => typed_property_value(),
	};
	Ok(PointerSpec::new("PropertyOffset", U32, Target::Shape(target))
		.addressing(Addressing::Relative("PropertySet"))
		.build())
}

/// A set: its size, the id/offset table, then the values the offsets point
/// into, kept as one block.
pub fn property_set() -> Shape {
	let entry = Structure::new("PropertyIdentifierAndOffset")
		.field("PropertyIdentifier", property_identifier())
		.field_with("Offset", property_offset)
		.build();
	Structure::new("PropertySet")
		.field("Size", U32)
		.field("NumProperties", U32)
		.field_with("PropertyIdentifierAndOffset", move |scope| Ok(Shape::count(entry.clone(), scope.u64("NumProperties")?)))
		.field_with("Properties", |scope| {
			let used = scope.position - scope.start;
			Ok(Shape::block(scope.u64("Size")?.saturating_sub(used)))
		})
		.build()
}

pub fn property_set_stream() -> Shape {
	let format_offset = Structure::new("FormatOffset")
		.field("FMTID", guid())
		.field("Offset", PointerSpec::new("SetOffset", U32, Target::Shape(property_set())).build())
		.build();
	Structure::new("PropertySetStream")
		.field("ByteOrder", U16)
		.magic("ByteOrder", BYTE_ORDER)
		.field("Version", U16)
		.field("SystemIdentifier", U32)
		.field("CLSID", guid())
		.field("NumPropertySets", U32)
		.field_with("FormatOffset", move |scope| Ok(Shape::count(format_offset.clone(), scope.u64("NumPropertySets")?)))
		.field_with("PropertySet", |scope| Ok(Shape::array(property_set(), Length::Count(scope.u64("NumPropertySets")?))))
		.build()
}

pub fn open(container: Rc<Container>, name: &str) -> Result<File> {
	File::from_container(container, name, property_set_stream())
}

/// The sets of a decoded stream, reached through their format offsets.
pub fn property_sets(cx: &Context, stream: &Field) -> Result<Vec<Field>> {
	stream.field("FormatOffset")?
		.children()
		.iter()
		.map(|entry| entry.field("Offset")?.dereference(cx))
		.collect()
}

/// Code page declared by a set, if any.
pub fn codepage(cx: &Context, set: &Field) -> Result<Option<u64>> {
	match property(cx, set, CODEPAGE_PROPERTY_IDENTIFIER)? {
		Some(value) => Ok(value.int_at("Value").map(|cp| cp as u16 as u64)),
		None => Ok(None),
	}
}

/// Every property of a set as `(identifier, value)`, in table order. The
/// dictionary is decoded with the set's code page.
pub fn properties(cx: &Context, set: &Field) -> Result<Vec<(u64, Field)>> {
	let cx = match codepage(cx, set)? {
		Some(cp) => cx.clone().with_attr("codepage", cp),
		None => cx.clone(),
	};
	let mut res = Vec::new();
	for entry in set.field("PropertyIdentifierAndOffset")?.children() {
		let id = entry.u64_at("PropertyIdentifier")?;
		let value = entry.field("Offset")?.dereference(&cx)?;
		if !value.is_complete() {
			warn!("[properties] Property {:#x} at {:#x} is damaged", id, value.offset);
		}
		res.push((id, value));
	}
	debug!("[properties] {} of {} properties", res.len(), set.int_at("NumProperties").unwrap_or(0));
	Ok(res)
}

pub fn property(cx: &Context, set: &Field, id: u64) -> Result<Option<Field>> {
	for entry in set.field("PropertyIdentifierAndOffset")?.children() {
		if entry.int_at("PropertyIdentifier") == Some(id as i128) {
			return entry.field("Offset")?.dereference(cx).map(Some);
		}
	}
	Ok(None)
}

/// Text of a string-typed value, without its terminating NUL.
pub fn text(value: &Field) -> Option<String> {
	value.find("Value.Characters")
		.and_then(Field::text)
		.map(|text| text.trim_end_matches('\0').to_owned())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::io::{Buffer, Writer};

	/// A stream holding one set: the code page, a title and a vector of
	/// counts.
	fn summary() -> Vec<u8> {
		let mut w = Writer::new();
		w.write_u16(0xFFFE);
		w.write_u16(0);
		w.write_u32(0x0002_0006);
		w.write_bytes(&[0; 16]);
		w.write_u32(1);
		w.write_bytes(&[0xE0, 0x85, 0x9F, 0xF2, 0xF9, 0x4F, 0x68, 0x10, 0xAB, 0x91, 0x08, 0x00, 0x2B, 0x27, 0xB3, 0xD9]);
		w.write_u32(48);

		w.write_u32(72);
		w.write_u32(3);
		for &(id, offset) in &[(1u32, 32u32), (PIDSI_TITLE as u32, 40), (PIDSI_PAGECOUNT as u32, 56)] {
			w.write_u32(id);
			w.write_u32(offset);
		}
		w.write_u32(VT_I2 as u32);
		w.write_u16(1252);
		w.write_u16(0);
		w.write_u32(VT_LPSTR as u32);
		w.write_u32(7);
		w.write_bytes(b"Report\0\0");
		w.write_u32((VT_VECTOR | VT_UI4) as u32);
		w.write_u32(2);
		w.write_u32(7);
		w.write_u32(9);
		w.into_inner()
	}

	#[test]
	fn sets_are_reached_through_offsets() {
		let data = summary();
		let cx = Context::new(Buffer::source(data.clone()));
		let stream = cx.decode(&property_set_stream(), 0).unwrap();
		assert_eq!(stream.size, data.len() as u64);
		assert_eq!(stream.encode().unwrap(), data);

		let sets = property_sets(&cx, &stream).unwrap();
		assert_eq!(sets.len(), 1);
		assert_eq!(sets[0].offset, 48);
		assert_eq!(codepage(&cx, &sets[0]).unwrap(), Some(1252));

		let values = properties(&cx, &sets[0]).unwrap();
		assert_eq!(values.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, PIDSI_TITLE, PIDSI_PAGECOUNT]);
		assert_eq!(values[1].1.find("Type").unwrap().summary(), "VT_LPSTR(0x1e)");
		assert_eq!(text(&values[1].1), Some("Report".to_owned()));
		assert_eq!(values[1].1.size, 16);
		let counts: Vec<_> = values[2].1.find("Value.Items").unwrap().children().iter().map(|c| c.int()).collect();
		assert_eq!(counts, vec![Some(7), Some(9)]);
	}

	#[test]
	fn byte_order_is_checked() {
		let mut data = summary();
		data[0] = 0xFF;
		let cx = Context::new(Buffer::source(data));
		assert!(cx.decode(&property_set_stream(), 0).is_err());
	}

	#[test]
	fn unicode_dictionaries_follow_the_code_page() {
		let mut w = Writer::new();
		w.write_u32(1);
		w.write_u32(5);
		w.write_u32(3);
		w.write_bytes(&Charset::Utf16.encode("Ab\0"));
		w.write_u16(0);
		let data = w.into_inner();
		let cx = Context::new(Buffer::source(data.clone())).with_attr("codepage", CP_WINUNICODE);
		let dict = cx.decode(&dictionary(), 0).unwrap();
		assert_eq!(dict.size, 20);
		assert_eq!(dict.find("Entry.0.Name").and_then(Field::text), Some("Ab\0".to_owned()));

		let cx = Context::new(Buffer::source(data));
		let dict = cx.decode(&dictionary(), 0).unwrap();
		assert_eq!(dict.find("Entry.0.Name").map(|n| n.size), Some(3));
	}

	#[test]
	fn variant_vectors_nest_typed_values() {
		let mut w = Writer::new();
		w.write_u32((VT_VECTOR | VT_VARIANT) as u32);
		w.write_u32(2);
		w.write_u32(VT_I4 as u32);
		w.write_u32(5);
		w.write_u32(VT_BOOL as u32);
		w.write_u16(0xFFFF);
		w.write_u16(0);
		let data = w.into_inner();
		let cx = Context::new(Buffer::source(data.clone()));
		let value = cx.decode(&typed_property_value(), 0).unwrap();
		assert_eq!(value.size, data.len() as u64);
		let items = value.find("Value.Items").unwrap().children();
		assert_eq!(items[0].int_at("Value"), Some(5));
		assert_eq!(items[1].find("Type").unwrap().summary(), "VT_BOOL(0xb)");
	}
}
