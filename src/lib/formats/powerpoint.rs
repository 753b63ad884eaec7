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

//! PowerPoint binary documents. The "Current User" stream holds a single
//! CurrentUserAtom pointing into the "PowerPoint Document" stream, where a
//! chain of UserEditAtoms leads to the persist directories mapping object
//! ids to record offsets.

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use lazy_static::lazy_static;
use log::{debug, warn};
use crate::cfbf::Container;
use crate::engine::{BitStruct, Charset, Context, Dispatch, Field, Key, Length, PointerSpec, RecordSpec, Registry, Shape, Structure, Target};
use crate::engine::{I16, I32, U16, U32, U8};
use crate::error::{Error, Result};
use super::{officeart, office_header, office_key, File, CONTAINER_VERSION};

pub const CURRENT_USER_STREAM: &str = "Current User";
pub const DOCUMENT_STREAM: &str = "PowerPoint Document";

pub const DOCUMENT: u64 = 0x03E8;
pub const DOCUMENT_ATOM: u64 = 0x03E9;
pub const END_DOCUMENT_ATOM: u64 = 0x03EA;
pub const SLIDE: u64 = 0x03EE;
pub const SLIDE_ATOM: u64 = 0x03EF;
pub const NOTES: u64 = 0x03F0;
pub const ENVIRONMENT: u64 = 0x03F2;
pub const SLIDE_PERSIST_ATOM: u64 = 0x03F3;
pub const MAIN_MASTER: u64 = 0x03F8;
pub const DRAWING_GROUP: u64 = 0x040B;
pub const DRAWING: u64 = 0x040C;
pub const LIST: u64 = 0x07D0;
pub const EXTERNAL_OBJECT_REF_ATOM: u64 = 0x0BC1;
pub const PLACEHOLDER_ATOM: u64 = 0x0BC3;
pub const TEXT_CHARS_ATOM: u64 = 0x0FA0;
pub const TEXT_BYTES_ATOM: u64 = 0x0FA8;
pub const HANDOUT: u64 = 0x0FC9;
pub const SLIDE_LIST_WITH_TEXT: u64 = 0x0FF0;
pub const USER_EDIT_ATOM: u64 = 0x0FF5;
pub const CURRENT_USER_ATOM: u64 = 0x0FF6;
pub const PERSIST_DIRECTORY_ATOM: u64 = 0x1772;
pub const HASH_CODE_ATOM: u64 = 0x2B00;
pub const SLIDE_TIME_10_ATOM: u64 = 0x2EEB;

/// `headerToken` of a CurrentUserAtom.
pub const TOKEN_PLAIN: u64 = 0xE391_C05F;
pub const TOKEN_ENCRYPTED: u64 = 0xF3D1_C4DF;

fn point(name: &'static str) -> Shape {
	Structure::new(name)
		.field("x", I32)
		.field("y", I32)
		.build()
}

fn container(name: &'static str, kind: u64) -> Shape {
	Structure::new(name)
		.field_with("rgChildRec", |_| Ok(records()))
		.tag(kind)
		.build()
}

/// Offset of a record in the document stream. Zero means there is none.
fn record_offset(name: &'static str) -> Shape {
	PointerSpec::new(name, U32, Target::Shape(record())).build()
}

fn persist_directory_entry() -> Shape {
	Structure::new("PersistDirectoryEntry")
		.field("info", Shape::bits(BitStruct::msb_first("PersistIdInfo", U32, &[(12, "cPersist"), (20, "persistId")])))
		.field_with("rgPersistOffset", |scope| Ok(Shape::count(record_offset("PersistOffset"), scope.u64("info.cPersist")?)))
		.build()
}

fn user_edit_atom() -> Shape {
	Structure::new("UserEditAtom")
		.field("lastSlideIdRef", I32)
		.field("version", U16)
		.field("minorVersion", U8)
		.field("majorVersion", U8)
		.field_with("offsetLastEdit", |_| Ok(record_offset("UserEditAtom")))
		.field_with("offsetPersistDirectory", |_| Ok(record_offset("PersistDirectoryAtom")))
		.field("docPersistIdRef", U32)
		.field("persistIdSeed", U32)
		.field("lastView", I16)
		.field("unused", Shape::block(2))
		.tag(USER_EDIT_ATOM)
		.build()
}

fn current_user_atom() -> Shape {
	Structure::new("CurrentUserAtom")
		.field("size", U32)
		.default("size", 0x14u32)
		.field("headerToken", Shape::enumeration("HeaderToken", U32, &[
			("plain", TOKEN_PLAIN),
			("encrypted", TOKEN_ENCRYPTED),
		]))
		.default("headerToken", TOKEN_PLAIN)
		.field_with("offsetToCurrentEdit", |_| Ok(PointerSpec::new("UserEditAtom", U32, Target::Shape(record())).stream(DOCUMENT_STREAM).build()))
		.field("lenUserName", U16)
		.field("docFileVersion", U16)
		.field("majorVersion", U8)
		.field("minorVersion", U8)
		.field("unused", Shape::block(2))
		.field_with("ansiUserName", |scope| Ok(Shape::string(scope.u64("lenUserName")?, Charset::Latin1)))
		.field("relVersion", U32)
		// Absent from files written by old versions
		.field_with("unicodeUserName", |scope| {
			let length = scope.u64("lenUserName")?;
			Ok(if scope.remaining() >= length * 2 { Shape::string(length, Charset::Utf16) } else { Shape::empty() })
		})
		.backfill("lenUserName", |fields| Ok(fields.iter()
			.find(|f| f.name() == "ansiUserName")
			.and_then(Field::bytes)
			.map(|name| name.len() as i128)))
		.tag(CURRENT_USER_ATOM)
		.build()
}

lazy_static! {
	static ref PPT: Registry = Registry::new("PowerPoint")
		.define(DOCUMENT, container("DocumentContainer", DOCUMENT))
		.define(SLIDE, container("SlideContainer", SLIDE))
		.define(NOTES, container("NotesContainer", NOTES))
		.define(ENVIRONMENT, container("DocumentTextInfoContainer", ENVIRONMENT))
		.define(MAIN_MASTER, container("MainMasterContainer", MAIN_MASTER))
		.define(DRAWING_GROUP, container("DrawingGroupContainer", DRAWING_GROUP))
		.define(DRAWING, container("DrawingContainer", DRAWING))
		.define(LIST, container("DocInfoListContainer", LIST))
		.define(HANDOUT, container("HandoutContainer", HANDOUT))
		.define(SLIDE_LIST_WITH_TEXT, container("SlideListWithTextContainer", SLIDE_LIST_WITH_TEXT))
		.define(DOCUMENT_ATOM, Structure::new("DocumentAtom")
			.field("slideSize", point("PointStruct"))
			.field("notesSize", point("PointStruct"))
			.field("serverZoom", Structure::new("RatioStruct").field("numer", I32).field("denom", I32).build())
			.field("notesMasterPersistIdRef", U32)
			.field("handoutMasterPersistIdRef", U32)
			.field("firstSlideNumber", U16)
			.field("slideSizeType", Shape::enumeration("SlideSizeType", U16, &[
				("OnScreen", 0),
				("LetterSizedPaper", 1),
				("A4Paper", 2),
				("35mm", 3),
				("Overhead", 4),
				("Banner", 5),
				("Custom", 6),
			]))
			.field("fSaveWithFonts", U8)
			.field("fOmitTitlePlace", U8)
			.field("fRightToLeft", U8)
			.field("fShowComments", U8)
			.tag(DOCUMENT_ATOM)
			.build())
		.define(END_DOCUMENT_ATOM, Structure::new("EndDocumentAtom").tag(END_DOCUMENT_ATOM).build())
		.define(SLIDE_ATOM, Structure::new("SlideAtom")
			.field("geom", U32)
			.field("rgPlaceholderTypes", Shape::count(U8.into(), 8))
			.field("masterIdRef", U32)
			.field("notesIdRef", U32)
			.field("slideFlags", Shape::bits(BitStruct::lsb_first("SlideFlags", U16, &[
				(1, "fMasterObjects"),
				(1, "fMasterScheme"),
				(1, "fMasterBackground"),
				(13, "reserved"),
			])))
			.field("unused", U16)
			.tag(SLIDE_ATOM)
			.build())
		.define(SLIDE_PERSIST_ATOM, Structure::new("SlidePersistAtom")
			.field("persistIdRef", U32)
			.field("flags", Shape::bits(BitStruct::lsb_first("SlidePersistFlags", U32, &[
				(1, "reserved1"),
				(1, "fShouldCollapse"),
				(1, "fNonOutlineData"),
				(29, "reserved2"),
			])))
			.field("cTexts", I32)
			.field("slideId", U32)
			.field("reserved", U32)
			.tag(SLIDE_PERSIST_ATOM)
			.build())
		.define(EXTERNAL_OBJECT_REF_ATOM, Structure::new("ExObjRefAtom")
			.field("exObjId", U32)
			.tag(EXTERNAL_OBJECT_REF_ATOM)
			.build())
		.define(PLACEHOLDER_ATOM, Structure::new("PlaceholderAtom")
			.field("position", I32)
			.field("placementId", U8)
			.field("size", Shape::enumeration("PlaceholderSize", U8, &[("Full", 0), ("Half", 1), ("Quarter", 2)]))
			.field("unused", U16)
			.tag(PLACEHOLDER_ATOM)
			.build())
		.define(TEXT_CHARS_ATOM, Structure::new("TextCharsAtom")
			.field_with("textChars", |scope| Ok(Shape::string(scope.lookup_u64("header.recLen")? / 2, Charset::Utf16)))
			.tag(TEXT_CHARS_ATOM)
			.build())
		.define(TEXT_BYTES_ATOM, Structure::new("TextBytesAtom")
			.field_with("textBytes", |scope| Ok(Shape::string(scope.lookup_u64("header.recLen")?, Charset::Latin1)))
			.tag(TEXT_BYTES_ATOM)
			.build())
		.define(HASH_CODE_ATOM, Structure::new("HashCodeAtom")
			.field("hash", U32)
			.tag(HASH_CODE_ATOM)
			.build())
		.define(SLIDE_TIME_10_ATOM, Structure::new("SlideTime10Atom")
			.field("fileTime", super::filetime())
			.tag(SLIDE_TIME_10_ATOM)
			.build())
		.define(USER_EDIT_ATOM, user_edit_atom())
		.define(CURRENT_USER_ATOM, current_user_atom())
		.define(PERSIST_DIRECTORY_ATOM, Structure::new("PersistDirectoryAtom")
			.field_with("rgPersistDirEntry", |_| Ok(Shape::array(persist_directory_entry(), Length::Block)))
			.tag(PERSIST_DIRECTORY_ATOM)
			.build());
}

/// Drawings embed OfficeArt records, which share the header layout.
fn unknown(key: &Key) -> Shape {
	if key.kind >= officeart::DGG_CONTAINER {
		officeart::body(key)
	}
	else if key.version == Some(CONTAINER_VERSION) {
		records()
	}
	else {
		Shape::Rest
	}
}

pub fn record() -> Shape {
	RecordSpec::new("PowerPointRecord", office_header(), Dispatch::Registry(&PPT, office_key))
		.length("recLen", 0)
		.kind("recType")
		.fallback(unknown)
		.build()
}

/// Records up to the end of the enclosing block.
pub fn records() -> Shape {
	Shape::array(record(), Length::Block)
}

/// The "Current User" stream, bound to its container so that the edit
/// pointer reaches the document stream.
pub fn from_container(container: Rc<Container>) -> Result<File> {
	File::from_container(container, CURRENT_USER_STREAM, record())
}

pub fn document(container: Rc<Container>) -> Result<File> {
	File::from_container(container, DOCUMENT_STREAM, records())
}

fn expect(record: Field, kind: u64) -> Result<Field> {
	match record.int_at("header.recType") {
		Some(found) if found == kind as i128 => Ok(record),
		found => Err(Error::Schema(format!("expected record type {:#x} at {:#x}, found {:?}", kind, record.offset, found))),
	}
}

/// User edits from the newest to the oldest. The walk follows
/// `offsetLastEdit` until it reaches zero or an edit it has already seen.
pub fn edits(cx: &Context, current_user: &Field) -> Result<Vec<Field>> {
	let document = cx.rebind(cx.open_stream(DOCUMENT_STREAM)?);
	let mut edit = expect(current_user.field("body.offsetToCurrentEdit")?.dereference(cx)?, USER_EDIT_ATOM)?;
	let mut seen = HashSet::new();
	let mut res = Vec::new();
	loop {
		if !seen.insert(edit.offset) {
			warn!("[edits] Edit chain loops back to {:#x}", edit.offset);
			break;
		}
		let last = edit.field("body.offsetLastEdit")?;
		let next = match last.pointer() {
			Some(pointer) if pointer.raw != 0 && !pointer.is_nil() => Some(expect(last.dereference(&document)?, USER_EDIT_ATOM)?),
			_ => None,
		};
		res.push(edit);
		match next {
			Some(next) => edit = next,
			None => break,
		}
	}
	debug!("[edits] {} edits", res.len());
	Ok(res)
}

/// Persist object ids mapped to offsets in the document stream. Newer edits
/// override the directories of older ones.
pub fn persist_objects(cx: &Context, current_user: &Field) -> Result<BTreeMap<u64, u64>> {
	let document = cx.rebind(cx.open_stream(DOCUMENT_STREAM)?);
	let mut res = BTreeMap::new();
	for edit in edits(cx, current_user)? {
		let directory = expect(edit.field("body.offsetPersistDirectory")?.dereference(&document)?, PERSIST_DIRECTORY_ATOM)?;
		for entry in directory.field("body.rgPersistDirEntry")?.children() {
			let first = entry.u64_at("info.persistId")?;
			for (i, offset) in entry.field("rgPersistOffset")?.children().iter().enumerate() {
				if let Some(pointer) = offset.pointer() {
					res.entry(first + i as u64).or_insert(pointer.raw);
				}
			}
		}
	}
	Ok(res)
}

/// Decodes the record of persist object `id`.
pub fn persist_object(cx: &Context, objects: &BTreeMap<u64, u64>, id: u64) -> Result<Field> {
	let offset = objects.get(&id).ok_or_else(|| Error::Schema(format!("no persist object {}", id)))?;
	cx.rebind(cx.open_stream(DOCUMENT_STREAM)?).decode(&record(), *offset)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use crate::engine::Init;
	use crate::io::{Buffer, Source};

	fn header(kind: u16, length: usize) -> Vec<u8> {
		let mut data = vec![0, 0];
		data.extend_from_slice(&kind.to_le_bytes());
		data.extend_from_slice(&(length as u32).to_le_bytes());
		data
	}

	fn directory(first: u32, offsets: &[u32]) -> Vec<u8> {
		let mut data = header(PERSIST_DIRECTORY_ATOM as u16, 4 + 4 * offsets.len());
		data.extend_from_slice(&(((offsets.len() as u32) << 20) | first).to_le_bytes());
		for offset in offsets {
			data.extend_from_slice(&offset.to_le_bytes());
		}
		data
	}

	fn user_edit(last: u32, directory: u32) -> Vec<u8> {
		let mut data = header(USER_EDIT_ATOM as u16, 28);
		data.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 3]);
		data.extend_from_slice(&last.to_le_bytes());
		data.extend_from_slice(&directory.to_le_bytes());
		data.extend_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0]);
		data
	}

	fn current_user(edit: u32) -> Vec<u8> {
		let mut data = header(CURRENT_USER_ATOM as u16, 33);
		data.extend_from_slice(&[0x14, 0, 0, 0, 0x5F, 0xC0, 0x91, 0xE3]);
		data.extend_from_slice(&edit.to_le_bytes());
		data.extend_from_slice(&[3, 0, 0xF4, 0x03, 3, 0, 0, 0]);
		data.extend_from_slice(b"bob");
		data.extend_from_slice(&[8, 0, 0, 0, b'b', 0, b'o', 0, b'b', 0]);
		data
	}

	fn context(user: Vec<u8>, document: Vec<u8>) -> Context {
		let mut streams: HashMap<String, Source> = HashMap::new();
		streams.insert(DOCUMENT_STREAM.to_owned(), Buffer::source(document));
		Context::new(Buffer::source(user)).with_streams(Rc::new(streams))
	}

	/// Directory at 0, first edit at 20, second directory at 56, second edit at 72.
	fn two_edits() -> Vec<u8> {
		let mut data = directory(1, &[20, 0]);
		data.extend(user_edit(0, 0));
		data.extend(directory(1, &[72]));
		data.extend(user_edit(20, 56));
		data
	}

	#[test]
	fn current_user_names_the_author() {
		let cx = context(current_user(20), two_edits());
		let user = cx.decode(&record(), 0).unwrap();
		assert_eq!(user.type_name(), "CurrentUserAtom");
		assert_eq!(user.find("body.ansiUserName").and_then(Field::text), Some("bob".to_owned()));
		assert_eq!(user.find("body.unicodeUserName").and_then(Field::text), Some("bob".to_owned()));
		assert_eq!(user.int_at("body.headerToken"), Some(TOKEN_PLAIN as i128));
		assert!(user.is_complete());
	}

	#[test]
	fn edit_chain_runs_newest_first() {
		let cx = context(current_user(72), two_edits());
		let user = cx.decode(&record(), 0).unwrap();
		let chain = edits(&cx, &user).unwrap();
		assert_eq!(chain.iter().map(|e| e.offset).collect::<Vec<_>>(), vec![72, 20]);
		assert_eq!(chain[1].int_at("body.majorVersion"), Some(3));
		assert_eq!(chain[1].int_at("body.lastSlideIdRef"), Some(0x100));
	}

	#[test]
	fn newer_directories_win() {
		let cx = context(current_user(72), two_edits());
		let user = cx.decode(&record(), 0).unwrap();
		let objects = persist_objects(&cx, &user).unwrap();
		assert_eq!(objects.into_iter().collect::<Vec<_>>(), vec![(1, 72), (2, 0)]);
		let objects = persist_objects(&cx, &user).unwrap();
		assert_eq!(persist_object(&cx, &objects, 2).unwrap().type_name(), "PersistDirectoryAtom");
		assert!(persist_object(&cx, &objects, 3).is_err());
	}

	#[test]
	fn looping_edits_stop() {
		let mut document = directory(1, &[20]);
		document.extend(user_edit(20, 0));
		let cx = context(current_user(20), document);
		let user = cx.decode(&record(), 0).unwrap();
		assert_eq!(edits(&cx, &user).unwrap().len(), 1);
	}

	#[test]
	fn drawings_hold_officeart_records() {
		let mut data = vec![0x0F, 0x00, 0x0C, 0x04, 16, 0, 0, 0];
		data.extend_from_slice(&[0x10, 0x00, 0x08, 0xF0, 8, 0, 0, 0, 2, 0, 0, 0, 1, 4, 0, 0]);
		data.extend(header(END_DOCUMENT_ATOM as u16, 0));
		let cx = Context::new(Buffer::source(data.clone()));
		let stream = cx.decode(&records(), 0).unwrap();
		assert_eq!(stream.len(), 2);
		let drawing = &stream.children()[0];
		assert_eq!(drawing.type_name(), "DrawingContainer");
		let fdg = &drawing.find("body.rgChildRec").unwrap().children()[0];
		assert_eq!(fdg.type_name(), "OfficeArtFDG");
		assert_eq!(fdg.int_at("body.spidCur"), Some(0x401));
		assert_eq!(stream.children()[1].type_name(), "EndDocumentAtom");
		assert_eq!(stream.encode().unwrap(), data);
	}

	#[test]
	fn text_atoms_are_sized_by_their_header() {
		let mut data = header(TEXT_CHARS_ATOM as u16, 4);
		data.extend_from_slice(&[b'h', 0, b'i', 0]);
		data.extend(header(TEXT_BYTES_ATOM as u16, 2));
		data.extend_from_slice(b"ok");
		let cx = Context::new(Buffer::source(data));
		let stream = cx.decode(&records(), 0).unwrap();
		assert_eq!(stream.children()[0].find("body.textChars").and_then(Field::text), Some("hi".to_owned()));
		assert_eq!(stream.children()[1].find("body.textBytes").and_then(Field::text), Some("ok".to_owned()));
	}

	#[test]
	fn built_current_user_counts_its_name() {
		let cx = Context::new(Buffer::source(Vec::new()));
		let user = cx.alloc(&record(), Init::fields(vec![
			("header", Init::fields(vec![("recType", CURRENT_USER_ATOM.into())])),
			("body", Init::fields(vec![
				("offsetToCurrentEdit", Init::Pointer { offset: 20, length: None }),
				("ansiUserName", "bob".into()),
				("relVersion", 8u32.into()),
			])),
		])).unwrap();
		assert_eq!(user.int_at("body.lenUserName"), Some(3));
		assert_eq!(user.int_at("body.size"), Some(0x14));
		assert_eq!(user.int_at("body.headerToken"), Some(TOKEN_PLAIN as i128));
	}
}
