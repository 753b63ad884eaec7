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

//! Excel BIFF8 workbook streams: substreams of `type + length` records, each
//! opened by a BOF and closed by an EOF.

use std::rc::Rc;
use lazy_static::lazy_static;
use log::warn;
use crate::cfbf::Container;
use crate::engine::{BitStruct, Charset, Dispatch, Field, Key, Length, RecordSpec, Registry, Scope, Shape, Structure};
use crate::engine::{I16, I32, U16, U32, U64, U8};
use crate::error::Result;
use crate::io::Source;
use super::{officeart, File};

pub const CALCCOUNT: u64 = 0x000C;
pub const CALCMODE: u64 = 0x000D;
pub const EOF: u64 = 0x000A;
pub const CONTINUE: u64 = 0x003C;
pub const WINDOW1: u64 = 0x003D;
pub const CODEPAGE: u64 = 0x0042;
pub const BOUNDSHEET8: u64 = 0x0085;
pub const MSODRAWING: u64 = 0x00EC;
pub const SST: u64 = 0x00FC;
pub const LABELSST: u64 = 0x00FD;
pub const EXTSST: u64 = 0x00FF;
pub const DIMENSIONS: u64 = 0x0200;
pub const BLANK: u64 = 0x0201;
pub const NUMBER: u64 = 0x0203;
pub const ROW: u64 = 0x0208;
pub const RK: u64 = 0x027E;
pub const BOF: u64 = 0x0809;

/// `vers` of a BIFF8 BOF record.
pub const BIFF8: u64 = 0x0600;

fn cell() -> Shape {
	Structure::new("Cell")
		.field("rw", U16)
		.field("col", U16)
		.field("ixfe", U16)
		.build()
}

fn bof() -> Shape {
	Structure::new("BOF")
		.field("vers", U16)
		.field("dt", Shape::enumeration("DocType", U16, &[
			("workbook", 0x0005),
			("vba", 0x0006),
			("worksheet", 0x0010),
			("chart", 0x0020),
			("macro", 0x0040),
			("workspace", 0x0100),
		]))
		.field("rupBuild", U16)
		.field("rupYear", U16)
		.field_with("flags", |scope| Ok(if scope.u64("vers")? >= BIFF8 {
			Shape::bits(BitStruct::lsb_first("BOFFlags", U64, &[
				(1, "fWin"),
				(1, "fRisc"),
				(1, "fBeta"),
				(1, "fWinAny"),
				(1, "fMacAny"),
				(1, "fBetaAny"),
				(2, "unused1"),
				(1, "fRiscAny"),
				(1, "fOOM"),
				(1, "fGIJmp"),
				(2, "unused2"),
				(1, "fFontLimit"),
				(4, "verXLHigh"),
				(1, "unused3"),
				(13, "reserved1"),
				(8, "verLowestBiff"),
				(4, "verLastXLSaved"),
				(20, "reserved2"),
			]))
		}
		else {
			Shape::empty()
		}))
		.default("vers", BIFF8)
		.tag(BOF)
		.build()
}

fn unicode_flags() -> Shape {
	Shape::bits(BitStruct::lsb_first("XLUnicodeFlags", U8, &[(1, "fHighByte"), (7, "reserved")]))
}

fn characters(scope: &Scope<'_>) -> Result<Shape> {
	let charset = if scope.int("flags.fHighByte")? != 0 { Charset::Utf16 } else { Charset::Latin1 };
	Ok(Shape::string(scope.u64("cch")?, charset))
}

fn short_string() -> Shape {
	Structure::new("ShortXLUnicodeString")
		.field("cch", U8)
		.field("flags", unicode_flags())
		.field_with("rgb", characters)
		.build()
}

fn format_run() -> Shape {
	Structure::new("FormatRun")
		.field("ich", U16)
		.field("ifnt", U16)
		.build()
}

/// An SST entry: character count, then optional run and phonetic counts
/// announced by the flags, the characters, and the runs and phonetic block.
fn rich_string() -> Shape {
	Structure::new("XLUnicodeRichExtendedString")
		.field("cch", U16)
		.field("flags", Shape::bits(BitStruct::lsb_first("XLUnicodeRichFlags", U8, &[
			(1, "fHighByte"),
			(1, "reserved1"),
			(1, "fExtSt"),
			(1, "fRichSt"),
			(4, "reserved2"),
		])))
		.field_with("cRun", |scope| Ok(if scope.int("flags.fRichSt")? != 0 { U16.into() } else { Shape::empty() }))
		.field_with("cbExtRst", |scope| Ok(if scope.int("flags.fExtSt")? != 0 { I32.into() } else { Shape::empty() }))
		.field_with("rgb", characters)
		.field_with("rgRun", |scope| Ok(Shape::count(format_run(), scope.u64("cRun").unwrap_or(0))))
		.field_with("ExtRst", |scope| Ok(Shape::block(scope.int("cbExtRst").unwrap_or(0).max(0) as u64)))
		.build()
}

fn isstinf() -> Shape {
	Structure::new("ISSTInf")
		.field("ib", U32)
		.field("cbOffset", U16)
		.field("reserved", U16)
		.build()
}

/// `cstUnique` of the SST that an ExtSST follows. Continue records between
/// the two are skipped.
fn preceding_unique(scope: &Scope<'_>) -> Option<u64> {
	let records = scope.named("BIFF")?.parent?.fields;
	records.iter()
		.rev()
		.find(|record| record.int_at("header.type") != Some(CONTINUE as i128))
		.filter(|record| record.int_at("header.type") == Some(SST as i128))
		.and_then(|record| record.int_at("body.cstUnique"))
		.map(|unique| unique.max(0) as u64)
}

fn extsst() -> Shape {
	Structure::new("ExtSST")
		.field("dsst", U16)
		.field_with("rgISSTInf", |scope| {
			let dsst = scope.u64("dsst")?;
			let count = match preceding_unique(scope) {
				Some(unique) if dsst > 0 => (unique + dsst - 1) / dsst,
				Some(_) => 0,
				None => {
					warn!("[ExtSST] No SST record precedes the ExtSST at {:#x}", scope.start);
					0
				},
			};
			Ok(Shape::count(isstinf(), count))
		})
		.tag(EXTSST)
		.build()
}

lazy_static! {
	static ref BIFF: Registry = Registry::new("BIFF8 record")
		.define(BOF, bof())
		.define(EOF, Structure::new("EOF").tag(EOF).build())
		.define(CALCCOUNT, Structure::new("CalcCount").field("cIter", U16).tag(CALCCOUNT).build())
		.define(CALCMODE, Structure::new("CalcMode").field("mode", Shape::enumeration("CalcMode", U16, &[
			("manual", 0),
			("automatic", 1),
			("automatic-no-tables", 2),
		])).tag(CALCMODE).build())
		.define(CONTINUE, Structure::new("Continue").field("data", Shape::Rest).tag(CONTINUE).build())
		.define(WINDOW1, Structure::new("Window1")
			.field("xWn", I16)
			.field("yWn", I16)
			.field("dxWn", I16)
			.field("dyWn", I16)
			.field("flags", U16)
			.field("itabCur", U16)
			.field("itabFirst", U16)
			.field("ctabSel", U16)
			.field("wTabRatio", U16)
			.tag(WINDOW1)
			.build())
		.define(CODEPAGE, Structure::new("CodePage").field("cv", U16).tag(CODEPAGE).build())
		.define(BOUNDSHEET8, Structure::new("BoundSheet8")
			.field("lbPlyPos", U32)
			.field("grbit", Shape::bits(BitStruct::lsb_first("BoundSheetFlags", U16, &[(2, "hsState"), (6, "unused"), (8, "dt")])))
			.field("stName", short_string())
			.tag(BOUNDSHEET8)
			.build())
		.define(MSODRAWING, Structure::new("MsoDrawing")
			.field_with("rgChildRec", |_| Ok(officeart::container()))
			.tag(MSODRAWING)
			.build())
		.define(SST, Structure::new("SST")
			.field("cstTotal", I32)
			.field("cstUnique", I32)
			.field("rgb", Shape::array(rich_string(), Length::Block))
			.tag(SST)
			.build())
		.define(LABELSST, Structure::new("LabelSst").field("cell", cell()).field("isst", U32).tag(LABELSST).build())
		.define(EXTSST, extsst())
		.define(DIMENSIONS, Structure::new("Dimensions")
			.field("rwMic", U32)
			.field("rwMac", U32)
			.field("colMic", U16)
			.field("colMac", U16)
			.field("reserved", U16)
			.tag(DIMENSIONS)
			.build())
		.define(BLANK, Structure::new("Blank").field("cell", cell()).tag(BLANK).build())
		.define(NUMBER, Structure::new("Number").field("cell", cell()).field("num", U64).tag(NUMBER).build())
		.define(ROW, Structure::new("Row")
			.field("rw", U16)
			.field("colMic", U16)
			.field("colMac", U16)
			.field("miyRw", U16)
			.field("reserved1", U16)
			.field("unused1", U16)
			.field("flags", U32)
			.tag(ROW)
			.build())
		.define(RK, Structure::new("RK")
			.field("rw", U16)
			.field("col", U16)
			.field("rkrec", Structure::new("RkRec").field("ixfe", U16).field("RK", U32).build())
			.tag(RK)
			.build());
}

fn record_key(header: &Field) -> Result<Key> {
	Ok(Key::new(header.u64_at("type")?))
}

pub fn record() -> Shape {
	let header = Structure::new("BiffHeader")
		.field("type", U16)
		.field("length", U16)
		.build();
	RecordSpec::new("BIFF", header, Dispatch::Registry(&BIFF, record_key))
		.length("length", 0)
		.kind("type")
		.build()
}

/// Records from a BOF up to and including its EOF.
pub fn substream() -> Shape {
	Shape::terminated(record(), |record| record.int_at("header.type") == Some(EOF as i128))
}

/// A workbook stream: substreams until the end of the stream.
pub fn workbook() -> Shape {
	Shape::array(substream(), Length::Block)
}

pub fn open(source: Source) -> File {
	File::from_source(source, workbook())
}

/// Opens the workbook stream of an `.xls` compound file.
pub fn from_container(container: Rc<Container>) -> Result<File> {
	let name = if container.find_stream("Workbook").is_ok() { "Workbook" } else { "Book" };
	File::from_container(container, name, workbook())
}

/// Strings of every SST in a decoded workbook, in table order.
pub fn shared_strings(workbook: &Field) -> Vec<String> {
	workbook.children().iter()
		.flat_map(|substream| substream.children())
		.filter(|record| record.int_at("header.type") == Some(SST as i128))
		.filter_map(|record| record.find("body.rgb"))
		.flat_map(|strings| strings.children())
		.filter_map(|string| string.get("rgb").and_then(Field::text))
		.collect()
}

/// Value of a Number record.
pub fn number(record: &Field) -> Option<f64> {
	record.int_at("body.num").map(|bits| f64::from_bits(bits as u64))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::{Context, Init};
	use crate::io::Buffer;

	fn record_bytes(kind: u16, body: &[u8]) -> Vec<u8> {
		let mut data = kind.to_le_bytes().to_vec();
		data.extend_from_slice(&(body.len() as u16).to_le_bytes());
		data.extend_from_slice(body);
		data
	}

	fn sst(strings: &[&str]) -> Vec<u8> {
		let mut body = Vec::new();
		body.extend_from_slice(&(strings.len() as i32).to_le_bytes());
		body.extend_from_slice(&(strings.len() as i32).to_le_bytes());
		for string in strings {
			body.extend_from_slice(&(string.len() as u16).to_le_bytes());
			body.push(0);
			body.extend_from_slice(string.as_bytes());
		}
		record_bytes(SST as u16, &body)
	}

	fn stream() -> Vec<u8> {
		let mut data = record_bytes(BOF as u16, &[0x00, 0x06, 0x05, 0x00, 0xAA, 0x1F, 0xCD, 0x07, 0xC1, 0, 0, 0, 0x06, 0x03, 0, 0]);
		data.extend(sst(&["one", "two", "three", "four", "five"]));
		let mut extsst = vec![2, 0];
		extsst.extend((0..3u8).flat_map(|i| vec![i, 0, 0, 0, 12, 0, 0, 0]));
		data.extend(record_bytes(EXTSST as u16, &extsst));
		data.extend(record_bytes(NUMBER as u16, &[1, 0, 2, 0, 0x0F, 0, 0, 0, 0, 0, 0, 0, 0xF8, 0x3F]));
		data.extend(record_bytes(EOF as u16, &[]));
		data
	}

	#[test]
	fn extsst_counts_buckets_from_the_sst() {
		let data = stream();
		let workbook = open(Buffer::source(data.clone())).load().unwrap();
		assert_eq!(workbook.len(), 1);
		let globals = &workbook.children()[0];
		assert_eq!(globals.len(), 5);
		let ext = &globals.children()[2];
		assert_eq!(ext.type_name(), "ExtSST");
		assert_eq!(ext.find("body.rgISSTInf").map(Field::len), Some(3));
		assert!(workbook.is_complete());
		assert_eq!(workbook.encode().unwrap(), data);
	}

	#[test]
	fn shared_strings_are_listed() {
		let workbook = open(Buffer::source(stream())).load().unwrap();
		assert_eq!(shared_strings(&workbook), vec!["one", "two", "three", "four", "five"]);
		let globals = &workbook.children()[0];
		assert_eq!(globals.children()[0].find("body.dt").and_then(Field::int), Some(5));
		assert_eq!(globals.children()[0].int_at("body.flags.fWin"), Some(1));
		assert_eq!(number(&globals.children()[3]), Some(1.5));
	}

	#[test]
	fn extsst_without_sst_is_empty() {
		let data = record_bytes(EXTSST as u16, &[8, 0]);
		let workbook = open(Buffer::source(data)).load().unwrap();
		let ext = &workbook.children()[0].children()[0];
		assert_eq!(ext.find("body.rgISSTInf").map(Field::len), Some(0));
	}

	#[test]
	fn wide_strings_use_two_bytes_per_character() {
		let body = [2, 0, 1, b'h', 0, b'i', 0];
		let cx = Context::new(Buffer::source(body.to_vec()));
		let string = cx.decode(&rich_string(), 0).unwrap();
		assert_eq!(string.get("rgb").and_then(Field::text), Some("hi".to_owned()));
		assert_eq!(string.size, 7);
	}

	#[test]
	fn substreams_stop_at_eof() {
		let mut data = record_bytes(BOF as u16, &[0x00, 0x05, 0x10, 0x00, 0, 0, 0, 0]);
		data.extend(record_bytes(EOF as u16, &[]));
		data.extend(record_bytes(BOF as u16, &[0x00, 0x05, 0x20, 0x00, 0, 0, 0, 0]));
		data.extend(record_bytes(0x1234, &[1, 2, 3]));
		data.extend(record_bytes(EOF as u16, &[]));
		let workbook = open(Buffer::source(data)).load().unwrap();
		assert_eq!(workbook.len(), 2);
		assert_eq!(workbook.children()[1].children()[1].type_name(), "BIFF(0x1234)");
	}

	#[test]
	fn built_records_carry_type_and_length() {
		let cx = Context::new(Buffer::source(Vec::new()));
		let record = cx.alloc(&record(), Init::fields(vec![
			("header", Init::fields(vec![("type", CODEPAGE.into())])),
			("body", Init::fields(vec![("cv", 1252u16.into())])),
		])).unwrap();
		assert_eq!(record.encode().unwrap(), vec![0x42, 0x00, 0x02, 0x00, 0xE4, 0x04]);
	}
}
