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

//! OfficeArt drawing records: the 8-byte version/instance/type/length header
//! shared with PowerPoint, containers (version 15) holding more records, and
//! the property tables (FOPT) whose operands are typed by property id.

use lazy_static::lazy_static;
use crate::engine::{BitStruct, Dispatch, Field, Key, Length, RecordSpec, Registry, Shape, Structure};
use crate::engine::{I32, U16, U32, U8};
use crate::error::Result;
use crate::io::Source;
use super::{office_header, office_key, File, CONTAINER_VERSION};

pub const DGG_CONTAINER: u64 = 0xF000;
pub const BSTORE_CONTAINER: u64 = 0xF001;
pub const DG_CONTAINER: u64 = 0xF002;
pub const SPGR_CONTAINER: u64 = 0xF003;
pub const SP_CONTAINER: u64 = 0xF004;
pub const SOLVER_CONTAINER: u64 = 0xF005;
pub const FDGG: u64 = 0xF006;
pub const FBSE: u64 = 0xF007;
pub const FDG: u64 = 0xF008;
pub const FSPGR: u64 = 0xF009;
pub const FSP: u64 = 0xF00A;
pub const FOPT: u64 = 0xF00B;
pub const CHILD_ANCHOR: u64 = 0xF00F;
pub const CLIENT_ANCHOR: u64 = 0xF010;
pub const CLIENT_DATA: u64 = 0xF011;
pub const BLIP_JPEG: u64 = 0xF01D;
pub const BLIP_PNG: u64 = 0xF01E;
pub const BLIP_DIB: u64 = 0xF01F;
pub const COLOR_MRU: u64 = 0xF11A;
pub const SPLIT_MENU_COLORS: u64 = 0xF11E;
pub const SECONDARY_FOPT: u64 = 0xF121;
pub const TERTIARY_FOPT: u64 = 0xF122;

pub const FILL_TYPE: u64 = 0x0180;
pub const FILL_COLOR: u64 = 0x0181;
pub const FILL_OPACITY: u64 = 0x0182;
pub const FILL_BACK_COLOR: u64 = 0x0183;
pub const FILL_BACK_OPACITY: u64 = 0x0184;
pub const FILL_STYLE_BOOLEAN_PROPERTIES: u64 = 0x01BF;
pub const LINE_COLOR: u64 = 0x01C0;
pub const LINE_BACK_COLOR: u64 = 0x01C2;
pub const LINE_WIDTH: u64 = 0x01CB;
pub const LINE_STYLE_BOOLEAN_PROPERTIES: u64 = 0x01FF;
pub const PIB: u64 = 0x0104;
pub const SHAPE_BOOLEAN_PROPERTIES: u64 = 0x033F;
pub const GROUP_SHAPE_BOOLEAN_PROPERTIES: u64 = 0x03BF;

const PROPERTY_NAMES: &[(&str, u64)] = &[
	("pib", PIB),
	("fillType", FILL_TYPE),
	("fillColor", FILL_COLOR),
	("fillOpacity", FILL_OPACITY),
	("fillBackColor", FILL_BACK_COLOR),
	("fillBackOpacity", FILL_BACK_OPACITY),
	("FillStyleBooleanProperties", FILL_STYLE_BOOLEAN_PROPERTIES),
	("lineColor", LINE_COLOR),
	("lineBackColor", LINE_BACK_COLOR),
	("lineWidth", LINE_WIDTH),
	("LineStyleBooleanProperties", LINE_STYLE_BOOLEAN_PROPERTIES),
	("ShapeBooleanProperties", SHAPE_BOOLEAN_PROPERTIES),
	("GroupShapeBooleanProperties", GROUP_SHAPE_BOOLEAN_PROPERTIES),
];

pub fn property_name(opid: u64) -> Option<&'static str> {
	PROPERTY_NAMES.iter().find(|&&(_, id)| id == opid).map(|&(name, _)| name)
}

fn colorref() -> Shape {
	Structure::new("OfficeArtCOLORREF")
		.field("red", U8)
		.field("green", U8)
		.field("blue", U8)
		.field("flags", Shape::bits(BitStruct::lsb_first("COLORREF", U8, &[
			(1, "fPaletteIndex"),
			(1, "fPaletteRGB"),
			(1, "fSystemRGB"),
			(1, "fSchemeIndex"),
			(1, "fSysIndex"),
			(3, "unused"),
		])))
		.build()
}

/// Boolean property words: the flags in the low half, a matching "use" bit
/// for each of them in the high half.
fn booleans(name: &'static str, flags: &[&'static str]) -> Shape {
	let pad = 16 - flags.len() as u32;
	let mut fields: Vec<(u32, &'static str)> = flags.iter().map(|&flag| (1, flag)).collect();
	if pad > 0 {
		fields.push((pad, "unused1"));
	}
	fields.extend(USE_FLAGS.iter().take(flags.len()).map(|&flag| (1, flag)));
	if pad > 0 {
		fields.push((pad, "unused2"));
	}
	Shape::bits(BitStruct::lsb_first(name, U32, &fields))
}

const USE_FLAGS: &[&str] = &["fUse0", "fUse1", "fUse2", "fUse3", "fUse4", "fUse5", "fUse6", "fUse7", "fUse8", "fUse9", "fUse10", "fUse11", "fUse12", "fUse13", "fUse14", "fUse15"];

lazy_static! {
	static ref PROPERTIES: Registry = Registry::new("OfficeArtFOPTEOP")
		.define(FILL_TYPE, Shape::enumeration("MSOFILLTYPE", U32, &[
			("msofillSolid", 0),
			("msofillPattern", 1),
			("msofillTexture", 2),
			("msofillPicture", 3),
			("msofillShade", 4),
			("msofillShadeCenter", 5),
			("msofillShadeShape", 6),
			("msofillShadeScale", 7),
			("msofillShadeTitle", 8),
			("msofillBackground", 9),
		]))
		.define(FILL_COLOR, colorref())
		.define(FILL_BACK_COLOR, colorref())
		.define(LINE_COLOR, colorref())
		.define(LINE_BACK_COLOR, colorref())
		.define(FILL_OPACITY, U32.into())
		.define(FILL_BACK_OPACITY, U32.into())
		.define(LINE_WIDTH, U32.into())
		.define(PIB, U32.into())
		.define(FILL_STYLE_BOOLEAN_PROPERTIES, booleans("FillStyleBooleanProperties", &[
			"fNoFillHitTest",
			"fillUseRect",
			"fillShape",
			"fHitTestFill",
			"fFilled",
			"fUseShapeAnchor",
			"fRecolorFillAsPicture",
		]))
		.define(LINE_STYLE_BOOLEAN_PROPERTIES, booleans("LineStyleBooleanProperties", &[
			"fNoLineDrawDash",
			"fLineFillShape",
			"fHitTestLine",
			"fLine",
			"fArrowheadsOK",
			"fInsetPenOK",
			"fInsetPen",
			"reserved",
			"fLineOpaqueBackColor",
		]))
		.define(SHAPE_BOOLEAN_PROPERTIES, booleans("ShapeBooleanProperties", &[
			"fBackground",
			"reserved",
			"fInitiator",
			"fLockShapeType",
			"fPreferRelativeResize",
			"fOleIcon",
			"fFlipVOverride",
			"fFlipHOverride",
			"fPolicyBarcode",
			"fPolicyLabel",
		]))
		.define(GROUP_SHAPE_BOOLEAN_PROPERTIES, booleans("GroupShapeBooleanProperties", &[
			"fPrint",
			"fHidden",
			"fOneD",
			"fIsButton",
			"fOnDblClickNotify",
			"fBehindDocument",
			"fEditedWrap",
			"fScriptAnchor",
			"fReallyHidden",
			"fAllowOverlap",
			"fUserDrawn",
			"fHorizRule",
			"fNoshadeHR",
			"fStandardHR",
			"fIsBullet",
			"fLayoutInCell",
		]));
}

/// Operands of properties without a registered type are read as signed words.
fn plain_operand(_: &Key) -> Shape {
	I32.into()
}

fn fopte() -> Shape {
	Structure::new("OfficeArtFOPTE")
		.field("opid", Shape::bits(BitStruct::msb_first("OPID", U16, &[(1, "fComplex"), (1, "fBid"), (14, "opid")])))
		.field_with("op", |scope| Ok(PROPERTIES.resolve(&Key::new(scope.u64("opid.opid")?), plain_operand)))
		.build()
}

/// A property table. The record instance counts the entries; the complex
/// data of variable-length properties follows them.
fn fopt(name: &'static str, kind: u64) -> Shape {
	Structure::new(name)
		.field_with("fopt", |scope| Ok(Shape::count(fopte(), scope.lookup_u64("header.recVerInstance.recInstance")?)))
		.field("complex", Shape::Rest)
		.tag(kind)
		.build()
}

/// The version 15 body: records up to the end of the parent's length.
pub fn container() -> Shape {
	Shape::array(record(), Length::Block)
}

fn named_container(name: &'static str, kind: u64) -> Shape {
	Structure::new(name)
		.field_with("records", |_| Ok(container()))
		.tag(kind)
		.build()
}

fn blip(name: &'static str, kind: u64, uids: usize) -> Shape {
	let mut blip = Structure::new(name).field("rgbUid1", Shape::block(16));
	if uids > 1 {
		blip = blip.field("rgbUid2", Shape::block(16));
	}
	blip.field("tag", U8)
		.field("BLIPFileData", Shape::Rest)
		.tag(kind)
		.build()
}

fn rect(name: &'static str, kind: u64) -> Shape {
	Structure::new(name)
		.field("xLeft", I32)
		.field("yTop", I32)
		.field("xRight", I32)
		.field("yBottom", I32)
		.tag(kind)
		.build()
}

lazy_static! {
	static ref ART: Registry = Registry::new("OfficeArt record")
		.define(DGG_CONTAINER, named_container("OfficeArtDggContainer", DGG_CONTAINER))
		.define(BSTORE_CONTAINER, named_container("OfficeArtBStoreContainer", BSTORE_CONTAINER))
		.define(DG_CONTAINER, named_container("OfficeArtDgContainer", DG_CONTAINER))
		.define(SPGR_CONTAINER, named_container("OfficeArtSpgrContainer", SPGR_CONTAINER))
		.define(SP_CONTAINER, named_container("OfficeArtSpContainer", SP_CONTAINER))
		.define(SOLVER_CONTAINER, named_container("OfficeArtSolverContainer", SOLVER_CONTAINER))
		.define(FDGG, Structure::new("OfficeArtFDGGBlock")
			.field("spidMax", U32)
			.field("cidcl", U32)
			.field("cspSaved", U32)
			.field("cdgSaved", U32)
			.field("Rgidcl", Shape::array(Structure::new("OfficeArtIDCL").field("dgid", U32).field("cspidCur", U32).build(), Length::Block))
			.tag(FDGG)
			.build())
		.define(FBSE, Structure::new("OfficeArtFBSE")
			.field("btWin32", U8)
			.field("btMacOS", U8)
			.field("rgbUid", Shape::block(16))
			.field("tag", U16)
			.field("size", U32)
			.field("cRef", U32)
			.field("foDelay", U32)
			.field("unused1", U8)
			.field("cbName", U8)
			.field("unused2", U8)
			.field("unused3", U8)
			.field_with("nameData", |scope| Ok(Shape::block(scope.u64("cbName")?)))
			.field("embeddedBlip", Shape::Rest)
			.tag(FBSE)
			.build())
		.define(FDG, Structure::new("OfficeArtFDG")
			.field("csp", U32)
			.field("spidCur", U32)
			.tag(FDG)
			.build())
		.define(FSPGR, rect("OfficeArtFSPGR", FSPGR))
		.define(CHILD_ANCHOR, rect("OfficeArtChildAnchor", CHILD_ANCHOR))
		.define(FSP, Structure::new("OfficeArtFSP")
			.field("spid", U32)
			.field("f", Shape::bits(BitStruct::msb_first("FSPFlags", U32, &[
				(20, "unused1"),
				(1, "fHaveSpt"),
				(1, "fBackground"),
				(1, "fHaveAnchor"),
				(1, "fConnector"),
				(1, "fFlipV"),
				(1, "fFlipH"),
				(1, "fHaveMaster"),
				(1, "fOleShape"),
				(1, "fDeleted"),
				(1, "fPatriarch"),
				(1, "fChild"),
				(1, "fGroup"),
			])))
			.tag(FSP)
			.build())
		.define_versioned(FOPT, Some(3), None, fopt("OfficeArtFOPT", FOPT))
		.define_versioned(SECONDARY_FOPT, Some(3), None, fopt("OfficeArtSecondaryFOPT", SECONDARY_FOPT))
		.define_versioned(TERTIARY_FOPT, Some(3), None, fopt("OfficeArtTertiaryFOPT", TERTIARY_FOPT))
		.define_versioned(BLIP_JPEG, Some(0), Some(0x46A), blip("OfficeArtBlipJPEG", BLIP_JPEG, 1))
		.define_versioned(BLIP_JPEG, Some(0), Some(0x46B), blip("OfficeArtBlipJPEG", BLIP_JPEG, 2))
		.define_versioned(BLIP_JPEG, Some(0), Some(0x6E2), blip("OfficeArtBlipJPEG", BLIP_JPEG, 1))
		.define_versioned(BLIP_JPEG, Some(0), Some(0x6E3), blip("OfficeArtBlipJPEG", BLIP_JPEG, 2))
		.define_versioned(BLIP_PNG, Some(0), Some(0x6E0), blip("OfficeArtBlipPNG", BLIP_PNG, 1))
		.define_versioned(BLIP_PNG, Some(0), Some(0x6E1), blip("OfficeArtBlipPNG", BLIP_PNG, 2))
		.define_versioned(BLIP_DIB, Some(0), Some(0x7A8), blip("OfficeArtBlipDIB", BLIP_DIB, 1))
		.define_versioned(BLIP_DIB, Some(0), Some(0x7A9), blip("OfficeArtBlipDIB", BLIP_DIB, 2))
		.define(COLOR_MRU, Structure::new("OfficeArtColorMRUContainer")
			.field_with("rgmsocr", |scope| Ok(Shape::count(colorref(), scope.lookup_u64("header.recVerInstance.recInstance")?)))
			.tag(COLOR_MRU)
			.build())
		.define(SPLIT_MENU_COLORS, Structure::new("OfficeArtSplitMenuColorContainer")
			.field("smca", Shape::count(colorref(), 4))
			.tag(SPLIT_MENU_COLORS)
			.build());
}

/// Unknown containers still hold records; unknown atoms are kept opaque.
fn unknown(key: &Key) -> Shape {
	if key.version == Some(CONTAINER_VERSION) {
		container()
	}
	else {
		Shape::Rest
	}
}

/// Body of an OfficeArt record embedded in a host format's record stream.
pub fn body(key: &Key) -> Shape {
	ART.resolve(key, unknown)
}

pub fn record() -> Shape {
	RecordSpec::new("OfficeArtRecord", office_header(), Dispatch::Registry(&ART, office_key))
		.length("recLen", 0)
		.kind("recType")
		.fallback(unknown)
		.build()
}

/// Operand of property `opid` in a decoded FOPT record, if the table has it.
pub fn property(fopt: &Field, opid: u64) -> Option<&Field> {
	fopt.find("body.fopt")?
		.children()
		.iter()
		.find(|entry| entry.int_at("opid.opid") == Some(opid as i128))
		.and_then(|entry| entry.get("op"))
}

/// Depth-first walk over every record below `records`, containers included.
pub fn walk<'a>(records: &'a Field, visit: &mut dyn FnMut(&'a Field)) {
	for record in records.children() {
		visit(record);
		if let Some(children) = record.find("body.records").or_else(|| record.get("body").filter(|b| matches!(b.shape, Shape::Array(_)))) {
			walk(children, visit);
		}
	}
}

/// Every record of type `kind` below `records`.
pub fn find_all(records: &Field, kind: u64) -> Vec<&Field> {
	let mut res = Vec::new();
	walk(records, &mut |record| {
		if record.int_at("header.recType") == Some(kind as i128) {
			res.push(record);
		}
	});
	res
}

/// A drawing stream: records up to the end of the provider.
pub fn open(source: Source) -> File {
	File::from_source(source, container())
}

pub fn decode_records(source: Source) -> Result<Field> {
	open(source).load()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::{Context, Init};
	use crate::io::Buffer;

	/// FOPT, instance 3: fillColor, fillBackColor and the fill booleans.
	fn fopt_bytes() -> Vec<u8> {
		let mut data = vec![0x33, 0x00, 0x0B, 0xF0, 18, 0, 0, 0];
		data.extend_from_slice(&[0x81, 0x01, 0xFF, 0x80, 0x00, 0x00]);
		data.extend_from_slice(&[0x83, 0x01, 0x10, 0x20, 0x30, 0x08]);
		data.extend_from_slice(&[0xBF, 0x01, 0x10, 0x00, 0x10, 0x00]);
		data
	}

	#[test]
	fn fopt_operands_follow_their_opid() {
		let data = fopt_bytes();
		let records = decode_records(Buffer::source(data.clone())).unwrap();
		assert_eq!(records.len(), 1);
		let fopt = &records.children()[0];
		assert_eq!(fopt.type_name(), "OfficeArtFOPT");
		assert_eq!(fopt.find("body.fopt").map(Field::len), Some(3));

		let fill = property(fopt, FILL_COLOR).unwrap();
		assert_eq!(fill.shape.name(), "OfficeArtCOLORREF");
		assert_eq!(fill.int_at("red"), Some(0xFF));
		assert_eq!(fill.int_at("green"), Some(0x80));
		let back = property(fopt, FILL_BACK_COLOR).unwrap();
		assert_eq!(back.int_at("flags.fSchemeIndex"), Some(1));
		let style = property(fopt, FILL_STYLE_BOOLEAN_PROPERTIES).unwrap();
		assert_eq!(style.bit("fFilled"), Some(1));
		assert_eq!(style.bit("fUse4"), Some(1));
		assert_eq!(style.bit("fNoFillHitTest"), Some(0));

		assert!(fopt.is_complete());
		assert_eq!(records.encode().unwrap(), data);
	}

	#[test]
	fn containers_nest_records() {
		let mut data = vec![0x0F, 0x00, 0x04, 0xF0, 40, 0, 0, 0];
		data.extend_from_slice(&[0x12, 0x00, 0x0A, 0xF0, 8, 0, 0, 0, 0x00, 0x04, 0, 0, 0x00, 0x0A, 0, 0]);
		data.extend_from_slice(&[0x03, 0x00, 0x0B, 0xF0, 0, 0, 0, 0]);
		data.extend_from_slice(&[0x00, 0x00, 0x10, 0xF0, 8, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]);
		let records = decode_records(Buffer::source(data.clone())).unwrap();
		let sp = &records.children()[0];
		assert_eq!(sp.type_name(), "OfficeArtSpContainer");
		let children = sp.find("body.records").unwrap();
		assert_eq!(children.len(), 3);
		assert_eq!(children.children()[0].int_at("body.f.fHaveSpt"), Some(1));
		assert_eq!(children.children()[0].int_at("body.f.fGroup"), Some(0));
		assert_eq!(children.children()[2].type_name(), "OfficeArtRecord(0xf010)");
		assert_eq!(find_all(&records, FSP).len(), 1);
		assert!(records.is_complete());
		assert_eq!(records.encode().unwrap(), data);
	}

	#[test]
	fn unknown_containers_still_nest() {
		let data = vec![0x0F, 0x00, 0x99, 0xF1, 8, 0, 0, 0, 0x00, 0x00, 0x0B, 0xF0, 0, 0, 0, 0];
		let records = decode_records(Buffer::source(data)).unwrap();
		let outer = &records.children()[0];
		assert_eq!(outer.find("body").map(Field::len), Some(1));
		let mut seen = Vec::new();
		walk(&records, &mut |record| seen.push(record.int_at("header.recType")));
		assert_eq!(seen, vec![Some(0xF199), Some(0xF00B)]);
	}

	#[test]
	fn built_records_back_fill_their_header() {
		let cx = Context::new(Buffer::source(Vec::new()));
		let record = cx.alloc(&record(), Init::fields(vec![
			("header", Init::fields(vec![("recType", FDG.into())])),
			("body", Init::fields(vec![("csp", 2u32.into()), ("spidCur", 0x401u32.into())])),
		])).unwrap();
		assert_eq!(record.encode().unwrap(), vec![0x00, 0x00, 0x08, 0xF0, 8, 0, 0, 0, 2, 0, 0, 0, 1, 4, 0, 0]);
		assert_eq!(property_name(FILL_BACK_COLOR), Some("fillBackColor"));
	}
}
