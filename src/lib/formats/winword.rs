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

//! Word binary documents. The "WordDocument" stream opens with the File
//! Information Block (FIB), whose FcLcb pairs locate structures in the table
//! stream that `fWhichTblStm` selects ("0Table" or "1Table").

use std::rc::Rc;
use std::sync::Arc;
use lazy_static::lazy_static;
use crate::cfbf::Container;
use crate::engine::{latest, BitStruct, Field, Integer, Key, PointerSpec, Registry, Scope, Shape, Structure, Target};
use crate::engine::{I16, I32, U16, U24, U32, U8};
use crate::error::{Error, Result};
use super::{filetime, File};

pub const DOCUMENT_STREAM: &str = "WordDocument";

/// `wIdent` of every Word binary FIB.
pub const IDENT: u64 = 0xA5EC;

/// Operand encodings selected by the top three bits of a sprm.
pub const SPRA_TOGGLE: u64 = 0;
pub const SPRA_BYTE: u64 = 1;
pub const SPRA_WORD: u64 = 2;
pub const SPRA_DWORD: u64 = 3;
pub const SPRA_WORD2: u64 = 4;
pub const SPRA_WORD3: u64 = 5;
pub const SPRA_VARIABLE: u64 = 6;
pub const SPRA_TRIPLE: u64 = 7;

pub const SPRM_C_F_BOLD: u64 = 0x0835;
pub const SPRM_P_JC80: u64 = 0x2403;
pub const SPRM_P_DXA_LEFT: u64 = 0x840F;
pub const SPRM_P_ISTD_PERMUTE: u64 = 0xC601;
pub const SPRM_P_SHD: u64 = 0xC64D;
pub const SPRM_P_BRC_TOP: u64 = 0xC64E;
pub const SPRM_P_BRC_LEFT: u64 = 0xC64F;
pub const SPRM_P_BRC_BOTTOM: u64 = 0xC650;
pub const SPRM_P_BRC_RIGHT: u64 = 0xC651;
pub const SPRM_C_ISTD_PERMUTE: u64 = 0xCA31;
pub const SPRM_C_SHD: u64 = 0xCA71;
pub const SPRM_C_BRC: u64 = 0xCA72;
pub const SPRM_T_DEF_TABLE: u64 = 0xD608;

const RG_FC_LCB_97: &[&str] = &[
	"StshfOrig", "Stshf", "PlcffndRef", "PlcffndTxt", "PlcfandRef", "PlcfandTxt", "PlcfSed", "PlcPad",
	"PlcfPhe", "SttbfGlsy", "PlcfGlsy", "PlcfHdd", "PlcfBteChpx", "PlcfBtePapx", "PlcfSea", "SttbfFfn",
	"PlcfFldMom", "PlcfFldHdr", "PlcfFldFtn", "PlcfFldAtn", "PlcfFldMcr", "SttbfBkmk", "PlcfBkf", "PlcfBkl",
	"Cmds", "Unused1", "SttbfMcr", "PrDrvr", "PrEnvPort", "PrEnvLand", "Wss", "Dop",
	"SttbfAssoc", "Clx", "PlcfPgdFtn", "AutosaveSource", "GrpXstAtnOwners", "SttbfAtnBkmk", "Unused2", "Unused3",
	"PlcSpaMom", "PlcSpaHdr", "PlcfAtnBkf", "PlcfAtnBkl", "Pms", "FormFldSttbs", "PlcfendRef", "PlcfendTxt",
	"PlcfFldEdn", "Unused4", "DggInfo", "SttbfRMark", "SttbfCaption", "SttbfAutoCaption", "PlcfWkb", "PlcfSpl",
	"PlcftxbxTxt", "PlcfFldTxbx", "PlcfHdrtxbxTxt", "PlcfFldHdrTxbx", "StwUser", "SttbTtmbd", "CookieData", "PgdMotherOldOld",
	"BkdMotherOldOld", "PgdFtnOldOld", "BkdFtnOldOld", "PgdEdnOldOld", "BkdEdnOldOld", "SttbfIntlFld", "RouteSlip", "SttbSavedBy",
	"SttbFnm", "PlfLst", "PlfLfo", "PlcfTxbxBkd", "PlcfTxbxHdrBkd", "DocUndoWord9", "RgbUse", "Usp",
	"Uskf", "PlcupcRgbUse", "PlcupcUsp", "SttbGlsyStyle", "Plgosl", "Plcocx", "PlcfBteLvc", "DateTime",
	"PlcfLvcPre10", "PlcfAsumy", "PlcfGram", "SttbListNames", "SttbfUssr",
];

const RG_FC_LCB_2000: &[&str] = &[
	"PlcfTch", "RmdThreading", "Mid", "SttbRgtplc", "MsoEnvelope", "PlcfLad", "RgDofr", "Plcosl",
	"PlcfCookieOld", "PgdMotherOld", "BkdMotherOld", "PgdFtnOld", "BkdFtnOld", "PgdEdnOld", "BkdEdnOld",
];

const RG_FC_LCB_2002: &[&str] = &[
	"Unused1", "PlcfPgp", "Plcfuim", "PlfguidUim", "AtrdExtra", "Plrsid", "SttbfBkmkFactoid", "PlcBkfFactoid",
	"Plcfcookie", "PlcfBklFactoid", "FactoidData", "DocUndo", "SttbfBkmkFcc", "PlcfBkfFcc", "PlcfBklFcc", "SttbfbkmkBPRepairs",
	"PlcfbkfBPRepairs", "PlcfbklBPRepairs", "PmsNew", "ODSO", "PlcfpmiOldXP", "PlcfpmiNewXP", "PlcfpmiMixedXP", "Unused2",
	"Plcffactoid", "PlcflvcOldXP", "PlcflvcNewXP", "PlcflvcMixedXP",
];

const RG_FC_LCB_2003: &[&str] = &[
	"Hplxsdr", "SttbfBkmkSdt", "PlcfBkfSdt", "PlcfBklSdt", "CustomXForm", "SttbfBkmkProt", "PlcfBkfProt", "PlcfBklProt",
	"SttbProtUser", "Unused", "PlcfpmiOld", "PlcfpmiOldInline", "PlcfpmiNew", "PlcfpmiNewInline", "PlcflvcOld", "PlcflvcOldInline",
	"PlcflvcNew", "PlcflvcNewInline", "PgdMother", "BkdMother", "AfdMother", "PgdFtn", "BkdFtn", "AfdFtn",
	"PgdEdn", "BkdEdn", "AfdEdn", "Afd",
];

const RG_FC_LCB_2007: &[&str] = &[
	"Plcfmthd", "SttbfBkmkMoveFrom", "PlcfBkfMoveFrom", "PlcfBklMoveFrom", "SttbfBkmkMoveTo", "PlcfBkfMoveTo", "PlcfBklMoveTo", "Unused1",
	"Unused2", "Unused3", "SttbfBkmkArto", "PlcfBkfArto", "PlcfBklArto", "ArtoData", "Unused4", "Unused5",
	"Unused6", "OssTheme", "ColorSchemeMapping",
];

fn lid() -> Shape {
	Shape::enumeration("LID", U16, &[
		("de-DE", 1031),
		("en-US", 1033),
		("es-ES", 1034),
		("fr-FR", 1036),
		("it-IT", 1040),
		("ja-JP", 1041),
		("nl-NL", 1043),
		("pt-BR", 1046),
		("ru-RU", 1049),
		("zh-CN", 2052),
		("en-GB", 2057),
	])
}

fn colorref() -> Shape {
	Structure::new("COLORREF")
		.field("red", U8)
		.field("green", U8)
		.field("blue", U8)
		.field("fAuto", U8)
		.build()
}

fn fib_base() -> Shape {
	Structure::new("FibBase")
		.field("wIdent", U16)
		.magic("wIdent", IDENT)
		.field("nFib", U16)
		.field("unused", U16)
		.field("lid", lid())
		.field("pnNext", U16)
		.field("b", Shape::bits(BitStruct::lsb_first("FibFlags", U16, &[
			(1, "fDot"),
			(1, "fGlsy"),
			(1, "fComplex"),
			(1, "fHasPic"),
			(4, "cQuickSaves"),
			(1, "fEncrypted"),
			(1, "fWhichTblStm"),
			(1, "fReadOnlyRecommended"),
			(1, "fWriteReservation"),
			(1, "fExtChar"),
			(1, "fLoadOverride"),
			(1, "fFarEast"),
			(1, "fObfuscated"),
		])))
		.field("nFibBack", U16)
		.field("lKey", U32)
		.field("envr", U8)
		.field("b2", Shape::bits(BitStruct::lsb_first("FibFlags2", U8, &[
			(1, "fMac"),
			(1, "fEmptySpecial"),
			(1, "fLoadOverridePage"),
			(1, "reserved1"),
			(1, "reserved2"),
			(3, "fSpare0"),
		])))
		.field("chs", U16)
		.field("chsTables", U16)
		.field("fcMin", U32)
		.field("fcMac", U32)
		.build()
}

fn words(name: &'static str, members: &[&'static str], integer: Integer) -> Structure {
	members.iter().fold(Structure::new(name), |structure, &member| structure.field(member, integer))
}

fn fib_rg_w97() -> Shape {
	words("FibRgW97", &[
		"wMagicCreated", "wMagicRevised", "wMagicCreatedPrivate", "wMagicRevisedPrivate",
		"pnFbpChpFirst_W6", "pnChpFirst_W6", "cpnBteChp_W6", "pnFbpPapFirst_W6", "pnPapFirst_W6", "cpnBtePap_W6",
		"pnFbpLvcFirst_W6", "pnLvcFirst_W6", "cpnBteLvc_W6",
	], U16)
		.field("lidFE", lid())
		.build()
}

fn fib_rg_lw95() -> Shape {
	words("FibRgLw95", &[
		"cbMac", "lProductCreated", "lProductRevised", "ccpText", "ccpFtn", "ccpHdr", "ccpMcr", "ccpAtn", "ccpEdn", "ccpTxbx", "ccpHdrTxbx",
	], U32).build()
}

fn fib_rg_lw97() -> Shape {
	Structure::new("FibRgLw97")
		.field("rgLw95", fib_rg_lw95())
		.field("pnFbpChpFirst", U32)
		.field("pnChpFirst", U32)
		.field("cpnBteChp", U32)
		.field("pnFbpPapFirst", U32)
		.field("pnPapFirst", U32)
		.field("cpnBtePap", U32)
		.field("pnFbLvcFirst", U32)
		.field("pnLvcFirst", U32)
		.field("cpnBteLvc", I32)
		.build()
}

fn fib_rg_lw97x() -> Shape {
	Structure::new("FibRgLw97x")
		.field("rgLw97", fib_rg_lw97())
		.field("fcIslandFirst", I32)
		.field("fcIslandLim", I32)
		.build()
}

/// Table stream selected by the FIB of the enclosing document.
fn table_stream(scope: &Scope<'_>) -> Result<String> {
	Ok(format!("{}Table", scope.lookup_u64("base.b.fWhichTblStm")?))
}

/// An offset and a byte count into the table stream.
fn fc_lcb(target: Target) -> Shape {
	PointerSpec::new("FcLcb", U32, target)
		.length(U32)
		.select(table_stream)
		.build()
}

fn sized<F>(build: F) -> Target
	where F: Fn(u64) -> Shape + Send + Sync + 'static {
	Target::SizedWith(Arc::new(build))
}

/// Typed targets. The rest stay opaque blocks of `lcb` bytes.
fn fc_lcb_target(name: &str) -> Target {
	match name {
		"Clx" => sized(clx),
		"PlcfBteChpx" | "PlcfBtePapx" => sized(plcf_bte),
		"PlcfHdd" => sized(|lcb| Shape::count(U32.into(), lcb / 4)),
		_ => Target::Sized,
	}
}

fn fc_lcb_group(name: &'static str, previous: Option<(&'static str, Shape)>, members: &[&'static str]) -> Shape {
	let mut structure = Structure::new(name);
	if let Some((member, shape)) = previous {
		structure = structure.field(member, shape);
	}
	for &member in members {
		structure = match member {
			"DateTime" => structure.field(member, filetime()),
			_ => structure.field(member, fc_lcb(fc_lcb_target(member))),
		};
	}
	structure.build()
}

fn fib_rg_fc_lcb97() -> Shape {
	fc_lcb_group("FibRgFcLcb97", None, RG_FC_LCB_97)
}

fn fib_rg_fc_lcb2000() -> Shape {
	fc_lcb_group("FibRgFcLcb2000", Some(("rgFcLcb97", fib_rg_fc_lcb97())), RG_FC_LCB_2000)
}

fn fib_rg_fc_lcb2002() -> Shape {
	fc_lcb_group("FibRgFcLcb2002", Some(("rgFcLcb2000", fib_rg_fc_lcb2000())), RG_FC_LCB_2002)
}

fn fib_rg_fc_lcb2003() -> Shape {
	fc_lcb_group("FibRgFcLcb2003", Some(("rgFcLcb2002", fib_rg_fc_lcb2002())), RG_FC_LCB_2003)
}

fn fib_rg_fc_lcb2007() -> Shape {
	fc_lcb_group("FibRgFcLcb2007", Some(("rgFcLcb2003", fib_rg_fc_lcb2003())), RG_FC_LCB_2007)
}

fn fib_rg_csw_new2000() -> Shape {
	Structure::new("FibRgCswNewData2000")
		.field("cQuickSavesNew", U16)
		.build()
}

fn fib_rg_csw_new2007() -> Shape {
	Structure::new("FibRgCswNewData2007")
		.field("rgCswNewData2000", fib_rg_csw_new2000())
		.field("lidThemeOther", U16)
		.field("lidThemeFE", U16)
		.field("lidThemeCS", U16)
		.build()
}

lazy_static! {
	static ref RG_W: Vec<Shape> = vec![fib_rg_w97()];
	static ref RG_LW: Vec<Shape> = vec![fib_rg_lw95(), fib_rg_lw97(), fib_rg_lw97x()];
	static ref RG_FC_LCB: Vec<Shape> = vec![fib_rg_fc_lcb97(), fib_rg_fc_lcb2000(), fib_rg_fc_lcb2002(), fib_rg_fc_lcb2003(), fib_rg_fc_lcb2007()];
	static ref RG_CSW_NEW: Vec<Shape> = vec![fib_rg_csw_new2000(), fib_rg_csw_new2007()];
}

/// A blob of `available` bytes read as the newest variant that fits, followed
/// by whatever a newer writer appended past it. A blob too short for even
/// the oldest variant stays opaque.
fn blob(name: &'static str, variants: &'static [Shape], available: fn(&Scope<'_>) -> Result<u64>) -> Shape {
	Structure::new(name)
		.field_with("latest", move |scope| {
			let available = available(scope)?;
			let chosen = latest(variants, available);
			Ok(match chosen.natural_size() {
				Some(size) if size <= available => chosen,
				_ => Shape::block(available),
			})
		})
		.field_with("unused", move |scope| {
			let used = scope.get("latest").map_or(0, |latest| latest.size);
			Ok(Shape::block(available(scope)?.saturating_sub(used)))
		})
		.build()
}

pub fn fib() -> Shape {
	Structure::new("Fib")
		.field("base", fib_base())
		.field("csw", U16)
		.field_with("fibRgW", |_| Ok(blob("FibRgW", &RG_W, |scope| Ok(scope.lookup_u64("csw")? * 2))))
		.field("cslw", U16)
		.field_with("fibRgLw", |_| Ok(blob("FibRgLw", &RG_LW, |scope| Ok(scope.lookup_u64("cslw")? * 4))))
		.field("cbRgFcLcb", U16)
		.field_with("fibRgFcLcbBlob", |_| Ok(blob("FibRgFcLcb", &RG_FC_LCB, |scope| Ok(scope.lookup_u64("cbRgFcLcb")? * 8))))
		.field("cswNew", U16)
		.field_with("nFibNew", |scope| Ok(if scope.u64("cswNew")? > 0 { U16.into() } else { Shape::empty() }))
		.field_with("fibRgCswNew", |_| Ok(blob("FibRgCswNew", &RG_CSW_NEW, |scope| Ok(scope.lookup_u64("cswNew")?.saturating_sub(1) * 2))))
		.build()
}

/// The document stream: the FIB, then the rest of the `cbMac` bytes it
/// declares.
pub fn word_document() -> Shape {
	Structure::new("WordDocument")
		.field("fib", fib())
		.field_with("content", |scope| {
			let fib = scope.get("fib").ok_or_else(|| Error::Schema("WordDocument has no FIB".to_owned()))?;
			let cb_mac = rg_lw(fib, "cbMac").and_then(Field::int).unwrap_or(0).max(0) as u64;
			Ok(Shape::block(cb_mac.saturating_sub(fib.size)))
		})
		.build()
}

/// Searches a member through the newest variant of a versioned blob and the
/// older variants nested in it.
fn in_blob<'a>(blob: &'a Field, name: &str) -> Option<&'a Field> {
	let mut group = blob.get("latest")?;
	loop {
		if let Some(field) = group.get(name) {
			return Some(field);
		}
		group = group.children().first().filter(|f| f.name().starts_with("rg"))?;
	}
}

/// A FcLcb pair of a decoded FIB, by name (`Stshf`, `Clx`, ...).
pub fn fc_lcb_entry<'a>(fib: &'a Field, name: &str) -> Option<&'a Field> {
	in_blob(fib.get("fibRgFcLcbBlob")?, name)
}

/// A 32-bit count of a decoded FIB (`cbMac`, `ccpText`, ...).
pub fn rg_lw<'a>(fib: &'a Field, name: &str) -> Option<&'a Field> {
	in_blob(fib.get("fibRgLw")?, name)
}

/// File format version: `nFibNew` when the FIB carries one.
pub fn n_fib(fib: &Field) -> Option<i128> {
	match fib.int_at("cswNew") {
		Some(csw) if csw > 0 => fib.int_at("nFibNew"),
		_ => fib.int_at("base.nFib"),
	}
}

fn sprm() -> Shape {
	Shape::bits(BitStruct::msb_first("Sprm", U16, &[(3, "spra"), (3, "sgc"), (1, "fSpec"), (9, "ispmd")]))
}

fn shd() -> Shape {
	Structure::new("Shd")
		.field("cvFore", colorref())
		.field("cvBack", colorref())
		.field("ipat", U16)
		.build()
}

fn brc() -> Shape {
	Structure::new("Brc")
		.field("cv", colorref())
		.field("dptLineWidth", U8)
		.field("brcType", U8)
		.field("flags", Shape::bits(BitStruct::lsb_first("BrcFlags", U16, &[(5, "dptSpace"), (1, "fShadow"), (1, "fFrame"), (9, "reserved")])))
		.build()
}

/// Variable operand: a byte count, the operand, then whatever the count
/// covers past it.
fn variable(operand: Shape) -> Shape {
	Structure::new("Variable")
		.field("cb", U8)
		.field("operand", operand)
		.field_with("extra", |scope| {
			let used = scope.get("operand").map_or(0, |operand| operand.size);
			Ok(Shape::block(scope.u64("cb")?.saturating_sub(used)))
		})
		.build()
}

fn opaque_variable() -> Shape {
	Structure::new("Variable")
		.field("cb", U8)
		.field_with("operand", |scope| Ok(Shape::block(scope.u64("cb")?)))
		.build()
}

fn istd_permute() -> Shape {
	Structure::new("SPPOperand")
		.field("fLong", U8)
		.field("Spare", U8)
		.field("istdFirst", U16)
		.field("istdLast", U16)
		.field("cistd", U16)
		.field_with("rgistd", |scope| Ok(Shape::count(U16.into(), scope.u64("cistd")?)))
		.build()
}

lazy_static! {
	static ref OPERANDS: Registry = Registry::new("SprmOperandType")
		.define(SPRA_TOGGLE, Shape::enumeration("Toggle", U8, &[("OFF", 0), ("ON", 1), ("MATCH", 128)]))
		.define(SPRA_BYTE, U8.into())
		.define(SPRA_WORD, U16.into())
		.define(SPRA_DWORD, U32.into())
		.define(SPRA_WORD2, U16.into())
		.define(SPRA_WORD3, U16.into())
		.define(SPRA_VARIABLE, opaque_variable())
		.define(SPRA_TRIPLE, U24.into())
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_C_SHD), variable(shd()))
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_P_SHD), variable(shd()))
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_C_BRC), variable(brc()))
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_P_BRC_TOP), variable(brc()))
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_P_BRC_LEFT), variable(brc()))
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_P_BRC_BOTTOM), variable(brc()))
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_P_BRC_RIGHT), variable(brc()))
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_C_ISTD_PERMUTE), variable(istd_permute()))
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_P_ISTD_PERMUTE), variable(istd_permute()))
		// The table definition is the one operand counted in two bytes
		.define_versioned(SPRA_VARIABLE, None, Some(SPRM_T_DEF_TABLE), Structure::new("TDefTableOperand")
			.field("cb", U16)
			.field_with("operand", |scope| Ok(Shape::block(scope.u64("cb")?.saturating_sub(1))))
			.build());
}

fn unknown_operand(_: &Key) -> Shape {
	Shape::empty()
}

/// A property modifier: a sprm and the operand its `spra` selects.
pub fn prl() -> Shape {
	Structure::new("Prl")
		.field("sprm", sprm())
		.field_with("operand", |scope| {
			let key = Key { kind: scope.u64("sprm.spra")?, version: None, instance: Some(scope.u64("sprm")?) };
			Ok(OPERANDS.resolve(&key, unknown_operand))
		})
		.build()
}

/// Modifiers filling `bytes` bytes.
pub fn grpprl(bytes: u64) -> Shape {
	Shape::block_array(prl(), bytes)
}

fn prc_data() -> Shape {
	Structure::new("PrcData")
		.field("cbGrpprl", I16)
		.field_with("GrpPrl", |scope| Ok(grpprl(scope.int("cbGrpprl")?.max(0) as u64)))
		.build()
}

fn pcd() -> Shape {
	Structure::new("Pcd")
		.field("b", Shape::bits(BitStruct::lsb_first("PcdFlags", U16, &[(1, "fNoParaLast"), (1, "fR1"), (1, "fDirty"), (13, "fR2")])))
		.field("fc", Shape::bits(BitStruct::lsb_first("FcCompressed", U32, &[(30, "fc"), (1, "fCompressed"), (1, "r1")])))
		.field("prm", Shape::bits(BitStruct::lsb_first("Prm", U16, &[(1, "fComplex"), (15, "data")])))
		.build()
}

const CP_SIZE: u64 = 4;
const PCD_SIZE: u64 = 8;

/// Piece table of `lcb` bytes: n+1 character positions, then n pieces.
fn plc_pcd(lcb: u64) -> Shape {
	let pieces = lcb.saturating_sub(CP_SIZE) / (CP_SIZE + PCD_SIZE);
	Structure::new("PlcPcd")
		.field("aCP", Shape::count(U32.into(), pieces + 1))
		.field("aPcd", Shape::count(pcd(), pieces))
		.build()
}

fn pcdt() -> Shape {
	Structure::new("Pcdt")
		.field("lcb", U32)
		.field_with("PlcPcd", |scope| Ok(plc_pcd(scope.u64("lcb")?)))
		.build()
}

fn clx_entry() -> Shape {
	Structure::new("ClxEntry")
		.field("clxt", Shape::enumeration("Clxt", U8, &[("RgPrc", 1), ("Pcdt", 2)]))
		.field_with("body", |scope| Ok(match scope.u64("clxt")? {
			1 => prc_data(),
			2 => pcdt(),
			_ => Shape::empty(),
		}))
		.build()
}

/// Formatting runs (clxt 1) closed by the piece table (clxt 2).
pub fn clx(lcb: u64) -> Shape {
	Shape::terminated(clx_entry(), |entry| entry.int_at("clxt") != Some(1)).within(lcb)
}

/// Bin tables: n+1 file offsets, then the FKP page of each run.
fn plcf_bte(lcb: u64) -> Shape {
	let runs = lcb.saturating_sub(4) / 8;
	Structure::new("PlcBte")
		.field("aFC", Shape::count(U32.into(), runs + 1))
		.field("aPnBte", Shape::count(Shape::bits(BitStruct::lsb_first("PnFkp", U32, &[(22, "pn"), (10, "unused")])), runs))
		.build()
}

/// The pieces of a decoded piece table as (first cp, last cp, file offset,
/// compressed) tuples.
pub fn pieces(clx: &Field) -> Vec<(u64, u64, u64, bool)> {
	let table = match clx.children().iter().find(|entry| entry.int_at("clxt") == Some(2)) {
		Some(entry) => entry,
		None => return Vec::new(),
	};
	let cps: Vec<u64> = table.find("body.PlcPcd.aCP").map_or_else(Vec::new, |cps| cps.children().iter().filter_map(Field::int).map(|cp| cp as u64).collect());
	let pcds = table.find("body.PlcPcd.aPcd").map_or(&[][..], Field::children);
	pcds.iter()
		.zip(cps.windows(2))
		.filter_map(|(pcd, range)| Some((range[0], range[1], pcd.int_at("fc.fc")? as u64, pcd.int_at("fc.fCompressed")? == 1)))
		.collect()
}

pub fn open(container: Rc<Container>) -> Result<File> {
	File::from_container(container, DOCUMENT_STREAM, word_document())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use crate::engine::{Address, Context};
	use crate::io::{Buffer, Source};

	/// A Word 97 FIB: 14 words, 22 longs and 93 FcLcb pairs.
	fn fib_bytes(which: u16, stshf: (u32, u32)) -> Vec<u8> {
		let mut data = Vec::new();
		data.extend_from_slice(&[0xEC, 0xA5, 0xC1, 0x00, 0, 0, 0x09, 0x04, 0, 0]);
		data.extend_from_slice(&(which << 9).to_le_bytes());
		data.extend_from_slice(&[0xBF, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
		data.extend_from_slice(&14u16.to_le_bytes());
		data.extend(vec![0u8; 28]);
		data.extend_from_slice(&22u16.to_le_bytes());
		let mut lw = vec![0u8; 88];
		lw[..4].copy_from_slice(&900u32.to_le_bytes());
		lw[12..16].copy_from_slice(&0x40u32.to_le_bytes());
		data.extend(lw);
		data.extend_from_slice(&0x5Du16.to_le_bytes());
		let mut rg = vec![0u8; 744];
		rg[8..12].copy_from_slice(&stshf.0.to_le_bytes());
		rg[12..16].copy_from_slice(&stshf.1.to_le_bytes());
		data.extend(rg);
		data.extend_from_slice(&[0, 0]);
		data
	}

	fn table() -> Vec<u8> {
		(0..0x240u32).map(|i| i as u8).collect()
	}

	fn context(document: Vec<u8>) -> Context {
		let mut streams: HashMap<String, Source> = HashMap::new();
		streams.insert("1Table".to_owned(), Buffer::source(table()));
		Context::new(Buffer::source(document)).with_streams(Rc::new(streams))
	}

	#[test]
	fn stshf_reads_from_the_selected_table() {
		let cx = context(fib_bytes(1, (0x200, 0x40)));
		let document = cx.decode(&word_document(), 0).unwrap();
		let fib = document.get("fib").unwrap();
		assert_eq!(fib.size, 900);
		assert_eq!(document.get("content").map(|c| c.size), Some(0));
		let stshf = fc_lcb_entry(fib, "Stshf").unwrap();
		assert_eq!(stshf.pointer().unwrap().address, Some(Address::Foreign("1Table".to_owned(), 0x200)));
		let target = stshf.dereference(&cx).unwrap();
		assert_eq!(target.bytes(), Some(&table()[0x200..0x240]));
		assert_eq!(n_fib(fib), Some(0xC1));
		assert_eq!(rg_lw(fib, "ccpText").and_then(Field::int), Some(0x40));
		assert_eq!(fib.find("fibRgLw.latest").map(|f| f.shape.name()), Some("FibRgLw97x".to_owned()));
	}

	#[test]
	fn missing_table_streams_fail_the_dereference() {
		let cx = context(fib_bytes(0, (0x200, 0x40)));
		let document = cx.decode(&word_document(), 0).unwrap();
		let stshf = fc_lcb_entry(document.get("fib").unwrap(), "Stshf").unwrap();
		assert_eq!(stshf.pointer().unwrap().address, Some(Address::Foreign("0Table".to_owned(), 0x200)));
		assert!(matches!(stshf.dereference(&cx), Err(Error::StreamNotFound(_))));
	}

	#[test]
	fn short_blobs_keep_the_oldest_variant() {
		let mut data = fib_bytes(1, (0, 0));
		// cslw = 11 covers FibRgLw95 only
		let at = 32 + 2 + 28;
		data[at..at + 2].copy_from_slice(&11u16.to_le_bytes());
		data.drain(at + 2 + 44..at + 2 + 88);
		let cx = context(data);
		let fib = cx.decode(&fib(), 0).unwrap();
		assert_eq!(fib.find("fibRgLw.latest").map(|f| f.shape.name()), Some("FibRgLw95".to_owned()));
		assert_eq!(rg_lw(&fib, "cbMac").and_then(Field::int), Some(900));
		assert_eq!(fib.find("fibRgLw.unused").map(|f| f.size), Some(0));
	}

	#[test]
	fn bad_ident_fails() {
		let mut data = fib_bytes(1, (0, 0));
		data[0] = 0;
		let cx = context(data);
		assert!(cx.decode(&fib(), 0).is_err());
	}

	#[test]
	fn prl_operands_follow_spra() {
		let mut data = vec![0x35, 0x08, 0x01];
		data.extend_from_slice(&[0x03, 0x24, 0x01]);
		data.extend_from_slice(&[0x0F, 0x84, 0xD0, 0x02]);
		data.extend_from_slice(&[0x71, 0xCA, 10, 1, 2, 3, 0, 4, 5, 6, 0, 0x0E, 0x00]);
		let cx = Context::new(Buffer::source(data.clone()));
		let prls = cx.decode(&grpprl(data.len() as u64), 0).unwrap();
		assert_eq!(prls.len(), 4);
		let prls = prls.children();
		assert_eq!(prls[0].int_at("sprm.sgc"), Some(2));
		assert_eq!(prls[0].get("operand").unwrap().summary(), "ON(0x1)");
		assert_eq!(prls[1].int_at("operand"), Some(1));
		assert_eq!(prls[2].int_at("operand"), Some(0x2D0));
		assert_eq!(prls[3].int_at("sprm.spra"), Some(SPRA_VARIABLE as i128));
		assert_eq!(prls[3].find("operand.operand.cvBack.blue").and_then(Field::int), Some(6));
		assert_eq!(prls[3].find("operand.extra").map(|f| f.size), Some(0));
	}

	#[test]
	fn unknown_variable_operands_stay_opaque() {
		let data = vec![0x00, 0xC8, 3, 9, 9, 9];
		let cx = Context::new(Buffer::source(data));
		let prl = cx.decode(&prl(), 0).unwrap();
		assert_eq!(prl.size, 6);
		assert_eq!(prl.find("operand.operand").and_then(Field::bytes), Some(&[9, 9, 9][..]));
	}

	#[test]
	fn clx_lists_the_pieces() {
		let mut data = vec![1, 3, 0, 0x35, 0x08, 0x01];
		data.push(2);
		data.extend_from_slice(&28u32.to_le_bytes());
		for cp in &[0u32, 5, 9] {
			data.extend_from_slice(&cp.to_le_bytes());
		}
		data.extend_from_slice(&[0, 0, 0x00, 0x08, 0, 0x40, 0, 0]);
		data.extend_from_slice(&[0, 0, 0x00, 0x10, 0, 0x00, 0, 0]);
		let cx = Context::new(Buffer::source(data.clone()));
		let clx = cx.decode(&clx(data.len() as u64), 0).unwrap();
		assert_eq!(clx.len(), 2);
		assert_eq!(pieces(&clx), vec![(0, 5, 0x800, true), (5, 9, 0x1000, false)]);
	}
}
