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

//! PGM (RFC 3208) packets: a fixed big-endian header, a message chosen by
//! the packet type, the option extensions and the transport data.

use lazy_static::lazy_static;
use crate::engine::{BitStruct, Dispatch, Field, Init, Key, Length, RecordSpec, Registry, Scope, Shape, Structure};
use crate::engine::{U16BE, U32BE, U8};
use crate::error::Result;
use crate::io::Source;
use super::File;

pub const SPM: u64 = 0x00;
pub const POLL: u64 = 0x01;
pub const POLR: u64 = 0x02;
pub const ODATA: u64 = 0x04;
pub const RDATA: u64 = 0x05;
pub const NAK: u64 = 0x08;
pub const NNAK: u64 = 0x09;
pub const NCF: u64 = 0x0A;
pub const SPMR: u64 = 0x0C;
pub const ACK: u64 = 0x0D;

const TYPES: &[(&str, u64)] = &[
	("SPM", SPM),
	("POLL", POLL),
	("POLR", POLR),
	("ODATA", ODATA),
	("RDATA", RDATA),
	("NAK", NAK),
	("NNAK", NNAK),
	("NCF", NCF),
	("SPMR", SPMR),
	("ACK", ACK),
];

pub const OPT_LENGTH: u64 = 0x00;
pub const OPT_FRAGMENT: u64 = 0x01;
pub const OPT_NAK_LIST: u64 = 0x02;
pub const OPT_JOIN: u64 = 0x03;
pub const OPT_NAK_BO_IVL: u64 = 0x04;
pub const OPT_NAK_BO_RNG: u64 = 0x05;
pub const OPT_REDIRECT: u64 = 0x07;
pub const OPT_PARITY_PRM: u64 = 0x08;
pub const OPT_PARITY_GRP: u64 = 0x09;
pub const OPT_CURR_TGSIZE: u64 = 0x0A;
pub const OPT_NBR_UNREACH: u64 = 0x0B;
pub const OPT_PATH_NLA: u64 = 0x0C;
pub const OPT_SYN: u64 = 0x0D;
pub const OPT_FIN: u64 = 0x0E;
pub const OPT_RST: u64 = 0x0F;
pub const OPT_CR: u64 = 0x10;
pub const OPT_CRQST: u64 = 0x11;

/// Options that network elements have to interpret.
const SIGNIFICANT: &[u64] = &[
	OPT_NAK_BO_IVL,
	OPT_NAK_BO_RNG,
	OPT_REDIRECT,
	OPT_PARITY_PRM,
	OPT_CURR_TGSIZE,
	OPT_NBR_UNREACH,
	OPT_PATH_NLA,
	OPT_CR,
	OPT_CRQST,
];

pub const AFI_IPV4: u64 = 1;
pub const AFI_IPV6: u64 = 2;

fn afi() -> Shape {
	Shape::enumeration("AFI", U16BE, &[("IPv4", AFI_IPV4), ("IPv6", AFI_IPV6)])
}

/// Network layer address sized by the family member before it.
fn nla(family: &'static str) -> impl Fn(&Scope<'_>) -> Result<Shape> + Send + Sync + 'static {
	move |scope: &Scope<'_>| Ok(Shape::block(if scope.u64(family)? == AFI_IPV6 { 16 } else { 4 }))
}

fn spm() -> Shape {
	Structure::new("PGM_SPM")
		.field("spm_sqn", U32BE)
		.field("spm_trail", U32BE)
		.field("spm_lead", U32BE)
		.field("spm_nla_afi", afi())
		.field("spm_reserved", U16BE)
		.field_with("spm_nla", nla("spm_nla_afi"))
		.default("spm_nla_afi", AFI_IPV4)
		.tag(SPM)
		.build()
}

fn poll() -> Shape {
	Structure::new("PGM_POLL")
		.field("poll_sqn", U32BE)
		.field("poll_round", U16BE)
		.field("poll_s_type", Shape::enumeration("PGM_POLL_", U16BE, &[("GENERAL", 0), ("DLR", 1)]))
		.field("poll_nla_afi", afi())
		.field("poll_reserved", U16BE)
		.field_with("poll_nla", nla("poll_nla_afi"))
		.field("poll_bo_ivl", U32BE)
		.field("poll_rand", Shape::block(4))
		.field("poll_mask", U32BE)
		.default("poll_nla_afi", AFI_IPV4)
		.tag(POLL)
		.build()
}

fn polr() -> Shape {
	Structure::new("PGM_POLR")
		.field("polr_sqn", U32BE)
		.field("polr_round", U16BE)
		.field("polr_reserved", U16BE)
		.tag(POLR)
		.build()
}

fn data(name: &'static str, kind: u64) -> Shape {
	Structure::new(name)
		.field("data_sqn", U32BE)
		.field("data_trail", U32BE)
		.tag(kind)
		.build()
}

fn nak(name: &'static str, kind: u64) -> Shape {
	Structure::new(name)
		.field("nak_sqn", U32BE)
		.field("nak_src_nla_afi", afi())
		.field("nak_src_reserved", U16BE)
		.field_with("nak_src_nla", nla("nak_src_nla_afi"))
		.field("nak_grp_nla_afi", afi())
		.field("nak_grp_reserved", U16BE)
		.field_with("nak_grp_nla", nla("nak_grp_nla_afi"))
		.default("nak_src_nla_afi", AFI_IPV4)
		.default("nak_grp_nla_afi", AFI_IPV4)
		.tag(kind)
		.build()
}

fn ack() -> Shape {
	Structure::new("PGM_ACK")
		.field("ack_rx_max", U32BE)
		.field("ack_bitmap", U32BE)
		.tag(ACK)
		.build()
}

/// The option extensibility bits, followed by the bits specific to the option.
fn flags(specific: &[(u32, &'static str)]) -> Shape {
	let mut fields = vec![(5, "RESERVED"), (1, "ENCODED"), (2, "OPX_MASK"), (1, "ENCODED_NULL")];
	fields.extend_from_slice(specific);
	Shape::bits(BitStruct::msb_first("OptionFlags", U16BE, &fields))
}

const SPECIFIC: &[(u32, &str)] = &[(7, "SPECIFIC")];

fn option_body(name: &'static str, kind: u64, specific: &[(u32, &'static str)]) -> Structure {
	Structure::new(name).field("flags", flags(specific)).tag(kind)
}

/// The option-length option comes in two layouts: the canonical one with
/// only the 16-bit total, and one that also carries the extensibility bits.
/// The declared option length tells them apart.
fn opt_length() -> Shape {
	Structure::new("PGM_OPT_LENGTH")
		.field_with("flags", |scope| {
			let length = scope.lookup_u64("header.length").unwrap_or(4);
			Ok(if length > 4 { flags(SPECIFIC) } else { Shape::empty() })
		})
		.field("opt_total_length", U16BE)
		.tag(OPT_LENGTH)
		.build()
}

lazy_static! {
	static ref MESSAGES: Registry = Registry::new("PGM message")
		.define(SPM, spm())
		.define(POLL, poll())
		.define(POLR, polr())
		.define(ODATA, data("PGM_ODATA", ODATA))
		.define(RDATA, data("PGM_RDATA", RDATA))
		.define(NAK, nak("PGM_NAK", NAK))
		.define(NNAK, nak("PGM_NNAK", NNAK))
		.define(NCF, nak("PGM_NCF", NCF))
		.define(SPMR, Structure::new("PGM_SPMR").tag(SPMR).build())
		.define(ACK, ack());

	static ref OPTIONS: Registry = Registry::new("PGM option")
		.define(OPT_LENGTH, opt_length())
		.define(OPT_FRAGMENT, option_body("PGM_OPT_FRAGMENT", OPT_FRAGMENT, SPECIFIC)
			.field("opt_sqn", U32BE)
			.field("opt_frag_off", U32BE)
			.field("opt_frag_len", U32BE)
			.build())
		.define(OPT_NAK_LIST, option_body("PGM_OPT_NAK_LIST", OPT_NAK_LIST, SPECIFIC)
			.field("opt_sqn", Shape::array(U32BE.into(), Length::Block))
			.build())
		.define(OPT_JOIN, option_body("PGM_OPT_JOIN", OPT_JOIN, SPECIFIC)
			.field("opt_join_min", U32BE)
			.build())
		.define(OPT_NAK_BO_IVL, option_body("PGM_OPT_NAK_BO_IVL", OPT_NAK_BO_IVL, SPECIFIC)
			.field("opt_nak_bo_ivl", U32BE)
			.field("opt_nak_bo_ivl_sqn", U32BE)
			.build())
		.define(OPT_NAK_BO_RNG, option_body("PGM_OPT_NAK_BO_RNG", OPT_NAK_BO_RNG, SPECIFIC)
			.field("opt_nak_max_bo_ivl", U32BE)
			.field("opt_nak_min_bo_ivl", U32BE)
			.build())
		.define(OPT_REDIRECT, option_body("PGM_OPT_REDIRECT", OPT_REDIRECT, SPECIFIC)
			.field("opt_nla_afi", afi())
			.field("opt_reserved", U16BE)
			.field_with("opt_nla", nla("opt_nla_afi"))
			.default("opt_nla_afi", AFI_IPV4)
			.build())
		.define(OPT_PARITY_PRM, option_body("PGM_OPT_PARITY_PRM", OPT_PARITY_PRM, &[(5, "Unused"), (1, "PROACTIVE"), (1, "ONDEMAND")])
			.field("parity_prm_tgs", U32BE)
			.build())
		.define(OPT_PARITY_GRP, option_body("PGM_OPT_PARITY_GRP", OPT_PARITY_GRP, SPECIFIC)
			.field("prm_group", U32BE)
			.build())
		.define(OPT_CURR_TGSIZE, option_body("PGM_OPT_CURR_TGSIZE", OPT_CURR_TGSIZE, SPECIFIC)
			.field("prm_atgsize", U32BE)
			.build())
		.define(OPT_NBR_UNREACH, option_body("PGM_OPT_NBR_UNREACH", OPT_NBR_UNREACH, SPECIFIC).build())
		.define(OPT_PATH_NLA, option_body("PGM_OPT_PATH_NLA", OPT_PATH_NLA, SPECIFIC)
			.field("opt_path_nla", Shape::block(4))
			.build())
		.define(OPT_SYN, option_body("PGM_OPT_SYN", OPT_SYN, SPECIFIC).build())
		.define(OPT_FIN, option_body("PGM_OPT_FIN", OPT_FIN, SPECIFIC).build())
		.define(OPT_RST, option_body("PGM_OPT_RST", OPT_RST, &[(1, "N"), (6, "ErrorCode")]).build())
		.define(OPT_CR, option_body("PGM_OPT_CR", OPT_CR, &[(4, "Unused"), (1, "L"), (1, "P"), (1, "R")])
			.field("opt_cr_lead", U32BE)
			.field("opt_cr_ne_wl", U16BE)
			.field("opt_cr_ne_wp", U16BE)
			.field("opt_cr_rx_wp", U16BE)
			.field("opt_reserved1", U16BE)
			.field("opt_nla_afi", afi())
			.field("opt_reserved2", U16BE)
			.field("opt_cr_rcvr", U32BE)
			.default("opt_nla_afi", AFI_IPV4)
			.build())
		.define(OPT_CRQST, option_body("PGM_OPT_CRQST", OPT_CRQST, &[(4, "Reserved"), (1, "NEL"), (1, "NEP"), (1, "RXP")]).build());
}

fn option_header() -> Shape {
	Structure::new("PGM_OPT")
		.field("type", Shape::bits(BitStruct::msb_first("OptionType", U8, &[(1, "END"), (7, "MASK")])))
		.field("length", U8)
		.build()
}

fn option_key(header: &Field) -> Result<Key> {
	Ok(Key::new(header.u64_at("type.MASK")?))
}

/// One option TLV. Its length counts the two header bytes.
pub fn option() -> Shape {
	RecordSpec::new("pgm_opt", option_header(), Dispatch::Registry(&OPTIONS, option_key))
		.length("length", 2)
		.kind("type.MASK")
		.build()
}

/// Values for building an option of the given type; the header is filled in
/// by back-fill.
pub fn option_init(kind: u64, body: Vec<(&'static str, Init)>) -> Init {
	Init::fields(vec![
		("header", Init::fields(vec![("type", Init::fields(vec![("MASK", kind.into())]))])),
		("body", Init::fields(body)),
	])
}

fn member<'a>(fields: &'a [Field], name: &str) -> Option<&'a Field> {
	fields.iter().find(|f| f.name == name)
}

/// The option-length option followed by the options it accounts for. The
/// last option carries the END bit.
fn extensions() -> Shape {
	Structure::new("pgm_opt_exts")
		.field("length", option())
		.field_with("options", |scope| {
			let total = scope.u64("length.body.opt_total_length")?;
			let used = scope.get("length").map_or(0, |f| f.size);
			let options = Shape::terminated(option(), |f| f.int_at("header.type.END") == Some(1));
			Ok(options.within(total.saturating_sub(used)))
		})
		.field_with("padding", |scope| {
			let total = scope.u64("length.body.opt_total_length")?;
			Ok(Shape::block(total.saturating_sub(scope.position - scope.start)))
		})
		.backfill("length.body.opt_total_length", |fields| Ok(Some(fields.iter().map(|f| f.size).sum::<u64>() as i128)))
		.backfill("options.last.header.type.END", |fields| {
			Ok(member(fields, "options").filter(|options| !options.is_empty()).map(|_| 1))
		})
		.build()
}

fn unknown_message(_: &Key) -> Shape {
	Shape::empty()
}

fn significant(fields: &[Field]) -> bool {
	let options = member(fields, "exts").and_then(|exts| exts.get("options"));
	options.map_or(false, |options| options.children().iter()
		.filter_map(|option| option.int_at("header.type.MASK"))
		.any(|mask| SIGNIFICANT.contains(&(mask as u64))))
}

/// 16-bit one's complement of the one's complement sum of the big-endian
/// words in `bytes`; an odd trailing byte is padded with zero.
pub fn checksum(bytes: &[u8]) -> u16 {
	let mut sum: u64 = bytes.chunks(2)
		.map(|pair| (pair[0] as u64) << 8 | pair.get(1).cloned().unwrap_or(0) as u64)
		.sum();
	while sum >> 16 != 0 {
		sum = (sum & 0xFFFF) + (sum >> 16);
	}
	!(sum as u16)
}

fn compute_checksum(fields: &[Field]) -> Result<Option<i128>> {
	let mut bytes = Vec::new();
	for field in fields {
		if field.name == "pgm_checksum" {
			bytes.extend_from_slice(&[0, 0]);
		}
		else {
			field.encode_into(&mut bytes)?;
		}
	}
	// Zero means "no checksum" on the wire
	Ok(Some(match checksum(&bytes) {
		0 => 0xFFFF,
		sum => sum as i128,
	}))
}

pub fn packet() -> Shape {
	Structure::new("pgm_packet")
		.field("pgm_sport", U16BE)
		.field("pgm_dport", U16BE)
		.field("pgm_type", Shape::enumeration("PGM_TYPE", U8, TYPES))
		.field("pgm_options", Shape::bits(BitStruct::msb_first("PGM_OPTIONS", U8, &[
			(1, "PARITY"),
			(1, "VAR_PKTLEN"),
			(4, "unused"),
			(1, "NETWORK"),
			(1, "PRESENT"),
		])))
		.field("pgm_checksum", U16BE)
		.field("pgm_gsi", Shape::block(6))
		.field("pgm_tsdu_length", U16BE)
		.field_with("msg", |scope| Ok(MESSAGES.resolve(&Key::new(scope.u64("pgm_type")?), unknown_message)))
		.field_with("exts", |scope| Ok(if scope.int("pgm_options.PRESENT")? != 0 { extensions() } else { Shape::empty() }))
		.field_with("data", |scope| Ok(Shape::block(scope.u64("pgm_tsdu_length")?)))
		.backfill("pgm_type", |fields| Ok(member(fields, "msg").and_then(|f| f.shape.tag()).map(i128::from)))
		.backfill("pgm_tsdu_length", |fields| Ok(member(fields, "data").map(|f| f.size as i128)))
		.backfill("pgm_options.PRESENT", |fields| Ok(member(fields, "exts").map(|f| (f.size > 0) as i128)))
		.backfill("pgm_options.NETWORK", |fields| Ok(Some(significant(fields) as i128)))
		.backfill("pgm_checksum", compute_checksum)
		.build()
}

/// Whether the checksum of a decoded packet holds. `None` when the sender
/// left it out.
pub fn verify(packet: &Field) -> Result<Option<bool>> {
	if packet.u64_at("pgm_checksum")? == 0 {
		return Ok(None);
	}
	Ok(Some(checksum(&packet.encode()?) == 0))
}

/// Transport session identifier: the GSI followed by the source port.
pub fn tsi(packet: &Field) -> Result<Vec<u8>> {
	let mut res = packet.field("pgm_gsi")?.bytes().unwrap_or(&[]).to_vec();
	res.extend_from_slice(&(packet.u64_at("pgm_sport")? as u16).to_be_bytes());
	Ok(res)
}

pub fn open(source: Source) -> File {
	File::from_source(source, packet())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::Context;
	use crate::io::Buffer;

	const SPM_PACKET: &str = "4aff6987000347fe85e0ed4285e0000000000000000000000000000100010000c0a8c1a60004000c8808000200000008";
	const ODATA_PACKET: &str = "46cc9bff04013f293138313235000007500fc40a500fc3ff0004001481100000500fc408000000000000000a61616161616161";
	const SYN_PACKET: &str = "22cf270f0401eb6c3add80113add00050000000000000000000400088d04000068656c6c6f";
	const RST_PACKET: &str = "22cf270f00011e593add80113add0000000000000000000000000000000100000a0208e8000400088f040000";

	fn hex(text: &str) -> Vec<u8> {
		(0..text.len()).step_by(2).map(|i| u8::from_str_radix(&text[i..i + 2], 16).unwrap()).collect()
	}

	fn cx() -> Context {
		Context::new(Buffer::source(Vec::new()))
	}

	#[test]
	fn spm_with_parity_option_builds() {
		let packet = cx().alloc(&packet(), Init::fields(vec![
			("pgm_sport", 0x4AFFu16.into()),
			("pgm_dport", 0x6987u16.into()),
			("pgm_type", "SPM".into()),
			("pgm_options", Init::fields(vec![("PRESENT", 1u8.into())])),
			("pgm_gsi", vec![0x85, 0xE0, 0xED, 0x42, 0x85, 0xE0].into()),
			("msg", Init::fields(vec![
				("spm_lead", 1u32.into()),
				("spm_nla", vec![192, 168, 193, 166].into()),
			])),
			("exts", Init::fields(vec![
				("options", Init::Items(vec![option_init(OPT_PARITY_PRM, vec![
					("flags", Init::fields(vec![("PROACTIVE", 1u8.into())])),
					("parity_prm_tgs", 8u32.into()),
				])])),
			])),
		])).unwrap();
		assert_eq!(packet.encode().unwrap(), hex(SPM_PACKET));
		assert_eq!(packet.int_at("pgm_checksum"), Some(0x47FE));
		let mut again = packet.clone();
		assert!(!again.backfill().unwrap());
	}

	#[test]
	fn odata_with_fragment_builds() {
		let packet = cx().alloc(&packet(), Init::fields(vec![
			("pgm_sport", 0x46CCu16.into()),
			("pgm_dport", 0x9BFFu16.into()),
			("pgm_type", ODATA.into()),
			("pgm_options", Init::fields(vec![("PRESENT", 1u8.into())])),
			("pgm_gsi", (&b"18125\0"[..]).into()),
			("msg", Init::fields(vec![
				("data_sqn", 0x500F_C40Au32.into()),
				("data_trail", 0x500F_C3FFu32.into()),
			])),
			("exts", Init::fields(vec![
				("options", Init::Items(vec![option_init(OPT_FRAGMENT, vec![
					("opt_sqn", 0x500F_C408u32.into()),
					("opt_frag_len", 10u32.into()),
				])])),
			])),
			("data", (&b"aaaaaaa"[..]).into()),
		])).unwrap();
		assert_eq!(packet.encode().unwrap(), hex(ODATA_PACKET));
		assert_eq!(packet.int_at("pgm_tsdu_length"), Some(7));
		assert_eq!(packet.int_at("pgm_options"), Some(0x01));
	}

	#[test]
	fn decoded_packets_round_trip() {
		for text in &[SPM_PACKET, ODATA_PACKET, SYN_PACKET, RST_PACKET] {
			let data = hex(text);
			let packet = open(Buffer::source(data.clone())).load().unwrap();
			assert!(packet.is_complete(), "{}", packet);
			assert_eq!(packet.size, data.len() as u64);
			assert_eq!(packet.encode().unwrap(), data);
			assert_eq!(verify(&packet).unwrap(), Some(true));
		}
	}

	#[test]
	fn spm_fields_decode() {
		let packet = open(Buffer::source(hex(SPM_PACKET))).load().unwrap();
		assert_eq!(packet.find("msg").map(Field::type_name).unwrap(), "PGM_SPM");
		assert_eq!(packet.find("msg.spm_nla").and_then(Field::bytes), Some(&[192, 168, 193, 166][..]));
		assert_eq!(packet.int_at("pgm_options.NETWORK"), Some(1));
		assert_eq!(packet.int_at("exts.length.body.opt_total_length"), Some(12));
		let options = packet.find("exts.options").unwrap();
		assert_eq!(options.len(), 1);
		assert_eq!(options.get("last").map(Field::type_name).unwrap(), "PGM_OPT_PARITY_PRM");
		assert_eq!(options.int_at("0.body.flags.PROACTIVE"), Some(1));
		assert_eq!(options.int_at("0.body.parity_prm_tgs"), Some(8));
		assert_eq!(tsi(&packet).unwrap(), hex("85e0ed4285e04aff"));
	}

	#[test]
	fn option_length_accepts_both_layouts() {
		let cx = Context::new(Buffer::source(hex("0006000000ff")));
		let option = cx.decode(&option(), 0).unwrap();
		assert_eq!(option.type_name(), "PGM_OPT_LENGTH");
		assert_eq!(option.int_at("body.opt_total_length"), Some(0xFF));
		assert_eq!(option.find("body.flags").map(|f| f.size), Some(2));
	}

	#[test]
	fn corrupted_packets_fail_the_checksum() {
		let mut data = hex(ODATA_PACKET);
		let last = data.len() - 1;
		data[last] ^= 0x01;
		let packet = open(Buffer::source(data)).load().unwrap();
		assert_eq!(verify(&packet).unwrap(), Some(false));
	}

	#[test]
	fn odd_lengths_are_padded() {
		assert_eq!(checksum(&[0x01]), !0x0100);
		assert_eq!(checksum(&[0xFF, 0xFF]), 0);
	}
}
