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

use std::rc::Rc;
use recframe::cfbf::{Builder, Container, ObjectType};
use recframe::engine::Field;
use recframe::formats::{excel, officeart, pgm, propertyset, winword};
use recframe::io::{Buffer, Writer};

fn hex(text: &str) -> Vec<u8> {
	(0..text.len()).step_by(2).map(|i| u8::from_str_radix(&text[i..i + 2], 16).unwrap()).collect()
}

/// A Word 97 FIB pointing at 64 bytes of 1Table for its style sheet.
fn word_document() -> Vec<u8> {
	let mut data = vec![0xEC, 0xA5, 0xC1, 0x00, 0, 0, 0x09, 0x04, 0, 0];
	data.extend_from_slice(&(1u16 << 9).to_le_bytes());
	data.extend_from_slice(&[0xBF, 0x00]);
	data.extend(vec![0u8; 18]);
	data.extend_from_slice(&14u16.to_le_bytes());
	data.extend(vec![0u8; 28]);
	data.extend_from_slice(&22u16.to_le_bytes());
	let mut lw = vec![0u8; 88];
	lw[..4].copy_from_slice(&900u32.to_le_bytes());
	data.extend(lw);
	data.extend_from_slice(&0x5Du16.to_le_bytes());
	let mut rg = vec![0u8; 744];
	rg[8..12].copy_from_slice(&0x200u32.to_le_bytes());
	rg[12..16].copy_from_slice(&0x40u32.to_le_bytes());
	data.extend(rg);
	data.extend_from_slice(&[0, 0]);
	data
}

fn biff(kind: u64, body: &[u8]) -> Vec<u8> {
	let mut data = (kind as u16).to_le_bytes().to_vec();
	data.extend_from_slice(&(body.len() as u16).to_le_bytes());
	data.extend_from_slice(body);
	data
}

fn workbook() -> Vec<u8> {
	let mut data = biff(excel::BOF, &[0x00, 0x06, 0x05, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0x06, 0x03, 0, 0]);
	let mut sst = Vec::new();
	sst.extend_from_slice(&2i32.to_le_bytes());
	sst.extend_from_slice(&2i32.to_le_bytes());
	for string in &["alpha", "beta"] {
		sst.extend_from_slice(&(string.len() as u16).to_le_bytes());
		sst.push(0);
		sst.extend_from_slice(string.as_bytes());
	}
	data.extend(biff(excel::SST, &sst));
	data.extend(biff(excel::EOF, &[]));
	data
}

fn summary_information() -> Vec<u8> {
	let mut w = Writer::new();
	w.write_u16(0xFFFE);
	w.write_u16(0);
	w.write_u32(0x0002_0006);
	w.write_bytes(&[0; 16]);
	w.write_u32(1);
	w.write_bytes(&[0xE0, 0x85, 0x9F, 0xF2, 0xF9, 0x4F, 0x68, 0x10, 0xAB, 0x91, 0x08, 0x00, 0x2B, 0x27, 0xB3, 0xD9]);
	w.write_u32(48);

	w.write_u32(44);
	w.write_u32(2);
	w.write_u32(1);
	w.write_u32(24);
	w.write_u32(propertyset::PIDSI_TITLE as u32);
	w.write_u32(32);
	w.write_u32(propertyset::VT_I2 as u32);
	w.write_u16(1252);
	w.write_u16(0);
	w.write_u32(propertyset::VT_LPSTR as u32);
	w.write_u32(4);
	w.write_bytes(b"Memo");
	w.into_inner()
}

fn document() -> Rc<Container> {
	let table: Vec<u8> = (0..0x240u32).map(|i| i as u8).collect();
	let data = Builder::new()
		.add_stream(winword::DOCUMENT_STREAM, word_document())
		.add_stream("1Table", table)
		.add_stream("Workbook", workbook())
		.add_stream(propertyset::SUMMARY_INFORMATION, summary_information())
		.build()
		.unwrap();
	Rc::new(Container::new(Buffer::source(data)).unwrap())
}

#[test]
fn empty_compound_files_round_trip() {
	let data = Builder::new().build().unwrap();
	assert_eq!(data.len(), 1536);
	let container = Container::new(Buffer::source(data.clone())).unwrap();
	let root = container.get_root_object().unwrap();
	assert_eq!(root.object_type, ObjectType::RootStorage);
	assert_eq!(root.starting_sector_location, 0xFFFF_FFFE);
	assert_eq!(root.stream_size, 0);
	assert!(container.children(&root).unwrap().is_empty());
	assert_eq!(container.load().unwrap().encode().unwrap(), data);
}

#[test]
fn streams_are_listed_and_dumped() {
	let container = document();
	let root = container.get_root_object().unwrap();
	let mut names: Vec<String> = container.children(&root).unwrap().into_iter().map(|o| o.name).collect();
	names.sort();
	assert_eq!(names, vec!["\u{5}SummaryInformation", "1Table", "WordDocument", "Workbook"]);

	let table = container.find_stream("1Table").unwrap();
	let mut out = Vec::new();
	container.dump_stream(&table, &mut out).unwrap();
	assert_eq!(out.len(), 0x240);
	assert_eq!(out[0x201], 0x01);
}

#[test]
fn word_style_sheet_resolves_into_the_table_stream() {
	let file = winword::open(document()).unwrap();
	let document = file.load().unwrap();
	let fib = document.get("fib").unwrap();
	assert_eq!(winword::n_fib(fib), Some(0xC1));
	let stshf = winword::fc_lcb_entry(fib, "Stshf").unwrap();
	let target = stshf.dereference(file.context()).unwrap();
	assert_eq!(target.size, 0x40);
	assert_eq!(target.bytes().map(|b| b[0]), Some(0x00));
	assert_eq!(target.bytes().map(|b| b.len()), Some(0x40));
}

#[test]
fn workbook_strings_come_from_the_compound_file() {
	let file = excel::from_container(document()).unwrap();
	let workbook = file.load().unwrap();
	assert_eq!(excel::shared_strings(&workbook), vec!["alpha", "beta"]);
	assert_eq!(workbook.encode().unwrap(), self::workbook());
}

#[test]
fn summary_information_gives_the_title() {
	let file = propertyset::open(document(), propertyset::SUMMARY_INFORMATION).unwrap();
	let stream = file.load().unwrap();
	let sets = propertyset::property_sets(file.context(), &stream).unwrap();
	assert_eq!(sets.len(), 1);
	let title = propertyset::property(file.context(), &sets[0], propertyset::PIDSI_TITLE).unwrap().unwrap();
	assert_eq!(propertyset::text(&title), Some("Memo".to_owned()));
	assert_eq!(propertyset::codepage(file.context(), &sets[0]).unwrap(), Some(1252));
}

#[test]
fn pgm_packets_decode_and_verify() {
	let spm = hex("4aff6987000347fe85e0ed4285e0000000000000000000000000000100010000c0a8c1a60004000c8808000200000008");
	let packet = pgm::open(Buffer::source(spm.clone())).load().unwrap();
	assert_eq!(packet.get("pgm_type").map(Field::summary), Some("SPM(0x0)".to_owned()));
	assert_eq!(pgm::verify(&packet).unwrap(), Some(true));
	assert_eq!(packet.encode().unwrap(), spm);

	let odata = hex("46cc9bff04013f293138313235000007500fc40a500fc3ff0004001481100000500fc408000000000000000a61616161616161");
	let packet = pgm::open(Buffer::source(odata.clone())).load().unwrap();
	assert_eq!(packet.int_at("pgm_tsdu_length"), Some(7));
	assert_eq!(packet.get("data").and_then(Field::bytes).map(|b| b.to_vec()), Some(b"aaaaaaa".to_vec()));
	assert_eq!(packet.encode().unwrap(), odata);

	let mut damaged = odata;
	damaged[6] ^= 0xFF;
	let packet = pgm::open(Buffer::source(damaged)).load().unwrap();
	assert_eq!(pgm::verify(&packet).unwrap(), Some(false));
}

#[test]
fn officeart_fill_color_is_a_colorref() {
	let mut data = vec![0x13, 0x00, 0x0B, 0xF0, 6, 0, 0, 0];
	data.extend_from_slice(&[0x81, 0x01, 0xFF, 0x80, 0x00, 0x00]);
	let records = officeart::decode_records(Buffer::source(data.clone())).unwrap();
	let fopt = &records.children()[0];
	let fill = officeart::property(fopt, officeart::FILL_COLOR).unwrap();
	assert_eq!(fill.int_at("red"), Some(0xFF));
	assert_eq!(fill.int_at("green"), Some(0x80));
	assert_eq!(fill.int_at("blue"), Some(0));
	assert_eq!(records.encode().unwrap(), data);
}
