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

// Also see: [MS-CFB]: Compound File Binary File Format specifications, https://msdn.microsoft.com/en-us/library/dd942138.aspx

use crate::engine::{Addressing, Charset, Field, Length, PointerSpec, Shape, Structure, Target, U16, U32, U64, U8};
use crate::error::{Error, Result};

/// The header always occupies the first 512 bytes, whatever the sector size.
pub const HEADER_SIZE: u64 = 512;
/// Number of DIFAT entries stored in the header itself.
pub const HEADER_DIFAT_ENTRIES: usize = 109;
pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub const BYTE_ORDER: u16 = 0xFFFE;
pub const DIRECTORY_ENTRY_SIZE: u64 = 128;

pub const MAXREGSECT: u32 = 0xFFFF_FFFA;
pub const NOT_APPLICABLE: u32 = 0xFFFF_FFFB;
pub const DIFSECT: u32 = 0xFFFF_FFFC;
pub const FATSECT: u32 = 0xFFFF_FFFD;
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
pub const FREESECT: u32 = 0xFFFF_FFFF;

pub const MAXREGSID: u32 = 0xFFFF_FFFA;
pub const NOSTREAM: u32 = 0xFFFF_FFFF;

static SECTOR_TYPES: [(&str, u64); 6] = [
	("MAXREGSECT", MAXREGSECT as u64),
	("NotApplicable", NOT_APPLICABLE as u64),
	("DIFSECT", DIFSECT as u64),
	("FATSECT", FATSECT as u64),
	("ENDOFCHAIN", ENDOFCHAIN as u64),
	("FREESECT", FREESECT as u64),
];

static ENTRY_TYPES: [(&str, u64); 4] = [("Unknown", 0), ("Storage", 1), ("Stream", 2), ("Root", 5)];
static ENTRY_FLAGS: [(&str, u64); 2] = [("red", 0), ("black", 1)];
static ENTRY_IDS: [(&str, u64); 2] = [("MAXREGSID", MAXREGSID as u64), ("NOSTREAM", NOSTREAM as u64)];

/// A physical sector location in a CFBF file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorLocation(pub u32);

impl SectorLocation {
	/// Whether this is the number of an actual sector rather than a marker.
	pub fn is_regular(&self) -> bool {
		self.0 <= MAXREGSECT
	}

	/// Sector 0 starts right after the header, so every sector is shifted by one.
	pub fn offset(&self, sector_size: u64) -> u64 {
		(self.0 as u64 + 1) * sector_size
	}
}

/// One-character rendering of an allocation table entry, as used in table summaries.
pub fn symbol(entry: u32) -> char {
	match entry {
		NOT_APPLICABLE => '-',
		DIFSECT => 'D',
		FATSECT => 'F',
		ENDOFCHAIN => '$',
		FREESECT => '.',
		_ => '+',
	}
}

/// A sector number or one of the reserved markers.
pub fn sect() -> Shape {
	Shape::enumeration("SECT", U32, &SECTOR_TYPES)
}

/// A sector full of allocation table entries.
pub fn sector_table(count: u64) -> Shape {
	Shape::count(sect(), count)
}

/// DIFAT entry: the number of a sector holding a part of the FAT.
fn fat_pointer(sector_size: u64) -> Shape {
	PointerSpec::new("FATSECT", U32, Target::Shape(sector_table(sector_size / 4)))
		.addressing(Addressing::Sector(sector_size))
		.build()
}

fn shift_size(shift: u64) -> Result<u64> {
	match shift {
		6..=16 => Ok(1 << shift),
		_ => Err(Error::Schema(format!("unsupported sector shift {}", shift))),
	}
}

pub fn header() -> Shape {
	Structure::new("Header")
		.field("abSig", Shape::block(8))
		.field("clsid", Shape::block(16))
		.field("uMinorVersion", U16)
		.field("uMajorVersion", U16)
		.field("uByteOrder", U16)
		.field("uSectorShift", U16)
		.field("uMiniSectorShift", U16)
		.field("reserved", Shape::block(6))
		.field("csectDirectory", U32)
		.field("csectFat", U32)
		.field("sectDirectory", sect())
		.field("dwTransaction", U32)
		.field("ulMiniSectorCutoff", U32)
		.field("sectMiniFat", sect())
		.field("csectMiniFat", U32)
		.field("sectDifat", sect())
		.field("csectDifat", U32)
		.field_with("difat", |scope| {
			let size = shift_size(scope.u64("uSectorShift")?)?;
			Ok(Shape::count(fat_pointer(size), HEADER_DIFAT_ENTRIES as u64))
		})
		.magic("abSig", &SIGNATURE[..])
		.magic("uByteOrder", BYTE_ORDER)
		.sentinel("clsid", vec![0u8; 16])
		.default("uMinorVersion", 0x3Eu16)
		.default("uMajorVersion", 3u16)
		.default("uSectorShift", 9u16)
		.default("uMiniSectorShift", 6u16)
		.default("sectDirectory", ENDOFCHAIN)
		.default("ulMiniSectorCutoff", 4096u32)
		.default("sectMiniFat", ENDOFCHAIN)
		.default("sectDifat", ENDOFCHAIN)
		.build()
}

/// Units in a NUL-terminated UTF-16 name, terminator included, as bytes.
fn name_length(fields: &[Field]) -> Result<Option<i128>> {
	let name = match fields.iter().find(|f| f.name == "Name").and_then(Field::bytes) {
		Some(name) => name,
		None => return Ok(None),
	};
	let units = name.chunks(2).take_while(|unit| unit.iter().any(|&b| b != 0)).count();
	Ok(Some(if units == 0 { 0 } else { (units as i128 + 1) * 2 }))
}

pub fn directory_entry() -> Shape {
	Structure::new("DirectoryEntry")
		.field("Name", Shape::string(32, Charset::Utf16))
		.field("uName", U16)
		.field("Type", Shape::enumeration("DirectoryEntryType", U8, &ENTRY_TYPES))
		.field("Flag", Shape::enumeration("DirectoryEntryFlag", U8, &ENTRY_FLAGS))
		.field("iLeftSibling", Shape::enumeration("DirectoryEntryIdentifier", U32, &ENTRY_IDS))
		.field("iRightSibling", Shape::enumeration("DirectoryEntryIdentifier", U32, &ENTRY_IDS))
		.field("iChild", Shape::enumeration("DirectoryEntryIdentifier", U32, &ENTRY_IDS))
		.field("clsid", Shape::block(16))
		.field("dwState", U32)
		.field("ftCreation", U64)
		.field("ftModified", U64)
		.field("sectLocation", sect())
		.field("qwSize", U64)
		.default("iLeftSibling", NOSTREAM)
		.default("iRightSibling", NOSTREAM)
		.default("iChild", NOSTREAM)
		.backfill("uName", name_length)
		.build()
}

/// The directory: entries filling the sectors of its chain.
pub fn directory(size: u64) -> Shape {
	Shape::block_array(directory_entry(), size)
}

/// The whole file: the header, the padding up to the first sector and every
/// sector as an opaque block. Needs the `uSectorSize` attribute.
pub fn file() -> Shape {
	Structure::new("File")
		.field("Header", header())
		.field_with("padding", |scope| Ok(Shape::block(scope.attr("uSectorSize")?.saturating_sub(HEADER_SIZE))))
		.field_with("Data", |scope| Ok(Shape::array(Shape::block(scope.attr("uSectorSize")?), Length::Block)))
		.build()
}

/// The header of a CFBF file, with the DIFAT entries it carries.
#[derive(Clone, Debug)]
pub struct Header {
	pub minor_version: u16,
	pub major_version: u16,
	pub sector_shift: u16,
	pub sector_size: u64, // virtual field; not actually contained in CFBF file
	pub mini_sector_shift: u16,
	pub mini_sector_size: u64, // virtual field; not actually contained in CFBF file
	pub number_of_directory_sectors: u32,
	pub number_of_fat_sectors: u32,
	pub first_directory_sector_location: SectorLocation,
	pub mini_stream_cutoff_size: u32,
	pub first_mini_fat_sector_location: SectorLocation,
	pub number_of_mini_fat_sectors: u32,
	pub first_difat_sector_location: SectorLocation,
	pub number_of_difat_sectors: u32,
	pub difat: Vec<u32>,
}

impl Header {
	pub fn from_field(field: &Field) -> Result<Header> {
		let sector_shift = field.u64_at("uSectorShift")?;
		let mini_sector_shift = field.u64_at("uMiniSectorShift")?;
		let sector_size = shift_size(sector_shift)?;
		let mini_sector_size = shift_size(mini_sector_shift)?;
		if mini_sector_size > sector_size {
			return Err(Error::Schema(format!("mini sectors of {} bytes do not fit in sectors of {} bytes", mini_sector_size, sector_size)));
		}
		let u32_at = |path: &str| field.u64_at(path).map(|v| v as u32);
		let difat = field.field("difat")?.children().iter().filter_map(Field::int).map(|v| v as u32).collect();
		Ok(Header {
			minor_version: field.u64_at("uMinorVersion")? as u16,
			major_version: field.u64_at("uMajorVersion")? as u16,
			sector_shift: sector_shift as u16,
			sector_size,
			mini_sector_shift: mini_sector_shift as u16,
			mini_sector_size,
			number_of_directory_sectors: u32_at("csectDirectory")?,
			number_of_fat_sectors: u32_at("csectFat")?,
			first_directory_sector_location: SectorLocation(u32_at("sectDirectory")?),
			mini_stream_cutoff_size: u32_at("ulMiniSectorCutoff")?,
			first_mini_fat_sector_location: SectorLocation(u32_at("sectMiniFat")?),
			number_of_mini_fat_sectors: u32_at("csectMiniFat")?,
			first_difat_sector_location: SectorLocation(u32_at("sectDifat")?),
			number_of_difat_sectors: u32_at("csectDifat")?,
			difat,
		})
	}

	/// Allocation table entries per sector.
	pub fn sector_count(&self) -> u64 {
		self.sector_size / 4
	}

	pub fn mini_sector_count(&self) -> u64 {
		self.mini_sector_size / 4
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::Context;
	use crate::io::{Buffer, Writer};
	use crate::error::Error;

	fn raw_header(sector_shift: u16) -> Vec<u8> {
		let mut w = Writer::new();
		w.write_bytes(&SIGNATURE);
		w.write_bytes(&[0; 16]);
		w.write_u16(0x3E);
		w.write_u16(3);
		w.write_u16(BYTE_ORDER);
		w.write_u16(sector_shift);
		w.write_u16(6);
		w.write_bytes(&[0; 6]);
		for v in &[0, 1, 1, 0, 4096, ENDOFCHAIN, 0, ENDOFCHAIN, 0] {
			w.write_u32(*v);
		}
		w.write_u32(0);
		for _ in 1..HEADER_DIFAT_ENTRIES {
			w.write_u32(FREESECT);
		}
		w.into_inner()
	}

	#[test]
	fn header_decodes_to_512_bytes() {
		let cx = Context::new(Buffer::source(raw_header(9)));
		let field = cx.decode(&header(), 0).unwrap();
		assert_eq!(field.size, HEADER_SIZE);
		assert!(field.is_complete());
		let header = Header::from_field(&field).unwrap();
		assert_eq!(header.sector_size, 512);
		assert_eq!(header.sector_count(), 128);
		assert_eq!(header.first_directory_sector_location, SectorLocation(1));
		assert_eq!(header.difat.len(), HEADER_DIFAT_ENTRIES);
		assert_eq!(header.difat[0], 0);
		let first = field.find("difat.0").and_then(|f| f.pointer()).unwrap();
		assert_eq!(first.address, Some(crate::engine::Address::Local(512)));
		assert!(field.find("difat.1").and_then(|f| f.pointer()).unwrap().is_nil());
	}

	#[test]
	fn wrong_byte_order_is_fatal() {
		let mut data = raw_header(9);
		data[28] = 0xFF;
		data[29] = 0xFE;
		let cx = Context::new(Buffer::source(data));
		assert!(matches!(cx.decode(&header(), 0), Err(Error::BadMagic { .. })));
	}

	#[test]
	fn entry_names_back_fill_their_length() {
		let mut name = Charset::Utf16.encode("Root Entry");
		name.resize(64, 0);
		let cx = Context::new(Buffer::source(Vec::new()));
		let entry = cx.alloc(&directory_entry(), crate::engine::Init::fields(vec![
			("Name", name.into()),
			("Type", 5u8.into()),
		])).unwrap();
		assert_eq!(entry.size, DIRECTORY_ENTRY_SIZE);
		assert_eq!(entry.int_at("uName"), Some(22));
		assert_eq!(entry.int_at("iChild"), Some(NOSTREAM as i128));
	}

	#[test]
	fn symbols_mark_reserved_entries() {
		let table: String = [0, FATSECT, ENDOFCHAIN, FREESECT].iter().map(|&e| symbol(e)).collect();
		assert_eq!(table, "+F$.");
		assert!(SectorLocation(MAXREGSECT).is_regular());
		assert!(!SectorLocation(ENDOFCHAIN).is_regular());
		assert_eq!(SectorLocation(1).offset(512), 1024);
	}
}
