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

use std::char::{decode_utf16, REPLACEMENT_CHARACTER};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
	Little,
	Big,
}

/// A fixed-width integer of up to 8 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Integer {
	pub width: usize,
	pub endian: Endian,
	pub signed: bool,
}

pub const U8: Integer = Integer { width: 1, endian: Endian::Little, signed: false };
pub const I8: Integer = Integer { width: 1, endian: Endian::Little, signed: true };
pub const U16: Integer = Integer { width: 2, endian: Endian::Little, signed: false };
pub const I16: Integer = Integer { width: 2, endian: Endian::Little, signed: true };
pub const U24: Integer = Integer { width: 3, endian: Endian::Little, signed: false };
pub const U32: Integer = Integer { width: 4, endian: Endian::Little, signed: false };
pub const I32: Integer = Integer { width: 4, endian: Endian::Little, signed: true };
pub const U64: Integer = Integer { width: 8, endian: Endian::Little, signed: false };
pub const I64: Integer = Integer { width: 8, endian: Endian::Little, signed: true };
pub const U16BE: Integer = Integer { width: 2, endian: Endian::Big, signed: false };
pub const U32BE: Integer = Integer { width: 4, endian: Endian::Big, signed: false };

impl Integer {
	pub const fn new(width: usize, endian: Endian, signed: bool) -> Integer {
		Integer { width, endian, signed }
	}

	pub fn bits(&self) -> u32 {
		self.width as u32 * 8
	}

	/// All ones for this width; also the nil value of pointers.
	pub fn mask(&self) -> u64 {
		if self.width >= 8 { u64::max_value() } else { (1u64 << self.bits()) - 1 }
	}

	pub fn from_bytes(&self, bytes: &[u8]) -> i128 {
		let mut raw: u64 = 0;
		match self.endian {
			Endian::Little => for b in bytes.iter().rev() { raw = raw << 8 | *b as u64 },
			Endian::Big => for b in bytes.iter() { raw = raw << 8 | *b as u64 },
		}
		if self.signed {
			let shift = 64 - self.bits();
			((raw << shift) as i64 >> shift) as i128
		}
		else {
			raw as i128
		}
	}

	pub fn check(&self, value: i128) -> Result<()> {
		let bits = self.bits();
		let (min, max) = if self.signed {
			(-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
		}
		else {
			(0, (1i128 << bits) - 1)
		};
		if value < min || value > max {
			return Err(Error::OutOfRange { value, width: bits });
		}
		Ok(())
	}

	pub fn encode(&self, value: i128) -> Result<Vec<u8>> {
		self.check(value)?;
		let raw = (value as u64) & self.mask();
		let mut bytes: Vec<u8> = (0..self.width).map(|i| (raw >> (8 * i)) as u8).collect();
		if self.endian == Endian::Big {
			bytes.reverse();
		}
		Ok(bytes)
	}

	pub fn type_name(&self) -> String {
		let sign = if self.signed { "sint" } else { "uint" };
		match (self.width, self.endian) {
			(1, _) => format!("{}8", sign),
			(_, Endian::Little) => format!("{}{}", sign, self.bits()),
			(_, Endian::Big) => format!("{}{}be", sign, self.bits()),
		}
	}
}

/// An integer split into named bit ranges. Fields are kept MSB first; a
/// schema that lists its fields LSB first builds the struct with
/// `lsb_first`, which reverses the list once.
#[derive(Debug)]
pub struct BitStruct {
	pub name: &'static str,
	pub base: Integer,
	pub fields: Vec<(u32, &'static str)>,
}

impl BitStruct {
	pub fn msb_first(name: &'static str, base: Integer, fields: &[(u32, &'static str)]) -> BitStruct {
		debug_assert_eq!(fields.iter().map(|&(w, _)| w).sum::<u32>(), base.bits());
		BitStruct { name, base: Integer { signed: false, ..base }, fields: fields.to_vec() }
	}

	pub fn lsb_first(name: &'static str, base: Integer, fields: &[(u32, &'static str)]) -> BitStruct {
		let mut res = BitStruct::msb_first(name, base, fields);
		res.fields.reverse();
		res
	}

	pub fn index(&self, name: &str) -> Option<usize> {
		self.fields.iter().position(|&(_, n)| n == name)
	}

	pub fn unpack(&self, raw: u64) -> Vec<u64> {
		let mut shift = self.base.bits();
		self.fields.iter().map(|&(width, _)| {
			shift -= width;
			(raw >> shift) & mask(width)
		}).collect()
	}

	pub fn pack(&self, values: &[u64]) -> Result<u64> {
		let mut raw = 0u64;
		for (&(width, _), &value) in self.fields.iter().zip(values) {
			if value > mask(width) {
				return Err(Error::OutOfRange { value: value as i128, width });
			}
			raw = if width >= 64 { value } else { raw << width | value };
		}
		Ok(raw)
	}
}

fn mask(width: u32) -> u64 {
	if width >= 64 { u64::max_value() } else { (1u64 << width) - 1 }
}

/// Named values for an integer. Lookup only; unknown values stay numeric
/// unless the decode is strict.
#[derive(Debug)]
pub struct Enumeration {
	pub name: &'static str,
	pub base: Integer,
	pub values: &'static [(&'static str, u64)],
}

impl Enumeration {
	pub fn lookup(&self, value: u64) -> Option<&'static str> {
		self.values.iter().find(|&&(_, v)| v == value).map(|&(n, _)| n)
	}

	pub fn value_of(&self, name: &str) -> Option<u64> {
		self.values.iter().find(|&&(n, _)| n == name).map(|&(_, v)| v)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charset {
	Latin1,
	Utf16,
}

impl Charset {
	pub fn unit(&self) -> u64 {
		match self {
			Charset::Latin1 => 1,
			Charset::Utf16 => 2,
		}
	}

	pub fn decode(&self, bytes: &[u8]) -> String {
		match self {
			Charset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
			Charset::Utf16 => decode_utf16(bytes.chunks(2).filter(|c| c.len() == 2).map(|c| c[0] as u16 | (c[1] as u16) << 8))
				.map(|r| r.unwrap_or(REPLACEMENT_CHARACTER))
				.collect(),
		}
	}

	pub fn encode(&self, text: &str) -> Vec<u8> {
		match self {
			Charset::Latin1 => text.chars().map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' }).collect(),
			Charset::Utf16 => text.encode_utf16().flat_map(|u| u.to_le_bytes().to_vec()).collect(),
		}
	}
}

/// Strings with a width known up front, or read up to (and including) one of
/// a set of terminator bytes.
#[derive(Debug)]
pub enum StrSpec {
	Fixed { length: u64, charset: Charset },
	Terminated { terminators: &'static [u8] },
}

impl StrSpec {
	pub fn charset(&self) -> Charset {
		match self {
			StrSpec::Fixed { charset, .. } => *charset,
			StrSpec::Terminated { .. } => Charset::Latin1,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn integers_respect_endianness_and_sign() {
		assert_eq!(U16BE.from_bytes(&[0x4A, 0xFF]), 0x4AFF);
		assert_eq!(U16.from_bytes(&[0x4A, 0xFF]), 0xFF4A);
		assert_eq!(I16.from_bytes(&[0xFE, 0xFF]), -2);
		assert_eq!(I32.encode(-2).unwrap(), vec![0xFE, 0xFF, 0xFF, 0xFF]);
		assert_eq!(U32BE.encode(0x500FC40A).unwrap(), vec![0x50, 0x0F, 0xC4, 0x0A]);
		assert_eq!(U24.encode(0x010203).unwrap(), vec![3, 2, 1]);
	}

	#[test]
	fn encode_rejects_out_of_range() {
		match I8.encode(200) {
			Err(Error::OutOfRange { value: 200, width: 8 }) => {},
			other => panic!("unexpected {:?}", other),
		}
		assert!(U8.encode(-1).is_err());
		assert!(U64.encode(u64::max_value() as i128).is_ok());
	}

	#[test]
	fn reversed_bitstruct_reads_lsb_first() {
		let flags = BitStruct::lsb_first("flags", U16, &[(1, "a"), (8, "b"), (1, "c"), (6, "d")]);
		assert_eq!(flags.fields[0], (6, "d"));
		let values = flags.unpack(0x0200);
		assert_eq!(values[flags.index("c").unwrap()], 1);
		assert_eq!(flags.pack(&values).unwrap(), 0x0200);
	}

	#[test]
	fn utf16_names_decode() {
		let bytes = Charset::Utf16.encode("Root Entry");
		assert_eq!(bytes.len(), 20);
		assert_eq!(Charset::Utf16.decode(&bytes), "Root Entry");
	}
}
