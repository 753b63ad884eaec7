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

use std::cmp::Ordering;
use log::debug;
use crate::engine::{Charset, Context, Init};
use crate::error::{Error, Result};
use crate::io::{Buffer, Writer};
use super::structures::{self, ENDOFCHAIN, FATSECT, FREESECT, HEADER_DIFAT_ENTRIES, NOSTREAM};
use super::table::AllocationTable;
use super::ObjectType;

const SECTOR_SIZE: u64 = 512;
const MINI_SECTOR_SIZE: u64 = 64;
const MINI_STREAM_CUTOFF: u64 = 4096;
const ENTRIES_PER_SECTOR: u64 = SECTOR_SIZE / 4;

/// Writes a version 3 compound file (512-byte sectors) holding a flat list of
/// streams below the root storage.
#[derive(Default)]
pub struct Builder {
	streams: Vec<(String, Vec<u8>)>,
}

/// Directory order: shorter names first, then by upper-cased name.
fn compare_names(a: &str, b: &str) -> Ordering {
	let length = |s: &str| s.encode_utf16().count();
	length(a).cmp(&length(b)).then_with(|| a.to_uppercase().cmp(&b.to_uppercase()))
}

/// Lays `data` out over the sectors of `chain`.
fn place(sectors: &mut [u8], chain: &[u32], unit: u64, data: &[u8]) {
	for (&sector, chunk) in chain.iter().zip(data.chunks(unit as usize)) {
		let start = (sector as u64 * unit) as usize;
		sectors[start..start + chunk.len()].copy_from_slice(chunk);
	}
}

/// Builds a balanced sibling tree over `ids[lo..hi]` and returns its root.
fn balance(ids: &[u32], lo: usize, hi: usize, links: &mut Vec<(u32, u32)>) -> u32 {
	if lo >= hi {
		return NOSTREAM;
	}
	let mid = (lo + hi) / 2;
	let left = balance(ids, lo, mid, links);
	let right = balance(ids, mid + 1, hi, links);
	links[mid] = (left, right);
	ids[mid]
}

fn entry_name(name: &str) -> Vec<u8> {
	let mut bytes = Charset::Utf16.encode(name);
	bytes.resize(64, 0);
	bytes
}

impl Builder {
	pub fn new() -> Builder {
		Builder { streams: Vec::new() }
	}

	pub fn add_stream(&mut self, name: &str, data: Vec<u8>) -> &mut Builder {
		self.streams.push((name.to_owned(), data));
		self
	}

	pub fn build(&self) -> Result<Vec<u8>> {
		let mut streams: Vec<&(String, Vec<u8>)> = self.streams.iter().collect();
		streams.sort_by(|a, b| compare_names(&a.0, &b.0));
		for pair in streams.windows(2) {
			if compare_names(&pair[0].0, &pair[1].0) == Ordering::Equal {
				return Err(Error::Schema(format!("duplicate stream name '{}'", pair[1].0)));
			}
		}
		if let Some((name, _)) = streams.iter().find(|(name, _)| name.encode_utf16().count() > 31) {
			return Err(Error::Schema(format!("stream name '{}' is longer than 31 characters", name)));
		}

		// Small streams go to the mini stream
		let is_mini = |data: &Vec<u8>| (data.len() as u64) < MINI_STREAM_CUTOFF;
		let minisectors: u64 = streams.iter()
			.filter(|(_, data)| is_mini(data))
			.map(|(_, data)| AllocationTable::required(data.len() as u64, MINI_SECTOR_SIZE))
			.sum();
		let minifat_sectors = AllocationTable::required(minisectors * 4, SECTOR_SIZE);
		let mut minifat = AllocationTable::free((minifat_sectors * ENTRIES_PER_SECTOR) as usize);
		let mut ministream = vec![0u8; (minisectors * MINI_SECTOR_SIZE) as usize];
		let mut starts = Vec::with_capacity(streams.len());
		for (_, data) in streams.iter().filter(|(_, data)| is_mini(data)) {
			let chain = minifat.grow(&[], AllocationTable::required(data.len() as u64, MINI_SECTOR_SIZE) as usize)?;
			place(&mut ministream, &chain, MINI_SECTOR_SIZE, data);
			starts.push(chain.first().cloned().unwrap_or(ENDOFCHAIN));
		}

		let entries = streams.len() as u64 + 1;
		let directory_sectors = AllocationTable::required(entries * structures::DIRECTORY_ENTRY_SIZE, SECTOR_SIZE);
		let ministream_sectors = AllocationTable::required(ministream.len() as u64, SECTOR_SIZE);
		let stream_sectors: u64 = streams.iter()
			.filter(|(_, data)| !is_mini(data))
			.map(|(_, data)| AllocationTable::required(data.len() as u64, SECTOR_SIZE))
			.sum();
		let used = directory_sectors + minifat_sectors + ministream_sectors + stream_sectors;
		let mut fat_sectors = 1;
		while fat_sectors * ENTRIES_PER_SECTOR < used + fat_sectors {
			fat_sectors += 1;
		}
		if fat_sectors > HEADER_DIFAT_ENTRIES as u64 {
			return Err(Error::Schema(format!("{} FAT sectors do not fit in the header", fat_sectors)));
		}
		debug!("[build] {} streams, {} FAT sectors, {} sectors in use", streams.len(), fat_sectors, used);

		let mut fat = AllocationTable::free((fat_sectors * ENTRIES_PER_SECTOR) as usize);
		for sector in 0..fat_sectors as u32 {
			fat.set(sector, FATSECT)?;
		}
		let directory_chain = fat.grow(&[], directory_sectors as usize)?;
		let minifat_chain = fat.grow(&[], minifat_sectors as usize)?;
		let ministream_chain = fat.grow(&[], ministream_sectors as usize)?;

		let mut sectors = vec![0u8; ((fat_sectors + used) * SECTOR_SIZE) as usize];
		let mut small = starts.into_iter();
		let mut locations = Vec::with_capacity(streams.len());
		for (_, data) in &streams {
			if is_mini(data) {
				locations.push(small.next().unwrap_or(ENDOFCHAIN));
			}
			else {
				let chain = fat.grow(&[], AllocationTable::required(data.len() as u64, SECTOR_SIZE) as usize)?;
				place(&mut sectors, &chain, SECTOR_SIZE, data);
				locations.push(chain[0]);
			}
		}
		place(&mut sectors, &ministream_chain, SECTOR_SIZE, &ministream);
		let mut table = Writer::new();
		for &entry in minifat.entries() {
			table.write_u32(entry);
		}
		place(&mut sectors, &minifat_chain, SECTOR_SIZE, &table.into_inner());

		let cx = Context::new(Buffer::source(Vec::new()));
		let ids: Vec<u32> = (1..entries as u32).collect();
		let mut links = vec![(NOSTREAM, NOSTREAM); ids.len()];
		let top = balance(&ids, 0, ids.len(), &mut links);
		let mut directory = Writer::new();
		let root = cx.alloc(&structures::directory_entry(), Init::fields(vec![
			("Name", entry_name("Root Entry").into()),
			("Type", ObjectType::RootStorage.code().into()),
			("Flag", 1u8.into()),
			("iChild", top.into()),
			("sectLocation", ministream_chain.first().cloned().unwrap_or(ENDOFCHAIN).into()),
			("qwSize", (ministream.len() as u64).into()),
		]))?;
		directory.write_bytes(&root.encode()?);
		for (((name, data), &location), &(left, right)) in streams.iter().map(|s| (&s.0, &s.1)).zip(&locations).zip(&links) {
			let entry = cx.alloc(&structures::directory_entry(), Init::fields(vec![
				("Name", entry_name(name).into()),
				("Type", ObjectType::Stream.code().into()),
				("Flag", 1u8.into()),
				("iLeftSibling", left.into()),
				("iRightSibling", right.into()),
				("sectLocation", location.into()),
				("qwSize", (data.len() as u64).into()),
			]))?;
			directory.write_bytes(&entry.encode()?);
		}
		while (directory.len() as u64) < directory_sectors * SECTOR_SIZE {
			directory.write_bytes(&cx.alloc(&structures::directory_entry(), Init::Default)?.encode()?);
		}
		place(&mut sectors, &directory_chain, SECTOR_SIZE, &directory.into_inner());

		let mut table = Writer::new();
		for &entry in fat.entries() {
			table.write_u32(entry);
		}
		place(&mut sectors, &(0..fat_sectors as u32).collect::<Vec<_>>(), SECTOR_SIZE, &table.into_inner());

		let difat = (0..HEADER_DIFAT_ENTRIES as u32)
			.map(|i| Init::Int(if (i as u64) < fat_sectors { i as i128 } else { FREESECT as i128 }))
			.collect::<Vec<Init>>();
		let header = cx.alloc(&structures::header(), Init::fields(vec![
			("csectFat", (fat_sectors as u32).into()),
			("sectDirectory", directory_chain[0].into()),
			("sectMiniFat", minifat_chain.first().cloned().unwrap_or(ENDOFCHAIN).into()),
			("csectMiniFat", (minifat_sectors as u32).into()),
			("difat", difat.into()),
		]))?;

		let mut out = header.encode()?;
		out.extend(sectors);
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_files_hold_a_fat_and_a_directory() {
		let data = Builder::new().build().unwrap();
		assert_eq!(data.len(), 1536);
		assert_eq!(&data[..8], &structures::SIGNATURE);
		// DIFAT[0] = 0, sectDirectory = 1
		assert_eq!(&data[76..80], &[0, 0, 0, 0]);
		assert_eq!(&data[48..52], &[1, 0, 0, 0]);
		assert_eq!(&data[512..520], &[0xFD, 0xFF, 0xFF, 0xFF, 0xFE, 0xFF, 0xFF, 0xFF]);
	}

	#[test]
	fn names_sort_by_length_first() {
		assert_eq!(compare_names("Data", "1Table"), Ordering::Less);
		assert_eq!(compare_names("abc", "ABD"), Ordering::Less);
		assert_eq!(compare_names("abc", "ABC"), Ordering::Equal);
	}

	#[test]
	fn duplicate_names_are_refused() {
		let mut builder = Builder::new();
		builder.add_stream("Table", Vec::new()).add_stream("TABLE", Vec::new());
		assert!(builder.build().is_err());
	}
}
