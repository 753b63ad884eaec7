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

use std::collections::HashSet;
use std::fmt;
use crate::error::{Error, Result};
use super::structures::{symbol, ENDOFCHAIN, FREESECT, MAXREGSECT};

/// A FAT, MiniFAT or DIFAT: entry `i` is the successor of sector `i` in its
/// chain, or one of the reserved markers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationTable {
	entries: Vec<u32>,
}

impl AllocationTable {
	pub fn new(entries: Vec<u32>) -> AllocationTable {
		AllocationTable { entries }
	}

	/// A table of `length` free entries.
	pub fn free(length: usize) -> AllocationTable {
		AllocationTable { entries: vec![FREESECT; length] }
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn get(&self, index: u32) -> Option<u32> {
		self.entries.get(index as usize).cloned()
	}

	pub fn entries(&self) -> &[u32] {
		&self.entries
	}

	pub fn set(&mut self, index: u32, value: u32) -> Result<()> {
		match self.entries.get_mut(index as usize) {
			Some(entry) => {
				*entry = value;
				Ok(())
			},
			None => Err(Error::Schema(format!("sector {} is past the end of a table of {} entries", index, self.entries.len()))),
		}
	}

	/// Sectors of the chain starting at `start`, in order. The walk stops at
	/// the first reserved marker, at an entry past the end of the table, or
	/// when a sector comes round a second time.
	pub fn chain(&self, start: u32) -> Vec<u32> {
		let mut result = Vec::new();
		let mut visited = HashSet::new();
		let mut index = start;
		while index <= MAXREGSECT && (index as usize) < self.entries.len() && visited.insert(index) {
			result.push(index);
			index = self.entries[index as usize];
		}
		result
	}

	/// Whether the chain starting at `start` ends with ENDOFCHAIN.
	pub fn terminates(&self, start: u32) -> bool {
		match self.chain(start).last() {
			Some(&last) => self.get(last) == Some(ENDOFCHAIN),
			None => start == ENDOFCHAIN,
		}
	}

	/// Number of distinct sectors in the chain starting at `start`.
	pub fn count(&self, start: u32) -> usize {
		self.chain(start).len()
	}

	/// Indices of free entries from `start` on.
	pub fn available(&self, start: u32) -> impl Iterator<Item = u32> + '_ {
		(start as usize..self.entries.len()).filter(move |&i| self.entries[i] == FREESECT).map(|i| i as u32)
	}

	/// First run of `count` consecutive free entries from `start` on.
	pub fn contiguous(&self, start: u32, count: usize) -> Option<Vec<u32>> {
		self.available(start)
			.find(|&first| (first..first + count as u32).all(|i| self.get(i) == Some(FREESECT)))
			.map(|first| (first..first + count as u32).collect())
	}

	/// Links the given sectors into one chain ending with ENDOFCHAIN.
	pub fn link(&mut self, chain: &[u32]) -> Result<Vec<u32>> {
		for pair in chain.windows(2) {
			self.set(pair[0], pair[1])?;
		}
		if let Some(&last) = chain.last() {
			self.set(last, ENDOFCHAIN)?;
		}
		Ok(chain.to_vec())
	}

	/// Releases the last `amount` sectors of a chain and returns what is left.
	pub fn reduce(&mut self, chain: &[u32], amount: usize) -> Result<Vec<u32>> {
		let keep = chain.len().saturating_sub(amount);
		for &index in &chain[keep..] {
			self.set(index, FREESECT)?;
		}
		self.link(&chain[..keep])
	}

	/// Extends a chain with `amount` free sectors.
	pub fn grow(&mut self, chain: &[u32], amount: usize) -> Result<Vec<u32>> {
		let additional: Vec<u32> = self.available(0).filter(|i| !chain.contains(i)).take(amount).collect();
		if additional.len() < amount {
			return Err(Error::Schema(format!("only {} of {} sectors are free", additional.len(), amount)));
		}
		let mut result = chain.to_vec();
		result.extend(additional);
		self.link(&result)
	}

	pub fn resize(&mut self, chain: &[u32], count: usize) -> Result<Vec<u32>> {
		if count < chain.len() {
			self.reduce(chain, chain.len() - count)
		}
		else {
			self.grow(chain, count - chain.len())
		}
	}

	/// Sectors of `sector_size` bytes needed to hold `bytes` bytes.
	pub fn required(bytes: u64, sector_size: u64) -> u64 {
		(bytes + sector_size - 1) / sector_size
	}
}

impl fmt::Display for AllocationTable {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let symbols: String = self.entries.iter().map(|&e| symbol(e)).collect();
		write!(f, "[{}] {}", self.entries.len(), symbols)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cfbf::structures::FATSECT;

	#[test]
	fn chains_follow_successors() {
		let table = AllocationTable::new(vec![FATSECT, 3, ENDOFCHAIN, 2, FREESECT]);
		assert_eq!(table.chain(1), vec![1, 3, 2]);
		assert!(table.terminates(1));
		assert_eq!(table.chain(ENDOFCHAIN), Vec::<u32>::new());
		assert_eq!(table.to_string(), "[5] F+$+.");
	}

	#[test]
	fn cycles_are_cut() {
		let table = AllocationTable::new(vec![1, 2, 0]);
		assert_eq!(table.chain(0), vec![0, 1, 2]);
		assert_eq!(table.count(1), 3);
		assert!(!table.terminates(0));
	}

	#[test]
	fn grow_and_reduce_relink() {
		let mut table = AllocationTable::free(6);
		table.set(0, FATSECT).unwrap();
		let chain = table.grow(&[], 3).unwrap();
		assert_eq!(chain, vec![1, 2, 3]);
		assert_eq!(table.chain(1), chain);
		let chain = table.resize(&chain, 1).unwrap();
		assert_eq!(chain, vec![1]);
		assert_eq!(table.get(1), Some(ENDOFCHAIN));
		assert_eq!(table.available(0).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
		assert_eq!(table.contiguous(0, 4), Some(vec![2, 3, 4, 5]));
		assert!(table.grow(&chain, 5).is_err());
	}

	#[test]
	fn sectors_round_up() {
		assert_eq!(AllocationTable::required(0, 512), 0);
		assert_eq!(AllocationTable::required(513, 512), 2);
	}
}
