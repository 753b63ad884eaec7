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

//! Compound File Binary Format: the sector layer that turns a file into a
//! set of named streams.

pub mod structures;
pub mod table;
pub mod builder;

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::Write;
use std::rc::Rc;
use log::{debug, trace, warn};
use crate::engine::{Context, Field};
use crate::error::{Error, Result};
use crate::io::{Scattered, Source, Streams};
use self::structures::{Header, SectorLocation, ENDOFCHAIN, MAXREGSECT, NOSTREAM};
use self::table::AllocationTable;

pub use self::builder::Builder;

/// A compound file. The allocation tables and the directory are read on
/// first use and kept for the lifetime of the container.
pub struct Container {
	cx: Context,
	header: Header,
	difat: RefCell<Option<Rc<AllocationTable>>>,
	fat: RefCell<Option<Rc<AllocationTable>>>,
	minifat: RefCell<Option<Rc<AllocationTable>>>,
	directory: RefCell<Option<Rc<Field>>>,
	ministream: RefCell<Option<Source>>,
}

#[derive(Clone, Debug)]
pub struct Object {
	pub id: u32,
	pub name: String,
	/// Whether this object is a folder or a file.
	pub object_type: ObjectType,
	/// The ID of the left sibling object in the binary tree (in this folder).
	left_sibling_id: u32,
	/// The ID of the right sibling object in the binary tree (in this folder).
	right_sibling_id: u32,
	/// If this object is a folder: the ID of the first child of this folder. Otherwise undefined.
	child_id: u32,
	pub creation_time: u64,
	pub modified_time: u64,
	/// If this object is a file: the location of the first sector that holds the file content.
	pub starting_sector_location: u32,
	/// If this object is a file: the length of the file content.
	pub stream_size: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectType {
	/// The root folder.
	RootStorage,
	/// A folder.
	Storage,
	/// A file.
	Stream,
	Unknown,
}

impl ObjectType {
	pub fn from_code(code: u64) -> ObjectType {
		match code {
			1 => ObjectType::Storage,
			2 => ObjectType::Stream,
			5 => ObjectType::RootStorage,
			_ => ObjectType::Unknown,
		}
	}

	pub fn code(&self) -> u8 {
		match self {
			ObjectType::RootStorage => 5,
			ObjectType::Storage => 1,
			ObjectType::Stream => 2,
			ObjectType::Unknown => 0,
		}
	}
}

impl Object {
	fn from_field(id: u32, entry: &Field) -> Result<Object> {
		let length = entry.u64_at("uName")? as usize;
		let name = entry.field("Name")?.bytes().unwrap_or(&[]);
		// The length is expressed in bytes and counts the trailing NUL
		let units = (length / 2).saturating_sub(1).min(name.len() / 2);
		let name = crate::engine::Charset::Utf16.decode(&name[..units * 2]);
		let u32_at = |path: &str| entry.u64_at(path).map(|v| v as u32);
		Ok(Object {
			id,
			name,
			object_type: ObjectType::from_code(entry.u64_at("Type")?),
			left_sibling_id: u32_at("iLeftSibling")?,
			right_sibling_id: u32_at("iRightSibling")?,
			child_id: u32_at("iChild")?,
			creation_time: entry.u64_at("ftCreation")?,
			modified_time: entry.u64_at("ftModified")?,
			starting_sector_location: u32_at("sectLocation")?,
			stream_size: entry.u64_at("qwSize")?,
		})
	}
}

fn is_entry(id: u32) -> bool {
	id != NOSTREAM && id <= MAXREGSECT
}

impl Container {
	pub fn new(source: Source) -> Result<Container> {
		debug!("[new] Reading CFBF file header ({} bytes)", structures::HEADER_SIZE);
		let cx = Context::new(source);
		let field = cx.decode(&structures::header(), 0)?;
		if let Some((path, fault)) = field.faults().into_iter().next() {
			debug!("[new] Header is damaged at {}", path);
			return Err(fault.into());
		}
		let header = Header::from_field(&field)?;
		debug!("[new] Version {}.{}, {}-byte sectors, {}-byte mini sectors", header.major_version, header.minor_version, header.sector_size, header.mini_sector_size);

		let cx = cx
			.with_attr("uSectorSize", header.sector_size)
			.with_attr("uSectorCount", header.sector_count())
			.with_attr("uMiniSectorSize", header.mini_sector_size)
			.with_attr("uMiniSectorCount", header.mini_sector_count());
		Ok(Container {
			cx,
			header,
			difat: RefCell::new(None),
			fat: RefCell::new(None),
			minifat: RefCell::new(None),
			directory: RefCell::new(None),
			ministream: RefCell::new(None),
		})
	}

	pub fn header(&self) -> &Header {
		&self.header
	}

	/// Decode context over the whole file, carrying the sector dimensions.
	pub fn context(&self) -> &Context {
		&self.cx
	}

	/// The whole file as a tree: header and raw sectors. Encoding it gives
	/// back the file.
	pub fn load(&self) -> Result<Field> {
		self.cx.decode(&structures::file(), 0)
	}

	/// Reads the allocation table entries stored in one sector.
	fn read_table(&self, sector: u32) -> Result<Vec<u32>> {
		let offset = SectorLocation(sector).offset(self.header.sector_size);
		let table = self.cx.decode(&structures::sector_table(self.header.sector_count()), offset)?;
		if table.cut_short() {
			warn!("[read_table] Sector #{} is truncated", sector);
		}
		Ok(table.children().iter().filter_map(Field::int).map(|v| v as u32).collect())
	}

	/// Numbers of the sectors holding the FAT: the entries in the header,
	/// then those of each DIFAT sector minus its trailing link.
	pub fn difat(&self) -> Result<Rc<AllocationTable>> {
		if let Some(difat) = self.difat.borrow().as_ref() {
			return Ok(difat.clone());
		}
		let mut entries = self.header.difat.clone();
		let mut next = self.header.first_difat_sector_location.0;
		let mut visited = HashSet::new();
		for index in 0..self.header.number_of_difat_sectors {
			if !SectorLocation(next).is_regular() || !visited.insert(next) {
				warn!("[difat] DIFAT sector {} of {} is missing (link {:#x})", index, self.header.number_of_difat_sectors, next);
				break;
			}
			trace!("[difat] Reading DIFAT sector #{}", next);
			let mut table = self.read_table(next)?;
			next = table.pop().unwrap_or(ENDOFCHAIN);
			entries.extend(table);
		}
		let difat = Rc::new(AllocationTable::new(entries));
		*self.difat.borrow_mut() = Some(difat.clone());
		Ok(difat)
	}

	pub fn fat(&self) -> Result<Rc<AllocationTable>> {
		if let Some(fat) = self.fat.borrow().as_ref() {
			return Ok(fat.clone());
		}
		let difat = self.difat()?;
		let mut entries = Vec::new();
		for (index, &sector) in difat.entries().iter().take(self.header.number_of_fat_sectors as usize).enumerate() {
			if !SectorLocation(sector).is_regular() {
				warn!("[fat] FAT sector {} of {} is not allocated ({:#x})", index, self.header.number_of_fat_sectors, sector);
				break;
			}
			entries.extend(self.read_table(sector)?);
		}
		let fat = Rc::new(AllocationTable::new(entries));
		debug!("[fat] {} entries", fat.len());
		*self.fat.borrow_mut() = Some(fat.clone());
		Ok(fat)
	}

	pub fn minifat(&self) -> Result<Rc<AllocationTable>> {
		if let Some(minifat) = self.minifat.borrow().as_ref() {
			return Ok(minifat.clone());
		}
		let sectors = self.chain(self.header.first_mini_fat_sector_location.0)?;
		let mut entries = Vec::new();
		for &sector in sectors.iter().take(self.header.number_of_mini_fat_sectors as usize) {
			entries.extend(self.read_table(sector)?);
		}
		let minifat = Rc::new(AllocationTable::new(entries));
		debug!("[minifat] {} entries", minifat.len());
		*self.minifat.borrow_mut() = Some(minifat.clone());
		Ok(minifat)
	}

	/// The FAT chain starting at `sector`.
	pub fn chain(&self, sector: u32) -> Result<Vec<u32>> {
		let fat = self.fat()?;
		if !fat.terminates(sector) {
			warn!("[chain] The FAT chain at sector #{} does not end with ENDOFCHAIN", sector);
		}
		Ok(fat.chain(sector))
	}

	/// The MiniFAT chain starting at `minisector`.
	pub fn minichain(&self, minisector: u32) -> Result<Vec<u32>> {
		let minifat = self.minifat()?;
		if !minifat.terminates(minisector) {
			warn!("[minichain] The MiniFAT chain at mini-sector #{} does not end with ENDOFCHAIN", minisector);
		}
		Ok(minifat.chain(minisector))
	}

	fn sectors(&self, chain: &[u32], size: u64) -> Source {
		let sector_size = self.header.sector_size;
		let extents = chain.iter().map(|&s| (SectorLocation(s).offset(sector_size), sector_size)).collect();
		Rc::new(Scattered::new(self.cx.source.clone(), extents, size))
	}

	/// Every directory entry, in the order of their IDs.
	pub fn directory(&self) -> Result<Rc<Field>> {
		if let Some(directory) = self.directory.borrow().as_ref() {
			return Ok(directory.clone());
		}
		let chain = self.chain(self.header.first_directory_sector_location.0)?;
		let size = chain.len() as u64 * self.header.sector_size;
		debug!("[directory] Reading {} directory sectors", chain.len());
		let cx = self.cx.rebind(self.sectors(&chain, size));
		let mut directory = cx.decode(&structures::directory(size), 0)?;
		directory.name = "Directory".into();
		let directory = Rc::new(directory);
		*self.directory.borrow_mut() = Some(directory.clone());
		Ok(directory)
	}

	pub fn get_root_object(&self) -> Result<Object> {
		self.get_object(0)
	}

	pub fn get_object(&self, id: u32) -> Result<Object> {
		trace!("[get_object] Locating object #{}", id);
		let directory = self.directory()?;
		match directory.children().get(id as usize) {
			Some(entry) => Object::from_field(id, entry),
			None => Err(Error::Schema(format!("no directory entry #{}", id))),
		}
	}

	fn get_linked(&self, id: u32) -> Result<Option<Object>> {
		if is_entry(id) {
			Ok(Some(self.get_object(id)?))
		}
		else {
			Ok(None)
		}
	}

	pub fn get_first_child(&self, object: &Object) -> Result<Option<Object>> {
		self.get_linked(object.child_id)
	}

	pub fn get_left_sibling(&self, object: &Object) -> Result<Option<Object>> {
		self.get_linked(object.left_sibling_id)
	}

	pub fn get_right_sibling(&self, object: &Object) -> Result<Option<Object>> {
		self.get_linked(object.right_sibling_id)
	}

	/// Members of a storage in the order of the sibling tree.
	pub fn children(&self, object: &Object) -> Result<Vec<Object>> {
		let mut result = Vec::new();
		let mut visited = HashSet::new();
		self.collect_in_order(object.child_id, &mut visited, &mut result)?;
		Ok(result)
	}

	fn collect_in_order(&self, id: u32, visited: &mut HashSet<u32>, result: &mut Vec<Object>) -> Result<()> {
		if !is_entry(id) || !visited.insert(id) {
			return Ok(());
		}
		let object = self.get_object(id)?;
		self.collect_in_order(object.left_sibling_id, visited, result)?;
		let right = object.right_sibling_id;
		result.push(object);
		self.collect_in_order(right, visited, result)
	}

	/// Finds an object that is subordinated to the given object, by its path.
	/// The path is a collection of names for the root storage object, all intermediate storage objects (directories), and the final object (directory or file).
	/// To find an object, call this method as:
	/// ```ignore
	/// container.find_child_by_path(&["Root Entry".to_owned(), "Dir1".to_owned(), "Dir2".to_owned(), "MyFile".to_owned()])
	/// ```
	pub fn find_child_by_path(&self, path: &[String]) -> Result<Option<Object>> {
		let mut visited = HashSet::new();
		self.find_child_by_path_recursive(0, path, &mut visited)
	}

	/// The `search_object_id` is the ID of the object where the recursive search shall be started.
	fn find_child_by_path_recursive(&self, search_object_id: u32, path: &[String], visited: &mut HashSet<u32>) -> Result<Option<Object>> {
		// Handle invalid cases (mostly 0xFFFFFFFF representing non-existing sibling nodes)
		if path.is_empty() || !is_entry(search_object_id) || !visited.insert(search_object_id) {
			return Ok(None);
		}

		let object = self.get_object(search_object_id)?;
		trace!("[find_child_by_path_recursive] Processing '{}'", object.name);

		// Names are compared without regard to case, like the directory tree orders them
		if path[0].to_uppercase() == object.name.to_uppercase() {
			if path.len() == 1 {
				Ok(Some(object))
			}
			else {
				self.find_child_by_path_recursive(object.child_id, &path[1..], visited)
			}
		}
		else if let Some(result) = self.find_child_by_path_recursive(object.left_sibling_id, path, visited)? {
			Ok(Some(result))
		}
		else {
			self.find_child_by_path_recursive(object.right_sibling_id, path, visited)
		}
	}

	/// Finds the first object with the given name.
	pub fn find_child_by_name(&self, name: &str) -> Result<Option<Object>> {
		let mut visited = HashSet::new();
		self.find_child_by_name_recursive(0, name, &mut visited)
	}

	fn find_child_by_name_recursive(&self, search_object_id: u32, name: &str, visited: &mut HashSet<u32>) -> Result<Option<Object>> {
		if !is_entry(search_object_id) || !visited.insert(search_object_id) {
			return Ok(None);
		}

		let object = self.get_object(search_object_id)?;
		if name == object.name {
			return Ok(Some(object));
		}
		for next in &[object.left_sibling_id, object.right_sibling_id, object.child_id] {
			if let Some(result) = self.find_child_by_name_recursive(*next, name, visited)? {
				return Ok(Some(result));
			}
		}
		Ok(None)
	}

	/// Whether the content of the object lives in the mini stream.
	pub fn is_mini(&self, object: &Object) -> bool {
		object.object_type == ObjectType::Stream && object.stream_size < self.header.mini_stream_cutoff_size as u64
	}

	/// The mini stream, held in the sectors of the root entry.
	fn ministream(&self) -> Result<Source> {
		if let Some(ministream) = self.ministream.borrow().as_ref() {
			return Ok(ministream.clone());
		}
		let root = self.get_root_object()?;
		let ministream = self.open(&root)?;
		*self.ministream.borrow_mut() = Some(ministream.clone());
		Ok(ministream)
	}

	/// A contiguous view over the content of a stream (or, for the root
	/// entry, over the mini stream).
	pub fn open(&self, object: &Object) -> Result<Source> {
		let source = match object.object_type {
			ObjectType::RootStorage | ObjectType::Stream if !self.is_mini(object) => {
				let chain = self.chain(object.starting_sector_location)?;
				self.check_space(object, chain.len() as u64 * self.header.sector_size);
				self.sectors(&chain, object.stream_size)
			},
			ObjectType::Stream => {
				let chain = self.minichain(object.starting_sector_location)?;
				let size = self.header.mini_sector_size;
				self.check_space(object, chain.len() as u64 * size);
				let extents = chain.iter().map(|&m| (m as u64 * size, size)).collect();
				Rc::new(Scattered::new(self.ministream()?, extents, object.stream_size)) as Source
			},
			_ => return Err(Error::Schema(format!("cannot open storage object '{}'", object.name))),
		};
		debug!("[open] Object #{} '{}': {} bytes", object.id, object.name, source.size());
		Ok(source)
	}

	fn check_space(&self, object: &Object, space: u64) {
		if space < object.stream_size {
			warn!("[open] Object #{} '{}' declares {} bytes but its chain only holds {}", object.id, object.name, object.stream_size, space);
		}
	}

	pub fn dump_stream(&self, object: &Object, output: &mut dyn Write) -> Result<()> {
		debug!("[dump_stream] Dumping data for stream #{} ({} bytes)", object.id, object.stream_size);
		let source = self.open(object)?;
		let chunk = self.header.sector_size;
		let mut position = 0;
		while position < source.size() {
			let length = chunk.min(source.size() - position);
			output.write_all(&source.read(position, length as usize)?)?;
			position += length;
		}
		Ok(())
	}

	/// Looks a stream up by its slash-separated path below the root storage.
	pub fn find_stream(&self, path: &str) -> Result<Object> {
		let root = self.get_root_object()?;
		let mut full = vec![root.name];
		full.extend(path.split('/').filter(|s| !s.is_empty()).map(str::to_owned));
		match self.find_child_by_path(&full)? {
			Some(object) => Ok(object),
			None => Err(Error::StreamNotFound(path.to_owned())),
		}
	}
}

impl Streams for Container {
	fn open_stream(&self, name: &str) -> Result<Source> {
		let object = self.find_stream(name)?;
		self.open(&object)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::io::Buffer;

	fn sample() -> Container {
		let mut builder = Builder::new();
		builder.add_stream("WordDocument", (0..5000u32).map(|i| i as u8).collect());
		builder.add_stream("1Table", b"table stream".to_vec());
		builder.add_stream("Data", Vec::new());
		let data = builder.build().unwrap();
		Container::new(Buffer::source(data)).unwrap()
	}

	#[test]
	fn streams_come_back_whole() {
		let container = sample();
		let big = container.open_stream("WordDocument").unwrap();
		assert_eq!(big.size(), 5000);
		assert_eq!(big.read(4095, 2).unwrap(), vec![0xFF, 0x00]);
		let small = container.open_stream("1table").unwrap();
		assert_eq!(small.read(0, 12).unwrap(), b"table stream".to_vec());
		assert_eq!(container.open_stream("Data").unwrap().size(), 0);
		assert!(matches!(container.open_stream("0Table"), Err(Error::StreamNotFound(_))));
	}

	#[test]
	fn chains_cover_declared_sizes() {
		let container = sample();
		let root = container.get_root_object().unwrap();
		for object in container.children(&root).unwrap() {
			let (chain, unit) = if container.is_mini(&object) {
				(container.minichain(object.starting_sector_location).unwrap(), container.header().mini_sector_size)
			}
			else {
				(container.chain(object.starting_sector_location).unwrap(), container.header().sector_size)
			};
			let distinct: HashSet<u32> = chain.iter().cloned().collect();
			assert_eq!(distinct.len(), chain.len());
			assert_eq!(chain.len() as u64, AllocationTable::required(object.stream_size, unit));
		}
	}

	#[test]
	fn children_are_listed_in_tree_order() {
		let container = sample();
		let root = container.get_root_object().unwrap();
		assert_eq!(root.object_type, ObjectType::RootStorage);
		let names: Vec<String> = container.children(&root).unwrap().into_iter().map(|o| o.name).collect();
		assert_eq!(names, vec!["Data", "1Table", "WordDocument"]);
		assert!(container.find_child_by_name("1Table").unwrap().is_some());
		assert!(container.find_child_by_path(&["Root Entry".to_owned(), "Missing".to_owned()]).unwrap().is_none());
	}

	#[test]
	fn whole_file_round_trips() {
		let mut builder = Builder::new();
		builder.add_stream("Contents", vec![7; 100]);
		let data = builder.build().unwrap();
		let container = Container::new(Buffer::source(data.clone())).unwrap();
		let file = container.load().unwrap();
		assert!(file.is_complete());
		assert_eq!(file.encode().unwrap(), data);
		let mut dumped = Vec::new();
		let object = container.find_stream("Contents").unwrap();
		container.dump_stream(&object, &mut dumped).unwrap();
		assert_eq!(dumped, vec![7; 100]);
	}

	#[test]
	fn truncated_headers_are_rejected() {
		let mut data = Builder::new().build().unwrap();
		data.truncate(100);
		assert!(Container::new(Buffer::source(data)).is_err());
	}
}
