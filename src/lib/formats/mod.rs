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

//! Schemas built on the record engine, one module per format. Every module
//! exposes a `file()` shape and an `open()` returning a [`File`].

pub mod pgm;
pub mod officeart;
pub mod excel;
pub mod powerpoint;
pub mod winword;
pub mod onestore;
pub mod propertyset;
pub mod ags;

use std::rc::Rc;
use log::{debug, warn};
use crate::cfbf::Container;
use crate::engine::{BitStruct, Context, Field, Key, Shape, Structure, U16, U32};
use crate::error::Result;
use crate::io::Source;

/// A format's top-level shape bound to the bytes it describes.
pub struct File {
	cx: Context,
	shape: Shape,
}

impl File {
	pub fn new(cx: Context, shape: Shape) -> File {
		File { cx, shape }
	}

	pub fn from_source(source: Source, shape: Shape) -> File {
		File::new(Context::new(source), shape)
	}

	/// Binds `shape` to the stream `name` of a compound file. Pointers into
	/// sibling streams resolve through the same container.
	pub fn from_container(container: Rc<Container>, name: &str, shape: Shape) -> Result<File> {
		let object = container.find_stream(name)?;
		let source = container.open(&object)?;
		debug!("[from_container] Stream '{}' ({} bytes)", object.name, source.size());
		Ok(File::new(Context::new(source).with_streams(container), shape))
	}

	pub fn context(&self) -> &Context {
		&self.cx
	}

	pub fn shape(&self) -> &Shape {
		&self.shape
	}

	/// Decodes the whole provider. Damage below the top level is reported
	/// and left on the tree; only a bad signature fails the load.
	pub fn load(&self) -> Result<Field> {
		debug!("[load] Decoding {} ({} bytes)", self.shape.name(), self.cx.source.size());
		let field = self.cx.decode(&self.shape, 0)?;
		for (path, fault) in field.faults() {
			warn!("[load] {}: {}", path, fault);
		}
		if field.end() < self.cx.source.size() {
			debug!("[load] {} bytes follow the {}", self.cx.source.size() - field.end(), self.shape.name());
		}
		Ok(field)
	}
}

pub fn guid() -> Shape {
	Structure::new("GUID")
		.field("Data1", U32)
		.field("Data2", U16)
		.field("Data3", U16)
		.field("Data4", Shape::block(8))
		.build()
}

pub fn filetime() -> Shape {
	Structure::new("FILETIME")
		.field("dwLowDateTime", U32)
		.field("dwHighDateTime", U32)
		.build()
}

/// The 8-byte header shared by OfficeArt and PowerPoint records: version and
/// instance packed in the first word, then the type and the body length.
pub fn office_header() -> Shape {
	Structure::new("RecordHeader")
		.field("recVerInstance", Shape::bits(BitStruct::lsb_first("VersionInstance", U16, &[(4, "recVer"), (12, "recInstance")])))
		.field("recType", U16)
		.field("recLen", U32)
		.build()
}

pub fn office_key(header: &Field) -> Result<Key> {
	Ok(Key::versioned(
		header.u64_at("recType")?,
		header.u64_at("recVerInstance.recVer")?,
		header.u64_at("recVerInstance.recInstance")?,
	))
}

/// Records of version 15 hold more records.
pub const CONTAINER_VERSION: u64 = 0xF;
