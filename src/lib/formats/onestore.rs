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

//! OneNote revision stores (.one, .onetoc2). A 1024-byte header points at the
//! root file node list; lists are chains of fragments holding FileNode
//! records keyed by a 10-bit id, and nodes point at further lists or at
//! property sets.

use std::collections::HashSet;
use std::sync::Arc;
use lazy_static::lazy_static;
use log::{debug, warn};
use crate::engine::{align, BitStruct, Context, Dispatch, Endian, Field, Integer, Key, Length, PointerSpec, RecordSpec, Registry, Scope, Shape, Structure, Target};
use crate::engine::{I32, U16, U24, U32, U64, U8};
use crate::error::{Error, Result};
use crate::io::Source;
use super::{guid, File};

pub const LIST_MAGIC: u64 = 0xA456_7AB1_F5F7_F4C4;
pub const FRAGMENT_FOOTER: u64 = 0x8BC2_15C3_8233_BA4B;

/// Fragment header, next-fragment reference and footer.
const FRAGMENT_OVERHEAD: u64 = 16 + 12 + 8;

pub const OBJECT_SPACE_MANIFEST_ROOT: u64 = 0x004;
pub const OBJECT_SPACE_MANIFEST_LIST_REFERENCE: u64 = 0x008;
pub const OBJECT_SPACE_MANIFEST_LIST_START: u64 = 0x00C;
pub const REVISION_MANIFEST_LIST_REFERENCE: u64 = 0x010;
pub const REVISION_MANIFEST_LIST_START: u64 = 0x014;
pub const REVISION_MANIFEST_START4: u64 = 0x01B;
pub const REVISION_MANIFEST_END: u64 = 0x01C;
pub const REVISION_MANIFEST_START6: u64 = 0x01E;
pub const REVISION_MANIFEST_START7: u64 = 0x01F;
pub const GLOBAL_ID_TABLE_START_X: u64 = 0x021;
pub const GLOBAL_ID_TABLE_START2: u64 = 0x022;
pub const GLOBAL_ID_TABLE_ENTRY_X: u64 = 0x024;
pub const GLOBAL_ID_TABLE_ENTRY2_X: u64 = 0x025;
pub const GLOBAL_ID_TABLE_ENTRY3_X: u64 = 0x026;
pub const GLOBAL_ID_TABLE_END_X: u64 = 0x028;
pub const OBJECT_DECLARATION_WITH_REF_COUNT_X: u64 = 0x02D;
pub const OBJECT_DECLARATION_WITH_REF_COUNT2_X: u64 = 0x02E;
pub const OBJECT_REVISION_WITH_REF_COUNT_X: u64 = 0x041;
pub const OBJECT_REVISION_WITH_REF_COUNT2_X: u64 = 0x042;
pub const ROOT_OBJECT_REFERENCE2_X: u64 = 0x059;
pub const ROOT_OBJECT_REFERENCE3: u64 = 0x05A;
pub const REVISION_ROLE_DECLARATION: u64 = 0x05C;
pub const REVISION_ROLE_AND_CONTEXT_DECLARATION: u64 = 0x05D;
pub const OBJECT_DECLARATION_FILE_DATA3_REF_COUNT: u64 = 0x072;
pub const OBJECT_DECLARATION_FILE_DATA3_LARGE_REF_COUNT: u64 = 0x073;
pub const OBJECT_DATA_ENCRYPTION_KEY_V2_X: u64 = 0x07C;
pub const OBJECT_INFO_DEPENDENCY_OVERRIDES: u64 = 0x084;
pub const DATA_SIGNATURE_GROUP_DEFINITION: u64 = 0x08C;
pub const FILE_DATA_STORE_LIST_REFERENCE: u64 = 0x090;
pub const FILE_DATA_STORE_OBJECT_REFERENCE: u64 = 0x094;
pub const OBJECT_DECLARATION2_REF_COUNT: u64 = 0x0A4;
pub const OBJECT_DECLARATION2_LARGE_REF_COUNT: u64 = 0x0A5;
pub const OBJECT_GROUP_LIST_REFERENCE: u64 = 0x0B0;
pub const OBJECT_GROUP_START: u64 = 0x0B4;
pub const OBJECT_GROUP_END: u64 = 0x0B8;
pub const HASHED_CHUNK_DESCRIPTOR2: u64 = 0x0C2;
pub const READ_ONLY_OBJECT_DECLARATION2_REF_COUNT: u64 = 0x0C4;
pub const READ_ONLY_OBJECT_DECLARATION2_LARGE_REF_COUNT: u64 = 0x0C5;
pub const CHUNK_TERMINATOR: u64 = 0x0FF;

/// `BaseType` of a node referencing another file node list.
pub const BASE_TYPE_LIST: u64 = 2;

pub const PRT_NO_DATA: u64 = 0x01;
pub const PRT_BOOL: u64 = 0x02;
pub const PRT_ONE_BYTE: u64 = 0x03;
pub const PRT_TWO_BYTES: u64 = 0x04;
pub const PRT_FOUR_BYTES: u64 = 0x05;
pub const PRT_EIGHT_BYTES: u64 = 0x06;
pub const PRT_FOUR_BYTES_OF_LENGTH_FOLLOWED_BY_DATA: u64 = 0x07;
pub const PRT_OBJECT_ID: u64 = 0x08;
pub const PRT_ARRAY_OF_OBJECT_IDS: u64 = 0x09;
pub const PRT_OBJECT_SPACE_ID: u64 = 0x0A;
pub const PRT_ARRAY_OF_OBJECT_SPACE_IDS: u64 = 0x0B;
pub const PRT_CONTEXT_ID: u64 = 0x0C;
pub const PRT_ARRAY_OF_CONTEXT_IDS: u64 = 0x0D;
pub const PRT_ARRAY_OF_PROPERTY_VALUES: u64 = 0x10;
pub const PRT_PROPERTY_SET: u64 = 0x11;

const U48: Integer = Integer::new(6, Endian::Little, false);

pub fn extended_guid() -> Shape {
	Structure::new("ExtendedGUID")
		.field("guid", guid())
		.field("n", U32)
		.build()
}

pub fn compact_id() -> Shape {
	Structure::new("CompactID")
		.field("n", U8)
		.field("guidIndex", U24)
		.build()
}

fn string_in_storage_buffer() -> Shape {
	Structure::new("StringInStorageBuffer")
		.field("cch", U32)
		.field_with("StringData", |scope| Ok(Shape::string(scope.u64("cch")?, crate::engine::Charset::Utf16)))
		.build()
}

fn jcid() -> Shape {
	Shape::bits(BitStruct::lsb_first("JCID", U32, &[
		(16, "index"),
		(1, "IsBinary"),
		(1, "IsPropertySet"),
		(1, "IsGraphNode"),
		(1, "IsFileData"),
		(1, "IsReadOnly"),
		(11, "Reserved"),
	]))
}

fn chunk_reference(name: &'static str, offset: Integer, length: Integer, target: Target) -> Shape {
	PointerSpec::new(name, offset, target).length(length).build()
}

fn fragment_target() -> Target {
	Target::SizedWith(Arc::new(fragment))
}

fn property_set_target() -> Target {
	Target::Shape(object_space_object_prop_set())
}

/// A FileNodeChunkReference, whose widths and scaling come from the
/// `StpFormat` and `CbFormat` of the enclosing node's header.
fn node_reference(scope: &Scope<'_>, target: fn() -> Target) -> Result<Shape> {
	let (offset, offset_scale) = match scope.lookup_u64("header.bits.StpFormat")? {
		0 => (U64, 1),
		1 => (U32, 1),
		2 => (U16, 8),
		_ => (U32, 8),
	};
	let (length, length_scale) = match scope.lookup_u64("header.bits.CbFormat")? {
		0 => (U32, 1),
		1 => (U64, 1),
		2 => (U8, 8),
		_ => (U16, 8),
	};
	Ok(PointerSpec::new("FileNodeChunkReference", offset, target())
		.length(length)
		.scaled(offset_scale, length_scale)
		.build())
}

fn node_header() -> Shape {
	Structure::new("FileNodeHeader")
		.field("bits", Shape::bits(BitStruct::lsb_first("FileNodeBits", U32, &[
			(10, "FileNodeID"),
			(13, "Size"),
			(2, "StpFormat"),
			(2, "CbFormat"),
			(4, "BaseType"),
			(1, "Reserved"),
		])))
		.build()
}

fn node(name: &'static str, kind: u64) -> Structure {
	Structure::new(name).tag(kind)
}

fn object_declaration2_body() -> Shape {
	Structure::new("ObjectDeclaration2Body")
		.field("oid", compact_id())
		.field("jcid", jcid())
		.field("flags", Shape::bits(BitStruct::lsb_first("ObjectDeclaration2Flags", U8, &[(1, "fHasOidReferences"), (1, "fHasOsidReferences"), (6, "fReserved2")])))
		.build()
}

fn object_declaration2(name: &'static str, kind: u64, count: Integer) -> Structure {
	node(name, kind)
		.field_with("BlobRef", |scope| node_reference(scope, property_set_target))
		.field("body", object_declaration2_body())
		.field("cRef", count)
}

fn object_declaration_with_ref_count(name: &'static str, kind: u64, count: Integer) -> Shape {
	node(name, kind)
		.field_with("ObjectRef", |scope| node_reference(scope, property_set_target))
		.field("body", Structure::new("ObjectDeclarationWithRefCountBody")
			.field("oid", compact_id())
			.field("bits", Shape::bits(BitStruct::lsb_first("ObjectDeclarationBits", U48, &[
				(10, "jci"),
				(4, "odcs"),
				(2, "fReserved1"),
				(1, "fHasOidReferences"),
				(1, "fHasOsidReferences"),
				(30, "fReserved2"),
			])))
			.build())
		.field("cRef", count)
		.build()
}

fn object_declaration_file_data3(name: &'static str, kind: u64, count: Integer) -> Shape {
	node(name, kind)
		.field("oid", compact_id())
		.field("jcid", jcid())
		.field("cRef", count)
		.field("FileDataReference", string_in_storage_buffer())
		.field("Extension", string_in_storage_buffer())
		.build()
}

fn revision_manifest_start6(name: &'static str, kind: u64) -> Structure {
	node(name, kind)
		.field("rid", extended_guid())
		.field("ridDependent", extended_guid())
		.field("RevisionRole", I32)
		.field("odcsDefault", U16)
}

fn object_info_dependency_overrides() -> Shape {
	let override8 = Structure::new("ObjectInfoDependencyOverride8").field("oid", compact_id()).field("cRef", U8).build();
	let override32 = Structure::new("ObjectInfoDependencyOverride32").field("oid", compact_id()).field("cRef", U32).build();
	Structure::new("ObjectInfoDependencyOverrideData")
		.field("c8BitOverrides", U32)
		.field("c32BitOverrides", U32)
		.field("crc", U32)
		.field_with("Overrides1", move |scope| Ok(Shape::count(override8.clone(), scope.u64("c8BitOverrides")?)))
		.field_with("Overrides2", move |scope| Ok(Shape::count(override32.clone(), scope.u64("c32BitOverrides")?)))
		.build()
}

pub fn file_data_store_object() -> Shape {
	Structure::new("FileDataStoreObject")
		.field("guidHeader", guid())
		.field("cbLength", U64)
		.field("unused", U32)
		.field("reserved", U64)
		.field_with("FileData", |scope| Ok(Shape::block(scope.u64("cbLength")?)))
		.field_with("padding", |scope| Ok(align(scope, 8)))
		.field("guidFooter", guid())
		.build()
}

lazy_static! {
	static ref NODES: Registry = Registry::new("FileNodeType")
		.define(OBJECT_SPACE_MANIFEST_ROOT, node("ObjectSpaceManifestRootFND", OBJECT_SPACE_MANIFEST_ROOT)
			.field("gosidRoot", extended_guid())
			.build())
		.define(OBJECT_SPACE_MANIFEST_LIST_REFERENCE, node("ObjectSpaceManifestListReferenceFND", OBJECT_SPACE_MANIFEST_LIST_REFERENCE)
			.field_with("ref", |scope| node_reference(scope, fragment_target))
			.field("gosid", extended_guid())
			.build())
		.define(OBJECT_SPACE_MANIFEST_LIST_START, node("ObjectSpaceManifestListStartFND", OBJECT_SPACE_MANIFEST_LIST_START)
			.field("gosid", extended_guid())
			.build())
		.define(REVISION_MANIFEST_LIST_REFERENCE, node("RevisionManifestListReferenceFND", REVISION_MANIFEST_LIST_REFERENCE)
			.field_with("ref", |scope| node_reference(scope, fragment_target))
			.build())
		.define(REVISION_MANIFEST_LIST_START, node("RevisionManifestListStartFND", REVISION_MANIFEST_LIST_START)
			.field("gosid", extended_guid())
			.field("nInstance", U32)
			.build())
		.define(REVISION_MANIFEST_START4, node("RevisionManifestStart4FND", REVISION_MANIFEST_START4)
			.field("rid", extended_guid())
			.field("ridDependent", extended_guid())
			.field("timeCreation", U64)
			.field("RevisionRole", I32)
			.field("odcsDefault", U16)
			.build())
		.define(REVISION_MANIFEST_END, node("RevisionManifestEndFND", REVISION_MANIFEST_END).build())
		.define(REVISION_MANIFEST_START6, revision_manifest_start6("RevisionManifestStart6FND", REVISION_MANIFEST_START6).build())
		.define(REVISION_MANIFEST_START7, revision_manifest_start6("RevisionManifestStart7FND", REVISION_MANIFEST_START7)
			.field("gctxid", extended_guid())
			.build())
		.define(GLOBAL_ID_TABLE_START_X, node("GlobalIdTableStartFNDX", GLOBAL_ID_TABLE_START_X)
			.field("Reserved", U8)
			.build())
		.define(GLOBAL_ID_TABLE_START2, node("GlobalIdTableStart2FND", GLOBAL_ID_TABLE_START2).build())
		.define(GLOBAL_ID_TABLE_ENTRY_X, node("GlobalIdTableEntryFNDX", GLOBAL_ID_TABLE_ENTRY_X)
			.field("index", U32)
			.field("guid", guid())
			.build())
		.define(GLOBAL_ID_TABLE_ENTRY2_X, node("GlobalIdTableEntry2FNDX", GLOBAL_ID_TABLE_ENTRY2_X)
			.field("iIndexMapFrom", U32)
			.field("iIndexMapTo", U32)
			.build())
		.define(GLOBAL_ID_TABLE_ENTRY3_X, node("GlobalIdTableEntry3FNDX", GLOBAL_ID_TABLE_ENTRY3_X)
			.field("iIndexCopyFromStart", U32)
			.field("cEntriesToCopy", U32)
			.field("iIndexCopyToStart", U32)
			.build())
		.define(GLOBAL_ID_TABLE_END_X, node("GlobalIdTableEndFNDX", GLOBAL_ID_TABLE_END_X).build())
		.define(OBJECT_DECLARATION_WITH_REF_COUNT_X, object_declaration_with_ref_count("ObjectDeclarationWithRefCountFNDX", OBJECT_DECLARATION_WITH_REF_COUNT_X, U8))
		.define(OBJECT_DECLARATION_WITH_REF_COUNT2_X, object_declaration_with_ref_count("ObjectDeclarationWithRefCount2FNDX", OBJECT_DECLARATION_WITH_REF_COUNT2_X, U32))
		.define(OBJECT_REVISION_WITH_REF_COUNT_X, node("ObjectRevisionWithRefCountFNDX", OBJECT_REVISION_WITH_REF_COUNT_X)
			.field_with("ref", |scope| node_reference(scope, property_set_target))
			.field("oid", compact_id())
			.field("bits", Shape::bits(BitStruct::lsb_first("ObjectRevisionBits", U8, &[(1, "fHasOidReferences"), (1, "fHasOsidReferences"), (6, "cRef")])))
			.build())
		.define(OBJECT_REVISION_WITH_REF_COUNT2_X, node("ObjectRevisionWithRefCount2FNDX", OBJECT_REVISION_WITH_REF_COUNT2_X)
			.field_with("ref", |scope| node_reference(scope, property_set_target))
			.field("oid", compact_id())
			.field("bits", Shape::bits(BitStruct::lsb_first("ObjectRevisionBits2", U32, &[(1, "fHasOidReferences"), (1, "fHasOsidReferences"), (30, "Reserved")])))
			.field("cRef", U32)
			.build())
		.define(ROOT_OBJECT_REFERENCE2_X, node("RootObjectReference2FNDX", ROOT_OBJECT_REFERENCE2_X)
			.field("oidRoot", compact_id())
			.field("RootRole", U32)
			.build())
		.define(ROOT_OBJECT_REFERENCE3, node("RootObjectReference3FND", ROOT_OBJECT_REFERENCE3)
			.field("oidRoot", extended_guid())
			.field("RootRole", U32)
			.build())
		.define(REVISION_ROLE_DECLARATION, node("RevisionRoleDeclarationFND", REVISION_ROLE_DECLARATION)
			.field("rid", extended_guid())
			.field("RevisionRole", U32)
			.build())
		.define(REVISION_ROLE_AND_CONTEXT_DECLARATION, node("RevisionRoleAndContextDeclarationFND", REVISION_ROLE_AND_CONTEXT_DECLARATION)
			.field("rid", extended_guid())
			.field("RevisionRole", U32)
			.field("gctxid", extended_guid())
			.build())
		.define(OBJECT_DECLARATION_FILE_DATA3_REF_COUNT, object_declaration_file_data3("ObjectDeclarationFileData3RefCountFND", OBJECT_DECLARATION_FILE_DATA3_REF_COUNT, U8))
		.define(OBJECT_DECLARATION_FILE_DATA3_LARGE_REF_COUNT, object_declaration_file_data3("ObjectDeclarationFileData3LargeRefCountFND", OBJECT_DECLARATION_FILE_DATA3_LARGE_REF_COUNT, U32))
		.define(OBJECT_DATA_ENCRYPTION_KEY_V2_X, node("ObjectDataEncryptionKeyV2FNDX", OBJECT_DATA_ENCRYPTION_KEY_V2_X)
			.field_with("ref", |scope| node_reference(scope, || Target::Sized))
			.build())
		.define(OBJECT_INFO_DEPENDENCY_OVERRIDES, node("ObjectInfoDependencyOverridesFND", OBJECT_INFO_DEPENDENCY_OVERRIDES)
			.field_with("ref", |scope| node_reference(scope, || Target::Shape(object_info_dependency_overrides())))
			// Inline when the reference is nil
			.field_with("data", |scope| Ok(match scope.get("ref").and_then(Field::pointer) {
				Some(pointer) if pointer.is_nil() => object_info_dependency_overrides(),
				_ => Shape::empty(),
			}))
			.build())
		.define(DATA_SIGNATURE_GROUP_DEFINITION, node("DataSignatureGroupDefinitionFND", DATA_SIGNATURE_GROUP_DEFINITION)
			.field("DataSignatureGroup", extended_guid())
			.build())
		.define(FILE_DATA_STORE_LIST_REFERENCE, node("FileDataStoreListReferenceFND", FILE_DATA_STORE_LIST_REFERENCE)
			.field_with("ref", |scope| node_reference(scope, fragment_target))
			.build())
		.define(FILE_DATA_STORE_OBJECT_REFERENCE, node("FileDataStoreObjectReferenceFND", FILE_DATA_STORE_OBJECT_REFERENCE)
			.field_with("ref", |scope| node_reference(scope, || Target::Shape(file_data_store_object())))
			.field("guidReference", guid())
			.build())
		.define(OBJECT_DECLARATION2_REF_COUNT, object_declaration2("ObjectDeclaration2RefCountFND", OBJECT_DECLARATION2_REF_COUNT, U8).build())
		.define(OBJECT_DECLARATION2_LARGE_REF_COUNT, object_declaration2("ObjectDeclaration2LargeRefCountFND", OBJECT_DECLARATION2_LARGE_REF_COUNT, U32).build())
		.define(OBJECT_GROUP_LIST_REFERENCE, node("ObjectGroupListReferenceFND", OBJECT_GROUP_LIST_REFERENCE)
			.field_with("ref", |scope| node_reference(scope, fragment_target))
			.field("ObjectGroupID", extended_guid())
			.build())
		.define(OBJECT_GROUP_START, node("ObjectGroupStartFND", OBJECT_GROUP_START)
			.field("oid", extended_guid())
			.build())
		.define(OBJECT_GROUP_END, node("ObjectGroupEndFND", OBJECT_GROUP_END).build())
		.define(HASHED_CHUNK_DESCRIPTOR2, node("HashedChunkDescriptor2FND", HASHED_CHUNK_DESCRIPTOR2)
			.field_with("BlobRef", |scope| node_reference(scope, property_set_target))
			.field("guidHash", Shape::block(16))
			.build())
		.define(READ_ONLY_OBJECT_DECLARATION2_REF_COUNT, node("ReadOnlyObjectDeclaration2RefCountFND", READ_ONLY_OBJECT_DECLARATION2_REF_COUNT)
			.field("base", object_declaration2("ObjectDeclaration2RefCountFND", OBJECT_DECLARATION2_REF_COUNT, U8).build())
			.field("md5Hash", Shape::block(16))
			.build())
		.define(READ_ONLY_OBJECT_DECLARATION2_LARGE_REF_COUNT, node("ReadOnlyObjectDeclaration2LargeRefCountFND", READ_ONLY_OBJECT_DECLARATION2_LARGE_REF_COUNT)
			.field("base", object_declaration2("ObjectDeclaration2LargeRefCountFND", OBJECT_DECLARATION2_LARGE_REF_COUNT, U32).build())
			.field("md5Hash", Shape::block(16))
			.build())
		.define(CHUNK_TERMINATOR, node("ChunkTerminatorFND", CHUNK_TERMINATOR).build());
}

fn node_key(header: &Field) -> Result<Key> {
	Ok(Key::new(header.u64_at("bits.FileNodeID")?))
}

/// A FileNode: the 32-bit header, whose `Size` counts itself, and the body
/// its id selects.
pub fn file_node() -> Shape {
	RecordSpec::new("FileNode", node_header(), Dispatch::Registry(&NODES, node_key))
		.length("bits.Size", 4)
		.kind("bits.FileNodeID")
		.build()
}

fn list_header() -> Shape {
	Structure::new("FileNodeListHeader")
		.field("uintMagic", U64)
		.magic("uintMagic", LIST_MAGIC)
		.field("FileNodeListID", U32)
		.field("nFragmentSequence", U32)
		.build()
}

fn ends_list(node: &Field) -> bool {
	matches!(node.int_at("header.bits.FileNodeID"), Some(id) if id == CHUNK_TERMINATOR as i128 || id == 0)
}

/// A fragment of `cb` bytes: header, nodes up to the ChunkTerminatorFND,
/// padding, then the reference to the next fragment and the footer.
pub fn fragment(cb: u64) -> Shape {
	let room = cb.saturating_sub(FRAGMENT_OVERHEAD);
	Structure::new("FileNodeListFragment")
		.field("header", list_header())
		.field("rgFileNodes", Shape::terminated(file_node(), ends_list).within(room))
		.field_with("padding", move |scope| {
			let used = scope.get("rgFileNodes").map_or(0, |nodes| nodes.size);
			Ok(Shape::block(room.saturating_sub(used)))
		})
		.field("nextFragment", chunk_reference("FileChunkReference64x32", U64, U32, fragment_target()))
		.field("footer", U64)
		.sentinel("footer", FRAGMENT_FOOTER)
		.build()
}

fn transaction_log(cb: u64) -> Shape {
	let entry = Structure::new("TransactionEntry")
		.field("srcID", U32)
		.field("TransactionEntrySwitch", U32)
		.build();
	Structure::new("TransactionLogFragment")
		.field("sizeTable", Shape::terminated(entry, |entry| entry.int_at("srcID") == Some(1)).within(cb.saturating_sub(12)))
		.field("nextFragment", chunk_reference("FileChunkReference64x32", U64, U32, Target::SizedWith(Arc::new(transaction_log))))
		.build()
}

fn free_chunk_list(cb: u64) -> Shape {
	Structure::new("FreeChunkListFragment")
		.field("crc", U32)
		.field("fcrNextChunk", chunk_reference("FileChunkReference64x32", U64, U32, Target::SizedWith(Arc::new(free_chunk_list))))
		.field("fcrFreeChunk", Shape::block_array(chunk_reference("FileChunkReference64", U64, U64, Target::Sized), cb.saturating_sub(16)))
		.build()
}

fn property_id() -> Shape {
	Shape::bits(BitStruct::lsb_first("PropertyID", U32, &[(26, "id"), (5, "type"), (1, "boolValue")]))
}

fn property_set() -> Shape {
	Structure::new("PropertySet")
		.field("cProperties", U16)
		.field_with("rgPrids", |scope| Ok(Shape::count(property_id(), scope.u64("cProperties")?)))
		.field_with("rgData", |scope| Ok(Shape::array_with(property_value, Length::Count(scope.u64("cProperties")?))))
		.tag(PRT_PROPERTY_SET)
		.build()
}

/// Value of the property at the next index of `rgData`, typed by its id.
fn property_value(scope: &Scope<'_>) -> Result<Shape> {
	let index = scope.fields.len();
	let kind = scope.lookup("rgPrids")
		.and_then(|prids| prids.children().get(index))
		.and_then(|prid| prid.bit("type"))
		.ok_or_else(|| Error::Schema(format!("no property id for value {}", index)))?;
	Ok(PROPERTIES.resolve(&Key::new(kind), unknown_property))
}

fn unknown_property(key: &Key) -> Shape {
	warn!("[property_value] Unknown property type {:#x}", key.kind);
	Shape::empty()
}

fn id_count(name: &'static str) -> Shape {
	Structure::new(name).field("cCIDs", U32).build()
}

lazy_static! {
	static ref PROPERTIES: Registry = Registry::new("PropertyType")
		.define(PRT_NO_DATA, Shape::empty())
		.define(PRT_BOOL, Shape::empty())
		.define(PRT_ONE_BYTE, U8.into())
		.define(PRT_TWO_BYTES, U16.into())
		.define(PRT_FOUR_BYTES, U32.into())
		.define(PRT_EIGHT_BYTES, U64.into())
		.define(PRT_FOUR_BYTES_OF_LENGTH_FOLLOWED_BY_DATA, Structure::new("prtFourBytesOfLengthFollowedByData")
			.field("cb", U32)
			.field_with("Data", |scope| Ok(Shape::block(scope.u64("cb")?)))
			.build())
		.define(PRT_OBJECT_ID, Shape::empty())
		.define(PRT_ARRAY_OF_OBJECT_IDS, id_count("prtArrayOfObjectIDs"))
		.define(PRT_OBJECT_SPACE_ID, Shape::empty())
		.define(PRT_ARRAY_OF_OBJECT_SPACE_IDS, id_count("prtArrayOfObjectSpaceIDs"))
		.define(PRT_CONTEXT_ID, Shape::empty())
		.define(PRT_ARRAY_OF_CONTEXT_IDS, id_count("prtArrayOfContextIDs"))
		.define(PRT_ARRAY_OF_PROPERTY_VALUES, Structure::new("prtArrayOfPropertyValues")
			.field("cProperties", U32)
			.field_with("prid", |scope| Ok(if scope.u64("cProperties")? > 0 { property_id() } else { Shape::empty() }))
			.field_with("Data", |scope| Ok(Shape::count(property_set(), scope.u64("cProperties")?)))
			.build())
		.define(PRT_PROPERTY_SET, property_set());
}

fn id_stream(name: &'static str) -> Shape {
	Structure::new(name)
		.field("header", Shape::bits(BitStruct::lsb_first("ObjectSpaceObjectStreamHeader", U32, &[
			(24, "Count"),
			(6, "Reserved"),
			(1, "ExtendedStreamsPresent"),
			(1, "OsidStreamNotPresent"),
		])))
		.field_with("body", |scope| Ok(Shape::count(compact_id(), scope.u64("header.Count")?)))
		.build()
}

pub fn object_space_object_prop_set() -> Shape {
	Structure::new("ObjectSpaceObjectPropSet")
		.field("OIDs", id_stream("ObjectSpaceObjectStreamOfOIDs"))
		.field_with("OSIDs", |scope| Ok(if scope.u64("OIDs.header.OsidStreamNotPresent")? == 0 {
			id_stream("ObjectSpaceObjectStreamOfOSIDs")
		} else {
			Shape::empty()
		}))
		.field_with("ContextIDs", |scope| Ok(match scope.int("OSIDs.header.ExtendedStreamsPresent") {
			Ok(1) => id_stream("ObjectSpaceObjectStreamOfContextIDs"),
			_ => Shape::empty(),
		}))
		.field("body", property_set())
		.field_with("padding", |scope| Ok(align(scope, 8)))
		.build()
}

fn file_format_version() -> Shape {
	Shape::enumeration("FileFormatVersion", U32, &[(".one", 0x2A), (".onetoc2", 0x1B)])
}

fn header() -> Shape {
	let legacy = || chunk_reference("FileChunkReference32", U32, U32, Target::Sized);
	let reference = |target: Target| chunk_reference("FileChunkReference64x32", U64, U32, target);
	Structure::new("Header")
		.field("guidFileType", guid())
		.field("guidFile", guid())
		.field("guidLegacyFileVersion", guid())
		.field("guidFileFormat", guid())
		.field("ffvLastCodeThatWroteToThisFile", file_format_version())
		.field("ffvOldestCodeThatHasWrittenToThisFile", file_format_version())
		.field("ffvNewestCodeThatHasWrittenToThisFile", file_format_version())
		.field("ffvOldestCodeThatMayReadThisFile", file_format_version())
		.field("fcrLegacyFreeChunkList", legacy())
		.field("fcrLegacyTransactionLog", legacy())
		.field("cTransactionsInLog", U32)
		.field("cbLegacyExpectedFileLength", U32)
		.field("rgbPlaceholder", U64)
		.field("fcrLegacyFileNodeListRoot", legacy())
		.field("cbLegacyFreeSpaceInFreeChunkList", U32)
		.field("fNeedsDefrag", U8)
		.field("fRepairedFile", U8)
		.field("fNeedsGarbageCollect", U8)
		.field("fHasNoEmbeddedFileObjects", U8)
		.field("guidAncestor", guid())
		.field("crcName", U32)
		.field("fcrHashedChunkList", reference(fragment_target()))
		.field("fcrTransactionLog", reference(Target::SizedWith(Arc::new(transaction_log))))
		.field("fcrFileNodeListRoot", reference(fragment_target()))
		.field("fcrFreeChunkList", reference(Target::SizedWith(Arc::new(free_chunk_list))))
		.field("cbExpectedFileLength", U64)
		.field("cbFreeSpaceInFreeChunkList", U64)
		.field("guidFileVersion", guid())
		.field("nFileVersionGeneration", U64)
		.field("guidDenyReadFileVersion", guid())
		.field("grfDebugLogFlags", U32)
		.field("fcrDebugLog", reference(Target::Sized))
		.field("fcrAllocVerificationFreeChunkList", reference(Target::Sized))
		.field("bnCreated", U32)
		.field("bnLastWroteToThisFile", U32)
		.field("bnOldestWritten", U32)
		.field("bnNewestWritten", U32)
		.field("rgbReserved", Shape::block(728))
		.build()
}

pub fn file() -> Shape {
	Structure::new("OneStoreFile")
		.field("header", header())
		.field_with("legacy", |scope| {
			let used = scope.position - scope.start;
			Ok(Shape::block(scope.u64("header.cbLegacyExpectedFileLength")?.saturating_sub(used)))
		})
		.field_with("data", |scope| {
			let used = scope.position - scope.start;
			Ok(Shape::block(scope.u64("header.cbExpectedFileLength")?.saturating_sub(used)))
		})
		.build()
}

pub fn open(source: Source) -> File {
	File::from_source(source, file())
}

/// Nodes of the list starting at `fragment`, across every fragment of the
/// chain. A fragment seen twice ends the walk.
pub fn list_nodes(cx: &Context, fragment: Field) -> Result<Vec<Field>> {
	let mut seen = HashSet::new();
	let mut res = Vec::new();
	let mut next = Some(fragment);
	while let Some(fragment) = next.take() {
		if !seen.insert(fragment.offset) {
			warn!("[list_nodes] Fragment chain loops back to {:#x}", fragment.offset);
			break;
		}
		let reference = fragment.field("nextFragment")?;
		if reference.pointer().map_or(false, |pointer| !pointer.is_nil() && pointer.length != Some(0)) {
			next = Some(reference.dereference(cx)?);
		}
		if let Some(nodes) = fragment.get("rgFileNodes") {
			res.extend(nodes.children().iter().filter(|node| !ends_list(node)).cloned());
		}
	}
	debug!("[list_nodes] {} nodes", res.len());
	Ok(res)
}

/// The root file node list of a decoded file.
pub fn root_list(cx: &Context, file: &Field) -> Result<Vec<Field>> {
	list_nodes(cx, file.field("header.fcrFileNodeListRoot")?.dereference(cx)?)
}

/// The nodes of the list a list-reference node points at.
pub fn child_list(cx: &Context, node: &Field) -> Result<Option<Vec<Field>>> {
	if node.int_at("header.bits.BaseType") != Some(BASE_TYPE_LIST as i128) {
		return Ok(None);
	}
	let reference = node.field("body.ref")?;
	Ok(Some(list_nodes(cx, reference.dereference(cx)?)?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::io::Buffer;

	fn node_bits(id: u32, size: u32, stp: u32, cb: u32, base: u32) -> [u8; 4] {
		(id | size << 10 | stp << 23 | cb << 25 | base << 27).to_le_bytes()
	}

	fn fragment_bytes(id: u32, nodes: &[u8]) -> Vec<u8> {
		let mut data = LIST_MAGIC.to_le_bytes().to_vec();
		data.extend_from_slice(&id.to_le_bytes());
		data.extend_from_slice(&0u32.to_le_bytes());
		data.extend_from_slice(nodes);
		data.extend_from_slice(&[0xFF; 8]);
		data.extend_from_slice(&0u32.to_le_bytes());
		data.extend_from_slice(&FRAGMENT_FOOTER.to_le_bytes());
		data
	}

	/// A header, a root list of three nodes, and the list its reference
	/// node points at.
	fn store() -> Vec<u8> {
		let second = 1024 + 76;
		let mut nodes = node_bits(OBJECT_SPACE_MANIFEST_LIST_START as u32, 24, 0, 0, 0).to_vec();
		nodes.extend_from_slice(&[0xAB; 16]);
		nodes.extend_from_slice(&1u32.to_le_bytes());
		nodes.extend_from_slice(&node_bits(REVISION_MANIFEST_LIST_REFERENCE as u32, 12, 1, 0, 2));
		nodes.extend_from_slice(&(second as u32).to_le_bytes());
		nodes.extend_from_slice(&64u32.to_le_bytes());
		nodes.extend_from_slice(&node_bits(CHUNK_TERMINATOR as u32, 4, 0, 0, 0));
		let root = fragment_bytes(0x10, &nodes);
		assert_eq!(root.len(), 76);

		let mut nodes = node_bits(GLOBAL_ID_TABLE_ENTRY_X as u32, 24, 0, 0, 0).to_vec();
		nodes.extend_from_slice(&7u32.to_le_bytes());
		nodes.extend_from_slice(&[0xCD; 16]);
		nodes.extend_from_slice(&node_bits(CHUNK_TERMINATOR as u32, 4, 0, 0, 0));
		let child = fragment_bytes(0x11, &nodes);
		assert_eq!(child.len(), 64);

		let mut data = vec![0u8; 1024];
		data[64..68].copy_from_slice(&0x2Au32.to_le_bytes());
		data[148..156].copy_from_slice(&[0xFF; 8]);
		data[160..168].copy_from_slice(&[0xFF; 8]);
		data[172..180].copy_from_slice(&1024u64.to_le_bytes());
		data[180..184].copy_from_slice(&76u32.to_le_bytes());
		data[184..192].copy_from_slice(&[0xFF; 8]);
		data[196..204].copy_from_slice(&(1024u64 + 76 + 64).to_le_bytes());
		data.extend(root);
		data.extend(child);
		data
	}

	#[test]
	fn node_lists_are_followed() {
		let data = store();
		let file = open(Buffer::source(data.clone()));
		let root = file.load().unwrap();
		assert_eq!(root.find("header.ffvLastCodeThatWroteToThisFile").unwrap().summary(), ".one(0x2a)");
		assert_eq!(root.get("data").map(|d| d.size), Some(140));

		let cx = file.context();
		let nodes = root_list(cx, &root).unwrap();
		assert_eq!(nodes.len(), 2);
		assert_eq!(nodes[0].type_name(), "ObjectSpaceManifestListStartFND");
		assert_eq!(nodes[0].int_at("body.gosid.n"), Some(1));
		assert!(child_list(cx, &nodes[0]).unwrap().is_none());

		let children = child_list(cx, &nodes[1]).unwrap().unwrap();
		assert_eq!(children.len(), 1);
		assert_eq!(children[0].type_name(), "GlobalIdTableEntryFNDX");
		assert_eq!(children[0].int_at("body.index"), Some(7));
		assert_eq!(root.encode().unwrap(), data);
	}

	#[test]
	fn unknown_nodes_keep_their_bytes() {
		let mut data = node_bits(0x3FE, 8, 0, 0, 0).to_vec();
		data.extend_from_slice(&[1, 2, 3, 4]);
		let cx = Context::new(Buffer::source(data));
		let node = cx.decode(&file_node(), 0).unwrap();
		assert_eq!(node.size, 8);
		assert_eq!(node.type_name(), "FileNode(0x3fe)");
		assert_eq!(node.find("body").and_then(Field::bytes), Some(&[1, 2, 3, 4][..]));
	}

	#[test]
	fn compressed_references_scale_by_eight() {
		let mut data = node_bits(FILE_DATA_STORE_LIST_REFERENCE as u32, 8, 2, 3, 2).to_vec();
		data.extend_from_slice(&[0x10, 0x00, 0x04, 0x00]);
		let cx = Context::new(Buffer::source(data));
		let node = cx.decode(&file_node(), 0).unwrap();
		let pointer = node.find("body.ref").and_then(Field::pointer).unwrap();
		assert_eq!(pointer.address, Some(crate::engine::Address::Local(0x80)));
		assert_eq!(pointer.length, Some(32));
	}

	#[test]
	fn property_sets_nest() {
		let mut data = vec![2, 0];
		data.extend_from_slice(&(0x1C01u32 | (PRT_FOUR_BYTES as u32) << 26).to_le_bytes());
		data.extend_from_slice(&(0x1C02u32 | (PRT_PROPERTY_SET as u32) << 26).to_le_bytes());
		data.extend_from_slice(&0x1234_5678u32.to_le_bytes());
		data.extend_from_slice(&[1, 0]);
		data.extend_from_slice(&(0x1C03u32 | (PRT_ONE_BYTE as u32) << 26).to_le_bytes());
		data.push(9);
		let cx = Context::new(Buffer::source(data.clone()));
		let set = cx.decode(&property_set(), 0).unwrap();
		assert_eq!(set.size, data.len() as u64);
		let values = set.get("rgData").unwrap().children();
		assert_eq!(values[0].int(), Some(0x1234_5678));
		assert_eq!(values[1].shape.name(), "PropertySet");
		assert_eq!(values[1].find("rgData").map(|d| d.children()[0].int()), Some(Some(9)));
		assert_eq!(set.find("rgPrids").unwrap().children()[1].bit("type"), Some(PRT_PROPERTY_SET));
	}

	#[test]
	fn prop_sets_skip_absent_streams() {
		let mut data = (1u32 | 1 << 31).to_le_bytes().to_vec();
		data.extend_from_slice(&[5, 0, 0, 0]);
		data.extend_from_slice(&[1, 0]);
		data.extend_from_slice(&(0x08u32 | (PRT_OBJECT_ID as u32) << 26).to_le_bytes());
		data.extend_from_slice(&[0, 0]);
		let cx = Context::new(Buffer::source(data));
		let set = cx.decode(&object_space_object_prop_set(), 0).unwrap();
		assert_eq!(set.get("OSIDs").map(|f| f.size), Some(0));
		assert_eq!(set.find("OIDs.body").map(Field::len), Some(1));
		assert_eq!(set.get("padding").map(|f| f.size), Some(2));
		assert_eq!(set.size, 16);
	}
}
