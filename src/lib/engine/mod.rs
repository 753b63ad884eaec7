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


//! The structural codec shared by every format: primitives, structures whose
//! member shapes depend on earlier members, arrays and chains, tagged records
//! dispatched through registries, and pointers that may cross into sibling
//! streams.

pub mod primitive;
pub mod shape;
pub mod field;
pub mod scope;
pub mod decode;
pub mod record;
pub mod pointer;
pub mod alloc;
mod chain;

pub use self::alloc::{settle, Init, MAX_PASSES};
pub use self::decode::Span;
pub use self::field::{Field, Name, Value};
pub use self::pointer::{Address, Addressing, Pointer, PointerSpec, Selector, Target};
pub use self::primitive::{BitStruct, Charset, Endian, Enumeration, Integer, StrSpec};
pub use self::primitive::{I16, I32, I64, I8, U16, U16BE, U24, U32, U32BE, U64, U8};
pub use self::record::{raw, Dispatch, Key, KeyFn, RecordSpec, Registry};
pub use self::scope::{Context, Scope};
pub use self::shape::{align, latest, Array, Kind, Length, Shape, Structure};
