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


//! Declarative codecs for tagged binary records: compound documents and the
//! streams they carry (OfficeArt, Excel, PowerPoint, Word, OneStore, OLE
//! property sets), Adventure Game Studio save games and PGM packets.

pub mod error;
pub mod io;
pub mod engine;
pub mod cfbf;
pub mod formats;

pub use crate::error::{Error, Fault, Result};
