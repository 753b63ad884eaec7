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

use std::io;
use thiserror::Error;

/// Recoverable decode problems. These are attached to the offending field
/// as an annotation instead of aborting the parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
	#[error("truncated at offset {offset:#x}: need {need} bytes, have {have}")]
	Truncated { offset: u64, need: u64, have: u64 },

	#[error("no definition for {key}")]
	BadDispatch { key: String },

	#[error("{what} declares {declared} bytes but only {available} are available")]
	Inconsistent { what: String, declared: u64, available: u64 },

	#[error("chain overran its blocksize of {blocksize} bytes at offset {offset:#x}")]
	ChainOverrun { offset: u64, blocksize: u64 },

	#[error("{value:#x} is not a member of {name}")]
	BadEnum { name: &'static str, value: u64 },
}

impl Fault {
	/// Whether a sequence has to stop reading after an element carrying this fault.
	pub fn stops(&self) -> bool {
		match self {
			Fault::Truncated { .. } | Fault::ChainOverrun { .. } => true,
			_ => false,
		}
	}
}

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Fault(#[from] Fault),

	#[error("bad magic in {field}: expected {expected}, found {found}")]
	BadMagic { field: String, expected: String, found: String },

	#[error("value {value} does not fit in {width} bits")]
	OutOfRange { value: i128, width: u32 },

	#[error("back-fill did not settle after {passes} passes")]
	BackfillLoop { passes: usize },

	#[error("no stream named {0:?}")]
	StreamNotFound(String),

	#[error("pointer is nil")]
	NilPointer,

	#[error("{0}")]
	Schema(String),

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
}

impl Error {
	/// Turns the error into an annotation when the decoder can carry on past it.
	pub fn into_fault(self) -> Result<Fault> {
		match self {
			Error::Fault(fault) => Ok(fault),
			Error::Schema(message) => Ok(Fault::BadDispatch { key: message }),
			Error::StreamNotFound(name) => Ok(Fault::BadDispatch { key: format!("stream {:?}", name) }),
			Error::NilPointer => Ok(Fault::BadDispatch { key: "nil pointer".to_owned() }),
			other => Err(other),
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn schema<T>(message: String) -> Result<T> {
	Err(Error::Schema(message))
}
