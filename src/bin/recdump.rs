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

extern crate clap;

use std::io::stdin;
use std::fs::File as FsFile;
use std::rc::Rc;
use clap::{Arg, App};
use log::{info, LevelFilter};
use recframe::{Error, Result};
use recframe::cfbf::Container;
use recframe::engine::{Field, Value};
use recframe::formats::{ags, excel, officeart, onestore, pgm, powerpoint, propertyset, winword, File};
use recframe::io::{Buffer, FileSource, Source};

const FORMATS: &[&str] = &["ags", "pgm", "officeart", "excel", "powerpoint", "word", "onestore", "propertyset"];

fn main() {
	let matches = App::new("recdump")
		.version("1.0")
		.author("Steve Muller <steve.muller@outlook.com>")
		.about("This utility decodes a file with one of the built-in schemas and prints the resulting field tree, one field per line with its offset, size and value.")
		.arg(Arg::with_name("verbose")
			.short("v")
			.help("Increases the debug verbosity. This will print a lot of debug messages to standard error (STDERR). Can be used up to 3 times.")
			.multiple(true)
			.takes_value(false))
		.arg(Arg::with_name("format")
			.value_name("FORMAT")
			.help("The schema to decode the input with. Office formats expect a compound file and read their stream from it.")
			.short("f")
			.long("format")
			.possible_values(FORMATS)
			.required(true))
		.arg(Arg::with_name("stream")
			.value_name("NAME")
			.help("The property set stream to decode (propertyset only). Defaults to the summary information.")
			.long("stream")
			.required(false))
		.arg(Arg::with_name("depth")
			.value_name("LEVELS")
			.help("Only print fields this many levels deep.")
			.short("d")
			.long("depth")
			.required(false))
		.arg(Arg::with_name("input")
			.value_name("FILE")
			.help("The file to decode. If omitted, the file will be read from STDIN instead.")
			.short("i")
			.long("input")
			.required(false))
	.get_matches();

	let level = match matches.occurrences_of("verbose") {
		0 => LevelFilter::Warn,
		1 => LevelFilter::Info,
		2 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	};
	env_logger::Builder::new().filter_level(level).format_timestamp(None).init();

	let depth = match matches.value_of("depth").map(str::parse::<usize>) {
		Some(Ok(depth)) => depth,
		Some(Err(_)) => {
			eprintln!("ERROR: --depth expects a number");
			std::process::exit(2);
		},
		None => usize::MAX,
	};
	let format = matches.value_of("format").unwrap_or("");
	let input = matches.value_of("input").unwrap_or("");
	let stream = matches.value_of("stream").unwrap_or(propertyset::SUMMARY_INFORMATION);

	if let Err(e) = run(format, input, stream, depth) {
		eprintln!("ERROR: {}", e);
		std::process::exit(1);
	}
}

fn open_input(path: &str) -> Result<Source> {
	match path {
		"" | "-" => Ok(Rc::new(Buffer::from_reader(stdin())?)),
		path => Ok(Rc::new(FileSource::new(FsFile::open(path)?)?)),
	}
}

fn select(format: &str, source: Source, stream: &str) -> Result<File> {
	let container = || Container::new(source.clone()).map(Rc::new);
	Ok(match format {
		"ags" => ags::open(source.clone()),
		"pgm" => pgm::open(source.clone()),
		"officeart" => officeart::open(source.clone()),
		"onestore" => onestore::open(source.clone()),
		"excel" => excel::from_container(container()?)?,
		"powerpoint" => powerpoint::document(container()?)?,
		"word" => winword::open(container()?)?,
		"propertyset" => propertyset::open(container()?, stream)?,
		other => return Err(Error::Schema(format!("unknown format {:?}", other))),
	})
}

fn run(format: &str, input: &str, stream: &str, depth: usize) -> Result<()> {
	let file = select(format, open_input(input)?, stream)?;
	info!("[run] Decoding as {}", file.shape().name());
	let root = file.load()?;
	print_field(&root, 0, depth);
	if !root.is_complete() {
		info!("[run] {} faults in the tree", root.faults().len());
	}
	Ok(())
}

fn print_field(field: &Field, level: usize, depth: usize) {
	let indent = "  ".repeat(level);
	match &field.value {
		Value::Fields(children) | Value::Items(children) => {
			println!("{}[{:#010x}+{}] {} {}", indent, field.offset, field.size, field.name(), field.type_name());
			if level < depth {
				for child in children {
					print_field(child, level + 1, depth);
				}
			}
		},
		_ => println!("{}[{:#010x}+{}] {} = {}", indent, field.offset, field.size, field.name(), field.summary()),
	}
}
