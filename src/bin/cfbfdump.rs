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

#[macro_use] // enable value_t! macro
extern crate clap;

use std::io::{stdin, stdout, Write};
use std::fs::File;
use std::rc::Rc;
use clap::{Arg, App, AppSettings, SubCommand, ArgMatches};
use log::{debug, LevelFilter};
use recframe::Result;
use recframe::cfbf::{Container, Object, ObjectType};
use recframe::io::{Buffer, FileSource, Source};

fn main() {
	let matches = App::new("cfbfdump")
		.version("1.0")
		.author("Steve Muller <steve.muller@outlook.com>")
		.about("This utility reads a Compound File Binary File Format (also known as OLE file, COM file, or Structured Storage file) and dumps all contained files.")
		.setting(AppSettings::SubcommandRequired)
		.arg(Arg::with_name("verbose")
			.short("v")
			.help("Increases the debug verbosity. This will print a lot of debug messages to standard error (STDERR). Can be used up to 3 times.")
			.multiple(true)
			.takes_value(false))
		.subcommand(SubCommand::with_name("list")
			.about("Lists all files contained in the CFBF file. Each output line represents a file, and contains the internal file ID and the file path, separated by a space.")
			.arg(Arg::with_name("input")
				.value_name("FILE")
				.help("A file in Compound File Binary File Format (CFBF). If omitted, the file will be read from STDIN instead.")
				.short("i")
				.long("input")
				.required(false))
		)
		.subcommand(SubCommand::with_name("dump")
			.about("Dumps a stream from the CFBF file.")
			.arg(Arg::with_name("id")
				.value_name("STREAMID")
				.help("The ID of the stream that shall be dumped.")
				.long("id")
				.required_unless("path"))
			.arg(Arg::with_name("path")
				.value_name("PATH")
				.help("The slash-separated path of the stream that shall be dumped, as an alternative to --id.")
				.long("path")
				.conflicts_with("id"))
			.arg(Arg::with_name("output")
				.value_name("FILE")
				.help("The file where the stream shall be written to. If this parameter is not specified (or has the value '-'), the stream will be written to STDOUT instead.")
				.short("o")
				.long("output")
				.required(false))
			.arg(Arg::with_name("input")
				.value_name("FILE")
				.help("A file in Compound File Binary File Format (CFBF). If omitted, the file will be read from STDIN instead.")
				.short("i")
				.long("input")
				.required(false))
		)
	.get_matches();

	init_logging(matches.occurrences_of("verbose"));

	if let Err(e) = dispatch(matches) {
		eprintln!("ERROR: {}", e);
		std::process::exit(1);
	}
}

fn init_logging(verbosity: u64) {
	let level = match verbosity {
		0 => LevelFilter::Warn,
		1 => LevelFilter::Info,
		2 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	};
	env_logger::Builder::new().filter_level(level).format_timestamp(None).init();
}

fn open_input(matches: &ArgMatches) -> Result<Source> {
	match matches.value_of("input").unwrap_or("") {
		"" | "-" => Ok(Rc::new(Buffer::from_reader(stdin())?)),
		path => Ok(Rc::new(FileSource::new(File::open(path)?)?)),
	}
}

fn dispatch(matches: ArgMatches) -> Result<()> {
	match matches.subcommand() {
		("list", Some(submatches)) => dispatch_list(submatches),
		("dump", Some(submatches)) => dispatch_dump(submatches),
		_ => unreachable!("clap requires a subcommand"),
	}
}

fn dispatch_list(matches: &ArgMatches) -> Result<()> {
	let container = Container::new(open_input(matches)?)?;
	let root = container.get_root_object()?;
	list_recursive(&container, &root, "")
}

fn list_recursive(container: &Container, object: &Object, pathprefix: &str) -> Result<()> {
	let mut path = pathprefix.to_owned();
	if object.object_type != ObjectType::RootStorage {
		path.push('/');
		path.push_str(&object.name);
	}

	// Output object
	match object.object_type {
		ObjectType::Storage | ObjectType::RootStorage => println!("{} {}/", object.id, path),
		_ => println!("{} {}", object.id, path),
	}

	// Siblings share the prefix, children extend it
	if let Some(left_sibling_object) = container.get_left_sibling(object)? {
		list_recursive(container, &left_sibling_object, pathprefix)?;
	}
	if let Some(right_sibling_object) = container.get_right_sibling(object)? {
		list_recursive(container, &right_sibling_object, pathprefix)?;
	}
	if let Some(child_object) = container.get_first_child(object)? {
		list_recursive(container, &child_object, &path)?;
	}

	Ok(())
}

fn dispatch_dump(matches: &ArgMatches) -> Result<()> {
	let container = Container::new(open_input(matches)?)?;
	let object = match matches.value_of("path") {
		Some(path) => container.find_stream(path)?,
		None => container.get_object(value_t!(matches, "id", u32).unwrap_or_else(|e| e.exit()))?,
	};
	debug!("[dump] Stream #{} '{}'", object.id, object.name);

	let mut output: Box<dyn Write> = match matches.value_of("output").unwrap_or("") {
		"" | "-" => Box::new(stdout()),
		path => Box::new(File::create(path)?),
	};
	container.dump_stream(&object, &mut output)?;
	output.flush()?;
	Ok(())
}
