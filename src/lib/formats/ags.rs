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

//! Adventure Game Studio save games: signature, description, the player's
//! slot text and screenshot, then a list of components each framed by
//! `<Name>` and `</Name>` tags around a versioned, sized record.

use std::io::{Read, Write};
use libflate::zlib::{Decoder, Encoder};
use log::{debug, warn};
use crate::engine::{BitStruct, Charset, Dispatch, Field, Integer, RecordSpec, Scope, Shape, Structure};
use crate::engine::{I16, I32, U8};
use crate::error::{Error, Result};
use crate::io::Source;
use super::File;

pub const SIGNATURE: &str = "Adventure Game Studio saved game v2";
pub const COMPONENT_LIST: &str = "Components";

const GAME_DATA_VERSIONS: &[(&str, u64)] = &[
	("kGameVersion_Undefined", 0),
	("kGameVersion_200", 5),
	("kGameVersion_201", 6),
	("kGameVersion_203", 7),
	("kGameVersion_207", 9),
	("kGameVersion_220", 11),
	("kGameVersion_230", 12),
	("kGameVersion_250", 18),
	("kGameVersion_251", 19),
	("kGameVersion_253", 20),
	("kGameVersion_254", 21),
	("kGameVersion_255", 22),
	("kGameVersion_256", 24),
	("kGameVersion_260", 25),
	("kGameVersion_261", 26),
	("kGameVersion_262", 27),
	("kGameVersion_270", 31),
	("kGameVersion_272", 32),
	("kGameVersion_300", 35),
	("kGameVersion_301", 36),
	("kGameVersion_310", 37),
	("kGameVersion_311", 39),
	("kGameVersion_312", 40),
	("kGameVersion_320", 41),
	("kGameVersion_321", 42),
	("kGameVersion_330", 43),
	("kGameVersion_331", 44),
	("kGameVersion_340_1", 45),
	("kGameVersion_340_2", 46),
	("kGameVersion_340_4", 47),
	("kGameVersion_341", 48),
	("kGameVersion_341_2", 49),
	("kGameVersion_350", 50),
	("kGameVersion_360", 3_060_000),
	("kGameVersion_360_11", 3_060_011),
	("kGameVersion_360_16", 3_060_016),
	("kGameVersion_360_21", 3_060_021),
	("kGameVersion_360_41", 3_060_041),
	("kGameVersion_361", 3_060_100),
	("kGameVersion_361_10", 3_060_110),
	("kGameVersion_361_14", 3_060_114),
	("kGameVersion_362", 3_060_200),
	("kGameVersion_362_03", 3_060_203),
	("kGameVersion_363", 3_060_300),
];

/// Length-prefixed string; a negative length reads as empty.
pub fn string_prefixed() -> Shape {
	Structure::new("StringPrefixed")
		.field("length", I32)
		.field_with("value", |scope| Ok(Shape::string(scope.int("length")?.max(0) as u64, Charset::Latin1)))
		.backfill("length", |fields| Ok(fields.iter().find(|f| f.name == "value").map(|value| value.size as i128)))
		.build()
}

fn environment() -> Shape {
	Structure::new("Environment")
		.field("engine_name", string_prefixed())
		.field("engine_version", string_prefixed())
		.field("game_guid", string_prefixed())
		.field("game_name", string_prefixed())
		.field("game_res", string_prefixed())
		.field("game_version", I32)
		.field("color_depth", I32)
		.field("uniqueid", I32)
		.build()
}

/// `size` counts itself, the environment and whatever follows it.
fn description() -> Shape {
	Structure::new("Description")
		.field("version", Shape::enumeration("GameDataVersion", I32, GAME_DATA_VERSIONS))
		.field("size", I32)
		.field("env", environment())
		.field_with("padding", |scope| {
			let env = scope.get("env").map_or(0, |env| env.size);
			Ok(Shape::block((scope.int("size")?.max(0) as u64).saturating_sub(env + 4)))
		})
		.backfill("size", |fields| Ok(Some(4 + fields.iter()
			.filter(|f| f.name == "env" || f.name == "padding")
			.map(|f| f.size as i128)
			.sum::<i128>())))
		.build()
}

fn image_flags() -> Shape {
	Shape::bits(BitStruct::msb_first("SaveImageFlags", Integer::new(4, crate::engine::Endian::Little, false), &[
		(30, "Unused"),
		(1, "Deflate"),
		(1, "Present"),
	]))
}

/// Bytes per pixel at `depth` bits, rounded up.
fn pixel_size(depth: i128) -> u64 {
	(depth.max(0) as u64 + 7) / 8
}

fn bitmap() -> Shape {
	Structure::new("Bitmap")
		.field("Width", I32)
		.field("Height", I32)
		.field("ColorDepth", I32)
		.field_with("data", |scope| {
			let stride = scope.int("Width")?.max(0) as u64 * pixel_size(scope.int("ColorDepth")?);
			Ok(Shape::block(stride * scope.int("Height")?.max(0) as u64))
		})
		.build()
}

/// `size` counts itself and the deflated pixels.
fn compressed_bitmap() -> Shape {
	Structure::new("CompressedBitmap")
		.field("Width", I32)
		.field("Height", I32)
		.field("ColorDepth", I32)
		.field("reserved", I32)
		.field("size", I32)
		.field_with("data", |scope| Ok(Shape::block((scope.int("size")?.max(0) as u64).saturating_sub(4))))
		.backfill("size", |fields| Ok(fields.iter().find(|f| f.name == "data").map(|data| data.size as i128 + 4)))
		.build()
}

fn user_image() -> Shape {
	Structure::new("UserImage")
		.field("flags", image_flags())
		.field_with("bitmap", |scope| Ok(match (scope.int("flags.Present")?, scope.int("flags.Deflate")?) {
			(0, _) => Shape::empty(),
			(_, 0) => bitmap(),
			_ => compressed_bitmap(),
		}))
		.build()
}

fn user_description() -> Shape {
	Structure::new("UserDescription")
		.field("user_text", string_prefixed())
		.field("user_image", user_image())
		.build()
}

/// Pixels of a decoded `UserImage`, inflated when stored deflated. None
/// when the save has no screenshot.
pub fn image_pixels(image: &Field) -> Result<Option<Vec<u8>>> {
	if image.int_at("flags.Present") != Some(1) {
		return Ok(None);
	}
	let data = image.find("bitmap.data").and_then(Field::bytes).unwrap_or(&[]);
	if image.int_at("flags.Deflate") != Some(1) {
		return Ok(Some(data.to_vec()));
	}
	let mut pixels = Vec::new();
	Decoder::new(data)?.read_to_end(&mut pixels)?;
	debug!("[image_pixels] Inflated {} bytes to {}", data.len(), pixels.len());
	Ok(Some(pixels))
}

/// Deflates pixels the way compressed screenshots store them.
pub fn deflate(pixels: &[u8]) -> Result<Vec<u8>> {
	let mut encoder = Encoder::new(Vec::new())?;
	encoder.write_all(pixels)?;
	Ok(encoder.finish().into_result()?)
}

#[derive(Clone, Copy)]
enum Slot {
	Byte,
	Short,
	Int,
	Bool,
	Shorts(u64),
	Ints(u64),
	Text(u64),
	Bytes(u64),
	Items(fn() -> Shape, u64),
	Nested(fn() -> Shape),
}

fn table(name: &'static str, slots: &[(&'static str, Slot)]) -> Shape {
	slots.iter().fold(Structure::new(name), |table, &(field, slot)| table.field(field, match slot {
		Slot::Byte => Shape::from(U8),
		Slot::Short => Shape::from(I16),
		Slot::Int => Shape::from(I32),
		Slot::Bool => boolean(),
		Slot::Shorts(n) => Shape::count(I16.into(), n),
		Slot::Ints(n) => Shape::count(I32.into(), n),
		Slot::Text(n) => Shape::string(n, Charset::Latin1),
		Slot::Bytes(n) => Shape::block(n),
		Slot::Items(element, n) => Shape::count(element(), n),
		Slot::Nested(shape) => shape(),
	})).build()
}

fn boolean() -> Shape {
	Shape::enumeration("Bool", U8, &[("FALSE", 0), ("TRUE", 1)])
}

fn rgb() -> Shape {
	table("RGB", &[("r", Slot::Byte), ("g", Slot::Byte), ("b", Slot::Byte), ("a", Slot::Byte)])
}

fn queued_audio_item() -> Shape {
	table("QueuedAudioItem", &[
		("audioClipIndex", Slot::Short),
		("priority", Slot::Short),
		("repeat", Slot::Bool),
		("reserved", Slot::Int),
	])
}

fn do_once() -> Shape {
	Structure::new("DoOnce")
		.field("Count", I32)
		.field_with("Tokens", |scope| Ok(Shape::count(string_prefixed(), scope.int("Count")?.max(0) as u64)))
		.build()
}

/// `Count` items of `element`.
fn room_items(name: &'static str, element: fn() -> Shape) -> Shape {
	Structure::new(name)
		.field("Count", I32)
		.field_with("Items", move |scope| Ok(Shape::count(element(), scope.int("Count")?.max(0) as u64)))
		.build()
}

fn camera() -> Shape {
	table("Camera", &[("flags", Slot::Int), ("Left", Slot::Int), ("Top", Slot::Int), ("Width", Slot::Int), ("Height", Slot::Int)])
}

fn viewport() -> Shape {
	table("Viewport", &[
		("flags", Slot::Int),
		("Left", Slot::Int),
		("Top", Slot::Int),
		("Width", Slot::Int),
		("Height", Slot::Int),
		("ZOrder", Slot::Int),
		("ID", Slot::Int),
	])
}

const OPT_HIGHESTOPTION_321: u64 = 39;
const MAXGLOBALVARS: u64 = 50;
const MAXGSVALUES: u64 = 500;
const MAX_WALK_AREAS: u64 = 16;
const MAX_PARSED_WORDS: u64 = 15;
const MAX_TIMERS: u64 = 21;
const LEGACY_MAXSAVEGAMES: u64 = 50;
const MAX_QUEUED_MUSIC: u64 = 10;
const PLAYMP3FILE_MAX_FILENAME_LEN: u64 = 50;
const MAXGLOBALSTRINGS: u64 = 51;
const MAX_MAXSTRLEN: u64 = 200;
const LEGACY_GAMESTATE_GAMENAMELENGTH: u64 = 100;

fn game_setup() -> Shape {
	table("GameSetupStruct", &[
		("options", Slot::Ints(OPT_HIGHESTOPTION_321 + 1)),
		("OPT_LIPSYNCTEXT", Slot::Int),
		("playercharacter", Slot::Int),
		("dialog_bullet", Slot::Int),
		("hotdot", Slot::Short),
		("hotdotouter", Slot::Short),
		("invhotdotsprite", Slot::Int),
		("default_lipsync_frame", Slot::Int),
	])
}

fn game_play_state() -> Shape {
	use self::Slot::*;
	table("GamePlayState", &[
		("score", Int), ("usedmode", Int), ("disabled_user_interface", Int), ("gscript_timer", Int), ("debug_mode", Int),
		("globalvars", Ints(MAXGLOBALVARS)),
		("messagetime", Int), ("usedinv", Int), ("inv_top", Int), ("inv_numdisp", Int), ("inv_numorder", Int),
		("inv_numinline", Int), ("text_speed", Int), ("sierra_inv_color", Int), ("talkanim_speed", Int),
		("inv_item_wid", Int), ("inv_item_hit", Int), ("speech_text_shadow", Int), ("swap_portrait_side", Int),
		("speech_textwindow_gui", Int), ("follow_change_room_timer", Int), ("totalscore", Int), ("skip_display", Int),
		("no_multiloop_repeat", Int), ("roomscript_finished", Int), ("used_inv_on", Int), ("no_textbg_when_voice", Int),
		("max_dialogoption_width", Int), ("no_hicolor_fadein", Int), ("bgspeech_game_speed", Int),
		("bgspeech_stay_on_display", Int), ("unfactor_speech_from_textlength", Int), ("mp3_loop_before_end", Int),
		("speech_music_drop", Int), ("in_cutscene", Int), ("fast_forward", Int), ("room_width", Int), ("room_height", Int),
		("game_speed_modifier", Int), ("score_sound", Int), ("takeover_data", Int), ("replay_hotkey_unused", Int),
		("dialog_options_pad_x", Int), ("dialog_options_pad_y", Int), ("narrator_speech", Int),
		("ambient_sounds_persist", Int), ("lipsync_speed", Int), ("close_mouth_speech_time", Int),
		("disable_antialiasing", Int), ("text_speed_modifier", Int), ("text_align", Int), ("speech_bubble_width", Int),
		("min_dialogoption_width", Int), ("disable_dialog_parser", Int), ("anim_background_speed", Int),
		("top_bar_backcolor", Int), ("top_bar_textcolor", Int), ("top_bar_bordercolor", Int), ("top_bar_borderwidth", Int),
		("top_bar_ypos", Int), ("screenshot_width", Int), ("screenshot_height", Int), ("top_bar_font", Int),
		("speech_text_align", Int), ("auto_use_walkto_points", Int), ("inventory_greys_out", Int),
		("skip_speech_specific_key", Int), ("abort_key", Int), ("fade_to_red", Int), ("fade_to_green", Int),
		("fade_to_blue", Int), ("show_single_dialog_option", Int), ("keep_screen_during_instant_transition", Int),
		("read_dialog_option_colour", Int), ("stop_dialog_at_end", Int), ("speech_portrait_placement", Int),
		("speech_portrait_x", Int), ("speech_portrait_y", Int), ("speech_display_post_time_ms", Int),
		("dialog_options_highlight_color", Int), ("randseed", Int), ("player_on_region", Int),
		("check_interaction_only", Int), ("bg_frame", Int), ("bg_anim_delay", Int), ("music_vol_was", Int),
		("wait_counter", Short), ("mbounds_left", Short), ("mbounds_right", Short), ("mbounds_top", Short), ("mbounds_bottom", Short),
		("fade_effect", Int), ("bg_frame_locked", Int),
		("globalscriptvars", Ints(MAXGSVALUES)),
		("cur_music_number", Int), ("music_repeat", Int), ("music_master_volume", Int), ("digital_master_volume", Int),
		("walkable_areas_on", Bytes(MAX_WALK_AREAS)),
		("screen_flipped", Short), ("entered_at_x", Int), ("entered_at_y", Int), ("entered_edge", Int),
		("speech_mode", Int), ("speech_skip_style", Int),
		("script_timers", Ints(MAX_TIMERS)),
		("sound_volume", Int), ("speech_volume", Int), ("normal_font", Int), ("speech_font", Int),
		("key_skip_wait", Byte), ("swap_portrait_lastchar", Int), ("separate_music_lib", Int),
		("in_conversation", Int), ("screen_tint", Int), ("num_parsed_words", Int),
		("parsed_words", Shorts(MAX_PARSED_WORDS)),
		("bad_parsed_word", Text(100)),
		("raw_color", Int),
		("filenumbers", Shorts(LEGACY_MAXSAVEGAMES)),
		("mouse_cursor_hidden", Int), ("silent_midi", Int), ("silent_midi_channel", Int),
		("current_music_repeating", Int), ("shakesc_delay", Int), ("shakesc_amount", Int), ("shakesc_length", Int),
		("rtint_red", Int), ("rtint_green", Int), ("rtint_blue", Int), ("rtint_level", Int), ("rtint_light", Int),
		("rtint_enabled", Bool),
		("end_cutscene_music", Int), ("skip_until_char_stops", Int), ("get_loc_name_last_time", Int),
		("get_loc_name_save_cursor", Int), ("restore_cursor_mode_to", Int), ("restore_cursor_image_to", Int),
		("music_queue_size", Short),
		("music_queue", Shorts(MAX_QUEUED_MUSIC)),
		("new_music_queue_size", Short),
		("new_music_queue", Items(queued_audio_item, MAX_QUEUED_MUSIC)),
		("crossfading_out_channel", Short), ("crossfade_step", Short), ("crossfade_out_volume_per_step", Short),
		("crossfade_initial_volume_out", Short), ("crossfading_in_channel", Short),
		("crossfade_in_volume_per_step", Short), ("crossfade_final_volume_in", Short),
		("takeover_from", Bytes(50)),
		("playmp3file_name", Text(PLAYMP3FILE_MAX_FILENAME_LEN)),
		("globalstrings", Bytes(MAXGLOBALSTRINGS * MAX_MAXSTRLEN)),
		("lastParserEntry", Bytes(MAX_MAXSTRLEN)),
		("game_name", Text(LEGACY_GAMESTATE_GAMENAMELENGTH)),
		("ground_level_areas_disabled", Int), ("next_screen_transition", Int), ("gamma_adjustment", Int),
		("temporarily_turned_off_character", Short), ("inv_backwards_compatibility", Short),
		("do_once_tokens", Nested(do_once)),
		("text_min_display_time_ms", Int), ("ignore_user_input_after_text_timeout_ms", Int),
		("voice_speech_flags", Int),
	])
}

fn game_state() -> Shape {
	use self::Slot::*;
	table("GameStateComponent", &[
		("setup", Nested(game_setup)),
		("palette", Items(rgb, 256)),
		("state", Nested(game_play_state)),
		("frames_per_second", Int), ("loopcounter", Int), ("ifacepopped", Int), ("game_paused", Int),
		("cur_mode", Int), ("cur_cursor", Int), ("mouse_on_iface", Int), ("viewcam_flags", Int),
		("room_cameras", Nested(|| room_items("RoomCameras", camera))),
		("room_viewports", Nested(|| room_items("RoomViewports", viewport))),
	])
}

/// Body of the component called `name`, if its layout is known.
fn handler(name: &str) -> Option<Shape> {
	match name {
		"Game State" => Some(game_state()),
		_ => None,
	}
}

/// Name inside `<Name>` or `</Name>`.
pub fn tag_name(tag: &str) -> &str {
	let inner = tag.strip_suffix('>').unwrap_or(tag);
	inner.strip_prefix("</").or_else(|| inner.strip_prefix('<')).unwrap_or(inner)
}

fn tag() -> Shape {
	Shape::terminated_string(b">\0")
}

fn component_header() -> Shape {
	Structure::new("ComponentHeader")
		.field("version", I32)
		.field("size", I32)
		.field("reserved", I32)
		.build()
}

/// Whether the component at the current position is closed by `</name>`.
/// The header's size says where the closing tag sits.
fn closes(scope: &Scope<'_>, name: &str) -> bool {
	let source = &scope.cx.source;
	let expected = format!("</{}>", name);
	let header = match source.read(scope.position, 12) {
		Ok(header) => header,
		Err(_) => return false,
	};
	let size = I32.from_bytes(&header[4..8]).max(0) as u64;
	match source.read(scope.position + 12 + size, expected.len()) {
		Ok(found) => found == expected.as_bytes(),
		Err(_) => false,
	}
}

/// The record between the tags. Known names get their layout; unknown
/// ones, and any whose closing tag does not match, keep raw bytes.
fn component(scope: &Scope<'_>) -> Result<Shape> {
	let open = scope.get("tagOpen").and_then(Field::text).unwrap_or_default();
	if open.starts_with("</") {
		return Ok(Shape::empty());
	}
	let name = tag_name(&open);
	let body = match handler(name) {
		Some(body) if closes(scope, name) => body,
		Some(_) => {
			warn!("[component] Closing tag of {:?} does not match, keeping it raw", name);
			Shape::Rest
		},
		None if closes(scope, name) => Shape::Rest,
		None => {
			warn!("[component] Closing tag of {:?} does not match", name);
			Shape::Rest
		},
	};
	Ok(RecordSpec::new("Component", component_header(), Dispatch::Fixed(body))
		.length("size", 0)
		.build())
}

fn tagged_component() -> Shape {
	Structure::new("TaggedComponent")
		.field("tagOpen", tag())
		.field_with("component", component)
		.field_with("tagClose", |scope| Ok(match scope.get("tagOpen").and_then(Field::text) {
			Some(open) if open.starts_with("</") => Shape::empty(),
			_ => tag(),
		}))
		.build()
}

fn ends_components(component: &Field) -> bool {
	component.find("tagOpen").and_then(Field::text).map_or(false, |tag| tag == format!("</{}>", COMPONENT_LIST))
}

fn common_components() -> Shape {
	Structure::new("CommonComponents")
		.field("tagOpen", tag())
		.field("components", Shape::terminated(tagged_component(), ends_components))
		.build()
}

pub fn save() -> Shape {
	Structure::new("SaveGame")
		.field("sig", Shape::string(SIGNATURE.len() as u64, Charset::Latin1))
		.magic("sig", SIGNATURE)
		.field("desc", description())
		.field("user", user_description())
		.field("common", common_components())
		.build()
}

pub fn open(source: Source) -> File {
	File::from_source(source, save())
}

/// Components of a decoded save by tag name, without the closing entry.
pub fn components(save: &Field) -> Result<Vec<(String, &Field)>> {
	let list = save.field("common.components")?;
	let mut res = Vec::new();
	for entry in list.children().iter().filter(|entry| !ends_components(entry)) {
		let open = entry.find("tagOpen").and_then(Field::text)
			.ok_or_else(|| Error::Schema(format!("component {} has no tag", entry.name)))?;
		res.push((tag_name(&open).to_owned(), entry.field("component")?));
	}
	Ok(res)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::{Context, Init};
	use crate::io::{Buffer, Writer};

	fn prefixed(w: &mut Writer, text: &str) {
		w.write_u32(text.len() as u32);
		w.write_bytes(text.as_bytes());
	}

	fn component(w: &mut Writer, open: &str, close: &str, data: &[u8]) {
		w.write_bytes(format!("<{}>", open).as_bytes());
		w.write_u32(1);
		w.write_u32(data.len() as u32);
		w.write_u32(0);
		w.write_bytes(data);
		w.write_bytes(format!("</{}>", close).as_bytes());
	}

	fn sample(pixels: &[u8]) -> Vec<u8> {
		let mut w = Writer::new();
		w.write_bytes(SIGNATURE.as_bytes());
		w.write_u32(3_060_041);
		let env = ["Adventure Game Studio run-time engine", "3.6.0.41", "{guid}", "Demo", ""];
		let env_size: usize = env.iter().map(|s| 4 + s.len()).sum::<usize>() + 12;
		w.write_u32((env_size + 4 + 2) as u32);
		for text in &env {
			prefixed(&mut w, text);
		}
		w.write_u32(360_041);
		w.write_u32(32);
		w.write_u32(7);
		w.write_bytes(&[0xEE, 0xEE]);

		prefixed(&mut w, "slot 1");
		let deflated = deflate(pixels).unwrap();
		w.write_u32(3);
		for &v in &[2u32, 1, 16, 0] {
			w.write_u32(v);
		}
		w.write_u32(deflated.len() as u32 + 4);
		w.write_bytes(&deflated);

		w.write_bytes(b"<Components>");
		component(&mut w, "Dynamic Sprites", "Dynamic Sprites", &[1, 2, 3, 4]);
		component(&mut w, "Overlays", "Overlayz", &[5, 6]);
		w.write_bytes(b"</Components>");
		w.into_inner()
	}

	#[test]
	fn saves_list_their_components() {
		let pixels = [1, 2, 3, 4];
		let data = sample(&pixels);
		let file = open(Buffer::source(data.clone()));
		let save = file.load().unwrap();
		assert_eq!(save.size, data.len() as u64);
		assert_eq!(save.find("desc.version").unwrap().summary(), "kGameVersion_360_41(0x2eb149)");
		assert_eq!(save.find("desc.env.game_name.value").and_then(Field::text), Some("Demo".to_owned()));
		assert_eq!(save.find("desc.padding").map(|p| p.size), Some(2));
		assert_eq!(save.find("user.user_text.value").and_then(Field::text), Some("slot 1".to_owned()));
		assert_eq!(image_pixels(save.field("user.user_image").unwrap()).unwrap(), Some(pixels.to_vec()));

		let components = components(&save).unwrap();
		let names: Vec<&str> = components.iter().map(|(name, _)| name.as_str()).collect();
		assert_eq!(names, vec!["Dynamic Sprites", "Overlays"]);
		assert_eq!(components[0].1.find("body").and_then(Field::bytes), Some(&[1, 2, 3, 4][..]));
		assert_eq!(components[1].1.int_at("header.size"), Some(2));
		assert_eq!(save.encode().unwrap(), data);
	}

	#[test]
	fn mismatched_tags_keep_the_bytes() {
		let data = sample(&[0]);
		let save = open(Buffer::source(data)).load().unwrap();
		let list = save.field("common.components").unwrap();
		assert_eq!(list.children()[1].find("tagClose").and_then(Field::text), Some("</Overlayz>".to_owned()));
		assert_eq!(list.children()[1].find("component.body").and_then(Field::bytes), Some(&[5, 6][..]));
		assert_eq!(list.len(), 3);
	}

	#[test]
	fn bad_signatures_fail() {
		let mut data = sample(&[0]);
		data[0] = b'a';
		assert!(open(Buffer::source(data)).load().is_err());
	}

	#[test]
	fn prefixed_strings_backfill_their_length() {
		let cx = Context::new(Buffer::source(Vec::new()));
		let text = cx.alloc(&string_prefixed(), Init::fields(vec![("value", "hello".into())])).unwrap();
		assert_eq!(text.int_at("length"), Some(5));
		assert_eq!(text.encode().unwrap(), b"\x05\x00\x00\x00hello".to_vec());
	}

	#[test]
	fn tag_names_drop_the_brackets() {
		assert_eq!(tag_name("<Game State>"), "Game State");
		assert_eq!(tag_name("</Components>"), "Components");
		assert_eq!(tag_name("plain"), "plain");
	}
}
