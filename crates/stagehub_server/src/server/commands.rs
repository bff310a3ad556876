#![forbid(unsafe_code)]

use stagehub_domain::Platform;

/// Chat commands understood by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Song { query: String },
	Skip,
	Stop,
	Pause,
	Play,
}

/// Bot-style aliases accepted from Telegram.
const TELEGRAM_ALIASES: &[(&str, &str)] = &[
	("/song", "!song"),
	("/skip", "!skip"),
	("/stop", "!stop"),
	("/pause", "!pause"),
	("/play", "!play"),
];

fn split_head(text: &str) -> (&str, &str) {
	let text = text.trim_start();
	match text.split_once(char::is_whitespace) {
		Some((head, rest)) => (head, rest.trim()),
		None => (text, ""),
	}
}

fn canonical_token(platform: Platform, head: &str) -> &str {
	if platform != Platform::Telegram || !head.starts_with('/') {
		return head;
	}
	let bare = head.split_once('@').map_or(head, |(cmd, _bot)| cmd);
	TELEGRAM_ALIASES
		.iter()
		.find(|(alias, _)| *alias == bare)
		.map_or(head, |(_, canonical)| canonical)
}

/// Parse a chat line into a command. Matching is case-sensitive.
pub fn parse_command(platform: Platform, text: &str) -> Option<Command> {
	let (head, rest) = split_head(text);
	match canonical_token(platform, head) {
		"!song" => Some(Command::Song {
			query: rest.to_string(),
		}),
		"!skip" => Some(Command::Skip),
		"!stop" => Some(Command::Stop),
		"!pause" => Some(Command::Pause),
		"!play" => Some(Command::Play),
		_ => None,
	}
}

/// The text after the command token, trimmed.
pub fn song_query(command_text: &str) -> &str {
	split_head(command_text).1
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn canonical_commands() {
		assert_eq!(
			parse_command(Platform::Twitch, "!song  lofi beats "),
			Some(Command::Song {
				query: "lofi beats".into()
			})
		);
		assert_eq!(parse_command(Platform::YouTube, "!skip"), Some(Command::Skip));
		assert_eq!(parse_command(Platform::TikTok, "!stop now"), Some(Command::Stop));
		assert_eq!(parse_command(Platform::Twitch, "!pause"), Some(Command::Pause));
		assert_eq!(parse_command(Platform::Twitch, "!play"), Some(Command::Play));
	}

	#[test]
	fn commands_are_case_sensitive_and_exact() {
		assert_eq!(parse_command(Platform::Twitch, "!SONG lofi"), None);
		assert_eq!(parse_command(Platform::Twitch, "!songs"), None);
		assert_eq!(parse_command(Platform::Twitch, "hello !skip"), None);
	}

	#[test]
	fn empty_song_query_still_parses() {
		assert_eq!(
			parse_command(Platform::Twitch, "!song"),
			Some(Command::Song { query: String::new() })
		);
	}

	#[test]
	fn telegram_aliases_only_apply_to_telegram() {
		assert_eq!(
			parse_command(Platform::Telegram, "/song@stagehub_bot lofi"),
			Some(Command::Song { query: "lofi".into() })
		);
		assert_eq!(parse_command(Platform::Telegram, "/skip"), Some(Command::Skip));
		assert_eq!(parse_command(Platform::Telegram, "!stop"), Some(Command::Stop));
		assert_eq!(parse_command(Platform::Telegram, "/start"), None);
		assert_eq!(parse_command(Platform::Twitch, "/skip"), None);
	}

	#[test]
	fn song_query_strips_any_prefix() {
		assert_eq!(song_query("!song lofi"), "lofi");
		assert_eq!(song_query("/song@bot  lofi  "), "lofi");
		assert_eq!(song_query("!song"), "");
	}
}
