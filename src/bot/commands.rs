use crate::config::GroupConfig;

/// Exact phrases that trigger the door camera.
pub const DOOR_PHRASES: &[&str] = &[
    "who's at the door",
    "whos at the door",
    "!door",
    "check door",
    "check the door",
    "door check",
    "anyone there",
    "anyone at door",
    "anyone at the door",
    "is someone there",
    "is anyone there",
    "door camera",
    "front door",
    "check camera",
    "doorbell",
    "door bell",
    "visitor",
    "visitors",
    "who is it",
    "who's there",
];

const HELP: &str = "help";
const SNAPSHOT: &str = "snapshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Help,
    Door,
    /// Unvalidated camera name; empty when none was given.
    Snapshot(&'a str),
    Group(&'a GroupConfig),
}

/// Resolves normalized (trimmed, lower-cased) message content.
///
/// Precedence: `help`, door phrases (exact), `snapshot <camera>`, then the
/// first group, in definition order, whose command prefixes the content.
pub fn parse<'a>(content: &'a str, groups: &'a [GroupConfig]) -> Option<Command<'a>> {
    if content == HELP {
        return Some(Command::Help);
    }

    if DOOR_PHRASES.contains(&content) {
        return Some(Command::Door);
    }

    if let Some(rest) = content
        .strip_prefix('!')
        .unwrap_or(content)
        .strip_prefix(SNAPSHOT)
    {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Some(Command::Snapshot(rest.trim()));
        }
    }

    groups
        .iter()
        .find(|group| content.starts_with(group.command.trim().to_lowercase().as_str()))
        .map(Command::Group)
}

/// "check front" becomes "Check Front".
pub fn title_case(command: &str) -> String {
    command
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
