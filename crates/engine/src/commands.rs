use crate::session::IndexToggle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Setup,
    Text,
    Vc,
    ExcludeRole,
    UnexcludeRole,
    Help,
    Toggles(Vec<IndexToggle>),
}

/// Recognizes a chat message as a command. Matching is case-sensitive; only
/// the role commands take arguments (their role mentions).
pub fn parse_command(prefix: &str, content: &str) -> Option<Command> {
    if let Some(rest) = content.strip_prefix(prefix) {
        let command = match rest {
            "setup" => Some(Command::Setup),
            "text" => Some(Command::Text),
            "vc" => Some(Command::Vc),
            "help" => Some(Command::Help),
            _ => match rest.split(' ').next() {
                Some("excluderole") => Some(Command::ExcludeRole),
                Some("unexcluderole") => Some(Command::UnexcludeRole),
                _ => None,
            },
        };
        if command.is_some() {
            return command;
        }
    }
    parse_toggles(content).map(Command::Toggles)
}

/// Parses a message made only of space-separated integers. A positive index
/// toggles life, a negative one toggles ignore.
pub fn parse_toggles(content: &str) -> Option<Vec<IndexToggle>> {
    content
        .split(' ')
        .map(|token| {
            let (negative, digits) = match token.strip_prefix('-') {
                Some(digits) => (true, digits),
                None => (false, token),
            };
            if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
                return None;
            }
            // Out-of-range positions are skipped later, so overflow can saturate.
            let index = digits.parse::<usize>().unwrap_or(usize::MAX);
            Some(if negative {
                IndexToggle::Ignore(index)
            } else {
                IndexToggle::Life(index)
            })
        })
        .collect()
}

pub fn help_text(prefix: &str) -> String {
    format!(
        "**Commands**\n\
         `{prefix}setup` use this channel for commands and track your current voice channel\n\
         `{prefix}text` use this channel for commands\n\
         `{prefix}vc` track your current voice channel, or stop tracking when you are not in one\n\
         `{prefix}excluderole <role mention>...` never track members with these roles\n\
         `{prefix}unexcluderole <role mention>...` track members with these roles again\n\
         `{prefix}help` show this message\n\
         `2 5 -3` toggle dead for players 2 and 5 and ignore for player 3\n\
         **Panel**\n\
         :speaker: toggle global mute, :copyright: become or stop being the relay, \
         :arrows_counterclockwise: start a new round"
    )
}
