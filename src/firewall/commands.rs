//! Moderation command parsing.
//!
//! Commands arrive as a literal command string plus whitespace-split
//! arguments. Parsing is strict: unknown subcommands and missing
//! arguments produce a [`PluginError::InvalidArguments`] with usage
//! text, which the plugin surfaces as the command reply.

use crate::errors::PluginError;

/// Parsed firewall moderation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallCommand {
    Block { user_id: String },
    Unblock { user_id: String },
    KeywordAdd { keyword: String },
    KeywordRemove { keyword: String },
    KeywordList,
    WhitelistAddUser { user_id: String },
    WhitelistRemoveUser { user_id: String },
    WhitelistAddChat { chat_id: String },
    WhitelistRemoveChat { chat_id: String },
    WhitelistList,
    SpamThreshold { threshold: u32 },
    SpamWindow { seconds: u64 },
    SpamDelete { enabled: bool },
    Status,
    Notify { enabled: bool },
}

impl FirewallCommand {
    /// Literal command strings the firewall claims.
    pub const COMMANDS: [&'static str; 7] = [
        "block",
        "unblock",
        "keyword",
        "whitelist",
        "spam",
        "status",
        "notify",
    ];

    /// Whether a parsed command mutates firewall state (and therefore
    /// requires persisting the configuration).
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Status | Self::KeywordList | Self::WhitelistList)
    }

    pub fn parse(command: &str, args: &[&str]) -> Result<Self, PluginError> {
        match command {
            "block" => match args {
                [user_id] => Ok(Self::Block {
                    user_id: user_id.to_string(),
                }),
                _ => Err(invalid(command, "usage: block <user_id>")),
            },
            "unblock" => match args {
                [user_id] => Ok(Self::Unblock {
                    user_id: user_id.to_string(),
                }),
                _ => Err(invalid(command, "usage: unblock <user_id>")),
            },
            "keyword" => match args {
                ["add", keyword] => Ok(Self::KeywordAdd {
                    keyword: keyword.to_string(),
                }),
                ["remove", keyword] => Ok(Self::KeywordRemove {
                    keyword: keyword.to_string(),
                }),
                ["list"] => Ok(Self::KeywordList),
                _ => Err(invalid(command, "usage: keyword <add|remove> <word> | keyword list")),
            },
            "whitelist" => match args {
                ["add", user_id] => Ok(Self::WhitelistAddUser {
                    user_id: user_id.to_string(),
                }),
                ["remove", user_id] => Ok(Self::WhitelistRemoveUser {
                    user_id: user_id.to_string(),
                }),
                ["addchat", chat_id] => Ok(Self::WhitelistAddChat {
                    chat_id: chat_id.to_string(),
                }),
                ["removechat", chat_id] => Ok(Self::WhitelistRemoveChat {
                    chat_id: chat_id.to_string(),
                }),
                ["list"] => Ok(Self::WhitelistList),
                _ => Err(invalid(
                    command,
                    "usage: whitelist <add|remove|addchat|removechat> <id> | whitelist list",
                )),
            },
            "spam" => match args {
                ["threshold", value] => {
                    let threshold = value.parse::<u32>().map_err(|_| {
                        invalid(command, "threshold must be a positive integer")
                    })?;
                    if threshold == 0 {
                        return Err(invalid(command, "threshold must be a positive integer"));
                    }
                    Ok(Self::SpamThreshold { threshold })
                }
                ["window", value] => {
                    let seconds = value
                        .parse::<u64>()
                        .map_err(|_| invalid(command, "window must be seconds"))?;
                    if seconds == 0 {
                        return Err(invalid(command, "window must be at least one second"));
                    }
                    Ok(Self::SpamWindow { seconds })
                }
                ["delete", toggle] => Ok(Self::SpamDelete {
                    enabled: parse_toggle(command, toggle)?,
                }),
                _ => Err(invalid(
                    command,
                    "usage: spam threshold <n> | spam window <seconds> | spam delete <on|off>",
                )),
            },
            "status" => match args {
                [] => Ok(Self::Status),
                _ => Err(invalid(command, "usage: status")),
            },
            "notify" => match args {
                [toggle] => Ok(Self::Notify {
                    enabled: parse_toggle(command, toggle)?,
                }),
                _ => Err(invalid(command, "usage: notify <on|off>")),
            },
            _ => Err(PluginError::UnknownCommand {
                command: command.to_string(),
            }),
        }
    }
}

fn invalid(command: &str, details: &str) -> PluginError {
    PluginError::InvalidArguments {
        command: command.to_string(),
        details: details.to_string(),
    }
}

fn parse_toggle(command: &str, value: &str) -> Result<bool, PluginError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(invalid(command, "expected on or off")),
    }
}
