//! Command-line flags and TUI key bindings. Kept free of any actual
//! terminal I/O so both can be exercised without a real tty.

use std::path::PathBuf;

use clap::Parser;

/// Displays live timing data from Formula 1 race, practice and
/// qualifying sessions.
#[derive(Parser, Debug)]
#[command(name = "live-timing", version, about)]
pub struct Cli {
    /// Increase verbosity for each time repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Replay a previously recorded packet cache instead of connecting live.
    #[arg(short = 'r', long)]
    pub replay: bool,

    /// Packet cache file to replay from, or to record live data into.
    #[arg(short = 'f', long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Override the configured live-timing data host.
    #[arg(long)]
    pub host: Option<String>,

    /// Override the configured authentication host.
    #[arg(long)]
    pub auth_host: Option<String>,

    /// Path to the credentials file (defaults to `$HOME/.f1rc`).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// One key as read from the terminal, independent of the terminal
/// backend that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Esc,
    Up,
    Down,
    Left,
    Right,
}

/// What a key press should do to the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
    /// Adjust the replay gap by this many seconds (±1s or ±60s keys).
    AdjustGap(i64),
    ToggleGap,
    TogglePause,
    /// Switch the info ring to page `1..=9`.
    InfoRing(u8),
}

/// Map one key press to the action it drives, or `None` for a key with
/// no binding.
pub fn interpret_key(key: Key) -> Option<KeyAction> {
    match key {
        Key::Char('q') | Key::Char('Q') | Key::Enter | Key::Esc => Some(KeyAction::Quit),
        Key::Up => Some(KeyAction::ScrollUp),
        Key::Down => Some(KeyAction::ScrollDown),
        Key::Left => Some(KeyAction::ScrollLeft),
        Key::Right => Some(KeyAction::ScrollRight),
        Key::Char('i') => Some(KeyAction::AdjustGap(1)),
        Key::Char('k') => Some(KeyAction::AdjustGap(-1)),
        Key::Char('u') => Some(KeyAction::AdjustGap(60)),
        Key::Char('j') => Some(KeyAction::AdjustGap(-60)),
        Key::Char('0') => Some(KeyAction::ToggleGap),
        Key::Char('p') => Some(KeyAction::TogglePause),
        Key::Char(c @ '1'..='9') => Some(KeyAction::InfoRing(c as u8 - b'0')),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_keys_all_map_to_quit() {
        for key in [Key::Char('q'), Key::Char('Q'), Key::Enter, Key::Esc] {
            assert_eq!(interpret_key(key), Some(KeyAction::Quit));
        }
    }

    #[test]
    fn gap_keys_adjust_by_documented_steps() {
        assert_eq!(interpret_key(Key::Char('i')), Some(KeyAction::AdjustGap(1)));
        assert_eq!(interpret_key(Key::Char('k')), Some(KeyAction::AdjustGap(-1)));
        assert_eq!(interpret_key(Key::Char('u')), Some(KeyAction::AdjustGap(60)));
        assert_eq!(interpret_key(Key::Char('j')), Some(KeyAction::AdjustGap(-60)));
    }

    #[test]
    fn digit_keys_select_info_ring_page() {
        assert_eq!(interpret_key(Key::Char('7')), Some(KeyAction::InfoRing(7)));
    }

    #[test]
    fn unbound_key_returns_none() {
        assert_eq!(interpret_key(Key::Char('z')), None);
    }
}
