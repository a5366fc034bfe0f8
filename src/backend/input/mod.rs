//! Player input sources
//!
//! Input sources run on their own thread and deliver [`PlayerKey`]s over a channel until
//! their [`CancelToken`] is cancelled.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "backend_remote")]
pub mod remote;

/// A key sent to the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerKey {
    /// Stop playback and quit
    Quit,
    /// Toggle pause
    PlayPause,
    /// Up arrow, seeks forward a minute
    Up,
    /// Down arrow, seeks back a minute
    Down,
    /// Left arrow, seeks back
    Left,
    /// Right arrow, seeks forward
    Right,
    /// Toggle mute
    Mute,
    /// Cycle subtitles
    CycleSubtitles,
}

impl PlayerKey {
    /// Name of the key in the player's input configuration
    pub fn name(self) -> &'static str {
        match self {
            PlayerKey::Quit => "q",
            PlayerKey::PlayPause => "SPACE",
            PlayerKey::Up => "UP",
            PlayerKey::Down => "DOWN",
            PlayerKey::Left => "LEFT",
            PlayerKey::Right => "RIGHT",
            PlayerKey::Mute => "m",
            PlayerKey::CycleSubtitles => "j",
        }
    }
}

impl fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Asks an input thread to exit
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn key_names() {
        assert_eq!(PlayerKey::PlayPause.to_string(), "SPACE");
        assert_eq!(PlayerKey::Quit.to_string(), "q");
    }
}
