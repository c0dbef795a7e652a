use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, warn};

/// Plays the notification chime. Implemented by the platform layer.
pub trait AudioSink: Send + Sync {
    fn play_chime(&self) -> Result<(), String>;
}

/// Discards every chime; the default when no audio device is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl AudioSink for SilentSink {
    fn play_chime(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Notification chime with a mute switch. One instance per session.
#[derive(Clone)]
pub struct NotificationSound {
    sink: Arc<dyn AudioSink>,
    muted: Arc<AtomicBool>,
}

impl NotificationSound {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Play the chime unless muted. Returns whether it was attempted.
    pub fn play(&self) -> bool {
        if self.is_muted() {
            debug!("notification sound muted");
            return false;
        }
        if let Err(e) = self.sink.play_chime() {
            warn!(error = %e, "failed to play notification sound");
        }
        true
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::Relaxed);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::Relaxed);
    }

    /// Flip the mute switch and return the new state.
    pub fn toggle_mute(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

impl Default for NotificationSound {
    fn default() -> Self {
        Self::new(Arc::new(SilentSink))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl AudioSink for CountingSink {
        fn play_chime(&self) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn muted_sound_does_not_reach_the_sink() {
        let sink = Arc::new(CountingSink::default());
        let sound = NotificationSound::new(sink.clone());

        assert!(sound.play());
        assert!(sound.toggle_mute());
        assert!(!sound.play());
        assert!(!sound.toggle_mute());
        sound.mute();
        sound.unmute();
        assert!(sound.play());
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }
}
