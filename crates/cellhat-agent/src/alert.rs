//! Audible alerts for incoming calls and messages.

use std::path::Path;
use std::process::Stdio;

use cellhat_modem::config::AlertConfig;
use cellhat_modem::{Alert, Notifier};

pub struct SoundNotifier {
    config: AlertConfig,
}

impl SoundNotifier {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    fn sound_for(&self, alert: Alert) -> Option<&Path> {
        match alert {
            Alert::IncomingCall => self.config.ring_sound.as_deref(),
            Alert::NewMessage => self.config.text_sound.as_deref(),
        }
    }
}

impl Notifier for SoundNotifier {
    fn notify(&self, alert: Alert) {
        let Some(sound) = self.sound_for(alert) else {
            // Terminal bell.
            print!("\x07");
            return;
        };

        // tokio reaps the child once it exits.
        match tokio::process::Command::new(&self.config.player)
            .arg(sound)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => tracing::debug!(?alert, sound = %sound.display(), "alert sound started"),
            Err(e) => tracing::warn!(
                ?alert,
                player = %self.config.player,
                error = %e,
                "failed to play alert sound"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn picks_sound_per_alert() {
        let notifier = SoundNotifier::new(AlertConfig {
            ring_sound: Some(PathBuf::from("/snd/ring.wav")),
            ..Default::default()
        });
        assert_eq!(
            notifier.sound_for(Alert::IncomingCall),
            Some(Path::new("/snd/ring.wav"))
        );
        assert_eq!(notifier.sound_for(Alert::NewMessage), None);
    }

    #[tokio::test]
    async fn missing_player_is_not_fatal() {
        let notifier = SoundNotifier::new(AlertConfig {
            player: "/nonexistent/player".into(),
            text_sound: Some(PathBuf::from("/snd/text.wav")),
            ..Default::default()
        });
        notifier.notify(Alert::NewMessage);
    }
}
