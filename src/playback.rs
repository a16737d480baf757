/// Alarm sound / notification collaborator boundary.
///
/// The scheduler only talks to this trait; the production implementation
/// shells out to platform tools and is a no-op elsewhere.
use std::path::Path;
use tracing::info;

pub trait AlarmSink {
    /// Begin playing the alarm sound and surface a notification for the
    /// named task. Called when an armed alarm fires.
    fn play(&mut self, sound_file: &Path, task_title: &str);

    /// Stop any playing alarm sound. Called on dismissal.
    fn stop(&mut self);
}

/// Desktop implementation: notification plus one-shot sound playback.
#[derive(Debug, Default)]
pub struct DesktopSink {
    #[cfg(target_os = "macos")]
    player: Option<std::process::Child>,
}

impl DesktopSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlarmSink for DesktopSink {
    fn play(&mut self, sound_file: &Path, task_title: &str) {
        info!(task = task_title, sound = %sound_file.display(), "ALARM");

        #[cfg(target_os = "macos")]
        {
            let script = format!(
                r#"display notification "{}" with title "Tempo - Alarm""#,
                task_title.replace('"', "\\\"")
            );
            let _ = std::process::Command::new("osascript")
                .arg("-e")
                .arg(&script)
                .output();

            self.stop();
            self.player = std::process::Command::new("afplay")
                .arg(sound_file)
                .spawn()
                .ok();
        }

        #[cfg(not(target_os = "macos"))]
        {
            // Console bell is the best portable fallback.
            let _ = sound_file;
            eprint!("\x07");
        }
    }

    fn stop(&mut self) {
        #[cfg(target_os = "macos")]
        if let Some(mut child) = self.player.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Sink that records calls instead of making noise.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub played: Vec<(std::path::PathBuf, String)>,
    pub stops: usize,
}

#[cfg(test)]
impl AlarmSink for RecordingSink {
    fn play(&mut self, sound_file: &Path, task_title: &str) {
        self.played.push((sound_file.to_path_buf(), task_title.to_string()));
    }

    fn stop(&mut self) {
        self.stops += 1;
    }
}
