use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use detection_review::{Actions, FrameUpdate, Notice, NoticeLevel, Surface, UpdateKind};

/// Plain-mode progress lines are printed every this many frames.
const PLAIN_PROGRESS_EVERY: usize = 25;

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Terminal presentation layer. Preview frames are written as PNG files
    /// to `snapshot_dir` when one is given.
    pub fn surface(&self, snapshot_dir: Option<&Path>) -> Result<TerminalSurface> {
        if let Some(dir) = snapshot_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create snapshot dir {}", dir.display()))?;
        }
        Ok(TerminalSurface {
            pretty: self.use_pretty(),
            progress: None,
            snapshot_dir: snapshot_dir.map(Path::to_path_buf),
            snapshots: Vec::new(),
            actions: Actions::default(),
        })
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

// ----------------------------------------------------------------------------
// Terminal surface
// ----------------------------------------------------------------------------

pub struct TerminalSurface {
    pretty: bool,
    progress: Option<ProgressBar>,
    snapshot_dir: Option<PathBuf>,
    snapshots: Vec<PathBuf>,
    actions: Actions,
}

impl TerminalSurface {
    pub fn snapshots(&self) -> &[PathBuf] {
        &self.snapshots
    }

    pub fn actions(&self) -> Actions {
        self.actions
    }

    fn progress_for(&mut self, update: &FrameUpdate) -> &ProgressBar {
        let pretty = self.pretty;
        self.progress.get_or_insert_with(|| {
            let bar = match update.total {
                Some(total) => ProgressBar::new(total),
                None => ProgressBar::new_spinner(),
            };
            if pretty {
                bar.set_draw_target(ProgressDrawTarget::stderr());
                let template = if update.total.is_some() {
                    "{bar:40} {pos}/{len} {msg}"
                } else {
                    "{spinner} {pos} {msg}"
                };
                let style = ProgressStyle::with_template(template)
                    .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
            } else {
                bar.set_draw_target(ProgressDrawTarget::hidden());
            }
            bar
        })
    }

    fn finish_progress(&mut self) {
        if let Some(bar) = self.progress.take() {
            bar.finish();
        }
    }

    fn save_snapshot(&mut self, update: &FrameUpdate) {
        let Some(dir) = self.snapshot_dir.as_ref() else {
            return;
        };
        let index = update.position.unwrap_or(0);
        let path = dir.join(format!("frame_{:05}.png", index));
        match update.image.image().save(&path) {
            Ok(()) => {
                log::info!("snapshot written to {}", path.display());
                self.snapshots.push(path);
            }
            Err(err) => log::warn!("failed to write snapshot {}: {}", path.display(), err),
        }
    }
}

impl Surface for TerminalSurface {
    fn present(&mut self, update: &FrameUpdate) {
        match update.kind {
            UpdateKind::Processed | UpdateKind::Live => {
                let pretty = self.pretty;
                let first_line = update.summary.lines().next().unwrap_or_default().to_string();
                let bar = self.progress_for(update);
                bar.inc(1);
                bar.set_message(first_line);
                let shown = bar.position() as usize;
                if !pretty && (shown == 1 || shown % PLAIN_PROGRESS_EVERY == 0) {
                    eprintln!("{}", update.status);
                }
                log::debug!("{}: {}", update.status, update.summary);
            }
            UpdateKind::Preview => {
                self.finish_progress();
                println!("{}", update.status);
                for line in update.summary.lines() {
                    println!("  {}", line);
                }
                self.save_snapshot(update);
            }
            UpdateKind::Replay => {
                let bar = self.progress_for(update);
                bar.inc(1);
                bar.set_message(update.status.clone());
                log::debug!("replay frame {:?}", update.position);
            }
        }
    }

    fn set_actions(&mut self, actions: Actions) {
        if actions != self.actions {
            log::debug!("actions: {:?}", actions);
        }
        self.actions = actions;
    }

    fn notify(&mut self, notice: Notice) {
        self.finish_progress();
        match notice.level {
            NoticeLevel::Info => eprintln!("==> {}", notice.message),
            NoticeLevel::Warning => eprintln!("warning: {}", notice.message),
            NoticeLevel::Error => eprintln!("error: {}", notice.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detection_review::Frame;
    use image::RgbImage;

    fn preview(position: usize) -> FrameUpdate {
        FrameUpdate {
            image: Frame::new(position as u64, RgbImage::new(4, 4)),
            status: format!("Frame: {}", position + 1),
            summary: "No detections".to_string(),
            position: Some(position),
            total: Some(10),
            kind: UpdateKind::Preview,
        }
    }

    #[test]
    fn preview_frames_are_saved_as_png() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ui = Ui::new(UiMode::Plain, false, true);
        let mut surface = ui.surface(Some(&dir.path().join("snaps")))?;
        surface.present(&preview(3));
        assert_eq!(surface.snapshots().len(), 1);
        assert!(surface.snapshots()[0].ends_with("frame_00003.png"));
        assert!(surface.snapshots()[0].is_file());
        Ok(())
    }

    #[test]
    fn actions_are_recorded() -> Result<()> {
        let ui = Ui::new(UiMode::Plain, false, true);
        let mut surface = ui.surface(None)?;
        let actions = Actions {
            replay: true,
            ..Actions::default()
        };
        surface.set_actions(actions);
        assert_eq!(surface.actions(), actions);
        Ok(())
    }
}
