use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Build,
    Push,
}

/// ビルド・プッシュ中のスピナー
pub struct BuildProgress {
    progress_bar: ProgressBar,
    phase: Phase,
}

impl BuildProgress {
    pub fn new(image: &str) -> Self {
        Self::spinner(format!("Building {}...", image), Phase::Build)
    }

    /// プッシュ用のスピナー
    pub fn push(reference: &str) -> Self {
        Self::spinner(format!("Pushing {}...", reference), Phase::Push)
    }

    fn spinner(message: String, phase: Phase) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        pb.set_message(message);

        Self {
            progress_bar: pb,
            phase,
        }
    }

    /// 何も表示しない（--json 出力時やテスト用）
    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
            phase: Phase::Build,
        }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    pub fn finish_success(&self) {
        self.progress_bar.finish_with_message(self.success_message());
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar.finish_with_message(self.error_message(error));
    }

    fn success_message(&self) -> &'static str {
        match self.phase {
            Phase::Build => "Build completed ✓",
            Phase::Push => "Push completed ✓",
        }
    }

    fn error_message(&self, error: &str) -> String {
        match self.phase {
            Phase::Build => format!("Build failed: {}", error),
            Phase::Push => format!("Push failed: {}", error),
        }
    }
}
