//! ターミナルへの進捗表示

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use shipflow_core::{BuildTarget, RunObserver, TargetState};
use std::collections::HashMap;
use std::time::Duration;

/// ターゲットごとにスピナーを1本ずつ表示する
pub struct ConsoleProgress {
    // バーを描画し続けるために保持する
    _multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl ConsoleProgress {
    pub fn new(targets: &[BuildTarget]) -> Self {
        Self::with_draw_target(targets, ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(targets: &[BuildTarget], draw_target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(draw_target);
        let width = targets.iter().map(|t| t.name.len()).max().unwrap_or(0);

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let bars = targets
            .iter()
            .map(|target| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style.clone());
                bar.set_prefix(format!("{:<width$}", target.name, width = width));
                bar.set_message("待機中".dimmed().to_string());
                bar.enable_steady_tick(Duration::from_millis(120));
                (target.name.clone(), bar)
            })
            .collect();

        Self {
            _multi: multi,
            bars,
        }
    }
}

fn label(state: &TargetState) -> String {
    match state {
        TargetState::Pending => "待機中".dimmed(),
        TargetState::Authenticating => "認証中".dimmed(),
        TargetState::Building => "ビルド中".blue(),
        TargetState::Pushing => "プッシュ中".blue(),
        TargetState::Attesting => "署名中".blue(),
        TargetState::Succeeded => "✓ 完了".green().bold(),
        TargetState::Unattested => "⚠ 未署名".yellow().bold(),
        TargetState::Failed(stage) => format!("✗ 失敗 ({})", stage).red().bold(),
    }
    .to_string()
}

impl RunObserver for ConsoleProgress {
    fn on_state(&self, target: &str, state: &TargetState) {
        let Some(bar) = self.bars.get(target) else {
            tracing::debug!("No progress bar for target {}", target);
            return;
        };

        if state.is_terminal() {
            bar.finish_with_message(label(state));
        } else {
            bar.set_message(label(state));
        }
    }
}
