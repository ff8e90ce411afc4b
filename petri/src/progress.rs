//! Global progress bar management
//!
//! A single `MultiProgress` shared by every batch loop, so nested runs (a
//! directory batch whose runs each process many frames) draw their bars
//! together instead of fighting over the terminal.

use indicatif::MultiProgress;
use once_cell::sync::Lazy;
use std::sync::Arc;

static MULTI: Lazy<Arc<MultiProgress>> = Lazy::new(|| Arc::new(MultiProgress::new()));

/// Cheap clone of the global multi-progress handle
pub fn global_mp() -> Arc<MultiProgress> {
    MULTI.clone()
}

pub fn add_progress_bar(pb: indicatif::ProgressBar) {
    global_mp().add(pb);
}

pub fn remove_progress_bar(pb: &indicatif::ProgressBar) {
    global_mp().remove(pb);
}
