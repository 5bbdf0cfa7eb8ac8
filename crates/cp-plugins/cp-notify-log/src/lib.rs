//! # cp-notify-log
//!
//! Notifier that writes toasts to the process log. The server has no
//! direct channel to a user's screen; the mobile clients render their own
//! toasts from API responses, so server-side notices land here for
//! operators instead.

use async_trait::async_trait;
use log::{error, info};

use cp_core::traits::{NoticeKind, Notifier};

#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, kind: NoticeKind, title: &str, message: &str) {
        match kind {
            NoticeKind::Success => info!("[notice] {title}: {message}"),
            NoticeKind::Info => info!("[notice] {title}: {message}"),
            NoticeKind::Error => error!("[notice] {title}: {message}"),
        }
    }
}
