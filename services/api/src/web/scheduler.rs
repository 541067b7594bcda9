//! services/api/src/web/scheduler.rs
//!
//! The tokio implementation of the `Scheduler` port. Each timer is a sleeping
//! task that posts `PageEvent::Timer` back to its page, unless the page was
//! torn down first.

use culinary_core::ports::{Scheduler, Timer};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::web::page::{PageEvent, PageSender};

pub struct TokioScheduler {
    sender: PageSender,
    token: CancellationToken,
}

impl TokioScheduler {
    pub fn new(sender: PageSender, token: CancellationToken) -> Self {
        Self { sender, token }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, after: Duration, timer: Timer) {
        let sender = self.sender.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => sender.send(PageEvent::Timer(timer)),
            }
        });
    }
}
