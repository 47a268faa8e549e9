use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use shmbridge_region::{NamedEvent, Notifier, RegionConfig, SharedRegion};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Opens the memory behind one channel. Called again after every failure.
pub type Opener<M> = Box<dyn FnMut() -> Result<M> + Send>;

/// Whether a consumer may create regions that do not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode {
    /// Create the region if the producer has not started yet.
    #[default]
    OpenOrCreate,
    /// Only attach to regions the producer already created.
    OpenExisting,
}

/// Connection state of one channel, as shown in the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Connected => "connected",
            LinkStatus::Disconnected => "disconnected",
        }
    }
}

/// Build an opener for a named OS region.
pub fn region_opener(
    name: String,
    size: usize,
    attach: AttachMode,
    config: RegionConfig,
) -> Opener<Arc<SharedRegion>> {
    Box::new(move || {
        let region = match attach {
            AttachMode::OpenOrCreate => {
                SharedRegion::open_or_create_with_config(&name, size, &config)?
            }
            AttachMode::OpenExisting => {
                SharedRegion::open_existing_with_config(&name, size, &config)?
            }
        };
        Ok(Arc::new(region))
    })
}

/// Open a named wake event, falling back to polling when it is unavailable.
pub fn open_event(name: &str, config: &RegionConfig) -> Option<Arc<dyn Notifier>> {
    match NamedEvent::open_or_create_with_policy(name, config.access) {
        Ok(event) => Some(Arc::new(event)),
        Err(err) => {
            warn!(name, error = %err, "command event unavailable; polling only");
            None
        }
    }
}

/// A channel that attaches lazily and reattaches on a fixed interval.
///
/// While the opener keeps failing the slot reports
/// [`LinkStatus::Disconnected`] and retries at most once per
/// `reconnect_interval`.
pub struct ChannelSlot<T> {
    label: &'static str,
    open: Box<dyn FnMut() -> Result<T> + Send>,
    channel: Option<T>,
    reconnect_interval: Duration,
    next_attempt: Option<Instant>,
    failures: u64,
}

impl<T> ChannelSlot<T> {
    pub fn new(
        label: &'static str,
        reconnect_interval: Duration,
        open: Box<dyn FnMut() -> Result<T> + Send>,
    ) -> Self {
        Self {
            label,
            open,
            channel: None,
            reconnect_interval,
            next_attempt: None,
            failures: 0,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn status(&self) -> LinkStatus {
        if self.channel.is_some() {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }

    /// Consecutive failed attach attempts.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// The attached channel, attaching first if a retry is due.
    pub fn get(&mut self, now: Instant) -> Option<&mut T> {
        if self.channel.is_none() && self.next_attempt.is_none_or(|at| now >= at) {
            self.attach(now);
        }
        self.channel.as_mut()
    }

    /// Drop the channel and schedule a reattach.
    pub fn disconnect(&mut self, now: Instant) {
        if self.channel.take().is_some() {
            info!(channel = self.label, "channel disconnected");
        }
        self.next_attempt = Some(now + self.reconnect_interval);
    }

    fn attach(&mut self, now: Instant) {
        match (self.open)() {
            Ok(channel) => {
                if self.failures > 0 {
                    info!(channel = self.label, attempts = self.failures + 1, "channel connected");
                } else {
                    debug!(channel = self.label, "channel connected");
                }
                self.channel = Some(channel);
                self.failures = 0;
                self.next_attempt = None;
            }
            Err(err) => {
                self.failures += 1;
                if self.failures == 1 {
                    info!(channel = self.label, error = %err, "channel unavailable; will retry");
                } else {
                    debug!(channel = self.label, failures = self.failures, error = %err, "channel still unavailable");
                }
                self.next_attempt = Some(now + self.reconnect_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use shmbridge_region::RegionError;

    use super::*;
    use crate::error::PollError;

    fn flaky(fail_times: u32) -> (Arc<AtomicU32>, Box<dyn FnMut() -> Result<u32> + Send>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let open: Box<dyn FnMut() -> Result<u32> + Send> = Box::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= fail_times {
                Err(PollError::Region(RegionError::Unavailable {
                    name: "test".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }))
            } else {
                Ok(n)
            }
        });
        (calls, open)
    }

    #[test]
    fn retries_on_interval() {
        let (calls, open) = flaky(2);
        let mut slot = ChannelSlot::new("video", Duration::from_secs(1), open);
        let start = Instant::now();

        assert!(slot.get(start).is_none());
        assert_eq!(slot.status(), LinkStatus::Disconnected);
        assert!(slot.get(start + Duration::from_millis(500)).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(slot.get(start + Duration::from_secs(1)).is_none());
        assert_eq!(slot.failures(), 2);

        let value = slot.get(start + Duration::from_secs(2)).copied();
        assert_eq!(value, Some(3));
        assert_eq!(slot.status(), LinkStatus::Connected);
        assert_eq!(slot.failures(), 0);
    }

    #[test]
    fn disconnect_schedules_reattach() {
        let (calls, open) = flaky(0);
        let mut slot = ChannelSlot::new("audio", Duration::from_secs(1), open);
        let start = Instant::now();

        assert!(slot.get(start).is_some());
        slot.disconnect(start);
        assert!(slot.get(start).is_none());
        assert!(slot.get(start + Duration::from_secs(1)).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[cfg(unix)]
    #[test]
    fn open_existing_reports_unavailable() {
        let name = format!("shmbridge-missing-{}", std::process::id());
        let mut open = region_opener(name, 64, AttachMode::OpenExisting, RegionConfig::default());
        let err = open().err().expect("region should not exist");
        assert!(err.is_unavailable());
    }
}
