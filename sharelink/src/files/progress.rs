use tokio::sync::watch;

/// Simulated upload progress, as a percentage.
///
/// Advanced on a fixed interval while an upload runs, held below the configured cap, then snapped
/// to 100 on success or reset to 0 on failure. It does not measure transferred bytes.
#[derive(Debug)]
pub struct UploadProgress {
    percent: watch::Sender<u8>,
}

impl UploadProgress {
    pub fn new() -> Self {
        let (percent, _) = watch::channel(0);
        Self { percent }
    }

    pub fn get(&self) -> u8 {
        *self.percent.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.percent.subscribe()
    }

    /// Add `step` points, never going past `cap`
    pub fn advance(&self, step: u8, cap: u8) {
        self.percent.send_if_modified(|percent| {
            let next = percent.saturating_add(step).min(cap);
            if next > *percent {
                *percent = next;
                true
            } else {
                false
            }
        });
    }

    pub fn complete(&self) {
        self.percent.send_replace(100);
    }

    pub fn reset(&self) {
        self.percent.send_replace(0);
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}
