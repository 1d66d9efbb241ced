//! Exclusive access to the microphone.
//!
//! Only one component may hold a live capture stream. Components acquire a
//! lease before opening one and the lease releases the microphone on drop.

use std::sync::{Arc, Mutex};

use crate::adapters::SpeechError;

/// Shared arbiter; clones refer to the same microphone
#[derive(Debug, Clone, Default)]
pub struct MicrophoneArbiter {
    holder: Arc<Mutex<Option<String>>>,
}

impl MicrophoneArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the microphone for `owner`, failing with `Busy` if held
    pub fn acquire(&self, owner: &str) -> Result<MicrophoneLease, SpeechError> {
        let mut holder = self
            .holder
            .lock()
            .map_err(|_| SpeechError::AudioCapture("microphone arbiter poisoned".into()))?;

        if let Some(current) = holder.as_ref() {
            return Err(SpeechError::Busy(current.clone()));
        }

        *holder = Some(owner.to_string());
        tracing::debug!(owner, "microphone acquired");

        Ok(MicrophoneLease {
            holder: self.holder.clone(),
            owner: owner.to_string(),
        })
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().ok().and_then(|h| h.clone())
    }

    pub fn is_free(&self) -> bool {
        self.holder().is_none()
    }
}

/// Proof of microphone ownership
#[derive(Debug)]
pub struct MicrophoneLease {
    holder: Arc<Mutex<Option<String>>>,
    owner: String,
}

impl MicrophoneLease {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for MicrophoneLease {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            if holder.as_deref() == Some(self.owner.as_str()) {
                *holder = None;
                tracing::debug!(owner = %self.owner, "microphone released");
            }
        }
    }
}
