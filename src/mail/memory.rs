use super::{MailError, MailTransport, OutgoingEmail};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
struct MailboxState {
    sent: Vec<OutgoingEmail>,
    failing_recipients: HashSet<String>,
    fail_all: bool,
    attempts: usize,
}

/// Keeps delivered emails in memory instead of talking to a relay.
///
/// Deliveries can be made to fail, globally or per recipient, to exercise
/// retry paths.
#[derive(Default)]
pub struct InMemoryMailbox {
    state: Mutex<MailboxState>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.state().fail_all = fail;
    }

    pub fn fail_for(&self, recipient: &str) {
        self.state().failing_recipients.insert(recipient.to_string());
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.state().sent.clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<OutgoingEmail> {
        self.state()
            .sent
            .iter()
            .filter(|email| email.to == recipient)
            .cloned()
            .collect()
    }

    /// Number of `send` calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state().attempts
    }
}

impl MailTransport for InMemoryMailbox {
    fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let mut state = self.state();
        state.attempts += 1;
        if state.fail_all || state.failing_recipients.contains(&email.to) {
            return Err(MailError::Transport(format!(
                "delivery to {} refused",
                email.to
            )));
        }
        state.sent.push(email.clone());
        Ok(())
    }
}
