//! Scripted message source.

use relay_core::envelope::Envelope;
use relay_core::source::{InboundMessage, MessageSource, SourceError};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// One scripted poll result.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Deliver a message.
    Message(InboundMessage),
    /// Report a transport error.
    Error(SourceError),
    /// Sleep for the poll timeout and return nothing.
    Idle,
}

#[derive(Debug, Default)]
struct State {
    script: VecDeque<Scripted>,
    next_offset: i64,
    delivered: Vec<i64>,
    commits: Vec<Option<i64>>,
    final_commits: usize,
    closed: bool,
    fail_commits: bool,
    stop_when_drained: Option<watch::Sender<bool>>,
}

/// A [`MessageSource`] that replays a fixed script.
///
/// Clones share state, so a test can keep one clone for assertions while the
/// consumer loop owns the other. Once the script is exhausted every poll
/// sleeps for its timeout and returns `None`, which lets paused-time tests
/// drive the commit interval.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<State>>,
}

impl ScriptedSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw payload on `topic`, assigning the next offset.
    #[must_use]
    pub fn with_payload(self, topic: &str, key: Option<&str>, payload: impl Into<Vec<u8>>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let offset = state.next_offset;
            state.next_offset += 1;
            state.script.push_back(Scripted::Message(InboundMessage {
                topic: topic.to_string(),
                partition: 0,
                offset,
                key: key.map(|k| k.as_bytes().to_vec()),
                payload: payload.into(),
            }));
        }
        self
    }

    /// Queue an encoded envelope on the topic its event type maps to.
    #[must_use]
    pub fn with_envelope(self, envelope: &Envelope) -> Self {
        let topic = envelope
            .topic()
            .map_or_else(|| "unknown".to_string(), |t| t.to_string());
        let payload = envelope.to_bytes().unwrap();
        let key = envelope.entity_id.clone();
        self.with_payload(&topic, Some(&key), payload)
    }

    /// Queue a transport error.
    #[must_use]
    pub fn with_error(self, error: SourceError) -> Self {
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(Scripted::Error(error));
        self
    }

    /// Queue an idle poll.
    #[must_use]
    pub fn with_idle(self) -> Self {
        self.state.lock().unwrap().script.push_back(Scripted::Idle);
        self
    }

    /// Flip `shutdown` to `true` the first time the script runs dry.
    #[must_use]
    pub fn stop_when_drained(self, shutdown: watch::Sender<bool>) -> Self {
        self.state.lock().unwrap().stop_when_drained = Some(shutdown);
        self
    }

    /// Make every commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().unwrap().fail_commits = fail;
    }

    /// Offsets handed out so far.
    #[must_use]
    pub fn delivered(&self) -> Vec<i64> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commits.len()
    }

    /// Number of successful commits made through
    /// [`commit_final`](MessageSource::commit_final).
    #[must_use]
    pub fn final_commit_count(&self) -> usize {
        self.state.lock().unwrap().final_commits
    }

    /// Last delivered offset covered by the most recent commit.
    #[must_use]
    pub fn committed_offset(&self) -> Option<i64> {
        self.state.lock().unwrap().commits.last().copied().flatten()
    }

    /// Whether `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Scripted items not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap().script.len()
    }
}

impl MessageSource for ScriptedSource {
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Option<Result<InboundMessage, SourceError>>> + Send + '_>>
    {
        let next = {
            let mut state = self.state.lock().unwrap();
            let next = state.script.pop_front();
            if next.is_none() {
                if let Some(shutdown) = state.stop_when_drained.take() {
                    let _ = shutdown.send(true);
                }
            }
            if let Some(Scripted::Message(message)) = &next {
                let offset = message.offset;
                state.delivered.push(offset);
            }
            next
        };

        Box::pin(async move {
            match next {
                Some(Scripted::Message(message)) => Some(Ok(message)),
                Some(Scripted::Error(error)) => Some(Err(error)),
                Some(Scripted::Idle) | None => {
                    tokio::time::sleep(timeout).await;
                    None
                }
            }
        })
    }

    fn commit(&mut self) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits {
            return Err(SourceError::Broker("commit rejected by test source".to_string()));
        }
        let position = state.delivered.last().copied();
        state.commits.push(position);
        Ok(())
    }

    fn commit_final(&mut self) -> Result<(), SourceError> {
        self.commit()?;
        self.state.lock().unwrap().final_commits += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}
