//! Drives a [`Conversation`] on the tokio runtime.
//!
//! The conversation only describes what should happen next; the session
//! carries those effects out. Typing delays and the advice fetch run as
//! spawned tasks that report back over a channel, so every state change
//! still happens on the task that owns the session, one event at a time.
//! Dropping the session aborts whatever is still in flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::advice::AdviceClient;
use crate::catalog::Catalog;
use crate::constants;
use crate::conversation::{Conversation, Effect, Event, TransitionError, ViewState};

/// Timing of the simulated bot "typing".
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub typing_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            typing_delay: Duration::from_millis(constants::DEFAULT_TYPING_DELAY_MS),
        }
    }
}

impl Pacing {
    pub fn instant() -> Self {
        Self {
            typing_delay: Duration::ZERO,
        }
    }
}

/// Spawned tasks owned by a session. Aborted on drop.
#[derive(Debug, Default)]
struct ScopedTasks {
    handles: Vec<JoinHandle<()>>,
}

impl ScopedTasks {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(handle);
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for ScopedTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

pub struct Session {
    id: Uuid,
    conversation: Conversation,
    advisor: AdviceClient,
    pacing: Pacing,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    tasks: ScopedTasks,
    torn_down: bool,
}

impl Session {
    pub fn new(catalog: Arc<Catalog>, advisor: AdviceClient, pacing: Pacing) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        info!(session = %id, questions = catalog.len(), "Session created");
        Self {
            id,
            conversation: Conversation::new(catalog),
            advisor,
            pacing,
            events_tx,
            events_rx,
            tasks: ScopedTasks::default(),
            torn_down: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn view(&self) -> ViewState {
        self.conversation.view()
    }

    /// Whether a timer or the advice fetch is still outstanding.
    pub fn is_busy(&self) -> bool {
        self.conversation.is_typing() || self.conversation.is_loading_ai_response()
    }

    /// Applies one event and starts any effects it produced.
    pub fn dispatch(&mut self, event: Event) -> Result<(), TransitionError> {
        let name = event.name();
        let effects = self.conversation.apply(event).map_err(|e| {
            warn!(session = %self.id, event = name, error = %e, "Rejected event");
            e
        })?;
        debug!(session = %self.id, event = name, phase = ?self.conversation.phase(), "Applied event");
        for effect in effects {
            self.run_effect(effect);
        }
        Ok(())
    }

    /// Waits for the next timer or fetch to complete and applies its event.
    /// Pending forever when nothing is in flight, so it is safe to use in
    /// `tokio::select!` next to user input.
    pub async fn next_internal(&mut self) -> Result<(), TransitionError> {
        match self.events_rx.recv().await {
            Some(event) => self.dispatch(event),
            // The session holds a sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    /// Processes internal events until the conversation is idle again.
    /// Returns immediately once the session has been torn down.
    pub async fn settle(&mut self) {
        while self.is_busy() && !self.torn_down {
            if let Err(e) = self.next_internal().await {
                warn!(session = %self.id, error = %e, "Ignoring stale internal event");
            }
        }
    }

    /// Aborts pending timers and fetches. Their events are never applied.
    pub fn teardown(&mut self) {
        info!(session = %self.id, "Session torn down");
        self.torn_down = true;
        self.tasks.abort_all();
        while self.events_rx.try_recv().is_ok() {}
    }

    fn run_effect(&mut self, effect: Effect) {
        let tx = self.events_tx.clone();
        let handle = match effect {
            Effect::ScheduleTyping => {
                let delay = self.pacing.typing_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::TypingElapsed);
                })
            }
            Effect::FetchAdvice(answers) => {
                info!(session = %self.id, "Requesting advice");
                let advisor = self.advisor.clone();
                tokio::spawn(async move {
                    let result = advisor.fetch_advice(&answers).await;
                    let _ = tx.send(Event::AdviceReceived(result));
                })
            }
        };
        self.tasks.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::AdvisorConfig;
    use crate::conversation::Phase;

    fn offline_advisor() -> AdviceClient {
        AdviceClient::new(AdvisorConfig {
            // Nothing listens on port 9 of localhost.
            api_url: "http://127.0.0.1:9".to_string(),
            model: "test".to_string(),
            api_key: None,
            request_timeout: Some(Duration::from_secs(5)),
        })
        .unwrap()
    }

    fn session(pacing: Pacing) -> Session {
        Session::new(Arc::new(Catalog::builtin()), offline_advisor(), pacing)
    }

    #[tokio::test]
    async fn test_start_then_settle_shows_first_question() {
        let mut session = session(Pacing::instant());
        session.dispatch(Event::Start).unwrap();
        assert!(session.is_busy());
        session.settle().await;
        assert_eq!(session.conversation().phase(), Phase::AwaitingAnswer(0));
        assert_eq!(session.view().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_event_leaves_session_untouched() {
        let mut session = session(Pacing::instant());
        let err = session
            .dispatch(Event::AnswerSelected("Job Risk".to_string()))
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidPhase { .. }));
        assert!(!session.is_busy());
        assert_eq!(session.conversation().phase(), Phase::NotStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_delay_is_respected() {
        let mut session = session(Pacing {
            typing_delay: Duration::from_secs(2),
        });
        session.dispatch(Event::Start).unwrap();

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(session.events_rx.try_recv().is_err());

        session.next_internal().await.unwrap();
        assert_eq!(session.conversation().phase(), Phase::AwaitingAnswer(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_aborts_pending_timer() {
        let mut session = session(Pacing {
            typing_delay: Duration::from_secs(1),
        });
        session.dispatch(Event::Start).unwrap();
        session.teardown();

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(session.events_rx.try_recv().is_err());
        assert_eq!(session.conversation().phase(), Phase::Asking(0));
        assert!(session.conversation().messages().is_empty());
    }

    #[tokio::test]
    async fn test_settle_after_teardown_returns() {
        let mut session = session(Pacing {
            typing_delay: Duration::from_secs(60),
        });
        session.dispatch(Event::Start).unwrap();
        session.teardown();

        tokio::time::timeout(Duration::from_secs(1), session.settle())
            .await
            .expect("settle should not wait on aborted timers");
        assert_eq!(session.conversation().phase(), Phase::Asking(0));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back() {
        let mut session = session(Pacing::instant());
        session.dispatch(Event::Start).unwrap();
        session.settle().await;
        while let Some(option) = session.view().options.first().cloned() {
            session.dispatch(Event::AnswerSelected(option)).unwrap();
            session.settle().await;
        }
        session.dispatch(Event::AdviceRequested).unwrap();
        session.settle().await;

        let view = session.view();
        assert_eq!(view.phase, Phase::AdviceShown);
        assert!(!view.is_loading_ai_response);
        assert_eq!(
            view.messages.last().unwrap().text,
            crate::advice::COULD_NOT_CONNECT_MESSAGE
        );
    }
}
