//! Conversation state machine.
//!
//! All state for one questionnaire session lives in [`Conversation`]. It is
//! only mutated through [`Conversation::apply`], which either rejects the
//! event and leaves everything untouched, or performs the transition and
//! returns the side effects the caller must carry out (timers, the advice
//! fetch). The machine itself never sleeps and never does I/O.

use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::advice::AdviceError;
use crate::catalog::{Catalog, Question};

pub const WELCOME_MESSAGE: &str = "Hi, I'm Compass. Answer a few quick questions and I'll help you think through what AI means for your career.";
pub const CLOSING_MESSAGE: &str = "Thanks, that's everything I need. Would you like some personalised advice from our AI career assistant?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: u64,
    pub sender: Sender,
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "question", rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    /// Typing before question `i` is shown.
    Asking(usize),
    AwaitingAnswer(usize),
    /// Typing before the closing message.
    Concluding,
    Finished,
    AdviceLoading,
    AdviceShown,
}

#[derive(Debug)]
pub enum Event {
    Start,
    AnswerSelected(String),
    TypingElapsed,
    AdviceRequested,
    AdviceReceived(Result<String, AdviceError>),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::AnswerSelected(_) => "answer_selected",
            Event::TypingElapsed => "typing_elapsed",
            Event::AdviceRequested => "advice_requested",
            Event::AdviceReceived(_) => "advice_received",
        }
    }
}

/// Work the caller has to do after a successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Feed back `Event::TypingElapsed` once the typing delay has passed.
    ScheduleTyping,
    /// Call the advice endpoint once and feed back `Event::AdviceReceived`.
    FetchAdvice(Vec<String>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("event '{event}' is not valid while {phase:?}")]
    InvalidPhase { event: &'static str, phase: Phase },
    #[error("'{option}' is not an option for question {question}")]
    UnknownOption { option: String, question: usize },
    #[error("advice has already been requested")]
    AdviceAlreadyRequested,
}

/// Serializable projection of the conversation, consumed by every front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub welcome: &'static str,
    pub phase: Phase,
    pub messages: Vec<Message>,
    pub chat_started: bool,
    pub is_typing: bool,
    pub is_loading_ai_response: bool,
    pub quiz_finished: bool,
    pub current_question_index: usize,
    pub question_count: usize,
    pub options: Vec<String>,
    pub can_request_advice: bool,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    catalog: Arc<Catalog>,
    phase: Phase,
    messages: Vec<Message>,
    answers: Vec<String>,
    next_message_id: u64,
}

impl Conversation {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            phase: Phase::NotStarted,
            messages: Vec::new(),
            answers: Vec::new(),
            next_message_id: 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn chat_started(&self) -> bool {
        self.phase != Phase::NotStarted
    }

    pub fn is_typing(&self) -> bool {
        matches!(self.phase, Phase::Asking(_) | Phase::Concluding)
    }

    pub fn is_loading_ai_response(&self) -> bool {
        self.phase == Phase::AdviceLoading
    }

    pub fn quiz_finished(&self) -> bool {
        matches!(
            self.phase,
            Phase::Concluding | Phase::Finished | Phase::AdviceLoading | Phase::AdviceShown
        )
    }

    pub fn current_question_index(&self) -> usize {
        match self.phase {
            Phase::NotStarted => 0,
            Phase::Asking(i) | Phase::AwaitingAnswer(i) => i,
            _ => self.catalog.len(),
        }
    }

    /// The question currently waiting for an answer, if any.
    pub fn current_question(&self) -> Option<&Question> {
        match self.phase {
            Phase::AwaitingAnswer(i) => self.catalog.get(i),
            _ => None,
        }
    }

    /// Options the user may pick right now. Empty unless a question is
    /// waiting for an answer.
    pub fn visible_options(&self) -> &[String] {
        self.current_question()
            .map(|q| q.options.as_slice())
            .unwrap_or(&[])
    }

    pub fn can_request_advice(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn view(&self) -> ViewState {
        ViewState {
            welcome: WELCOME_MESSAGE,
            phase: self.phase,
            messages: self.messages.clone(),
            chat_started: self.chat_started(),
            is_typing: self.is_typing(),
            is_loading_ai_response: self.is_loading_ai_response(),
            quiz_finished: self.quiz_finished(),
            current_question_index: self.current_question_index(),
            question_count: self.catalog.len(),
            options: self.visible_options().to_vec(),
            can_request_advice: self.can_request_advice(),
        }
    }

    pub fn start(&mut self) -> Result<Vec<Effect>, TransitionError> {
        self.apply(Event::Start)
    }

    pub fn submit_answer(&mut self, option: &str) -> Result<Vec<Effect>, TransitionError> {
        self.apply(Event::AnswerSelected(option.to_string()))
    }

    pub fn request_advice(&mut self) -> Result<Vec<Effect>, TransitionError> {
        self.apply(Event::AdviceRequested)
    }

    /// Performs one transition. On error nothing has changed.
    pub fn apply(&mut self, event: Event) -> Result<Vec<Effect>, TransitionError> {
        let invalid = |event: &Event, phase| TransitionError::InvalidPhase {
            event: event.name(),
            phase,
        };

        match (self.phase, event) {
            (Phase::NotStarted, Event::Start) => {
                self.phase = Phase::Asking(0);
                Ok(vec![Effect::ScheduleTyping])
            }
            (Phase::Asking(i), Event::TypingElapsed) => {
                let text = match self.catalog.get(i) {
                    Some(question) => question.text.clone(),
                    None => return Err(invalid(&Event::TypingElapsed, self.phase)),
                };
                self.push_message(Sender::Bot, text);
                self.phase = Phase::AwaitingAnswer(i);
                Ok(Vec::new())
            }
            (Phase::AwaitingAnswer(i), Event::AnswerSelected(option)) => {
                let known = self.catalog.get(i).is_some_and(|q| q.has_option(&option));
                if !known {
                    return Err(TransitionError::UnknownOption {
                        option,
                        question: i,
                    });
                }
                self.push_message(Sender::User, option.clone());
                self.answers.push(option);
                self.phase = if i + 1 < self.catalog.len() {
                    Phase::Asking(i + 1)
                } else {
                    Phase::Concluding
                };
                Ok(vec![Effect::ScheduleTyping])
            }
            (Phase::Concluding, Event::TypingElapsed) => {
                self.push_message(Sender::Bot, CLOSING_MESSAGE.to_string());
                self.phase = Phase::Finished;
                Ok(Vec::new())
            }
            (Phase::Finished, Event::AdviceRequested) => {
                self.phase = Phase::AdviceLoading;
                Ok(vec![Effect::FetchAdvice(self.answers.clone())])
            }
            (Phase::AdviceLoading | Phase::AdviceShown, Event::AdviceRequested) => {
                Err(TransitionError::AdviceAlreadyRequested)
            }
            (Phase::AdviceLoading, Event::AdviceReceived(result)) => {
                let text = match result {
                    Ok(text) => text,
                    Err(e) => e.fallback_message().to_string(),
                };
                self.push_message(Sender::Bot, text);
                self.phase = Phase::AdviceShown;
                Ok(Vec::new())
            }
            (phase, event) => Err(invalid(&event, phase)),
        }
    }

    fn push_message(&mut self, sender: Sender, text: String) {
        let message = Message {
            id: self.next_message_id,
            sender,
            text,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        };
        debug!(id = message.id, sender = ?message.sender, "Appending message");
        self.next_message_id += 1;
        self.messages.push(message);
    }
}
