use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub text: String,
    pub options: Vec<String>,
}

impl Question {
    pub fn new(id: u32, text: impl Into<String>, options: &[&str]) -> Self {
        Self {
            id,
            text: text.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog has no questions")]
    Empty,
    #[error("question {0} has no options")]
    NoOptions(u32),
    #[error("duplicate question id {0}")]
    DuplicateId(u32),
}

/// Ordered, immutable list of questions. Once built it is only ever shared
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
    questions: Vec<Question>,
}

impl Catalog {
    pub fn new(questions: Vec<Question>) -> Result<Self, CatalogError> {
        if questions.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::new();
        for question in &questions {
            if question.options.is_empty() {
                return Err(CatalogError::NoOptions(question.id));
            }
            if !seen.insert(question.id) {
                return Err(CatalogError::DuplicateId(question.id));
            }
        }
        Ok(Self { questions })
    }

    /// The three questions the app ships with.
    pub fn builtin() -> Self {
        Self {
            questions: vec![
                Question::new(
                    1,
                    "What worries you most about AI and your career right now?",
                    &["Job Risk", "Keeping my skills relevant", "Using AI tools at work"],
                ),
                Question::new(
                    2,
                    "How long has this been on your mind?",
                    &["A few days", "A few weeks", "Months or longer"],
                ),
                Question::new(
                    3,
                    "Would you like practical next steps you can start this week?",
                    &["Yes, please", "Just the big picture"],
                ),
            ],
        }
    }

    /// Loads a catalog from a JSON array of questions.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let questions: Vec<Question> = serde_json::from_str(json)?;
        Self::new(questions)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
