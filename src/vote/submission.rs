//! Raw answers from a submitted vote form.
//!
//! Form fields are named `question_{q}` for single answers, `vote_{q}_{r}`
//! for grid cells and `subjective_answer` for the free-text box.

use std::collections::BTreeMap;

pub const FREE_TEXT_FIELD: &str = "subjective_answer";

/// Addresses one answer slot of a survey.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnswerKey {
    Question(i32),
    Cell { question_id: i32, respondent_id: i32 },
}

impl AnswerKey {
    /// Parses a form field name. Unknown names yield `None`.
    pub fn parse_field(name: &str) -> Option<Self> {
        if let Some(rest) = name.strip_prefix("question_") {
            return rest.parse().ok().map(AnswerKey::Question);
        }
        if let Some(rest) = name.strip_prefix("vote_") {
            let (q, r) = rest.split_once('_')?;
            return Some(AnswerKey::Cell {
                question_id: q.parse().ok()?,
                respondent_id: r.parse().ok()?,
            });
        }
        None
    }

    pub fn field_name(&self) -> String {
        match self {
            AnswerKey::Question(q) => format!("question_{}", q),
            AnswerKey::Cell {
                question_id,
                respondent_id,
            } => format!("vote_{}_{}", question_id, respondent_id),
        }
    }
}

/// One participant's answers to one survey, as submitted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Submission {
    answers: BTreeMap<AnswerKey, String>,
    free_text: Option<String>,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a submission from form pairs. Unrecognised fields are dropped.
    pub fn from_form<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut submission = Self::new();
        for (name, value) in fields {
            let name = name.as_ref();
            if name == FREE_TEXT_FIELD {
                submission.free_text = Some(value.as_ref().to_string());
            } else if let Some(key) = AnswerKey::parse_field(name) {
                submission.insert(key, value.as_ref());
            }
        }
        submission
    }

    /// Records an answer. Surrounding whitespace is dropped.
    pub fn insert(&mut self, key: AnswerKey, value: &str) {
        self.answers.insert(key, value.trim().to_string());
    }

    pub fn with_answer(mut self, key: AnswerKey, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_free_text(mut self, text: &str) -> Self {
        self.free_text = Some(text.to_string());
        self
    }

    /// The answer for `key`, if one was given and is not blank.
    pub fn answered(&self, key: &AnswerKey) -> Option<&str> {
        self.answers
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Free text exactly as typed.
    pub fn free_text(&self) -> Option<&str> {
        self.free_text.as_deref()
    }

    /// Field name to value, for re-filling the form after a rejection.
    pub fn to_form_fields(&self) -> BTreeMap<String, String> {
        let mut fields: BTreeMap<String, String> = self
            .answers
            .iter()
            .map(|(k, v)| (k.field_name(), v.clone()))
            .collect();
        if let Some(text) = &self.free_text {
            fields.insert(FREE_TEXT_FIELD.to_string(), text.clone());
        }
        fields
    }
}
