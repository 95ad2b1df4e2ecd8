//! SeaORM entities. One module per table.

pub mod access_tokens;
pub mod free_text_answers;
pub mod participants;
pub mod questions;
pub mod respondents;
pub mod surveys;
pub mod votes;
