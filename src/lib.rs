//! Survey and voting site.
//!
//! Participants sign in through single-use QR tokens, fill in a survey and
//! submit. Submissions are validated and assembled on the request path, then
//! handed to a background writer that persists them transactionally.

pub mod access;
pub mod app_config;
pub mod db;
pub mod editor;
pub mod orm;
pub mod results;
pub mod survey;
pub mod vote;
pub mod web;
