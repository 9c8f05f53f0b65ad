//! Property test modules

mod classify_tests;
mod normalize_tests;
mod retry_tests;
mod sanitize_tests;
