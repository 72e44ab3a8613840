//! Test modules for the server crate

mod api_tests;
mod executor_tests;
