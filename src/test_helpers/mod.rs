// Test Helpers Module - shared fixtures for unit and integration tests
//
// Scripted backend command output and ready-made job documents, so engine,
// staging and lifecycle tests run without a batch scheduler or a CouchDB.

pub mod fixtures;
pub mod scripted_runner;

pub use fixtures::{job_with_staging, local_config, sample_job, TestEnvironment};
pub use scripted_runner::ScriptedCommandRunner;
