#![allow(dead_code)]

use tempfile::TempDir;

use clusterpost_core::engine::CommandOutput;
use clusterpost_core::models::JobDocument;
use clusterpost_core::orchestration::LifecycleOrchestrator;
use clusterpost_core::store::DocumentStore;
use clusterpost_core::test_helpers::TestEnvironment;

/// A test environment rooted in a fresh temporary directory. Keep the
/// `TempDir` alive for the duration of the test.
pub fn environment() -> (TempDir, TestEnvironment) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let env = TestEnvironment::new(dir.path());
    (dir, env)
}

pub fn orchestrator(env: &TestEnvironment) -> LifecycleOrchestrator {
    LifecycleOrchestrator::new(&env.config, env.store.clone(), env.runner.clone())
}

pub async fn store_job(env: &TestEnvironment, mut job: JobDocument) -> JobDocument {
    env.store.save(&mut job).await.expect("store job");
    job
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput::new(0, stdout, "")
}

/// Write the outputs declared by `job_with_staging` into the job's working
/// directory.
pub fn write_outputs(env: &TestEnvironment, id: &str) {
    let cwd = env.job_dir(id);
    std::fs::write(cwd.join("result.txt"), "42\n").expect("write result");
    std::fs::create_dir_all(cwd.join("plots/raw")).expect("create plots");
    std::fs::write(cwd.join("plots/loss.png"), [0x89, 0x50, 0x4e, 0x47]).expect("write plot");
    std::fs::write(cwd.join("plots/raw/loss.csv"), "1,0.5\n").expect("write csv");
}

pub async fn reload(env: &TestEnvironment, id: &str) -> JobDocument {
    env.store.get(id).await.expect("reload job")
}
