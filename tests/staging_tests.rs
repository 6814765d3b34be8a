//! Input and output staging against the in-memory store.

mod common;

use common::*;

use clusterpost_core::models::{JobInput, JobOutput, OutputType};
use clusterpost_core::staging::DataStager;
use clusterpost_core::test_helpers::job_with_staging;

fn stager(env: &clusterpost_core::test_helpers::TestEnvironment) -> DataStager {
    DataStager::new(env.store.clone(), env.storage_dir.clone())
}

#[tokio::test]
async fn test_fetched_inputs_are_not_downloaded_twice() {
    let (_dir, env) = environment();
    store_job(&env, job_with_staging("stage-1", "local")).await;
    env.store.seed_attachment("stage-1", "input.txt", "abc");
    let mut job = reload(&env, "stage-1").await;
    let stager = stager(&env);
    let cwd = stager.create_working_dir("stage-1").await.unwrap();

    job.job_status.download_status = stager.fetch_inputs(&job, &cwd).await;
    assert!(job.job_status.download_status[0].ok);
    assert_eq!(env.store.download_count(), 1);

    job.job_status.download_status = stager.fetch_inputs(&job, &cwd).await;
    assert!(job.job_status.download_status[0].ok);
    assert_eq!(env.store.download_count(), 1);
}

#[tokio::test]
async fn test_removed_input_file_is_fetched_again() {
    let (_dir, env) = environment();
    store_job(&env, job_with_staging("stage-2", "local")).await;
    env.store.seed_attachment("stage-2", "input.txt", "abc");
    let mut job = reload(&env, "stage-2").await;
    let stager = stager(&env);
    let cwd = stager.create_working_dir("stage-2").await.unwrap();

    job.job_status.download_status = stager.fetch_inputs(&job, &cwd).await;
    std::fs::remove_file(cwd.join("input.txt")).unwrap();
    job.job_status.download_status = stager.fetch_inputs(&job, &cwd).await;

    assert_eq!(env.store.download_count(), 2);
    assert!(cwd.join("input.txt").exists());
}

#[tokio::test]
async fn test_only_failed_outputs_are_retried() {
    let (_dir, env) = environment();
    let mut job = store_job(&env, job_with_staging("stage-3", "local")).await;
    let stager = stager(&env);
    stager.create_working_dir("stage-3").await.unwrap();
    write_outputs(&env, "stage-3");
    env.store.fail_attachment("plots/raw/loss.csv");

    job.job_status.upload_status = stager.publish_outputs(&job, &env.job_dir("stage-3")).await;
    let first: Vec<bool> = job.job_status.upload_status.iter().map(|s| s.ok).collect();
    assert_eq!(first, vec![true, false, true]);
    let directory = &job.job_status.upload_status[1];
    assert!(directory.files[0].ok);
    assert!(!directory.files[1].ok);

    env.store.clear_failures();
    let uploads_before = env.store.upload_count();
    job.job_status.upload_status = stager.publish_outputs(&job, &env.job_dir("stage-3")).await;

    assert!(job.job_status.upload_status.iter().all(|s| s.ok));
    // only the two files of the directory output went out again
    assert_eq!(env.store.upload_count() - uploads_before, 2);
}

#[tokio::test]
async fn test_missing_output_file_is_reported() {
    let (_dir, env) = environment();
    let mut job = store_job(&env, clusterpost_core::test_helpers::sample_job("stage-4", "local")).await;
    job.outputs.push(JobOutput::new(OutputType::File, "missing.txt"));
    let stager = stager(&env);
    let cwd = stager.create_working_dir("stage-4").await.unwrap();

    let uploads = stager.publish_outputs(&job, &cwd).await;

    assert_eq!(uploads.len(), 1);
    assert!(!uploads[0].ok);
    assert!(uploads[0].error.is_some());
}

#[tokio::test]
async fn test_named_directory_archive_is_attached_under_its_name() {
    let (_dir, env) = environment();
    let mut job = store_job(&env, clusterpost_core::test_helpers::sample_job("stage-5", "local")).await;
    job.outputs.push(JobOutput::new(OutputType::TarGz, "plots/"));
    let stager = stager(&env);
    stager.create_working_dir("stage-5").await.unwrap();
    write_outputs(&env, "stage-5");

    let uploads = stager.publish_outputs(&job, &env.job_dir("stage-5")).await;

    assert_eq!(uploads[0].name.as_deref(), Some("plots.tar.gz"));
    let archive = env.store.attachment("stage-5", "plots.tar.gz").unwrap();
    // gzip magic
    assert_eq!(&archive[..2], &[0x1f, 0x8b]);
}

#[tokio::test]
async fn test_remote_input_is_requested_from_the_store() {
    let (_dir, env) = environment();
    let mut job = clusterpost_core::test_helpers::sample_job("stage-6", "local");
    job.inputs.push(JobInput {
        remote: Some(serde_json::json!({"serverCodename": "gateway", "uri": "/data/reference.fa"})),
        ..JobInput::named("reference.fa")
    });
    let job = store_job(&env, job).await;
    let stager = stager(&env);
    let cwd = stager.create_working_dir("stage-6").await.unwrap();

    let status = stager.fetch_inputs(&job, &cwd).await;

    // the store was asked even though the document carries no attachment
    assert_eq!(env.store.download_count(), 1);
    assert!(!status[0].ok);
    assert!(!status[0].error.as_deref().unwrap().contains("missing attachment"));
}
