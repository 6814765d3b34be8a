//! Backend output classification benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use clusterpost_core::engine::{lsf, pbs, slurm, unix, CommandOutput};
use clusterpost_core::JobDocument;

fn benchmark_submission_parsing(c: &mut Criterion) {
    c.bench_function("lsf_parse_submission", |b| {
        b.iter(|| lsf::parse_submission(black_box("Job <898104> is submitted to default queue <day>.")))
    });
    c.bench_function("slurm_parse_submission", |b| {
        b.iter(|| slurm::parse_submission(black_box("Submitted batch job 3053044\n")))
    });
    c.bench_function("pbs_parse_submission", |b| {
        b.iter(|| pbs::parse_submission(black_box("4213.torque01.example.edu\n")))
    });
}

fn benchmark_status_classification(c: &mut Criterion) {
    let bjobs = CommandOutput::new(
        0,
        "JOBID   USER    STAT  QUEUE      FROM_HOST   EXEC_HOST   JOB_NAME   SUBMIT_TIME\n\
         898104  jprieto RUN   day        killdevil   c-199-2     jprieto    Mar 11 15:02\n",
        "",
    );
    let squeue = CommandOutput::new(0, "3053044 general_b wrap jprieto R 5:00 1 c0812\n", "");
    let qstat = CommandOutput::new(
        0,
        "<Data><Job><Job_Id>4213.torque</Job_Id><job_state>R</job_state></Job></Data>",
        "",
    );
    let ps = CommandOutput::new(
        0,
        "    PID TTY      STAT   TIME COMMAND\n  41235 ?        S      0:02 python train.py\n",
        "",
    );

    c.bench_function("lsf_classify_status", |b| b.iter(|| lsf::classify_status(black_box(&bjobs))));
    c.bench_function("slurm_classify_status", |b| {
        b.iter(|| slurm::classify_status(black_box(&squeue)))
    });
    c.bench_function("pbs_classify_status", |b| b.iter(|| pbs::classify_status(black_box(&qstat))));
    c.bench_function("unix_classify_status", |b| {
        b.iter(|| unix::classify_status(black_box(&ps), "python"))
    });
}

fn benchmark_document_decoding(c: &mut Criterion) {
    let raw = r#"{
        "_id": "5b0e1f2a", "_rev": "3-abc", "executable": "python",
        "parameters": [{"flag": "--input", "name": "input.txt"}, {"flag": "-n", "name": 4}],
        "inputs": [{"name": "input.txt"}],
        "outputs": [{"type": "file", "name": "result.txt"}, {"type": "tar.gz", "name": "cwd"}],
        "userEmail": "jprieto@example.edu", "executionserver": "longleaf",
        "jobstatus": {"status": "RUN", "jobid": "3053044"}
    }"#;
    c.bench_function("job_document_decode", |b| {
        b.iter(|| serde_json::from_str::<JobDocument>(black_box(raw)).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_submission_parsing,
    benchmark_status_classification,
    benchmark_document_decoding
);
criterion_main!(benches);
