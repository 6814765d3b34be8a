pub mod job;

pub use job::{
    JobDocument, JobInput, JobOutput, JobStatus, OutputType, Parameter, TransferStatus,
};
