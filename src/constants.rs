//! Shared constants: file names inside a job working directory, markers,
//! queue names and default cadences.

/// Captured standard output of a backend job, inside its working directory.
pub const STDOUT_FILE: &str = "stdout.out";

/// Captured standard error of a backend job, inside its working directory.
pub const STDERR_FILE: &str = "stderr.err";

/// Output name meaning "the whole working directory" for `tar.gz` outputs.
pub const CWD_MARKER: &str = "cwd";

/// Suffix of compressed output archives.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Default script header for script based backends.
pub const DEFAULT_HASH_BANG: &str = "#!/bin/bash";

/// Token file name written on execution server hosts.
pub const TOKEN_FILE: &str = ".token";

/// Recorded on a job held in DOWNLOADING.
pub const INPUTS_PENDING_ERROR: &str = "Unable to retrieve all the input data";

/// Default program invoked on a peer execution server.
pub const DEFAULT_REMOTE_COMMAND: &str = "clusterpost-execution";

pub mod queues {
    pub const SUBMIT: &str = "submit";
    pub const STATUS: &str = "status";
    pub const KILL: &str = "kill";
    pub const DELETE: &str = "delete";
}

pub mod cadence {
    /// Base period of the queue drain tick, multiplied by the worker id.
    pub const DEFAULT_TICK_INTERVAL_SECONDS: u64 = 60;
    /// Base period of the recovery scan, multiplied by the worker id.
    pub const DEFAULT_RECOVERY_INTERVAL_SECONDS: u64 = 600;
    pub const DEFAULT_TUNNEL_CHECK_INTERVAL_SECONDS: u64 = 600;
    pub const DEFAULT_TOKEN_EXPIRY_HOURS: u64 = 24 * 365;
}
