//! Definition of errors.

use std::io;

use thiserror::Error;

/// Failure of a `HazardEpoch` operation.
#[derive(Error, PartialEq, Eq, Copy, Clone, Debug)]
pub enum EpochError {
    /// Current thread has already assigned a version handle
    #[error("current thread has already assigned a version handle")]
    Busy,
    /// Thread number overflow
    #[error("thread number overflow, tid={0}")]
    ThreadNumOverflow(usize),
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
}

/// Rejected run configuration. Nothing has been started when one of these is returned.
#[derive(Error, PartialEq, Eq, Clone, Debug)]
pub enum ValidationError {
    #[error("There must be at least 2 cores")]
    TooFewCores(usize),
    #[error("core {0} is listed more than once")]
    DuplicateCore(usize),
    #[error("test should run for at least 5 seconds")]
    DurationTooShort(u64),
    #[error("we must add at least 1 object in database")]
    NoObjects,
    #[error("there must be at least 1 reader thread")]
    NoReaders,
    #[error("bucket count must be a power of two, got {0}")]
    BucketCount(usize),
}

/// Failure to pin a thread to a core.
#[derive(Error, PartialEq, Eq, Clone, Debug)]
pub enum AffinityError {
    #[error("cannot list the cores available to this process")]
    NoCoreList,
    #[error("core {0} is not available to this process")]
    Unavailable(usize),
    #[error("cannot bind thread to core {0}")]
    BindFailed(usize),
}

/// Everything that can abort a benchmark run.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Affinity(#[from] AffinityError),
    #[error("hash table operation failed")]
    Table(#[from] EpochError),
    #[error("cannot start thread {name}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("reader {0} panicked")]
    ReaderPanicked(usize),
    #[error("reader {0} exited before reporting its core binding")]
    ReaderLost(usize),
    #[error("cannot install signal handler")]
    Signal(#[source] io::Error),
    #[error("cannot write report")]
    Output(#[from] io::Error),
}

impl BenchError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// This error followed by each of its sources, separated by `: `.
    pub fn describe(&self) -> String {
        let mut msg = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(s) = source {
            msg.push_str(": ");
            msg.push_str(&s.to_string());
            source = s.source();
        }
        msg
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_base() {
        let s = EpochError::Busy;
        let a = format!("{}", s);
        assert_eq!(a, "current thread has already assigned a version handle");
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            ValidationError::TooFewCores(1).to_string(),
            "There must be at least 2 cores"
        );
        assert_eq!(
            ValidationError::DurationTooShort(4).to_string(),
            "test should run for at least 5 seconds"
        );
        assert_eq!(
            ValidationError::NoObjects.to_string(),
            "we must add at least 1 object in database"
        );
    }

    #[test]
    fn test_wrapping() {
        let e: BenchError = AffinityError::Unavailable(7).into();
        assert_eq!(e.to_string(), "core 7 is not available to this process");
        assert_eq!(e.exit_code(), 1);
        assert_eq!(e.describe(), "core 7 is not available to this process");
        let e: BenchError = EpochError::ThreadNumOverflow(300).into();
        assert_eq!(e.to_string(), "hash table operation failed");
        assert_eq!(
            e.describe(),
            "hash table operation failed: thread number overflow, tid=300"
        );
    }
}
