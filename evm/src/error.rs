use std::{fmt, process::ExitCode};

#[derive(Debug)]
pub enum BlockDbError {
    /// Fatal error. Should not retry.
    Fatal,
    /// Configuration error. Should not retry.
    Configuration,
    /// The push feed ended. The process should be restarted.
    StreamEnded,
}

pub type Result<T> = error_stack::Result<T, BlockDbError>;

impl error_stack::Context for BlockDbError {}

impl fmt::Display for BlockDbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockDbError::Fatal => f.write_str("blockdb error: fatal"),
            BlockDbError::Configuration => f.write_str("blockdb error: configuration"),
            BlockDbError::StreamEnded => f.write_str("blockdb error: push feed ended"),
        }
    }
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl<T> ReportExt for Result<T> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.downcast_ref::<BlockDbError>() {
                    Some(BlockDbError::Configuration) => ExitCode::from(78),
                    Some(BlockDbError::StreamEnded) => ExitCode::from(75),
                    Some(BlockDbError::Fatal) => ExitCode::FAILURE,
                    None => ExitCode::FAILURE,
                }
            }
        }
    }
}
