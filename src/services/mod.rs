//! Stream multiplexing: remuxing processes, tuners and the tuner pool

pub mod transcode;
pub mod tuner;
pub mod tuner_pool;

#[cfg(test)]
pub(crate) mod test_support;

pub use transcode::{ProcessFactory, StreamProcess, TranscodeProcess, TranscodeProcessFactory};
pub use tuner::{Listener, Tuner, TunerState, TunerStatus};
pub use tuner_pool::TunerPool;
