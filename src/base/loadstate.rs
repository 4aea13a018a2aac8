//! Progress reporting for in-flight requests.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// The externally observable state of a logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Not started, or finished.
    #[default]
    Idle,
    /// Consulting the response cache.
    ResolvingCache,
    /// Opening or reusing a connection.
    Connecting,
    /// Writing request headers and body.
    SendingRequest,
    /// Waiting for the status line and headers.
    WaitingForResponse,
    /// Response headers received; body available.
    ReadingResponse,
}

impl LoadState {
    fn as_u8(self) -> u8 {
        match self {
            LoadState::Idle => 0,
            LoadState::ResolvingCache => 1,
            LoadState::Connecting => 2,
            LoadState::SendingRequest => 3,
            LoadState::WaitingForResponse => 4,
            LoadState::ReadingResponse => 5,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoadState::ResolvingCache,
            2 => LoadState::Connecting,
            3 => LoadState::SendingRequest,
            4 => LoadState::WaitingForResponse,
            5 => LoadState::ReadingResponse,
            _ => LoadState::Idle,
        }
    }
}

/// Shared view of one request's progress. Clones observe the same request;
/// reads are wait-free and may trail the engine by one transition.
#[derive(Debug, Clone, Default)]
pub struct LoadStateHandle(Arc<AtomicU8>);

impl LoadStateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> LoadState {
        LoadState::from_u8(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, state: LoadState) {
        self.0.store(state.as_u8(), Ordering::Relaxed);
    }
}
