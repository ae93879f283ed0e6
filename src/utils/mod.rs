pub mod inflight;
pub mod retry;
