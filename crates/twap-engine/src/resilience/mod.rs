pub mod retry;

pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
