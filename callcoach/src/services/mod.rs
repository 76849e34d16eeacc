mod cache_janitor;
mod coaching;
mod comparison;
mod orchestrator;
mod retry;

pub use cache_janitor::CacheJanitor;
pub use coaching::CoachingService;
pub use comparison::ComparisonEngine;
pub use orchestrator::{ConcurrentOrchestrator, EvaluationRequest, EvaluationRun, RunStats};
pub use retry::RetryPolicy;
