mod cache;
mod comparison;
mod evaluation;
mod rubric;
mod transcript;

pub use cache::*;
pub use comparison::*;
pub use evaluation::*;
pub use rubric::*;
pub use transcript::*;
