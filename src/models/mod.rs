pub mod batch;
pub mod evaluation;
pub mod job;
pub mod loaders;
pub mod progress;
pub mod question;
pub mod record;

pub use batch::{Batch, BatchLimits};
pub use evaluation::{EvaluationResult, GradedAnswer, OverallPerformance, Score, StudentInfo};
pub use job::{DocumentSource, EvaluationJob};
pub use loaders::{load_all_jobs, load_job};
pub use progress::ProgressEvent;
pub use question::{QuestionKey, QuestionRecord, StudentAnswer, MAIN_SECTION};
pub use record::{EvaluationRecord, EvaluationStatus};
