pub mod processing;
pub mod submission;

pub use processing::SubmissionForProcessing;
pub use submission::{ParticipantScore, Problem, Submission, Test, TestRun};
