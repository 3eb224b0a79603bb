//! Typed wrappers over the feature endpoints.
//!
//! Services hold no state beyond the shared `ApiClient`; authentication, refresh
//! and error normalization all happen there.

pub mod candidates;
pub mod jobs;
pub mod resumes;

pub use candidates::CandidateService;
pub use jobs::JobService;
pub use resumes::ResumeService;
