//! HTTP protocol client for a ComfyUI workflow backend.
//!
//! - [`api`]: REST wrappers (upload, submit, history, view).
//! - [`history`]: interpretation of `/history/{prompt_id}` entries.
//! - [`template`]: placeholder substitution into workflow templates.
//! - [`executor`]: the upload, fill, submit, poll and harvest cycle for one job.

pub mod api;
pub mod executor;
pub mod history;
pub mod template;

pub use api::{ComfyUIApi, ComfyUIApiError};
pub use executor::{ExecutionConfig, ExecutionError, ExecutionResult, JobExecutionClient, JobRequest};
pub use template::{Substitutions, TemplateError, WorkflowTemplate};
