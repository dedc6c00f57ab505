pub mod handler_normalization_job;
