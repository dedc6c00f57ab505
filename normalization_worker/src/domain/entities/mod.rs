pub mod callback_event;
pub mod extracted_entry;
pub mod job_log;
pub mod normalization_job;
pub mod output_page;
