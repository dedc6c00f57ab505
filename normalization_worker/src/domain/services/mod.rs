pub mod archive_extractor;
pub mod batch_pipeline;
pub mod converters;
pub mod scratch_workspace;
