pub mod callback_http_repository;
pub mod source_file_s3_repository;
