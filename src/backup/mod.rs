pub mod archive;
pub mod backup_config;
pub mod cleanup;
pub mod command;
pub mod compress;
pub mod job;
pub mod job_slot;
pub mod pipeline;
pub mod redacted;
pub mod result_error;
pub mod schedule;
pub mod secret;
pub mod sink;
pub mod upload;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
