//! Background acquisition: external tools, the serialized pipeline and the
//! pending-metadata retry pass.

pub mod media_tools;
pub mod metadata_retry;
pub mod pipeline_worker;
pub mod retry_index;
pub mod tools_probe;
