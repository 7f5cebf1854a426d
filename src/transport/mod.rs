pub mod http_client;

pub mod pipeline;

pub use pipeline::RequestPipeline;
