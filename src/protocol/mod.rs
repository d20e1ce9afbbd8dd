//! Wire messages for the `tei.v1.Embed` gRPC service.
//!
//! Layout follows the text-embeddings-inference `Embed` service with an
//! added `model` field selecting the model per request:
//!
//! ```text
//! service Embed {
//!   rpc Embed (EmbedRequest) returns (EmbedResponse);
//!   rpc EmbedBatch (EmbedBatchRequest) returns (EmbedBatchResponse);
//! }
//! ```
//!
//! `truncate`, `normalize`, `truncation_direction`, `prompt_name` and
//! `dimensions` are accepted for client compatibility; the models decide
//! truncation and normalization themselves.

pub mod http;

// Generated by build.rs: `embed_server` and `embed_client`
include!(concat!(env!("OUT_DIR"), "/tei.v1.Embed.rs"));

/// Single-text embedding request
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmbedRequest {
    #[prost(string, tag = "1")]
    pub inputs: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub truncate: bool,
    #[prost(bool, tag = "3")]
    pub normalize: bool,
    #[prost(int32, tag = "4")]
    pub truncation_direction: i32,
    #[prost(string, optional, tag = "5")]
    pub prompt_name: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(uint32, optional, tag = "6")]
    pub dimensions: ::core::option::Option<u32>,
    /// Empty selects the server's default model
    #[prost(string, tag = "7")]
    pub model: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmbedResponse {
    #[prost(float, repeated, tag = "1")]
    pub embeddings: ::prost::alloc::vec::Vec<f32>,
}

/// Batch embedding request; one vector is returned per input, in order
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmbedBatchRequest {
    #[prost(string, repeated, tag = "1")]
    pub inputs: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(bool, tag = "2")]
    pub truncate: bool,
    #[prost(bool, tag = "3")]
    pub normalize: bool,
    #[prost(int32, tag = "4")]
    pub truncation_direction: i32,
    #[prost(string, optional, tag = "5")]
    pub prompt_name: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(uint32, optional, tag = "6")]
    pub dimensions: ::core::option::Option<u32>,
    /// Empty selects the server's default model
    #[prost(string, tag = "7")]
    pub model: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Embedding {
    #[prost(float, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmbedBatchResponse {
    #[prost(message, repeated, tag = "1")]
    pub embeddings: ::prost::alloc::vec::Vec<Embedding>,
}

/// `None` when the wire field is empty
pub(crate) fn model_field(model: &str) -> Option<&str> {
    if model.is_empty() {
        None
    } else {
        Some(model)
    }
}
