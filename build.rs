//! Generates the `tei.v1.Embed` gRPC service stubs.
//!
//! Messages are hand-written prost structs in `src/protocol/mod.rs`, so the
//! manual builder is used and no `protoc` is required.

fn main() {
    let embed = |name: &str, route: &str, input: &str, output: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type(input)
            .output_type(output)
            .codec_path("tonic::codec::ProstCodec")
            .build()
    };

    let service = tonic_build::manual::Service::builder()
        .name("Embed")
        .package("tei.v1")
        .method(embed(
            "embed",
            "Embed",
            "crate::protocol::EmbedRequest",
            "crate::protocol::EmbedResponse",
        ))
        .method(embed(
            "embed_batch",
            "EmbedBatch",
            "crate::protocol::EmbedBatchRequest",
            "crate::protocol::EmbedBatchResponse",
        ))
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
