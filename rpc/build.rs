fn main() {
    // Server-side codegen is unused by the control plane binary (the node
    // RPC server is an external collaborator, spec.md §1) but is kept on,
    // matching the teacher's own `rpc/build.rs`, so that tests can stand
    // up an in-process fake node without a second proto compilation pass.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile(&["proto/mayastor.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("mayastor protobuf compilation failed: {}", e));
}
